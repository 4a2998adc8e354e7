//! Boundary between circuit assembly and time integration.
//!
//! A [`DaeProblem`] carries an implicit residual `F(t, y, y') = 0`, a
//! consistent initial state and the algebraic/differential tag of every
//! unknown. Any [`Integrator`] may consume it; [`BackwardEuler`] is the
//! built-in fixed-grid implementation.

use std::fmt;

use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::circuit::VariableKind;
use crate::error::{CircuitError, Result};
use crate::solver::LinearSolver;

type ResidualFn<'a> = Box<dyn Fn(f64, &DVector<f64>, &DVector<f64>) -> DVector<f64> + 'a>;

/// Implicit DAE problem `F(t, y, y') = 0` over `t_span`
pub struct DaeProblem<'a> {
    residual: ResidualFn<'a>,
    y0: DVector<f64>,
    yd0: DVector<f64>,
    variable_kinds: Vec<VariableKind>,
    t_span: (f64, f64),
}

impl<'a> DaeProblem<'a> {
    /// Fails if the initial vectors and variable kinds disagree in length or
    /// if `t_span` is not a finite, increasing interval.
    pub fn new(
        residual: impl Fn(f64, &DVector<f64>, &DVector<f64>) -> DVector<f64> + 'a,
        y0: DVector<f64>,
        yd0: DVector<f64>,
        variable_kinds: Vec<VariableKind>,
        t_span: (f64, f64),
    ) -> Result<Self> {
        let (t0, tf) = t_span;
        if !(t0.is_finite() && tf.is_finite() && t0 < tf) {
            return Err(CircuitError::InvalidTimeSpan { t0, tf });
        }
        if yd0.len() != y0.len() {
            return Err(CircuitError::DimensionMismatch {
                what: "initial derivative",
                expected: y0.len(),
                actual: yd0.len(),
            });
        }
        if variable_kinds.len() != y0.len() {
            return Err(CircuitError::DimensionMismatch {
                what: "variable kinds",
                expected: y0.len(),
                actual: variable_kinds.len(),
            });
        }

        Ok(DaeProblem {
            residual: Box::new(residual),
            y0,
            yd0,
            variable_kinds,
            t_span,
        })
    }

    pub fn residual(&self, t: f64, y: &DVector<f64>, yd: &DVector<f64>) -> DVector<f64> {
        (self.residual)(t, y, yd)
    }

    pub fn size(&self) -> usize {
        self.y0.len()
    }

    pub fn y0(&self) -> &DVector<f64> {
        &self.y0
    }

    pub fn yd0(&self) -> &DVector<f64> {
        &self.yd0
    }

    pub fn variable_kinds(&self) -> &[VariableKind] {
        &self.variable_kinds
    }

    pub fn t_span(&self) -> (f64, f64) {
        self.t_span
    }
}

impl fmt::Debug for DaeProblem<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaeProblem")
            .field("size", &self.size())
            .field("t_span", &self.t_span)
            .field("variable_kinds", &self.variable_kinds)
            .finish_non_exhaustive()
    }
}

/// Where the integrator reports the solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputPoints {
    /// `n` evenly spaced points after `t0`, the last one at `tf`
    Count(usize),
    /// Explicit, strictly increasing times within `[t0, tf]`
    Times(Vec<f64>),
}

/// Integrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratorOptions {
    pub atol: f64,
    pub rtol: f64,
    pub max_steps: usize,
    /// Size of the first step from `t0`. `None` lets the integrator choose.
    pub initial_step: Option<f64>,
    pub output: OutputPoints,
    /// Leave algebraic unknowns out of the error norm
    pub suppress_algebraic: bool,
}

impl Default for IntegratorOptions {
    fn default() -> Self {
        IntegratorOptions {
            atol: 1e-6,
            rtol: 1e-3,
            max_steps: 10_000,
            initial_step: None,
            output: OutputPoints::Count(10_000),
            suppress_algebraic: true,
        }
    }
}

impl IntegratorOptions {
    /// Output times after `t0`, validated against `t_span`. An explicit `t0`
    /// entry is dropped since the initial state is always reported.
    pub fn output_times(&self, t_span: (f64, f64)) -> Result<Vec<f64>> {
        let (t0, tf) = t_span;
        match &self.output {
            OutputPoints::Count(n) => {
                let n = (*n).max(1);
                let mut times: Vec<f64> =
                    (1..n).map(|k| t0 + (tf - t0) * k as f64 / n as f64).collect();
                times.push(tf);
                Ok(times)
            }
            OutputPoints::Times(requested) => {
                let mut previous = t0;
                let mut times = Vec::with_capacity(requested.len());
                for (position, &t) in requested.iter().enumerate() {
                    if position == 0 && t == t0 {
                        continue;
                    }
                    if !(t.is_finite() && t > previous && t <= tf) {
                        return Err(CircuitError::invalid_parameter(
                            "integrator options",
                            "output time",
                            t,
                        ));
                    }
                    times.push(t);
                    previous = t;
                }
                Ok(times)
            }
        }
    }

    /// Weighted RMS norm of `delta` with weights `atol + rtol * |y|`
    fn error_norm(&self, delta: &DVector<f64>, y: &DVector<f64>, indices: &[usize]) -> f64 {
        if indices.is_empty() {
            return 0.0;
        }
        let sum: f64 = indices
            .iter()
            .map(|&i| {
                let weight = self.atol + self.rtol * y[i].abs();
                (delta[i] / weight).powi(2)
            })
            .sum();
        (sum / indices.len() as f64).sqrt()
    }
}

/// Solution samples `(t_k, y_k)` in increasing time order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    times: Vec<f64>,
    states: Vec<DVector<f64>>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, t: f64, y: DVector<f64>) {
        debug_assert!(self.times.last().map_or(true, |&last| t > last));
        self.times.push(t);
        self.states.push(y);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[DVector<f64>] {
        &self.states
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &DVector<f64>)> + '_ {
        self.times.iter().copied().zip(self.states.iter())
    }

    pub fn last(&self) -> Option<(f64, &DVector<f64>)> {
        self.iter().last()
    }

    /// Time series of one unknown
    pub fn component(&self, index: usize) -> Vec<f64> {
        self.states.iter().map(|state| state[index]).collect()
    }
}

/// A DAE time integrator
pub trait Integrator {
    fn name(&self) -> &str;

    /// Integrate `problem` over its time span. The first sample is the
    /// initial state at `t0`.
    fn integrate(
        &mut self,
        problem: &DaeProblem<'_>,
        options: &IntegratorOptions,
    ) -> Result<Trajectory>;
}

/// Fixed-step implicit Euler with a finite-difference Newton solve per step.
///
/// Steps land exactly on the requested output times. The first step from
/// `t0` is `initial_step` long when one is set. With [`BackwardEuler::max_step`],
/// each output interval is split into equal substeps no longer than it;
/// otherwise one step covers the interval.
#[derive(Debug, Clone)]
pub struct BackwardEuler {
    solver: LinearSolver,
    max_newton_iterations: usize,
    max_step: Option<f64>,
}

impl Default for BackwardEuler {
    fn default() -> Self {
        BackwardEuler {
            solver: LinearSolver::new(),
            max_newton_iterations: 10,
            max_step: None,
        }
    }
}

impl BackwardEuler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solver(solver: LinearSolver) -> Self {
        BackwardEuler {
            solver,
            ..Self::default()
        }
    }

    pub fn max_newton_iterations(mut self, iterations: usize) -> Self {
        self.max_newton_iterations = iterations.max(1);
        self
    }

    /// Upper bound on the step size
    pub fn max_step(mut self, step: f64) -> Self {
        self.max_step = Some(step);
        self
    }

    /// Solve `F(t, y, (y - y_prev) / h) = 0` for `y`.
    fn step(
        &self,
        problem: &DaeProblem<'_>,
        options: &IntegratorOptions,
        norm_indices: &[usize],
        t: f64,
        h: f64,
        y_prev: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let implicit = |y: &DVector<f64>| problem.residual(t, y, &((y - y_prev) / h));

        let mut y = y_prev.clone();
        for iteration in 0..self.max_newton_iterations {
            let residual = implicit(&y);
            let jacobian = finite_difference_jacobian(&implicit, &y, &residual);

            let (delta, _) = self
                .solver
                .solve_dense(&jacobian, &-residual)
                .map_err(|e| {
                    CircuitError::integration_failed(t, format!("Newton matrix rejected: {}", e))
                })?;
            y += &delta;

            let norm = options.error_norm(&delta, &y, norm_indices);
            if norm <= 0.1 {
                if iteration > 0 {
                    debug!("t = {:.6e}: Newton converged in {} iterations", t, iteration + 1);
                }
                return Ok(y);
            }
        }

        Err(CircuitError::integration_failed(
            t,
            format!(
                "Newton iteration did not converge in {} iterations",
                self.max_newton_iterations
            ),
        ))
    }
}

impl Integrator for BackwardEuler {
    fn name(&self) -> &str {
        "BackwardEuler"
    }

    fn integrate(
        &mut self,
        problem: &DaeProblem<'_>,
        options: &IntegratorOptions,
    ) -> Result<Trajectory> {
        let (t0, _) = problem.t_span();
        let output_times = options.output_times(problem.t_span())?;
        if let Some(step) = options.initial_step {
            if !(step.is_finite() && step > 0.0) {
                return Err(CircuitError::invalid_parameter(
                    "integrator options",
                    "initial_step",
                    step,
                ));
            }
        }
        if let Some(step) = self.max_step {
            if !(step.is_finite() && step > 0.0) {
                return Err(CircuitError::invalid_parameter(self.name(), "max_step", step));
            }
        }

        let norm_indices = norm_indices(problem.variable_kinds(), options.suppress_algebraic);

        let mut trajectory = Trajectory::new();
        let mut y = problem.y0().clone();
        let mut t = t0;
        trajectory.push(t, y.clone());

        let mut first_step = options.initial_step;
        let mut steps = 0;
        for &t_out in &output_times {
            for t_next in step_times(t, t_out, first_step.take(), self.max_step) {
                if steps >= options.max_steps {
                    return Err(CircuitError::integration_failed(
                        t,
                        format!("exceeded max_steps = {}", options.max_steps),
                    ));
                }
                y = self.step(problem, options, &norm_indices, t_next, t_next - t, &y)?;
                t = t_next;
                steps += 1;
            }

            trajectory.push(t, y.clone());
        }

        info!("{} finished: {} steps, {} output points", self.name(), steps, trajectory.len());
        Ok(trajectory)
    }
}

/// Step end times from `t` to `t_out`. A `first` step shorter than the
/// interval comes first; the rest is split into equal substeps no longer
/// than `max_step`. The last entry is exactly `t_out`.
fn step_times(t: f64, t_out: f64, first: Option<f64>, max_step: Option<f64>) -> Vec<f64> {
    let mut times = Vec::new();
    let mut start = t;
    if let Some(first) = first {
        if first < (t_out - t) * (1.0 - 1e-12) {
            start = t + first;
            times.push(start);
        }
    }

    let span = t_out - start;
    let substeps = match max_step {
        Some(step) => ((span / step) * (1.0 - 1e-12)).ceil().max(1.0) as usize,
        None => 1,
    };
    for k in 1..substeps {
        times.push(t_out - span * (substeps - k) as f64 / substeps as f64);
    }
    times.push(t_out);
    times
}

/// Unknowns that enter the Newton convergence norm. Falls back to every
/// unknown when suppression would leave none.
fn norm_indices(kinds: &[VariableKind], suppress_algebraic: bool) -> Vec<usize> {
    let differential: Vec<usize> = kinds
        .iter()
        .enumerate()
        .filter(|(_, &kind)| kind == VariableKind::Differential)
        .map(|(i, _)| i)
        .collect();

    if suppress_algebraic && !differential.is_empty() {
        differential
    } else {
        (0..kinds.len()).collect()
    }
}

/// Forward-difference Jacobian of `f` at `y`, with `f0 = f(y)`.
fn finite_difference_jacobian(
    f: &impl Fn(&DVector<f64>) -> DVector<f64>,
    y: &DVector<f64>,
    f0: &DVector<f64>,
) -> DMatrix<f64> {
    let n = y.len();
    let sqrt_eps = f64::EPSILON.sqrt();
    let mut jacobian = DMatrix::zeros(f0.len(), n);
    let mut perturbed = y.clone();

    for j in 0..n {
        let saved = perturbed[j];
        perturbed[j] = saved + sqrt_eps * saved.abs().max(1.0);
        let delta = perturbed[j] - saved;

        let column = (f(&perturbed) - f0) / delta;
        jacobian.set_column(j, &column);
        perturbed[j] = saved;
    }

    jacobian
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    /// y' = -y, written as y' + y = 0
    fn decay_problem(t_span: (f64, f64)) -> DaeProblem<'static> {
        DaeProblem::new(
            |_, y, yd| yd + y,
            dvector![1.0],
            dvector![-1.0],
            vec![VariableKind::Differential],
            t_span,
        )
        .unwrap()
    }

    #[test]
    fn test_problem_validation() {
        let residual = |_: f64, y: &DVector<f64>, _: &DVector<f64>| y.clone();
        let problem = |yd0: DVector<f64>, kinds: Vec<VariableKind>, t_span: (f64, f64)| {
            DaeProblem::new(residual, dvector![0.0], yd0, kinds, t_span)
        };

        let err = problem(dvector![0.0], vec![VariableKind::Algebraic], (1.0, 1.0)).unwrap_err();
        assert!(matches!(err, CircuitError::InvalidTimeSpan { .. }));

        let err =
            problem(dvector![0.0, 0.0], vec![VariableKind::Algebraic], (0.0, 1.0)).unwrap_err();
        assert!(matches!(err, CircuitError::DimensionMismatch { expected: 1, actual: 2, .. }));

        let err = problem(dvector![0.0], vec![], (0.0, 1.0)).unwrap_err();
        assert!(matches!(err, CircuitError::DimensionMismatch { what: "variable kinds", .. }));
    }

    #[test]
    fn test_default_options() {
        let options = IntegratorOptions::default();
        assert_eq!(options.atol, 1e-6);
        assert_eq!(options.rtol, 1e-3);
        assert_eq!(options.max_steps, 10_000);
        assert_eq!(options.initial_step, None);
        assert_eq!(options.output, OutputPoints::Count(10_000));
        assert!(options.suppress_algebraic);
    }

    #[test]
    fn test_output_times() {
        let options = IntegratorOptions {
            output: OutputPoints::Count(4),
            ..IntegratorOptions::default()
        };
        assert_eq!(options.output_times((0.0, 1.0)).unwrap(), vec![0.25, 0.5, 0.75, 1.0]);

        let options = IntegratorOptions {
            output: OutputPoints::Times(vec![0.0, 0.1, 0.7]),
            ..IntegratorOptions::default()
        };
        assert_eq!(options.output_times((0.0, 1.0)).unwrap(), vec![0.1, 0.7]);

        for bad in [vec![0.5, 0.2], vec![1.5], vec![0.3, 0.3]] {
            let options = IntegratorOptions {
                output: OutputPoints::Times(bad),
                ..IntegratorOptions::default()
            };
            assert!(options.output_times((0.0, 1.0)).is_err());
        }
    }

    #[test]
    fn test_norm_indices_fall_back_to_all() {
        use VariableKind::*;
        assert_eq!(norm_indices(&[Algebraic, Differential], true), vec![1]);
        assert_eq!(norm_indices(&[Algebraic, Differential], false), vec![0, 1]);
        assert_eq!(norm_indices(&[Algebraic, Algebraic], true), vec![0, 1]);
    }

    #[test]
    fn test_jacobian_of_linear_map() {
        let f = |y: &DVector<f64>| dvector![2.0 * y[0] - y[1], 3.0 * y[1]];
        let y = dvector![0.5, -2.0];
        let jacobian = finite_difference_jacobian(&f, &y, &f(&y));

        assert!((jacobian[(0, 0)] - 2.0).abs() < 1e-6);
        assert!((jacobian[(0, 1)] + 1.0).abs() < 1e-6);
        assert!(jacobian[(1, 0)].abs() < 1e-6);
        assert!((jacobian[(1, 1)] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_backward_euler_exponential_decay() {
        let problem = decay_problem((0.0, 1.0));
        let options = IntegratorOptions {
            output: OutputPoints::Count(10),
            ..IntegratorOptions::default()
        };

        let trajectory = BackwardEuler::new().max_step(2e-4).integrate(&problem, &options).unwrap();
        assert_eq!(trajectory.len(), 11);
        assert_eq!(trajectory.times()[0], 0.0);

        let (t_end, y_end) = trajectory.last().unwrap();
        assert_eq!(t_end, 1.0);
        assert!((y_end[0] - (-1.0f64).exp()).abs() < 1e-4);
    }

    #[test]
    fn test_max_steps_exceeded() {
        let problem = decay_problem((0.0, 1.0));
        let options = IntegratorOptions {
            output: OutputPoints::Count(100),
            max_steps: 50,
            ..IntegratorOptions::default()
        };

        let err = BackwardEuler::new().integrate(&problem, &options).unwrap_err();
        assert!(matches!(err, CircuitError::IntegrationFailed { .. }));
    }

    #[test]
    fn test_initial_step_sets_first_step() {
        let problem = decay_problem((0.0, 1.0));
        assert_eq!(problem.yd0()[0], -1.0);
        let options = IntegratorOptions {
            output: OutputPoints::Count(1),
            initial_step: Some(1e-3),
            ..IntegratorOptions::default()
        };

        // One step of 1e-3, then one step over the rest of the interval
        let trajectory = BackwardEuler::new().integrate(&problem, &options).unwrap();
        assert_eq!(trajectory.len(), 2);
        let (_, y_end) = trajectory.last().unwrap();
        let expected = 1.0 / (1.0 + 1e-3) / (1.0 + 0.999);
        assert!((y_end[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_step_times() {
        assert_eq!(step_times(0.0, 1.0, None, None), vec![1.0]);
        assert_eq!(step_times(0.0, 1.0, None, Some(0.25)), vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(step_times(0.0, 1.0, Some(0.5), None), vec![0.5, 1.0]);
        // A first step longer than the interval is dropped
        assert_eq!(step_times(0.0, 1.0, Some(2.0), Some(0.5)), vec![0.5, 1.0]);
    }

    #[test]
    fn test_invalid_step_sizes() {
        let problem = decay_problem((0.0, 1.0));
        let options = IntegratorOptions {
            initial_step: Some(-1.0),
            ..IntegratorOptions::default()
        };
        assert!(BackwardEuler::new().integrate(&problem, &options).is_err());

        let err = BackwardEuler::new()
            .max_step(0.0)
            .integrate(&problem, &IntegratorOptions::default())
            .unwrap_err();
        assert!(matches!(err, CircuitError::InvalidParameter { parameter: "max_step", .. }));
    }
}

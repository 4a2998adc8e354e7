//! Transient (DAE) system assembly.
//!
//! The circuit is written as
//!
//! ```text
//! F(t, y, y') = A * y' + B * y + C = 0
//! ```
//!
//! with `A` the mass matrix (capacitances, inductances), `B` the state matrix
//! (conductances, branch incidence) and `C` the source vector. Rows of `A`
//! that are entirely zero are algebraic constraints `B * y + C = 0`; with
//! capacitors open, `B` is exactly the DC matrix and `C` the negated DC
//! right-hand side, so the DC operating point is an equilibrium of the DAE.

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::circuit::{Circuit, IndexMap, NodeId, VariableKind, GROUND};
use crate::error::{CircuitError, Result};
use crate::integrator::{DaeProblem, Trajectory};
use crate::solver::LinearSolver;

/// State at `t0` handed to an integrator
#[derive(Debug, Clone, PartialEq)]
pub struct InitialState {
    pub y0: DVector<f64>,
    pub yd0: DVector<f64>,
}

/// Assembled DAE system `A * y' + B * y + C = 0`
#[derive(Debug, Clone)]
pub struct DaeSystem {
    /// A
    pub mass: DMatrix<f64>,
    /// B
    pub state: DMatrix<f64>,
    /// C
    pub constant: DVector<f64>,
    pub variable_kinds: Vec<VariableKind>,
    pub layout: IndexMap,
}

impl DaeSystem {
    pub fn assemble(circuit: &Circuit) -> Result<Self> {
        let layout = circuit.index_map();
        let size = layout.size();

        let mut mass = DMatrix::zeros(size, size);
        let mut state = DMatrix::zeros(size, size);
        let mut constant = DVector::zeros(size);

        for element in circuit.elements() {
            element.stamp_dae(&mut mass, &mut state, &mut constant, &layout)?;
        }

        let variable_kinds = circuit.variable_kinds_for(&layout);
        debug!(
            "DAE system: {} unknowns, {} differential",
            size,
            variable_kinds
                .iter()
                .filter(|&&kind| kind == VariableKind::Differential)
                .count()
        );
        debug!("A: {}", mass);
        debug!("B: {}", state);
        debug!("C: {}", constant);

        Ok(DaeSystem {
            mass,
            state,
            constant,
            variable_kinds,
            layout,
        })
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Indices of the algebraic unknowns (and rows)
    pub fn algebraic_indices(&self) -> Vec<usize> {
        self.variable_kinds
            .iter()
            .enumerate()
            .filter(|(_, &kind)| kind == VariableKind::Algebraic)
            .map(|(index, _)| index)
            .collect()
    }

    /// `A * yd + B * y + C`. Sources are constant, so `t` is unused.
    pub fn residual(&self, _t: f64, y: &DVector<f64>, yd: &DVector<f64>) -> DVector<f64> {
        &self.mass * yd + &self.state * y + &self.constant
    }

    /// Consistent initial state from the algebraic constraints.
    ///
    /// Differential rows of `B` are replaced by unit rows, so each
    /// differential unknown takes the value `-C` holds on its row and the
    /// algebraic unknowns follow from `B * y0 + C = 0`. Without a current
    /// source on a capacitor node this starts every capacitor uncharged and
    /// every inductor at rest. `yd0` is zero and left for the integrator to
    /// refine.
    pub fn consistent_initial_conditions(&self, solver: &LinearSolver) -> Result<InitialState> {
        self.solve_initial_state(None, solver)
    }

    /// Like [`DaeSystem::consistent_initial_conditions`], but with the
    /// differential unknowns pinned to their values in `seed`.
    ///
    /// Re-solving from a consistent state reproduces it. The seed is taken
    /// as given: a capacitor node pinned to a voltage its circuit cannot
    /// hold produces a state that is consistent but not physical.
    pub fn consistent_initial_conditions_from(
        &self,
        seed: &DVector<f64>,
        solver: &LinearSolver,
    ) -> Result<InitialState> {
        let size = self.size();
        if seed.len() != size {
            return Err(CircuitError::DimensionMismatch {
                what: "initial state seed",
                expected: size,
                actual: seed.len(),
            });
        }
        self.solve_initial_state(Some(seed), solver)
    }

    /// Solve `M * y0 = r` where `M` is `B` with unit differential rows and
    /// `r` is `-C`, with differential entries taken from `seed` when given.
    fn solve_initial_state(
        &self,
        seed: Option<&DVector<f64>>,
        solver: &LinearSolver,
    ) -> Result<InitialState> {
        let size = self.size();
        let mut constraints = self.state.clone();
        let mut rhs = -&self.constant;
        for (row, kind) in self.variable_kinds.iter().enumerate() {
            if *kind == VariableKind::Differential {
                constraints.row_mut(row).fill(0.0);
                constraints[(row, row)] = 1.0;
                if let Some(seed) = seed {
                    rhs[row] = seed[row];
                }
            }
        }

        let (y0, _) = solver
            .solve_dense(&constraints, &rhs)
            .map_err(|source| CircuitError::InconsistentInitialState { size, source })?;

        Ok(InitialState {
            y0,
            yd0: DVector::zeros(size),
        })
    }

    /// Package the residual, initial state and variable kinds for an integrator.
    pub fn problem(&self, initial: &InitialState, t_span: (f64, f64)) -> Result<DaeProblem<'_>> {
        DaeProblem::new(
            move |t, y, yd| self.residual(t, y, yd),
            initial.y0.clone(),
            initial.yd0.clone(),
            self.variable_kinds.clone(),
            t_span,
        )
    }
}

/// Integrator output with named access to node voltages and branch currents
#[derive(Debug, Clone)]
pub struct TransientSolution {
    trajectory: Trajectory,
    layout: IndexMap,
}

impl TransientSolution {
    pub fn new(trajectory: Trajectory, layout: IndexMap) -> Self {
        TransientSolution { trajectory, layout }
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn layout(&self) -> &IndexMap {
        &self.layout
    }

    pub fn times(&self) -> &[f64] {
        self.trajectory.times()
    }

    /// Series for `V<node>` or `I_<name>`, same conventions as the DC result
    pub fn signal(&self, key: &str) -> Option<Vec<f64>> {
        let (_, probe) = self.layout.probes().into_iter().find(|(name, _)| name == key)?;
        Some(
            self.trajectory
                .states()
                .iter()
                .map(|state| probe.scale * state[probe.index])
                .collect(),
        )
    }

    pub fn voltage(&self, node: NodeId) -> Option<Vec<f64>> {
        if node == GROUND {
            return Some(vec![0.0; self.trajectory.len()]);
        }
        self.signal(&format!("V{}", node))
    }

    pub fn current(&self, name: &str) -> Option<Vec<f64>> {
        self.signal(&format!("I_{}", name))
    }

    /// Names of every available signal, in layout order
    pub fn signal_names(&self) -> Vec<String> {
        self.layout.probes().into_iter().map(|(name, _)| name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;

    fn rc_circuit() -> Circuit {
        let mut circuit = Circuit::new("RC");
        circuit.add_element(Element::voltage_source("V1", 1, 0, 1.0).unwrap()).unwrap();
        circuit.add_element(Element::resistor("R1", 1, 2, 1000.0).unwrap()).unwrap();
        circuit.add_element(Element::capacitor("C1", 2, 0, 1e-6).unwrap()).unwrap();
        circuit
    }

    #[test]
    fn test_rc_matrices() {
        let system = DaeSystem::assemble(&rc_circuit()).unwrap();
        assert_eq!(system.size(), 3);

        // [v1, v2, iV1]
        assert_eq!(system.mass[(1, 1)], 1e-6);
        assert_eq!(system.mass[(0, 0)], 0.0);
        assert_eq!(system.state[(0, 2)], 1.0);
        assert_eq!(system.state[(2, 0)], 1.0);
        assert_eq!(system.constant[2], -1.0);
        assert_eq!(system.algebraic_indices(), vec![0, 2]);
    }

    #[test]
    fn test_rc_initial_state() {
        let system = DaeSystem::assemble(&rc_circuit()).unwrap();
        let initial = system.consistent_initial_conditions(&LinearSolver::new()).unwrap();

        // Capacitor starts uncharged, the full source voltage sits across R1
        assert!((initial.y0[0] - 1.0).abs() < 1e-12);
        assert!(initial.y0[1].abs() < 1e-12);
        assert!((initial.y0[2] + 1e-3).abs() < 1e-12);
        assert_eq!(initial.yd0, DVector::zeros(3));

        let residual = system.residual(0.0, &initial.y0, &initial.yd0);
        for row in system.algebraic_indices() {
            assert!(residual[row].abs() < 1e-12);
        }
    }

    #[test]
    fn test_seed_pins_differential_unknowns() {
        let system = DaeSystem::assemble(&rc_circuit()).unwrap();
        let seed = DVector::from_vec(vec![0.0, 0.4, 0.0]);
        let initial = system
            .consistent_initial_conditions_from(&seed, &LinearSolver::new())
            .unwrap();

        assert!((initial.y0[1] - 0.4).abs() < 1e-12);
        assert!((initial.y0[2] + 0.6e-3).abs() < 1e-12);
    }

    #[test]
    fn test_resistive_dae_matches_dc_system() {
        let mut circuit = Circuit::new("Resistive");
        circuit.add_element(Element::voltage_source("V1", 1, 0, 5.0).unwrap()).unwrap();
        circuit.add_element(Element::resistor("R1", 1, 2, 1000.0).unwrap()).unwrap();
        circuit.add_element(Element::current_source("I1", 2, 0, 1e-3).unwrap()).unwrap();
        circuit.add_element(Element::inductor("L1", 2, 3, 1e-3).unwrap()).unwrap();
        circuit.add_element(Element::resistor("R2", 3, 0, 500.0).unwrap()).unwrap();

        let system = DaeSystem::assemble(&circuit).unwrap();
        let dc = circuit.assemble_dc(&Default::default()).unwrap();

        assert_eq!(system.state, dc.matrix);
        assert_eq!(system.constant, -&dc.rhs);

        // The operating point is an equilibrium
        let solution = dc.solve(&LinearSolver::new()).unwrap();
        let residual = system.residual(0.0, solution.unknowns(), &DVector::zeros(system.size()));
        assert!(residual.norm() < 1e-12);
    }

    #[test]
    fn test_initial_state_is_a_fixed_point() {
        let system = DaeSystem::assemble(&rc_circuit()).unwrap();
        let solver = LinearSolver::new();
        let first = system.consistent_initial_conditions(&solver).unwrap();
        let second = system
            .consistent_initial_conditions_from(&first.y0, &solver)
            .unwrap();
        assert!((&first.y0 - &second.y0).norm() < 1e-15);
    }

    #[test]
    fn test_capacitor_across_source_is_inconsistent() {
        let mut circuit = Circuit::new("Shorted cap");
        circuit.add_element(Element::voltage_source("V1", 1, 0, 1.0).unwrap()).unwrap();
        circuit.add_element(Element::capacitor("C1", 1, 0, 1e-6).unwrap()).unwrap();
        circuit.add_element(Element::resistor("R1", 1, 0, 100.0).unwrap()).unwrap();

        let system = DaeSystem::assemble(&circuit).unwrap();
        let err = system
            .consistent_initial_conditions(&LinearSolver::new())
            .unwrap_err();
        assert!(matches!(err, CircuitError::InconsistentInitialState { size: 2, .. }));
    }

    #[test]
    fn test_current_source_on_capacitor_node() {
        let mut circuit = Circuit::new("Driven cap");
        circuit.add_element(Element::current_source("I1", 0, 1, 1e-3).unwrap()).unwrap();
        circuit.add_element(Element::resistor("R1", 1, 0, 1000.0).unwrap()).unwrap();
        circuit.add_element(Element::capacitor("C1", 1, 0, 1e-6).unwrap()).unwrap();

        let system = DaeSystem::assemble(&circuit).unwrap();
        assert_eq!(system.constant, DVector::from_vec(vec![-1e-3]));

        // The differential row takes -C
        let solver = LinearSolver::new();
        let initial = system.consistent_initial_conditions(&solver).unwrap();
        assert!((initial.y0[0] - 1e-3).abs() < 1e-15);

        let seeded = system
            .consistent_initial_conditions_from(&DVector::zeros(1), &solver)
            .unwrap();
        assert_eq!(seeded.y0[0], 0.0);
    }

    #[test]
    fn test_seed_length_checked() {
        let system = DaeSystem::assemble(&rc_circuit()).unwrap();
        let err = system
            .consistent_initial_conditions_from(&DVector::zeros(2), &LinearSolver::new())
            .unwrap_err();
        assert!(matches!(err, CircuitError::DimensionMismatch { expected: 3, actual: 2, .. }));
    }
}

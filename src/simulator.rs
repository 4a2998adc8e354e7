use std::collections::BTreeMap;
use std::time::Instant;

use log::info;
use serde::{Deserialize, Serialize};

use crate::circuit::Circuit;
use crate::error::Result;
use crate::integrator::{Integrator, IntegratorOptions};
use crate::mna::DcOptions;

/// Simulation results container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub title: String,
    pub analysis_type: AnalysisType,
    pub time_points: Vec<f64>,
    /// Keyed `V<node>`
    pub node_voltages: BTreeMap<String, Vec<f64>>,
    /// Keyed `I_<name>`
    pub currents: BTreeMap<String, Vec<f64>>,
    pub total_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalysisType {
    Operating,
    Transient { t0: f64, tf: f64 },
}

impl SimulationResult {
    fn new(title: &str, analysis_type: AnalysisType, time_points: Vec<f64>) -> Self {
        SimulationResult {
            title: title.to_string(),
            analysis_type,
            time_points,
            node_voltages: BTreeMap::new(),
            currents: BTreeMap::new(),
            total_time: 0.0,
        }
    }

    fn insert(&mut self, key: String, series: Vec<f64>) {
        if key.starts_with("I_") {
            self.currents.insert(key, series);
        } else {
            self.node_voltages.insert(key, series);
        }
    }

    /// Series for `V<node>` or `I_<name>`
    pub fn series(&self, key: &str) -> Option<&[f64]> {
        self.node_voltages
            .get(key)
            .or_else(|| self.currents.get(key))
            .map(Vec::as_slice)
    }

    /// Last value of a series
    pub fn final_value(&self, key: &str) -> Option<f64> {
        self.series(key).and_then(|series| series.last().copied())
    }

    /// Render the result as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn log_summary(&self) {
        info!("=== {:?} results for '{}' ===", self.analysis_type, self.title);
        info!("Time points: {}", self.time_points.len());
        for (name, series) in self.node_voltages.iter().chain(self.currents.iter()) {
            if let Some(value) = series.last() {
                info!("  {}: {:.6e}", name, value);
            }
        }
        info!("Total time: {:.3}ms", self.total_time * 1000.0);
    }
}

/// Configuration for both analyses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub dc: DcOptions,
    pub integrator: IntegratorOptions,
}

/// Main simulator engine
pub struct Simulator {
    circuit: Circuit,
    config: SimulatorConfig,
}

impl Simulator {
    /// Create a new simulator with default configuration
    pub fn new(circuit: Circuit) -> Self {
        Self::with_config(circuit, SimulatorConfig::default())
    }

    /// Create a new simulator with custom configuration
    pub fn with_config(circuit: Circuit, config: SimulatorConfig) -> Self {
        Simulator { circuit, config }
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Run operating point analysis
    pub fn run_operating_point(&self) -> Result<SimulationResult> {
        info!("Starting operating point analysis");
        let start_time = Instant::now();

        let solution = self.circuit.solve_dc_with(&self.config.dc)?;

        let mut result =
            SimulationResult::new(self.circuit.title(), AnalysisType::Operating, vec![0.0]);
        for (key, &value) in solution.values() {
            result.insert(key.clone(), vec![value]);
        }
        result.total_time = start_time.elapsed().as_secs_f64();

        info!(
            "Operating point analysis completed in {:.3}ms",
            result.total_time * 1000.0
        );
        Ok(result)
    }

    /// Run transient analysis over `t_span` with the given integrator
    pub fn run_transient(
        &self,
        t_span: (f64, f64),
        integrator: &mut dyn Integrator,
    ) -> Result<SimulationResult> {
        info!("Starting transient analysis: t0={}, tf={}", t_span.0, t_span.1);
        let start_time = Instant::now();

        let solution = self
            .circuit
            .solve_transient(t_span, integrator, &self.config.integrator)?;

        let mut result = SimulationResult::new(
            self.circuit.title(),
            AnalysisType::Transient {
                t0: t_span.0,
                tf: t_span.1,
            },
            solution.times().to_vec(),
        );
        for key in solution.signal_names() {
            if let Some(series) = solution.signal(&key) {
                result.insert(key, series);
            }
        }
        result.total_time = start_time.elapsed().as_secs_f64();

        info!(
            "Transient analysis completed with {} time points",
            result.time_points.len()
        );
        Ok(result)
    }
}

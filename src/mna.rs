use std::collections::BTreeMap;
use std::ops::Index;

use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::circuit::{Circuit, IndexMap, NodeId, GROUND};
use crate::element::{Element, ElementKind};
use crate::error::{CircuitError, Result};
use crate::solver::{LinearSolver, SolverConfig, SolverStats};

/// Resistance used by [`CapacitorDcModel::large_resistance`]
pub const DEFAULT_CAPACITOR_DC_RESISTANCE: f64 = 1e9;

/// How capacitors are treated in the DC system
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum CapacitorDcModel {
    /// Exact open circuit
    #[default]
    Open,
    /// Replace each capacitor with a large resistance. Keeps nodes reached only
    /// through capacitors solvable, at the cost of perturbing the result.
    LargeResistance { resistance: f64 },
}

impl CapacitorDcModel {
    pub fn large_resistance() -> Self {
        CapacitorDcModel::LargeResistance {
            resistance: DEFAULT_CAPACITOR_DC_RESISTANCE,
        }
    }
}

/// DC analysis configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DcOptions {
    pub capacitor_model: CapacitorDcModel,
    pub solver: SolverConfig,
}

/// MNA system representation: [matrix][x] = [rhs]
///
/// ```text
/// [G  B] [v]   [i]
/// [Bt 0] [j] = [e]
/// ```
///
/// `v` holds node voltages, `j` the voltage source and inductor currents.
#[derive(Debug, Clone)]
pub struct MnaSystem {
    pub matrix: DMatrix<f64>,
    pub rhs: DVector<f64>,
    pub layout: IndexMap,
    capacitor_model: CapacitorDcModel,
}

impl MnaSystem {
    /// Assemble the MNA system for DC analysis
    pub fn assemble(circuit: &Circuit, options: &DcOptions) -> Result<Self> {
        if let CapacitorDcModel::LargeResistance { resistance } = options.capacitor_model {
            if !(resistance.is_finite() && resistance > 0.0) {
                return Err(CircuitError::invalid_parameter(
                    "capacitor DC model",
                    "resistance",
                    resistance,
                ));
            }
        }

        let layout = circuit.index_map();
        let size = layout.size();
        let mut matrix = DMatrix::zeros(size, size);
        let mut rhs = DVector::zeros(size);

        for element in circuit.elements() {
            element.stamp_dc(&mut matrix, &mut rhs, &layout, options.capacitor_model)?;
        }

        let system = MnaSystem {
            matrix,
            rhs,
            layout,
            capacitor_model: options.capacitor_model,
        };
        system.log_blocks();
        Ok(system)
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn capacitor_model(&self) -> CapacitorDcModel {
        self.capacitor_model
    }

    /// Solve the system. An empty circuit gives an empty solution.
    pub fn solve(&self, solver: &LinearSolver) -> Result<DcSolution> {
        let size = self.size();
        if size == 0 {
            return Ok(DcSolution::new(
                DVector::zeros(0),
                self.layout.clone(),
                self.capacitor_model,
                None,
            ));
        }

        let (unknowns, stats) = solver
            .solve_dense(&self.matrix, &self.rhs)
            .map_err(|source| CircuitError::SingularSystem { size, source })?;

        Ok(DcSolution::new(unknowns, self.layout.clone(), self.capacitor_model, Some(stats)))
    }

    fn log_blocks(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let n = self.layout.num_nodes();
        let m = self.size() - n;

        debug!("MNA system: {}x{} ({} nodes, {} branch currents)", self.size(), self.size(), n, m);
        debug!("Node map: {:?}", self.layout.nodes().collect::<Vec<_>>());
        debug!("Branch map: {:?}", self.layout.branches());
        debug!("G (conductances): {}", self.matrix.view((0, 0), (n, n)));
        if m > 0 {
            debug!("B (branch incidence): {}", self.matrix.view((0, n), (n, m)));
            debug!("C (branch constraints): {}", self.matrix.view((n, 0), (m, n)));
            debug!("D (should be zero): {}", self.matrix.view((n, n), (m, m)));
        }
        debug!("RHS: {}", self.rhs);
    }
}

/// DC operating point
#[derive(Debug, Clone)]
pub struct DcSolution {
    unknowns: DVector<f64>,
    layout: IndexMap,
    values: BTreeMap<String, f64>,
    capacitor_model: CapacitorDcModel,
    stats: Option<SolverStats>,
}

impl DcSolution {
    fn new(
        unknowns: DVector<f64>,
        layout: IndexMap,
        capacitor_model: CapacitorDcModel,
        stats: Option<SolverStats>,
    ) -> Self {
        let values = layout
            .probes()
            .into_iter()
            .map(|(name, probe)| (name, probe.scale * unknowns[probe.index]))
            .collect();

        DcSolution {
            unknowns,
            layout,
            values,
            capacitor_model,
            stats,
        }
    }

    /// Look up `V<node>` or `I_<name>`
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Node voltage; ground is always 0
    pub fn voltage(&self, node: NodeId) -> Option<f64> {
        if node == GROUND {
            return Some(0.0);
        }
        self.layout.node(node).map(|index| self.unknowns[index])
    }

    /// Current of a voltage source or inductor, with the sign convention of
    /// [`IndexMap::probes`].
    pub fn current(&self, name: &str) -> Option<f64> {
        self.get(&format!("I_{}", name))
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    /// Raw unknown vector in layout order
    pub fn unknowns(&self) -> &DVector<f64> {
        &self.unknowns
    }

    pub fn layout(&self) -> &IndexMap {
        &self.layout
    }

    pub fn stats(&self) -> Option<&SolverStats> {
        self.stats.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.unknowns.is_empty()
    }

    /// Current entering `element` at its positive terminal.
    pub fn branch_current(&self, element: &Element) -> Result<f64> {
        let (i, j) = self.layout.terminals(element)?;
        let across = self.at(i) - self.at(j);

        let current = match *element.kind() {
            ElementKind::Resistor { resistance } => across / resistance,
            ElementKind::VoltageSource { .. } | ElementKind::Inductor { .. } => {
                self.unknowns[self.layout.branch_of(element)?]
            }
            ElementKind::CurrentSource { current } => current,
            ElementKind::Capacitor { .. } => match self.capacitor_model {
                CapacitorDcModel::Open => 0.0,
                CapacitorDcModel::LargeResistance { resistance } => across / resistance,
            },
        };
        Ok(current)
    }

    fn at(&self, index: Option<usize>) -> f64 {
        index.map_or(0.0, |i| self.unknowns[i])
    }
}

impl Index<&str> for DcSolution {
    type Output = f64;

    fn index(&self, key: &str) -> &f64 {
        self.values
            .get(key)
            .unwrap_or_else(|| panic!("no value named '{}' in DC solution", key))
    }
}

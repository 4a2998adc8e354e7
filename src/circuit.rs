use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementKind};
use crate::error::{CircuitError, FloatingNodeWarning, Result};
use crate::integrator::{Integrator, IntegratorOptions};
use crate::mna::{DcOptions, DcSolution, MnaSystem};
use crate::solver::LinearSolver;
use crate::transient::{DaeSystem, InitialState, TransientSolution};

/// Node identifier. Node `0` is ground.
pub type NodeId = usize;

/// The reference node, never given a matrix index
pub const GROUND: NodeId = 0;

/// Whether an unknown appears differentiated in the DAE system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    Algebraic,
    Differential,
}

/// A named quantity read out of the unknown vector as `scale * x[index]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    pub index: usize,
    pub scale: f64,
}

/// Mapping from nodes and branch currents to unknown-vector indices.
///
/// Layout: `[node voltages (ascending node id), voltage source currents
/// (insertion order), inductor currents (insertion order)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMap {
    node_index: BTreeMap<NodeId, usize>,
    branch_index: BTreeMap<String, usize>,
    num_voltage_sources: usize,
    num_inductors: usize,
}

impl IndexMap {
    /// Assign indices for the given element list.
    pub fn build(elements: &[Element]) -> Self {
        let nodes: BTreeSet<NodeId> = elements
            .iter()
            .flat_map(|element| element.terminals())
            .filter(|&node| node != GROUND)
            .collect();
        let node_index: BTreeMap<NodeId, usize> = nodes
            .into_iter()
            .enumerate()
            .map(|(index, node)| (node, index))
            .collect();

        let voltage_sources = elements
            .iter()
            .filter(|element| matches!(element.kind(), ElementKind::VoltageSource { .. }));
        let inductors = elements
            .iter()
            .filter(|element| matches!(element.kind(), ElementKind::Inductor { .. }));

        let mut branch_index = BTreeMap::new();
        let mut next = node_index.len();
        let mut num_voltage_sources = 0;
        for source in voltage_sources {
            branch_index.insert(source.name().to_string(), next);
            next += 1;
            num_voltage_sources += 1;
        }
        let mut num_inductors = 0;
        for inductor in inductors {
            branch_index.insert(inductor.name().to_string(), next);
            next += 1;
            num_inductors += 1;
        }

        IndexMap {
            node_index,
            branch_index,
            num_voltage_sources,
            num_inductors,
        }
    }

    /// Total number of unknowns
    pub fn size(&self) -> usize {
        self.num_nodes() + self.num_voltage_sources + self.num_inductors
    }

    pub fn num_nodes(&self) -> usize {
        self.node_index.len()
    }

    pub fn num_voltage_sources(&self) -> usize {
        self.num_voltage_sources
    }

    pub fn num_inductors(&self) -> usize {
        self.num_inductors
    }

    /// Matrix index of a node. `None` for ground and for nodes not in the circuit.
    pub fn node(&self, node: NodeId) -> Option<usize> {
        self.node_index.get(&node).copied()
    }

    /// Matrix index of a voltage source or inductor current
    pub fn branch(&self, name: &str) -> Option<usize> {
        self.branch_index.get(name).copied()
    }

    /// Nodes in index order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, usize)> + '_ {
        self.node_index.iter().map(|(&node, &index)| (node, index))
    }

    /// Branch names in index order
    pub fn branches(&self) -> Vec<(&str, usize)> {
        let mut branches: Vec<(&str, usize)> = self
            .branch_index
            .iter()
            .map(|(name, &index)| (name.as_str(), index))
            .collect();
        branches.sort_by_key(|&(_, index)| index);
        branches
    }

    /// Terminal indices of an element, `None` standing for ground.
    pub fn terminals(&self, element: &Element) -> Result<(Option<usize>, Option<usize>)> {
        let lookup = |node: NodeId| -> Result<Option<usize>> {
            if node == GROUND {
                Ok(None)
            } else {
                self.node(node)
                    .map(Some)
                    .ok_or(CircuitError::UnindexedNode { node })
            }
        };
        Ok((lookup(element.positive())?, lookup(element.negative())?))
    }

    pub fn branch_of(&self, element: &Element) -> Result<usize> {
        self.branch(element.name())
            .ok_or_else(|| CircuitError::UnindexedElement {
                name: element.name().to_string(),
            })
    }

    /// Named probes over the unknown vector: `V<node>` for every node and
    /// `I_<name>` for every branch current.
    ///
    /// Voltage source currents are reported as the current delivered out of
    /// the positive terminal, which is the negated branch unknown. Inductor
    /// currents flow from the positive to the negative terminal.
    pub fn probes(&self) -> Vec<(String, Probe)> {
        let first_inductor = self.num_nodes() + self.num_voltage_sources;
        let nodes = self
            .nodes()
            .map(|(node, index)| (format!("V{}", node), Probe { index, scale: 1.0 }));
        let branches = self.branches().into_iter().map(|(name, index)| {
            let scale = if index < first_inductor { -1.0 } else { 1.0 };
            (format!("I_{}", name), Probe { index, scale })
        });
        nodes.chain(branches).collect()
    }
}

/// A circuit: an ordered list of two-terminal elements.
///
/// Index maps and variable kinds are never stored; they are derived from the
/// element list each time they are needed. Deserialization replays
/// [`Circuit::add_element`] for every element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "CircuitDef")]
pub struct Circuit {
    title: String,
    elements: Vec<Element>,
}

/// Serialized form of a [`Circuit`], checked on conversion
#[derive(Deserialize)]
struct CircuitDef {
    #[serde(default)]
    title: String,
    elements: Vec<Element>,
}

impl TryFrom<CircuitDef> for Circuit {
    type Error = CircuitError;

    fn try_from(def: CircuitDef) -> Result<Self> {
        let mut circuit = Circuit::new(def.title);
        for element in def.elements {
            circuit.add_element(element)?;
        }
        Ok(circuit)
    }
}

impl Circuit {
    pub fn new(title: impl Into<String>) -> Self {
        Circuit {
            title: title.into(),
            elements: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Add an element to the circuit. On error the circuit is unchanged.
    pub fn add_element(&mut self, element: Element) -> Result<()> {
        element.validate()?;

        if self.element(element.name()).is_some() {
            return Err(CircuitError::DuplicateElement {
                name: element.name().to_string(),
            });
        }

        if element.is_reversed() {
            warn!(
                "{} {} has ground as its positive terminal; consider swapping terminals",
                element.kind().label(),
                element.name()
            );
        }

        self.elements.push(element);
        Ok(())
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|element| element.name() == name)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// All non-ground nodes, ascending
    pub fn nodes(&self) -> BTreeSet<NodeId> {
        self.elements
            .iter()
            .flat_map(|element| element.terminals())
            .filter(|&node| node != GROUND)
            .collect()
    }

    /// Get all voltage sources in insertion order
    pub fn voltage_sources(&self) -> Vec<&Element> {
        self.elements_of(|kind| matches!(kind, ElementKind::VoltageSource { .. }))
    }

    /// Get all inductors in insertion order
    pub fn inductors(&self) -> Vec<&Element> {
        self.elements_of(|kind| matches!(kind, ElementKind::Inductor { .. }))
    }

    fn elements_of(&self, predicate: impl Fn(&ElementKind) -> bool) -> Vec<&Element> {
        self.elements
            .iter()
            .filter(|element| predicate(element.kind()))
            .collect()
    }

    pub fn index_map(&self) -> IndexMap {
        IndexMap::build(&self.elements)
    }

    /// Variable kind of every unknown, in layout order.
    pub fn variable_kinds(&self) -> Vec<VariableKind> {
        self.variable_kinds_for(&self.index_map())
    }

    pub(crate) fn variable_kinds_for(&self, index: &IndexMap) -> Vec<VariableKind> {
        let mut kinds = vec![VariableKind::Algebraic; index.size()];

        for element in &self.elements {
            match element.kind() {
                ElementKind::Capacitor { .. } => {
                    for node in element.terminals() {
                        if let Some(i) = index.node(node) {
                            kinds[i] = VariableKind::Differential;
                        }
                    }
                }
                ElementKind::Inductor { .. } => {
                    if let Some(k) = index.branch(element.name()) {
                        kinds[k] = VariableKind::Differential;
                    }
                }
                _ => {}
            }
        }

        kinds
    }

    /// Nodes touched by fewer than two element terminals.
    pub fn floating_nodes(&self) -> Vec<FloatingNodeWarning> {
        let mut connections: BTreeMap<NodeId, usize> = BTreeMap::new();
        for element in &self.elements {
            for node in element.terminals() {
                *connections.entry(node).or_insert(0) += 1;
            }
        }

        connections
            .into_iter()
            .filter(|&(node, count)| node != GROUND && count < 2)
            .map(|(node, connections)| FloatingNodeWarning { node, connections })
            .collect()
    }

    /// Log floating-node advisories and return them. Never fails.
    pub fn check_topology(&self) -> Vec<FloatingNodeWarning> {
        let warnings = self.floating_nodes();
        for warning in &warnings {
            warn!("{}", warning);
        }
        warnings
    }

    /// Assemble the DC (MNA) system
    pub fn assemble_dc(&self, options: &DcOptions) -> Result<MnaSystem> {
        MnaSystem::assemble(self, options)
    }

    /// Solve the DC operating point with default options
    pub fn solve_dc(&self) -> Result<DcSolution> {
        self.solve_dc_with(&DcOptions::default())
    }

    pub fn solve_dc_with(&self, options: &DcOptions) -> Result<DcSolution> {
        self.check_topology();
        let system = self.assemble_dc(options)?;
        let solution = system.solve(&LinearSolver::with_config(options.solver.clone()))?;
        info!(
            "DC operating point of '{}' solved ({} unknowns)",
            self.title,
            solution.unknowns().len()
        );
        Ok(solution)
    }

    /// Assemble the transient system without computing initial conditions
    pub fn assemble_dae(&self) -> Result<DaeSystem> {
        DaeSystem::assemble(self)
    }

    /// Assemble the transient system and its consistent initial state.
    pub fn build_dae_system(&self) -> Result<(DaeSystem, InitialState)> {
        let system = self.assemble_dae()?;
        let initial = system.consistent_initial_conditions(&LinearSolver::new())?;
        Ok((system, initial))
    }

    /// Build the DAE system and hand it to `integrator` over `t_span`.
    pub fn solve_transient(
        &self,
        t_span: (f64, f64),
        integrator: &mut dyn Integrator,
        options: &IntegratorOptions,
    ) -> Result<TransientSolution> {
        self.check_topology();
        let (system, initial) = self.build_dae_system()?;
        let problem = system.problem(&initial, t_span)?;

        info!(
            "Integrating '{}' with {} over [{:e}, {:e}]",
            self.title,
            integrator.name(),
            t_span.0,
            t_span.1
        );
        let trajectory = integrator.integrate(&problem, options)?;
        Ok(TransientSolution::new(trajectory, system.layout.clone()))
    }

    /// Net current leaving each node through its elements. Zero for a
    /// solution that satisfies KCL.
    pub fn kcl_residuals(&self, solution: &DcSolution) -> Result<BTreeMap<NodeId, f64>> {
        let mut residuals: BTreeMap<NodeId, f64> =
            self.nodes().into_iter().map(|node| (node, 0.0)).collect();

        for element in &self.elements {
            let current = solution.branch_current(element)?;
            if let Some(sum) = residuals.get_mut(&element.positive()) {
                *sum += current;
            }
            if let Some(sum) = residuals.get_mut(&element.negative()) {
                *sum -= current;
            }
        }

        Ok(residuals)
    }

    /// Log circuit summary
    pub fn log_summary(&self) {
        info!("Circuit: {}", self.title);
        info!("Nodes: {}", self.nodes().len());
        info!("Elements: {}", self.elements.len());

        let mut type_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for element in &self.elements {
            *type_counts.entry(element.kind().label()).or_insert(0) += 1;
        }
        for (label, count) in type_counts {
            info!("  {}: {}", label, count);
        }
    }
}

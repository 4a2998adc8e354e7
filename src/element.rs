//! Two-terminal circuit elements and their stamping rules.
//!
//! Every element contributes to the shared system matrices through two
//! routines:
//!
//! - [`Element::stamp_dc`] fills the MNA system `matrix * x = rhs`.
//! - [`Element::stamp_dae`] fills the transient system, whose residual is
//!   `A * dx/dt + B * x + C = 0`.
//!
//! Both only ever add into cells owned by the element's own terminals and
//! branch, so the assembled system does not depend on element order.
//!
//! For every element without a capacitor, the DC matrix equals `B` and the
//! DC right-hand side equals `-C`.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::circuit::{IndexMap, NodeId, GROUND};
use crate::error::{CircuitError, Result};
use crate::mna::CapacitorDcModel;

/// Types of circuit elements
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    Resistor { resistance: f64 },
    VoltageSource { voltage: f64 },
    /// Positive current flows through the source from its positive to its
    /// negative terminal.
    CurrentSource { current: f64 },
    Capacitor { capacitance: f64 },
    Inductor { inductance: f64 },
}

impl ElementKind {
    /// Returns true if this element owns a branch-current unknown
    pub fn has_branch_current(&self) -> bool {
        matches!(self, ElementKind::VoltageSource { .. } | ElementKind::Inductor { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ElementKind::Resistor { .. } => "Resistor",
            ElementKind::VoltageSource { .. } => "Voltage Source",
            ElementKind::CurrentSource { .. } => "Current Source",
            ElementKind::Capacitor { .. } => "Capacitor",
            ElementKind::Inductor { .. } => "Inductor",
        }
    }

    /// The element's defining parameter as `(name, value)`
    pub fn parameter(&self) -> (&'static str, f64) {
        match *self {
            ElementKind::Resistor { resistance } => ("resistance", resistance),
            ElementKind::VoltageSource { voltage } => ("voltage", voltage),
            ElementKind::CurrentSource { current } => ("current", current),
            ElementKind::Capacitor { capacitance } => ("capacitance", capacitance),
            ElementKind::Inductor { inductance } => ("inductance", inductance),
        }
    }

    fn requires_positive_value(&self) -> bool {
        matches!(
            self,
            ElementKind::Resistor { .. }
                | ElementKind::Capacitor { .. }
                | ElementKind::Inductor { .. }
        )
    }
}

/// A two-terminal circuit element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    name: String,
    positive: NodeId,
    negative: NodeId,
    kind: ElementKind,
}

impl Element {
    /// Create an element, rejecting non-physical parameter values.
    pub fn new(
        name: impl Into<String>,
        positive: NodeId,
        negative: NodeId,
        kind: ElementKind,
    ) -> Result<Self> {
        let element = Element {
            name: name.into(),
            positive,
            negative,
            kind,
        };
        element.validate()?;
        Ok(element)
    }

    pub fn resistor(
        name: impl Into<String>,
        positive: NodeId,
        negative: NodeId,
        resistance: f64,
    ) -> Result<Self> {
        Self::new(name, positive, negative, ElementKind::Resistor { resistance })
    }

    pub fn voltage_source(
        name: impl Into<String>,
        positive: NodeId,
        negative: NodeId,
        voltage: f64,
    ) -> Result<Self> {
        Self::new(name, positive, negative, ElementKind::VoltageSource { voltage })
    }

    pub fn current_source(
        name: impl Into<String>,
        positive: NodeId,
        negative: NodeId,
        current: f64,
    ) -> Result<Self> {
        Self::new(name, positive, negative, ElementKind::CurrentSource { current })
    }

    pub fn capacitor(
        name: impl Into<String>,
        positive: NodeId,
        negative: NodeId,
        capacitance: f64,
    ) -> Result<Self> {
        Self::new(name, positive, negative, ElementKind::Capacitor { capacitance })
    }

    pub fn inductor(
        name: impl Into<String>,
        positive: NodeId,
        negative: NodeId,
        inductance: f64,
    ) -> Result<Self> {
        Self::new(name, positive, negative, ElementKind::Inductor { inductance })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn positive(&self) -> NodeId {
        self.positive
    }

    pub fn negative(&self) -> NodeId {
        self.negative
    }

    pub fn terminals(&self) -> [NodeId; 2] {
        [self.positive, self.negative]
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    /// Check the element's parameter. R, C and L must be positive and every
    /// value must be finite.
    pub fn validate(&self) -> Result<()> {
        let (parameter, value) = self.kind.parameter();
        let valid = value.is_finite() && (!self.kind.requires_positive_value() || value > 0.0);
        if valid {
            Ok(())
        } else {
            Err(CircuitError::invalid_parameter(&self.name, parameter, value))
        }
    }

    /// Whether the positive terminal sits on ground while the negative one does not.
    pub fn is_reversed(&self) -> bool {
        self.positive == GROUND && self.negative != GROUND
    }

    /// Add this element's DC contribution to `matrix * x = rhs`.
    pub fn stamp_dc(
        &self,
        matrix: &mut DMatrix<f64>,
        rhs: &mut DVector<f64>,
        index: &IndexMap,
        capacitor_model: CapacitorDcModel,
    ) -> Result<()> {
        let (i, j) = index.terminals(self)?;

        match self.kind {
            ElementKind::Resistor { resistance } => {
                stamp_conductance(matrix, i, j, 1.0 / resistance)
            }
            ElementKind::VoltageSource { voltage } => {
                let k = index.branch_of(self)?;
                stamp_incidence(matrix, i, j, k);
                rhs[k] += voltage;
            }
            ElementKind::CurrentSource { current } => stamp_injection(rhs, i, j, -current),
            ElementKind::Capacitor { .. } => {
                // Open circuit unless the large-resistance model is selected
                if let CapacitorDcModel::LargeResistance { resistance } = capacitor_model {
                    stamp_conductance(matrix, i, j, 1.0 / resistance);
                }
            }
            ElementKind::Inductor { .. } => {
                // Zero-volt branch: v+ - v- = 0, with the inductor current as unknown
                let k = index.branch_of(self)?;
                stamp_incidence(matrix, i, j, k);
            }
        }

        Ok(())
    }

    /// Add this element's contribution to the transient system
    /// `mass * dx/dt + state * x + constant = 0`.
    pub fn stamp_dae(
        &self,
        mass: &mut DMatrix<f64>,
        state: &mut DMatrix<f64>,
        constant: &mut DVector<f64>,
        index: &IndexMap,
    ) -> Result<()> {
        let (i, j) = index.terminals(self)?;

        match self.kind {
            ElementKind::Resistor { resistance } => {
                stamp_conductance(state, i, j, 1.0 / resistance)
            }
            ElementKind::VoltageSource { voltage } => {
                let k = index.branch_of(self)?;
                stamp_incidence(state, i, j, k);
                constant[k] -= voltage;
            }
            ElementKind::CurrentSource { current } => stamp_injection(constant, i, j, current),
            ElementKind::Capacitor { capacitance } => stamp_conductance(mass, i, j, capacitance),
            ElementKind::Inductor { inductance } => {
                // v+ - v- = L * diL/dt
                let k = index.branch_of(self)?;
                mass[(k, k)] -= inductance;
                stamp_incidence(state, i, j, k);
            }
        }

        Ok(())
    }
}

/// Symmetric two-node stamp: `+g` on the diagonal, `-g` off it.
fn stamp_conductance(matrix: &mut DMatrix<f64>, i: Option<usize>, j: Option<usize>, g: f64) {
    if let Some(i) = i {
        matrix[(i, i)] += g;
    }
    if let Some(j) = j {
        matrix[(j, j)] += g;
    }
    if let (Some(i), Some(j)) = (i, j) {
        matrix[(i, j)] -= g;
        matrix[(j, i)] -= g;
    }
}

/// Branch incidence for current unknown `k` flowing from `i` to `j`
fn stamp_incidence(matrix: &mut DMatrix<f64>, i: Option<usize>, j: Option<usize>, k: usize) {
    if let Some(i) = i {
        matrix[(i, k)] += 1.0;
        matrix[(k, i)] += 1.0;
    }
    if let Some(j) = j {
        matrix[(j, k)] -= 1.0;
        matrix[(k, j)] -= 1.0;
    }
}

fn stamp_injection(vector: &mut DVector<f64>, i: Option<usize>, j: Option<usize>, value: f64) {
    if let Some(i) = i {
        vector[i] += value;
    }
    if let Some(j) = j {
        vector[j] -= value;
    }
}

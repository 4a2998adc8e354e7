pub mod circuit;
pub mod element;
pub mod error;
pub mod integrator;
pub mod mna;
pub mod simulator;
pub mod solver;
pub mod transient;

// Re-export commonly used types
pub use circuit::{Circuit, IndexMap, NodeId, Probe, VariableKind, GROUND};
pub use element::{Element, ElementKind};
pub use error::{CircuitError, FloatingNodeWarning, Result};
pub use integrator::{
    BackwardEuler, DaeProblem, Integrator, IntegratorOptions, OutputPoints, Trajectory,
};
pub use mna::{CapacitorDcModel, DcOptions, DcSolution, MnaSystem};
pub use simulator::{AnalysisType, SimulationResult, Simulator, SimulatorConfig};
pub use solver::{LinearSolveError, LinearSolver, SolverConfig, SolverMethod};
pub use transient::{DaeSystem, InitialState, TransientSolution};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

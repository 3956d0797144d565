//! Program model read by the cost analysis: an arena of computations, their
//! instructions, and the per-node backend-config store.

pub mod backend_config;
pub mod builder;
pub mod program;
pub mod spec;
pub mod topology;

pub use backend_config::{
    BackendConfig, BackendConfigRecord, BackendConfigStore, ConfigKind, FusionBackendConfig,
    GemmBackendConfig, ReificationCost,
};
pub use builder::{ComputationBuilder, ProgramBuilder};
pub use program::{Program, ProgramIoError, ProgramSerdeError};
pub use spec::*;
pub use topology::validate_computation_topology;

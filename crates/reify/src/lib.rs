//! Per-fusion reification cost estimation.
//!
//! [`CostModelStatsCollection`] walks a [`Program`] from its entry computation, prices the
//! body of every fusion it can reach under a [`HardwareProfile`], and records the result
//! in that fusion's backend config. The graph itself is left untouched.

pub mod analysis;
mod env;
pub mod error;
pub mod ir;
pub mod passes;
pub mod pipeline;

pub use analysis::{CostAnalysisOptions, HardwareProfile};
pub use error::{ReifyError, Result};
pub use ir::Program;
pub use passes::{CostModelStatsCollection, ModulePass, PassResult};
pub use pipeline::{PassPipeline, PipelineBuilder};

//! Program-level passes and the contract they report back to the pipeline.

mod cost_model_stats;

pub use cost_model_stats::CostModelStatsCollection;

use crate::error::Result;
use crate::ir::Program;

/// Result returned by a [`ModulePass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the program structure. Backend-config writes do not count.
    pub changed: bool,
    /// Number of iterations executed while applying the pass.
    pub iterations: usize,
    /// Nodes whose backend config the pass wrote.
    pub annotated_nodes: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            annotated_nodes: self.annotated_nodes + other.annotated_nodes,
        }
    }
}

/// Canonical interface implemented by passes that operate on a whole program.
pub trait ModulePass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, program: &mut Program) -> Result<PassResult>;
}

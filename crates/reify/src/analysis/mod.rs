//! Cost model: hardware profiles, per-computation estimates, and the walk that
//! finds the fusions to price.

pub mod cost;
pub mod hardware;
pub mod walker;

pub use cost::{
    categorize, combine_compute_and_memory, CostAnalysisOptions, CostEstimate, CostEstimator,
    NodeCost,
};
pub use hardware::{HardwareProfile, MemoryTier, OpCategory, ShapeSizeFn};
pub use walker::{collect_fusion_sites, reachable_computations, FusionSite, FusionWalker};

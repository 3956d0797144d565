use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;

use crate::analysis::{
    collect_fusion_sites, CostAnalysisOptions, CostEstimator, FusionSite, HardwareProfile,
};
use crate::error::Result;
use crate::ir::{ComputationId, FusionBackendConfig, Program, ReificationCost};
use crate::passes::{ModulePass, PassResult};

/// Annotates every reachable fusion with the estimated cost of its body.
///
/// The estimate lands in the node's [`FusionBackendConfig::reification_cost`]. The pass
/// never edits the graph itself, so it always reports `changed == false`: pipelines
/// converge on structural change and must not re-run because metadata was written.
///
/// An invalid profile fails the run before anything is written. Otherwise fusions are
/// annotated in walk order; if estimating or writing one fails, the run stops there and
/// the fusions annotated before it keep their new records.
pub struct CostModelStatsCollection {
    profile: Arc<HardwareProfile>,
    options: CostAnalysisOptions,
}

impl CostModelStatsCollection {
    const NAME: &'static str = "cost_model_stats_collection";

    pub fn new(profile: Arc<HardwareProfile>, options: CostAnalysisOptions) -> Self {
        Self { profile, options }
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    pub fn options(&self) -> CostAnalysisOptions {
        self.options
    }

    /// Runs the pass; the flag reports structural change and is `false` on success.
    pub fn run(&self, program: &mut Program) -> Result<bool> {
        self.run_with_stats(program).map(|result| result.changed)
    }

    pub fn run_with_stats(&self, program: &mut Program) -> Result<PassResult> {
        self.profile.validate()?;
        let sites = collect_fusion_sites(program)?;
        let estimator = CostEstimator::new(&self.profile, self.options);

        let mut costs: HashMap<ComputationId, Result<ReificationCost>> = if self.options.parallel
        {
            let mut bodies: Vec<ComputationId> = Vec::with_capacity(sites.len());
            for site in &sites {
                if !bodies.contains(&site.body) {
                    bodies.push(site.body);
                }
            }
            let shared: &Program = program;
            bodies
                .into_par_iter()
                .map(|body| (body, estimate_body(&estimator, shared, body)))
                .collect()
        } else {
            HashMap::new()
        };

        let structure_before = program.structure_version();
        let mut annotated = 0usize;
        for site in &sites {
            let cost = costs
                .entry(site.body)
                .or_insert_with(|| estimate_body(&estimator, program, site.body))
                .clone()?;
            annotate(program, site, cost)?;
            annotated += 1;
        }
        debug_assert_eq!(
            structure_before,
            program.structure_version(),
            "annotation must not touch program structure"
        );

        info!(
            "{}: annotated {annotated} fusion(s) in '{}' on profile '{}'",
            Self::NAME,
            program.name(),
            self.profile.name
        );
        Ok(PassResult {
            changed: false,
            iterations: 1,
            annotated_nodes: annotated,
        })
    }
}

impl ModulePass for CostModelStatsCollection {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, program: &mut Program) -> Result<PassResult> {
        self.run_with_stats(program)
    }
}

fn estimate_body(
    estimator: &CostEstimator<'_>,
    program: &Program,
    body: ComputationId,
) -> Result<ReificationCost> {
    estimator
        .estimate(program, body)
        .map(|estimate| estimate.to_reification_cost())
}

fn annotate(program: &mut Program, site: &FusionSite, cost: ReificationCost) -> Result<()> {
    let node = site.node_ref();
    let mut config: FusionBackendConfig = program.backend_config(node)?;
    config.reification_cost = Some(cost);
    program.set_backend_config(node, config)?;
    debug!(
        "{node}: end_to_end_cycles={:.3} (compute {:.3}us, memory {:.3}us)",
        cost.end_to_end_cycles, cost.compute_time_us, cost.memory_access_time_us
    );
    Ok(())
}

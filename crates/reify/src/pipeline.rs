use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use log::{info, warn};

use crate::error::Result;
use crate::ir::Program;
use crate::passes::{ModulePass, PassResult};

pub enum Step {
    Pass(Arc<dyn ModulePass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn ModulePass>) {
        self.steps.push(Step::Pass(pass));
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> PassPipeline {
        PassPipeline {
            steps: self.steps,
            log_stats: crate::env::pass_stats_enabled(),
            run_counter: AtomicUsize::new(0),
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered list of passes; fixed-point groups repeat until the program stops changing.
///
/// "Changing" means structural change: a pass reporting `changed`, or the program's
/// structure version moving. Backend-config writes never trigger another iteration.
pub struct PassPipeline {
    steps: Vec<Step>,
    log_stats: bool,
    run_counter: AtomicUsize,
}

impl PassPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn with_stats_logging(mut self, enabled: bool) -> Self {
        self.log_stats = enabled;
        self
    }

    /// Runs every step once; stops at the first pass error.
    pub fn run(&self, program: &mut Program) -> Result<PassResult> {
        let run_id = self.run_counter.fetch_add(1, Ordering::Relaxed);
        let mut totals = PassResult::default();
        let changed = run_steps(&self.steps, program, run_id, &mut totals, self.log_stats)?;
        totals.changed = changed;
        Ok(totals)
    }
}

fn run_steps(
    steps: &[Step],
    program: &mut Program,
    run_id: usize,
    totals: &mut PassResult,
    log_stats: bool,
) -> Result<bool> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let version_before = program.structure_version();
                let stats = pass.run(program)?;
                let moved = program.structure_version() != version_before;
                if moved && !stats.changed {
                    warn!(
                        "pass '{}' edited '{}' but reported no change",
                        pass.name(),
                        program.name()
                    );
                }
                changed_any |= stats.changed || moved;
                *totals = totals.merge(stats);
                if log_stats {
                    info!(
                        "run {run_id} pass '{}' on '{}': changed={} annotated={} iterations={}",
                        pass.name(),
                        program.name(),
                        stats.changed || moved,
                        stats.annotated_nodes,
                        stats.iterations
                    );
                }
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        break;
                    }
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(steps, program, run_id, &mut local, log_stats)?;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
                if log_stats {
                    info!("run {run_id} fixed point settled after {iter} iteration(s)");
                }
            }
        }
    }
    Ok(changed_any)
}

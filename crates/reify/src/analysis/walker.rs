//! Deterministic discovery of fusion nodes reachable from the entry computation.

use std::collections::{HashMap, HashSet};

use log::trace;
use smallvec::SmallVec;

use crate::error::{ReifyError, Result};
use crate::ir::{Computation, ComputationId, NodeId, NodeRef, Program};

/// A fusion node together with the computation that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FusionSite {
    pub computation: ComputationId,
    pub node: NodeId,
    pub body: ComputationId,
}

impl FusionSite {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.computation, self.node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitMode {
    /// Yield fusions and follow every nested reference.
    Full,
    /// Inside a fusion body: follow nested references but yield nothing found directly here.
    ControlFlowOnly,
    /// Second pass over a computation first walked as a fusion body and later reached
    /// through control flow: yield its fusions, follow nothing (callees were already walked).
    FusionsOnly,
}

struct Frame<'p> {
    computation: &'p Computation,
    mode: VisitMode,
    next: usize,
    pending: SmallVec<[(ComputationId, VisitMode); 2]>,
    pending_cursor: usize,
}

impl<'p> Frame<'p> {
    fn new(computation: &'p Computation, mode: VisitMode) -> Self {
        Self {
            computation,
            mode,
            next: 0,
            pending: SmallVec::new(),
            pending_cursor: 0,
        }
    }
}

/// Lazy pre-order walk over the control-flow structure of a [`Program`].
///
/// The entry computation comes first; within a computation instructions are visited in
/// body order and a callee is entered as soon as the referencing op is reached (loop
/// condition before loop body, branches in order). Each computation is entered at most
/// once. The exception is a computation first entered as a fusion body and later reached
/// through control flow: it is scanned again for the fusions it holds directly, without
/// re-entering its callees. A reference back into a computation that is still being
/// walked ends the sequence with [`ReifyError::MalformedGraph`].
pub struct FusionWalker<'p> {
    program: &'p Program,
    stack: Vec<Frame<'p>>,
    on_stack: HashSet<ComputationId>,
    visited: HashMap<ComputationId, VisitMode>,
    order: Vec<ComputationId>,
    pending_error: Option<ReifyError>,
    done: bool,
}

impl<'p> FusionWalker<'p> {
    pub fn new(program: &'p Program) -> Self {
        let mut walker = Self {
            program,
            stack: Vec::new(),
            on_stack: HashSet::new(),
            visited: HashMap::new(),
            order: Vec::new(),
            pending_error: None,
            done: false,
        };
        if let Err(err) = walker.enter(program.entry(), VisitMode::Full) {
            walker.pending_error = Some(err);
        }
        walker
    }

    /// Computations entered so far, in visit order.
    pub fn visited(&self) -> &[ComputationId] {
        &self.order
    }

    fn enter(&mut self, id: ComputationId, mode: VisitMode) -> Result<()> {
        if self.on_stack.contains(&id) {
            let name = self
                .program
                .computation(id)
                .map(|c| c.name.as_str())
                .unwrap_or("?");
            let via = self
                .stack
                .last()
                .map(|frame| frame.computation.name.as_str())
                .unwrap_or("?");
            return Err(ReifyError::malformed_graph(format!(
                "computation '{name}' is re-entered from '{via}' while still being walked"
            )));
        }
        let computation = self.program.computation(id).ok_or_else(|| {
            ReifyError::malformed_graph(format!(
                "computation {} is referenced but not defined",
                id.0
            ))
        })?;
        let frame_mode = match (self.visited.get(&id).copied(), mode) {
            (None, _) => {
                self.order.push(id);
                mode
            }
            (Some(VisitMode::ControlFlowOnly), VisitMode::Full) => {
                trace!(
                    "computation '{}' reached through control flow after fusion; rescanning",
                    computation.name
                );
                VisitMode::FusionsOnly
            }
            (Some(_), _) => {
                trace!("computation '{}' already walked; skipping", computation.name);
                return Ok(());
            }
        };
        self.visited.insert(id, mode);
        self.on_stack.insert(id);
        self.stack.push(Frame::new(computation, frame_mode));
        Ok(())
    }

    fn fail(&mut self, err: ReifyError) -> Option<Result<FusionSite>> {
        self.done = true;
        self.stack.clear();
        Some(Err(err))
    }
}

impl Iterator for FusionWalker<'_> {
    type Item = Result<FusionSite>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(err) = self.pending_error.take() {
            return self.fail(err);
        }

        loop {
            let frame = self.stack.last_mut()?;

            if frame.pending_cursor < frame.pending.len() {
                let (callee, mode) = frame.pending[frame.pending_cursor];
                frame.pending_cursor += 1;
                if let Err(err) = self.enter(callee, mode) {
                    return self.fail(err);
                }
                continue;
            }

            let computation = frame.computation;
            let Some(inst) = computation.body.get(frame.next) else {
                self.on_stack.remove(&computation.id);
                self.stack.pop();
                continue;
            };
            frame.next += 1;
            if frame.mode == VisitMode::FusionsOnly {
                if let Some(body) = inst.op.fusion_body() {
                    return Some(Ok(FusionSite {
                        computation: computation.id,
                        node: inst.id,
                        body,
                    }));
                }
                continue;
            }
            frame.pending_cursor = 0;
            frame.pending = inst
                .op
                .called_computations()
                .into_iter()
                .map(|callee| {
                    let mode = if inst.op.is_fusion() {
                        VisitMode::ControlFlowOnly
                    } else {
                        VisitMode::Full
                    };
                    (callee, mode)
                })
                .collect();

            if frame.mode == VisitMode::Full {
                if let Some(body) = inst.op.fusion_body() {
                    return Some(Ok(FusionSite {
                        computation: computation.id,
                        node: inst.id,
                        body,
                    }));
                }
            }
        }
    }
}

/// All fusion sites in walk order; fails on the first malformed reference.
pub fn collect_fusion_sites(program: &Program) -> Result<Vec<FusionSite>> {
    FusionWalker::new(program).collect()
}

/// Computations reachable from the entry, in walk order.
pub fn reachable_computations(program: &Program) -> Result<Vec<ComputationId>> {
    let mut walker = FusionWalker::new(program);
    for site in walker.by_ref() {
        site?;
    }
    Ok(walker.visited().to_vec())
}

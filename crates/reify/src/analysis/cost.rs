//! Cycle estimates for a single computation under a [`HardwareProfile`].
//!
//! Every non-trivial node contributes a compute term (work divided by the rate
//! of its [`OpCategory`]) and a memory term (bytes read and written divided by
//! the bandwidth of the [`MemoryTier`] each value lives in). The two streams are
//! summed over the body and then combined with [`combine_compute_and_memory`].

use std::collections::HashSet;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::analysis::hardware::{HardwareProfile, MemoryTier, OpCategory};
use crate::error::{ReifyError, Result};
use crate::ir::{
    validate_computation_topology, Computation, ComputationId, Instruction, NodeId, Operation,
    Program, ReificationCost, ValueType,
};

/// Knobs injected into the estimator and the stats pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostAnalysisOptions {
    /// Charge an operand once per read instead of once per body.
    ///
    /// A read is one operand slot, so `add(p, p)` reads `p` twice and counts as fan-out
    /// just like two consumers of `p` do.
    pub count_multiple_input_accesses: bool,
    /// Estimate distinct fusion bodies on the rayon pool.
    #[serde(default)]
    pub parallel: bool,
}

impl Default for CostAnalysisOptions {
    fn default() -> Self {
        Self {
            count_multiple_input_accesses: true,
            parallel: crate::env::parallel_cost_enabled(),
        }
    }
}

/// Cost contribution of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeCost {
    pub node: NodeId,
    pub category: OpCategory,
    pub ops: f64,
    pub dram_bytes: u64,
    pub on_chip_bytes: u64,
    pub compute_seconds: f64,
    pub memory_seconds: f64,
}

/// Aggregate cost of a computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    pub computation: ComputationId,
    pub ops: f64,
    pub bytes_accessed: u64,
    pub compute_seconds: f64,
    pub memory_seconds: f64,
    pub exec_seconds: f64,
    pub compute_cycles: f64,
    pub memory_cycles: f64,
    pub end_to_end_cycles: f64,
    pub nodes: Vec<NodeCost>,
}

impl CostEstimate {
    pub fn to_reification_cost(&self) -> ReificationCost {
        ReificationCost {
            end_to_end_cycles: self.end_to_end_cycles,
            exec_time_us: self.exec_seconds * 1.0e6,
            compute_time_us: self.compute_seconds * 1.0e6,
            memory_access_time_us: self.memory_seconds * 1.0e6,
        }
    }
}

/// Overlap model: `compute + memory - parallelism * min(compute, memory)`.
///
/// `parallelism == 1` reduces to `max(compute, memory)` and `parallelism == 0` to the
/// sum. The result is never below the larger of the two inputs.
pub fn combine_compute_and_memory(compute: f64, memory: f64, parallelism: f64) -> f64 {
    let parallelism = parallelism.clamp(0.0, 1.0);
    compute + memory - parallelism * compute.min(memory)
}

/// Throughput class of `op`, or `None` for ops that only rename or regroup values.
pub fn categorize(op: &Operation) -> Option<OpCategory> {
    let category = match op {
        Operation::Parameter(_)
        | Operation::Constant
        | Operation::Tuple
        | Operation::GetTupleElement(_)
        | Operation::Bitcast => return None,
        Operation::ElementwiseUnary(op) if op.is_transcendental() => OpCategory::Transcendental,
        Operation::ElementwiseBinary(op) if op.is_transcendental() => OpCategory::Transcendental,
        Operation::ElementwiseUnary(_)
        | Operation::ElementwiseBinary(_)
        | Operation::Compare(_)
        | Operation::Select
        | Operation::Convert(_) => OpCategory::Elementwise,
        Operation::Reduce(_) => OpCategory::Reduction,
        Operation::DotGeneral(_) => OpCategory::Contraction,
        Operation::Reshape
        | Operation::Transpose(_)
        | Operation::Broadcast(_)
        | Operation::Slice(_)
        | Operation::Concatenate(_)
        | Operation::Pad(_)
        | Operation::Iota(_)
        | Operation::Copy => OpCategory::DataMovement,
        Operation::Fusion(_)
        | Operation::While(_)
        | Operation::Conditional(_)
        | Operation::Call(_) => OpCategory::Control,
    };
    Some(category)
}

pub struct CostEstimator<'a> {
    profile: &'a HardwareProfile,
    options: CostAnalysisOptions,
}

impl<'a> CostEstimator<'a> {
    pub fn new(profile: &'a HardwareProfile, options: CostAnalysisOptions) -> Self {
        Self { profile, options }
    }

    pub fn options(&self) -> CostAnalysisOptions {
        self.options
    }

    /// Estimates the computation `id` of `program`.
    pub fn estimate(&self, program: &Program, id: ComputationId) -> Result<CostEstimate> {
        let computation = program.computation(id).ok_or_else(|| {
            ReifyError::malformed_graph(format!("computation {} is not in the program", id.0))
        })?;
        self.estimate_computation(computation)
    }

    /// Fails with [`ReifyError::InvalidInput`] when the profile carries a rate or factor
    /// that would make the estimate negative or infinite.
    pub fn estimate_computation(&self, computation: &Computation) -> Result<CostEstimate> {
        self.profile.validate()?;
        validate_computation_topology(computation)?;

        let residency = residency_of(computation);
        let exported = exported_nodes(computation);
        let mut already_read: HashSet<NodeId> = HashSet::new();

        let mut nodes = Vec::new();
        let mut ops_total = 0.0f64;
        let mut bytes_total = 0u64;
        let mut compute_seconds = 0.0f64;
        let mut memory_seconds = 0.0f64;

        for inst in &computation.body {
            let Some(category) = categorize(&inst.op) else {
                continue;
            };
            let rate = self.profile.compute_rate(category).ok_or_else(|| {
                ReifyError::invalid_input(format!(
                    "hardware profile '{}' has no {category} rate for `{}` (node %{} in '{}')",
                    self.profile.name,
                    inst.op.name(),
                    inst.id.0,
                    computation.name
                ))
            })?;
            let ops = op_count(computation, inst, category)?;

            let mut dram_bytes = 0u64;
            let mut on_chip_bytes = 0u64;
            for operand in &inst.operands {
                if !self.options.count_multiple_input_accesses && !already_read.insert(*operand) {
                    continue;
                }
                let source = &computation.body[operand.index()];
                let bytes = self.size_of(&source.output, computation, source.id)?;
                match residency[operand.index()] {
                    MemoryTier::Dram => dram_bytes = dram_bytes.saturating_add(bytes),
                    MemoryTier::OnChip => on_chip_bytes = on_chip_bytes.saturating_add(bytes),
                }
            }
            let written = self.size_of(&inst.output, computation, inst.id)?;
            if exported.contains(&inst.id) {
                dram_bytes = dram_bytes.saturating_add(written);
            } else {
                on_chip_bytes = on_chip_bytes.saturating_add(written);
            }

            let node_compute = ops / rate;
            let node_memory = self.transfer_seconds(MemoryTier::Dram, dram_bytes, computation)?
                + self.transfer_seconds(MemoryTier::OnChip, on_chip_bytes, computation)?;
            trace!(
                "'{}' %{} {} [{category}]: {ops} ops, {dram_bytes} dram B, {on_chip_bytes} on-chip B",
                computation.name,
                inst.id.0,
                inst.op.name()
            );

            ops_total += ops;
            bytes_total = bytes_total
                .saturating_add(dram_bytes)
                .saturating_add(on_chip_bytes);
            compute_seconds += node_compute;
            memory_seconds += node_memory;
            nodes.push(NodeCost {
                node: inst.id,
                category,
                ops,
                dram_bytes,
                on_chip_bytes,
                compute_seconds: node_compute,
                memory_seconds: node_memory,
            });
        }

        let exec_seconds = combine_compute_and_memory(
            compute_seconds,
            memory_seconds,
            self.profile.memory_compute_parallelism,
        );
        let clock_hz = self.profile.clock_hz();
        Ok(CostEstimate {
            computation: computation.id,
            ops: ops_total,
            bytes_accessed: bytes_total,
            compute_seconds,
            memory_seconds,
            exec_seconds,
            compute_cycles: compute_seconds * clock_hz,
            memory_cycles: memory_seconds * clock_hz,
            end_to_end_cycles: exec_seconds * clock_hz,
            nodes,
        })
    }

    fn size_of(&self, ty: &ValueType, computation: &Computation, node: NodeId) -> Result<u64> {
        self.profile.shape_size_bytes(ty).ok_or_else(|| {
            ReifyError::invalid_input(format!(
                "size of {ty} overflows (node %{} in '{}')",
                node.0, computation.name
            ))
        })
    }

    fn transfer_seconds(
        &self,
        tier: MemoryTier,
        bytes: u64,
        computation: &Computation,
    ) -> Result<f64> {
        let rate = self.profile.memory_rate(tier).ok_or_else(|| {
            ReifyError::invalid_input(format!(
                "hardware profile '{}' has no {tier} bandwidth (computation '{}')",
                self.profile.name, computation.name
            ))
        })?;
        Ok(bytes as f64 / rate)
    }
}

/// Tier each node's output lives in. Body inputs sit in device memory; renames of a
/// value keep its tier; everything computed inside the body stays on chip.
fn residency_of(computation: &Computation) -> Vec<MemoryTier> {
    let mut residency = Vec::with_capacity(computation.body.len());
    for inst in &computation.body {
        let tier = match inst.op {
            Operation::Parameter(_) | Operation::Constant => MemoryTier::Dram,
            Operation::GetTupleElement(_) | Operation::Bitcast => inst
                .operands
                .first()
                .and_then(|operand| residency.get(operand.index()).copied())
                .unwrap_or(MemoryTier::OnChip),
            _ => MemoryTier::OnChip,
        };
        residency.push(tier);
    }
    residency
}

/// Nodes whose values leave the body: the root, looking through tuples and bitcasts.
fn exported_nodes(computation: &Computation) -> HashSet<NodeId> {
    let mut exported = HashSet::new();
    let mut worklist = vec![computation.root];
    while let Some(node) = worklist.pop() {
        if !exported.insert(node) {
            continue;
        }
        if let Some(inst) = computation.instruction(node) {
            if matches!(inst.op, Operation::Tuple | Operation::Bitcast) {
                worklist.extend(inst.operands.iter().copied());
            }
        }
    }
    exported
}

fn op_count(computation: &Computation, inst: &Instruction, category: OpCategory) -> Result<f64> {
    let elements_of = |ty: &ValueType| -> Result<f64> {
        ty.element_count().map(|count| count as f64).ok_or_else(|| {
            ReifyError::invalid_input(format!(
                "element count of {ty} overflows (node %{} in '{}')",
                inst.id.0, computation.name
            ))
        })
    };

    match (&inst.op, category) {
        (_, OpCategory::Control) => Ok(1.0),
        (Operation::Reduce(_), _) => {
            let input = inst
                .operands
                .first()
                .map(|operand| &computation.body[operand.index()].output)
                .unwrap_or(&inst.output);
            elements_of(input)
        }
        (Operation::DotGeneral(spec), _) => {
            let lhs = inst
                .operands
                .first()
                .and_then(|operand| computation.body[operand.index()].output.as_tensor())
                .ok_or_else(|| {
                    ReifyError::invalid_input(format!(
                        "dot node %{} in '{}' needs a tensor lhs",
                        inst.id.0, computation.name
                    ))
                })?;
            let mut contracted = 1.0f64;
            for &axis in &spec.contract_lhs {
                let extent = lhs.shape.dims().get(axis).ok_or_else(|| {
                    ReifyError::invalid_input(format!(
                        "dot node %{} in '{}' contracts axis {axis} of a rank-{} lhs",
                        inst.id.0,
                        computation.name,
                        lhs.shape.rank()
                    ))
                })?;
                contracted *= *extent as f64;
            }
            // one multiply and one add per contracted element
            Ok(2.0 * elements_of(&inst.output)? * contracted)
        }
        _ => elements_of(&inst.output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        DType, DotGeneralSpec, ElementwiseBinaryOp, ElementwiseUnaryOp, ProgramBuilder,
        ValueType,
    };

    /// One op, one byte per nanosecond everywhere: seconds map to round cycle counts.
    fn unit_profile(parallelism: f64) -> HardwareProfile {
        HardwareProfile::new("unit", 1.0)
            .with_compute_rate(OpCategory::Elementwise, 1.0e9)
            .with_compute_rate(OpCategory::Transcendental, 1.0e9)
            .with_compute_rate(OpCategory::Contraction, 1.0e9)
            .with_compute_rate(OpCategory::DataMovement, 1.0e9)
            .with_compute_rate(OpCategory::Reduction, 1.0e9)
            .with_compute_rate(OpCategory::Control, 1.0e9)
            .with_memory_rate(MemoryTier::Dram, 1.0e9)
            .with_memory_rate(MemoryTier::OnChip, 1.0e9)
            .with_memory_compute_parallelism(parallelism)
    }

    fn negate_body() -> Program {
        let mut builder = ProgramBuilder::new("neg");
        let body = builder.computation("neg", |b| {
            let p = b.parameter(0, ValueType::tensor(DType::F32, [1000]));
            b.unary(ElementwiseUnaryOp::Neg, p)
        });
        builder.finish(body)
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6 * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn combining_rule_is_pinned() {
        assert_close(combine_compute_and_memory(1.0, 8.0, 0.0), 9.0);
        assert_close(combine_compute_and_memory(1.0, 8.0, 1.0), 8.0);
        assert_close(combine_compute_and_memory(1.0, 8.0, 0.95), 8.05);
        assert_close(combine_compute_and_memory(8.0, 1.0, 0.95), 8.05);
        assert_close(combine_compute_and_memory(0.0, 0.0, 0.95), 0.0);
    }

    #[test]
    fn negate_splits_into_compute_and_memory_cycles() {
        let program = negate_body();
        for (parallelism, expected) in [(0.0, 9000.0), (1.0, 8000.0), (0.95, 8050.0)] {
            let profile = unit_profile(parallelism);
            let estimate = CostEstimator::new(&profile, CostAnalysisOptions::default())
                .estimate(&program, program.entry())
                .unwrap();
            // 1000 negations; 4000 bytes read from and 4000 written to dram
            assert_close(estimate.compute_cycles, 1000.0);
            assert_close(estimate.memory_cycles, 8000.0);
            assert_close(estimate.end_to_end_cycles, expected);
            assert_eq!(estimate.bytes_accessed, 8000);
        }
    }

    #[test]
    fn intermediate_values_stay_on_chip() {
        let mut builder = ProgramBuilder::new("chain");
        let body = builder.computation("chain", |b| {
            let p = b.parameter(0, ValueType::tensor(DType::F32, [10]));
            let e = b.unary(ElementwiseUnaryOp::Exp, p);
            b.unary(ElementwiseUnaryOp::Log, e)
        });
        let program = builder.finish(body);
        let profile = unit_profile(0.95);
        let estimate = CostEstimator::new(&profile, CostAnalysisOptions::default())
            .estimate(&program, program.entry())
            .unwrap();

        let exp = &estimate.nodes[0];
        assert_eq!((exp.dram_bytes, exp.on_chip_bytes), (40, 40));
        let log = &estimate.nodes[1];
        assert_eq!((log.dram_bytes, log.on_chip_bytes), (40, 40));
    }

    #[test]
    fn contraction_counts_multiply_and_add() {
        let mut builder = ProgramBuilder::new("dot");
        let body = builder.computation("dot", |b| {
            let lhs = b.parameter(0, ValueType::tensor(DType::F32, [4, 8]));
            let rhs = b.parameter(1, ValueType::tensor(DType::F32, [8, 3]));
            b.dot(
                lhs,
                rhs,
                DotGeneralSpec {
                    contract_lhs: vec![1],
                    contract_rhs: vec![0],
                    ..DotGeneralSpec::default()
                },
                ValueType::tensor(DType::F32, [4, 3]),
            )
        });
        let program = builder.finish(body);
        let profile = unit_profile(0.95);
        let estimate = CostEstimator::new(&profile, CostAnalysisOptions::default())
            .estimate(&program, program.entry())
            .unwrap();
        assert_close(estimate.ops, 2.0 * 12.0 * 8.0);
    }

    #[test]
    fn missing_category_rate_is_invalid_input() {
        let program = negate_body();
        let profile = HardwareProfile::new("sparse", 1.0)
            .with_compute_rate(OpCategory::Transcendental, 1.0e9)
            .with_memory_rate(MemoryTier::Dram, 1.0e9)
            .with_memory_rate(MemoryTier::OnChip, 1.0e9);
        let err = CostEstimator::new(&profile, CostAnalysisOptions::default())
            .estimate(&program, program.entry())
            .unwrap_err();
        assert!(matches!(err, ReifyError::InvalidInput { .. }), "{err}");
        assert!(err.to_string().contains("elementwise"), "{err}");
    }

    #[test]
    fn repeated_operand_slot_counts_as_fan_out() {
        let mut builder = ProgramBuilder::new("square");
        let body = builder.computation("square", |b| {
            let p = b.parameter(0, ValueType::tensor(DType::F32, [100]));
            b.binary(ElementwiseBinaryOp::Mul, p, p)
        });
        let program = builder.finish(body);
        let profile = unit_profile(0.95);
        let bytes = |count_multiple_input_accesses| {
            let options = CostAnalysisOptions {
                count_multiple_input_accesses,
                parallel: false,
            };
            CostEstimator::new(&profile, options)
                .estimate(&program, program.entry())
                .unwrap()
                .bytes_accessed
        };
        // two 400-byte reads of p plus the 400-byte write, or one read plus the write
        assert_eq!(bytes(true), 1200);
        assert_eq!(bytes(false), 800);
    }

    #[test]
    fn non_positive_rates_are_rejected_before_estimating() {
        let program = negate_body();
        for rate in [-1.0e9, 0.0, f64::INFINITY] {
            let profile = unit_profile(0.95).with_compute_rate(OpCategory::Elementwise, rate);
            let err = CostEstimator::new(&profile, CostAnalysisOptions::default())
                .estimate(&program, program.entry())
                .unwrap_err();
            assert_eq!(err.code(), "invalid_input", "rate {rate}");
        }
    }

    #[test]
    fn missing_memory_tier_is_invalid_input() {
        let program = negate_body();
        let profile = HardwareProfile::new("no-dram", 1.0)
            .with_compute_rate(OpCategory::Elementwise, 1.0e9)
            .with_memory_rate(MemoryTier::OnChip, 1.0e9);
        let err = CostEstimator::new(&profile, CostAnalysisOptions::default())
            .estimate(&program, program.entry())
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn trivial_ops_never_consult_the_rate_table() {
        let mut builder = ProgramBuilder::new("regroup");
        let body = builder.computation("regroup", |b| {
            let x = b.parameter(0, ValueType::tensor(DType::F32, [16]));
            let y = b.parameter(1, ValueType::tensor(DType::F32, [16]));
            b.tuple(vec![x, y])
        });
        let program = builder.finish(body);
        let empty = HardwareProfile::new("empty", 1.0);
        let estimate = CostEstimator::new(&empty, CostAnalysisOptions::default())
            .estimate(&program, program.entry())
            .unwrap();
        assert_eq!(estimate.end_to_end_cycles, 0.0);
        assert!(estimate.nodes.is_empty());
    }

    #[test]
    fn tuple_root_exports_its_elements() {
        let mut builder = ProgramBuilder::new("pair");
        let body = builder.computation("pair", |b| {
            let x = b.parameter(0, ValueType::tensor(DType::F32, [4]));
            let a = b.unary(ElementwiseUnaryOp::Abs, x);
            let s = b.binary(ElementwiseBinaryOp::Add, a, x);
            b.tuple(vec![a, s])
        });
        let program = builder.finish(body);
        let profile = unit_profile(0.95);
        let options = CostAnalysisOptions {
            count_multiple_input_accesses: true,
            parallel: false,
        };
        let estimate = CostEstimator::new(&profile, options)
            .estimate(&program, program.entry())
            .unwrap();
        // abs: reads x (dram) and writes an exported value (dram)
        assert_eq!(estimate.nodes[0].dram_bytes, 32);
        // add: reads abs (on chip) and x (dram), writes to dram
        assert_eq!(estimate.nodes[1].dram_bytes, 32);
        assert_eq!(estimate.nodes[1].on_chip_bytes, 16);
    }
}

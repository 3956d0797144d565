use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

/// Enumerates scalar element types carried by tensor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(clippy::upper_case_acronyms)]
pub enum DType {
    Pred,
    Si4,
    Ui4,
    Si8,
    Ui8,
    Si16,
    Ui16,
    Si32,
    Ui32,
    Si64,
    Ui64,
    Fp8E4M3,
    Fp8E5M2,
    Bf16,
    F16,
    F32,
    F64,
    Cf32,
    Cf64,
}

impl DType {
    /// Storage bit-width of one element.
    pub fn bitwidth(self) -> u64 {
        match self {
            // predicates are stored one per byte
            DType::Pred => 8,
            DType::Si4 | DType::Ui4 => 4,
            DType::Si8 | DType::Ui8 | DType::Fp8E4M3 | DType::Fp8E5M2 => 8,
            DType::Si16 | DType::Ui16 | DType::Bf16 | DType::F16 => 16,
            DType::Si32 | DType::Ui32 | DType::F32 => 32,
            DType::Si64 | DType::Ui64 | DType::F64 | DType::Cf32 => 64,
            DType::Cf64 => 128,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Pred => "pred",
            DType::Si4 => "s4",
            DType::Ui4 => "u4",
            DType::Si8 => "s8",
            DType::Ui8 => "u8",
            DType::Si16 => "s16",
            DType::Ui16 => "u16",
            DType::Si32 => "s32",
            DType::Ui32 => "u32",
            DType::Si64 => "s64",
            DType::Ui64 => "u64",
            DType::Fp8E4M3 => "f8e4m3",
            DType::Fp8E5M2 => "f8e5m2",
            DType::Bf16 => "bf16",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::Cf32 => "c64",
            DType::Cf64 => "c128",
        }
    }
}

/// Logical tensor shape as an ordered list of static extents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape {
    dims: Vec<u64>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<u64>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    /// Product of all extents, `None` on overflow. Scalars hold one element.
    pub fn element_count(&self) -> Option<u64> {
        self.dims
            .iter()
            .try_fold(1u64, |count, &dim| count.checked_mul(dim))
    }
}

/// Tensor metadata coupling dtype and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn element_count(&self) -> Option<u64> {
        self.shape.element_count()
    }

    /// Dense storage size; sub-byte element types are packed and rounded up.
    pub fn byte_len(&self) -> Option<u64> {
        let bits = self.element_count()?.checked_mul(self.dtype.bitwidth())?;
        Some(bits.div_ceil(8))
    }
}

/// Typing information for node outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Tensor(TensorSpec),
    Tuple(Vec<ValueType>),
}

impl ValueType {
    pub fn tensor(dtype: DType, dims: impl Into<Vec<u64>>) -> Self {
        ValueType::Tensor(TensorSpec::new(dtype, Shape::new(dims)))
    }

    pub fn as_tensor(&self) -> Option<&TensorSpec> {
        match self {
            ValueType::Tensor(spec) => Some(spec),
            ValueType::Tuple(_) => None,
        }
    }

    /// Element count of a tensor value; tuples count the elements of all leaves.
    pub fn element_count(&self) -> Option<u64> {
        match self {
            ValueType::Tensor(spec) => spec.element_count(),
            ValueType::Tuple(elements) => elements
                .iter()
                .try_fold(0u64, |acc, ty| acc.checked_add(ty.element_count()?)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Tensor(spec) => {
                write!(f, "{}[", spec.dtype.as_str())?;
                for (idx, dim) in spec.shape.dims().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{dim}")?;
                }
                write!(f, "]")
            }
            ValueType::Tuple(elements) => {
                write!(f, "(")?;
                for (idx, ty) in elements.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{ty}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Comparator used by the `compare` op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
    NotEqual,
}

/// Elementwise unary ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementwiseUnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Tanh,
    Erf,
    Sqrt,
    Rsqrt,
    Logistic,
    Sine,
    Cosine,
    Reciprocal,
}

impl ElementwiseUnaryOp {
    /// Ops lowered to special-function units rather than plain ALU instructions.
    pub fn is_transcendental(self) -> bool {
        !matches!(self, ElementwiseUnaryOp::Neg | ElementwiseUnaryOp::Abs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementwiseUnaryOp::Neg => "negate",
            ElementwiseUnaryOp::Abs => "abs",
            ElementwiseUnaryOp::Exp => "exponential",
            ElementwiseUnaryOp::Log => "log",
            ElementwiseUnaryOp::Tanh => "tanh",
            ElementwiseUnaryOp::Erf => "erf",
            ElementwiseUnaryOp::Sqrt => "sqrt",
            ElementwiseUnaryOp::Rsqrt => "rsqrt",
            ElementwiseUnaryOp::Logistic => "logistic",
            ElementwiseUnaryOp::Sine => "sine",
            ElementwiseUnaryOp::Cosine => "cosine",
            ElementwiseUnaryOp::Reciprocal => "reciprocal",
        }
    }
}

/// Elementwise binary ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementwiseBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
    Power,
    Remainder,
}

impl ElementwiseBinaryOp {
    pub fn is_transcendental(self) -> bool {
        matches!(self, ElementwiseBinaryOp::Power)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementwiseBinaryOp::Add => "add",
            ElementwiseBinaryOp::Sub => "subtract",
            ElementwiseBinaryOp::Mul => "multiply",
            ElementwiseBinaryOp::Div => "divide",
            ElementwiseBinaryOp::Maximum => "maximum",
            ElementwiseBinaryOp::Minimum => "minimum",
            ElementwiseBinaryOp::Power => "power",
            ElementwiseBinaryOp::Remainder => "remainder",
        }
    }
}

/// Reduction families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceKind {
    Sum,
    Max,
    Min,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceSpec {
    pub kind: ReduceKind,
    pub axes: Vec<usize>,
}

/// Fully describes a `dot_general` contraction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DotGeneralSpec {
    pub batch_lhs: Vec<usize>,
    pub batch_rhs: Vec<usize>,
    pub contract_lhs: Vec<usize>,
    pub contract_rhs: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransposeSpec {
    pub perm: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastSpec {
    pub dimensions: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceSpec {
    pub starts: Vec<u64>,
    pub limits: Vec<u64>,
    pub strides: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatSpec {
    pub axis: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadSpec {
    pub low: Vec<u64>,
    pub high: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IotaSpec {
    pub axis: usize,
}

/// Identifies a computation inside a [`Program`](super::Program) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputationId(pub u32);

/// Identifies an instruction inside its owning computation. Ids are dense body indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Program-wide identity of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub computation: ComputationId,
    pub node: NodeId,
}

impl NodeRef {
    pub fn new(computation: ComputationId, node: NodeId) -> Self {
        Self { computation, node }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "computation {} node %{}", self.computation.0, self.node.0)
    }
}

/// Emitter class of a fusion, mirroring how the backend will lower it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionKind {
    Loop,
    Input,
    Output,
    Custom,
}

impl FusionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FusionKind::Loop => "kLoop",
            FusionKind::Input => "kInput",
            FusionKind::Output => "kOutput",
            FusionKind::Custom => "kCustom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionSpec {
    pub kind: FusionKind,
    pub body: ComputationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhileSpec {
    pub cond: ComputationId,
    pub body: ComputationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalSpec {
    pub branches: Vec<ComputationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSpec {
    pub target: ComputationId,
}

/// Declarative form of the operations a computation may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Parameter(usize),
    Constant,
    ElementwiseUnary(ElementwiseUnaryOp),
    ElementwiseBinary(ElementwiseBinaryOp),
    Compare(ComparisonOp),
    Select,
    Convert(DType),
    Reduce(ReduceSpec),
    DotGeneral(DotGeneralSpec),
    Reshape,
    Bitcast,
    Transpose(TransposeSpec),
    Broadcast(BroadcastSpec),
    Slice(SliceSpec),
    Concatenate(ConcatSpec),
    Pad(PadSpec),
    Iota(IotaSpec),
    Copy,
    Tuple,
    GetTupleElement(usize),
    Fusion(FusionSpec),
    While(WhileSpec),
    Conditional(ConditionalSpec),
    Call(CallSpec),
}

impl Operation {
    /// Fusion-like ops: a single nested body executed as one scheduling unit.
    pub fn is_fusion(&self) -> bool {
        matches!(self, Operation::Fusion(_))
    }

    pub fn fusion_body(&self) -> Option<ComputationId> {
        match self {
            Operation::Fusion(spec) => Some(spec.body),
            _ => None,
        }
    }

    /// Computations referenced by this op, in a fixed order: loop condition before
    /// loop body, branches in declaration order.
    pub fn called_computations(&self) -> SmallVec<[ComputationId; 2]> {
        match self {
            Operation::Fusion(spec) => smallvec![spec.body],
            Operation::While(spec) => smallvec![spec.cond, spec.body],
            Operation::Conditional(spec) => spec.branches.iter().copied().collect(),
            Operation::Call(spec) => smallvec![spec.target],
            _ => SmallVec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Parameter(_) => "parameter",
            Operation::Constant => "constant",
            Operation::ElementwiseUnary(op) => op.as_str(),
            Operation::ElementwiseBinary(op) => op.as_str(),
            Operation::Compare(_) => "compare",
            Operation::Select => "select",
            Operation::Convert(_) => "convert",
            Operation::Reduce(_) => "reduce",
            Operation::DotGeneral(_) => "dot",
            Operation::Reshape => "reshape",
            Operation::Bitcast => "bitcast",
            Operation::Transpose(_) => "transpose",
            Operation::Broadcast(_) => "broadcast",
            Operation::Slice(_) => "slice",
            Operation::Concatenate(_) => "concatenate",
            Operation::Pad(_) => "pad",
            Operation::Iota(_) => "iota",
            Operation::Copy => "copy",
            Operation::Tuple => "tuple",
            Operation::GetTupleElement(_) => "get-tuple-element",
            Operation::Fusion(_) => "fusion",
            Operation::While(_) => "while",
            Operation::Conditional(_) => "conditional",
            Operation::Call(_) => "call",
        }
    }
}

/// Single instruction of a computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: NodeId,
    pub op: Operation,
    pub operands: Vec<NodeId>,
    pub output: ValueType,
}

/// Ordered instruction list with a distinguished root, addressed by [`ComputationId`].
///
/// Bodies are stored in dependency order and node ids equal body positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    pub id: ComputationId,
    pub name: String,
    pub body: Vec<Instruction>,
    pub root: NodeId,
}

impl Computation {
    pub fn instruction(&self, id: NodeId) -> Option<&Instruction> {
        self.body.get(id.index()).filter(|inst| inst.id == id)
    }

    pub fn root_instruction(&self) -> Option<&Instruction> {
        self.instruction(self.root)
    }
}

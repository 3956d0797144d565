use crate::ir::program::Program;
use crate::ir::spec::{
    CallSpec, ComparisonOp, Computation, ComputationId, ConditionalSpec, DType, DotGeneralSpec,
    ElementwiseBinaryOp, ElementwiseUnaryOp, FusionKind, FusionSpec, Instruction, NodeId,
    Operation, ReduceKind, ReduceSpec, ValueType, WhileSpec,
};

/// Lightweight builder for assembling programs programmatically.
///
/// Computations can be declared before they are defined, which lets callers wire
/// control-flow references in any order (including cyclic ones, for negative tests).
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    name: String,
    computations: Vec<Computation>,
}

impl ProgramBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            computations: Vec::new(),
        }
    }

    /// Reserves an id for a computation whose body is supplied later via [`Self::define`].
    pub fn declare(&mut self, name: impl Into<String>) -> ComputationId {
        let id = ComputationId(self.computations.len() as u32);
        self.computations.push(Computation {
            id,
            name: name.into(),
            body: Vec::new(),
            root: NodeId(0),
        });
        id
    }

    /// Fills a declared computation. The closure returns the root node.
    pub fn define<F>(&mut self, id: ComputationId, build: F)
    where
        F: FnOnce(&mut ComputationBuilder) -> NodeId,
    {
        let mut builder = ComputationBuilder::default();
        let root = build(&mut builder);
        let slot = &mut self.computations[id.0 as usize];
        slot.body = builder.into_instructions();
        slot.root = root;
    }

    pub fn computation<F>(&mut self, name: impl Into<String>, build: F) -> ComputationId
    where
        F: FnOnce(&mut ComputationBuilder) -> NodeId,
    {
        let id = self.declare(name);
        self.define(id, build);
        id
    }

    pub fn finish(self, entry: ComputationId) -> Program {
        Program::new(self.name, entry, self.computations)
    }
}

/// Appends instructions to a single computation body in dependency order.
#[derive(Debug, Default)]
pub struct ComputationBuilder {
    instructions: Vec<Instruction>,
}

impl ComputationBuilder {
    pub(crate) fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }

    pub fn emit(&mut self, op: Operation, operands: Vec<NodeId>, output: ValueType) -> NodeId {
        let id = NodeId(self.instructions.len() as u32);
        self.instructions.push(Instruction {
            id,
            op,
            operands,
            output,
        });
        id
    }

    /// Output type of a previously emitted node.
    ///
    /// Panics when `id` was not produced by this builder.
    pub fn value_type(&self, id: NodeId) -> ValueType {
        self.instructions
            .get(id.index())
            .map(|inst| inst.output.clone())
            .expect("value id must be emitted by this builder")
    }

    pub fn parameter(&mut self, index: usize, ty: ValueType) -> NodeId {
        self.emit(Operation::Parameter(index), Vec::new(), ty)
    }

    pub fn constant(&mut self, ty: ValueType) -> NodeId {
        self.emit(Operation::Constant, Vec::new(), ty)
    }

    pub fn unary(&mut self, op: ElementwiseUnaryOp, operand: NodeId) -> NodeId {
        let ty = self.value_type(operand);
        self.emit(Operation::ElementwiseUnary(op), vec![operand], ty)
    }

    pub fn binary(&mut self, op: ElementwiseBinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        let ty = self.value_type(lhs);
        self.emit(Operation::ElementwiseBinary(op), vec![lhs, rhs], ty)
    }

    pub fn compare(&mut self, op: ComparisonOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        let ty = match self.value_type(lhs) {
            ValueType::Tensor(spec) => ValueType::tensor(DType::Pred, spec.shape.dims().to_vec()),
            tuple => tuple,
        };
        self.emit(Operation::Compare(op), vec![lhs, rhs], ty)
    }

    pub fn select(&mut self, pred: NodeId, on_true: NodeId, on_false: NodeId) -> NodeId {
        let ty = self.value_type(on_true);
        self.emit(Operation::Select, vec![pred, on_true, on_false], ty)
    }

    pub fn convert(&mut self, operand: NodeId, dtype: DType) -> NodeId {
        let ty = match self.value_type(operand) {
            ValueType::Tensor(spec) => ValueType::tensor(dtype, spec.shape.dims().to_vec()),
            tuple => tuple,
        };
        self.emit(Operation::Convert(dtype), vec![operand], ty)
    }

    pub fn reduce(
        &mut self,
        operand: NodeId,
        kind: ReduceKind,
        axes: Vec<usize>,
        output: ValueType,
    ) -> NodeId {
        self.emit(
            Operation::Reduce(ReduceSpec { kind, axes }),
            vec![operand],
            output,
        )
    }

    pub fn dot(
        &mut self,
        lhs: NodeId,
        rhs: NodeId,
        spec: DotGeneralSpec,
        output: ValueType,
    ) -> NodeId {
        self.emit(Operation::DotGeneral(spec), vec![lhs, rhs], output)
    }

    pub fn tuple(&mut self, elements: Vec<NodeId>) -> NodeId {
        let ty = ValueType::Tuple(elements.iter().map(|id| self.value_type(*id)).collect());
        self.emit(Operation::Tuple, elements, ty)
    }

    pub fn get_tuple_element(&mut self, tuple: NodeId, index: usize, ty: ValueType) -> NodeId {
        self.emit(Operation::GetTupleElement(index), vec![tuple], ty)
    }

    pub fn fusion(
        &mut self,
        kind: FusionKind,
        body: ComputationId,
        operands: Vec<NodeId>,
        output: ValueType,
    ) -> NodeId {
        self.emit(Operation::Fusion(FusionSpec { kind, body }), operands, output)
    }

    /// Emits a `while` whose output type matches the loop-carried `init` value.
    pub fn while_loop(&mut self, cond: ComputationId, body: ComputationId, init: NodeId) -> NodeId {
        let ty = self.value_type(init);
        self.emit(Operation::While(WhileSpec { cond, body }), vec![init], ty)
    }

    pub fn conditional(
        &mut self,
        branches: Vec<ComputationId>,
        operands: Vec<NodeId>,
        output: ValueType,
    ) -> NodeId {
        self.emit(
            Operation::Conditional(ConditionalSpec { branches }),
            operands,
            output,
        )
    }

    pub fn call(&mut self, target: ComputationId, operands: Vec<NodeId>, output: ValueType) -> NodeId {
        self.emit(Operation::Call(CallSpec { target }), operands, output)
    }
}

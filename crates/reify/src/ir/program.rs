use std::{fmt, fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ReifyError, Result};
use crate::ir::backend_config::{BackendConfig, BackendConfigRecord, BackendConfigStore};
use crate::ir::builder::ComputationBuilder;
use crate::ir::spec::{Computation, ComputationId, Instruction, NodeId, NodeRef, Operation};

/// Arena of computations plus per-node backend configs.
///
/// Two mutation channels exist. Structural edits go through [`Program::computation_mut`]
/// and [`Program::add_computation`], which advance [`Program::structure_version`].
/// Backend-config writes go through [`Program::set_backend_config`] and leave the
/// version untouched, so fixed-point drivers never mistake annotation for a rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    name: String,
    entry: ComputationId,
    computations: Vec<Computation>,
    #[serde(default)]
    backend_configs: BackendConfigStore,
    #[serde(skip)]
    structure_version: u64,
}

#[derive(Debug, Error)]
pub enum ProgramSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("computation at arena slot {slot} carries id {found}")]
    ArenaMismatch { slot: usize, found: u32 },
    #[error("entry computation {0} is not in the arena")]
    MissingEntry(u32),
}

#[derive(Debug, Error)]
pub enum ProgramIoError {
    #[error(transparent)]
    Serialization(#[from] ProgramSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Program {
    /// Creates a program from an arena whose slot indices equal computation ids.
    pub fn new(
        name: impl Into<String>,
        entry: ComputationId,
        computations: Vec<Computation>,
    ) -> Self {
        Self {
            name: name.into(),
            entry,
            computations,
            backend_configs: BackendConfigStore::default(),
            structure_version: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> ComputationId {
        self.entry
    }

    pub fn entry_computation(&self) -> Option<&Computation> {
        self.computation(self.entry)
    }

    pub fn computation(&self, id: ComputationId) -> Option<&Computation> {
        self.computations
            .get(id.0 as usize)
            .filter(|computation| computation.id == id)
    }

    pub fn computation_by_name(&self, name: &str) -> Option<&Computation> {
        self.computations.iter().find(|c| c.name == name)
    }

    pub fn computations(&self) -> &[Computation] {
        &self.computations
    }

    pub fn instruction(&self, node: NodeRef) -> Option<&Instruction> {
        self.computation(node.computation)?.instruction(node.node)
    }

    /// Structural channel: any mutable access counts as a graph change.
    pub fn computation_mut(&mut self, id: ComputationId) -> Option<&mut Computation> {
        let computation = self
            .computations
            .get_mut(id.0 as usize)
            .filter(|computation| computation.id == id)?;
        self.structure_version = self.structure_version.wrapping_add(1);
        Some(computation)
    }

    /// Structural channel: appends a computation built by `build`, which returns the root.
    pub fn add_computation<F>(&mut self, name: impl Into<String>, build: F) -> ComputationId
    where
        F: FnOnce(&mut ComputationBuilder) -> NodeId,
    {
        let id = ComputationId(self.computations.len() as u32);
        let mut builder = ComputationBuilder::default();
        let root = build(&mut builder);
        self.computations.push(Computation {
            id,
            name: name.into(),
            body: builder.into_instructions(),
            root,
        });
        self.structure_version = self.structure_version.wrapping_add(1);
        id
    }

    /// Counter advanced by every structural edit since the program was built or loaded.
    pub fn structure_version(&self) -> u64 {
        self.structure_version
    }

    pub fn backend_configs(&self) -> &BackendConfigStore {
        &self.backend_configs
    }

    /// Typed read of a node's backend config; absent records read as `T::default()`.
    pub fn backend_config<T: BackendConfigRecord>(&self, node: NodeRef) -> Result<T> {
        if self.instruction(node).is_none() {
            return Err(ReifyError::invalid_input(format!(
                "no instruction at {node}"
            )));
        }
        match self.backend_configs.get(node) {
            None => Ok(T::default()),
            Some(config) => T::from_config(config).cloned().ok_or_else(|| {
                ReifyError::invalid_input(format!(
                    "{node} holds a {} config, requested {}",
                    config.kind(),
                    T::KIND
                ))
            }),
        }
    }

    /// Advisory channel: replaces the node's backend config.
    pub fn set_backend_config(
        &mut self,
        node: NodeRef,
        config: impl Into<BackendConfig>,
    ) -> Result<()> {
        let config = config.into();
        let Some(inst) = self.instruction(node) else {
            return Err(ReifyError::config_write(node, "no such instruction"));
        };
        if !config.kind().accepts(&inst.op) {
            return Err(ReifyError::config_write(
                node,
                format!("{} config is not valid on `{}`", config.kind(), inst.op.name()),
            ));
        }
        self.backend_configs.insert(node, config);
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String, ProgramSerdeError> {
        serde_json::to_string_pretty(self).map_err(ProgramSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, ProgramSerdeError> {
        let program: Program = serde_json::from_str(src)?;
        program.check_arena()?;
        Ok(program)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(ProgramIoError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let contents = fs::read_to_string(path)?;
        Program::from_json_str(&contents).map_err(ProgramIoError::from)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }

    fn check_arena(&self) -> Result<(), ProgramSerdeError> {
        for (slot, computation) in self.computations.iter().enumerate() {
            if computation.id.0 as usize != slot {
                return Err(ProgramSerdeError::ArenaMismatch {
                    slot,
                    found: computation.id.0,
                });
            }
        }
        if self.entry_computation().is_none() {
            return Err(ProgramSerdeError::MissingEntry(self.entry.0));
        }
        Ok(())
    }

    fn computation_label(&self, id: ComputationId) -> String {
        match self.computation(id) {
            Some(computation) => format!("%{}", computation.name),
            None => format!("%<missing {}>", id.0),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program @{} {{", self.name)?;
        for computation in &self.computations {
            let marker = if computation.id == self.entry {
                "ENTRY "
            } else {
                ""
            };
            writeln!(f, "  {marker}%{} {{", computation.name)?;
            for inst in &computation.body {
                let root = if inst.id == computation.root {
                    "ROOT "
                } else {
                    ""
                };
                write!(f, "    {root}%{} = {} {}(", inst.id.0, inst.output, inst.op.name())?;
                for (idx, operand) in inst.operands.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "%{}", operand.0)?;
                }
                write!(f, ")")?;
                match &inst.op {
                    Operation::Parameter(index) => write!(f, ", index={index}")?,
                    Operation::GetTupleElement(index) => write!(f, ", index={index}")?,
                    Operation::Fusion(spec) => write!(
                        f,
                        ", kind={}, calls={}",
                        spec.kind.as_str(),
                        self.computation_label(spec.body)
                    )?,
                    Operation::While(spec) => write!(
                        f,
                        ", condition={}, body={}",
                        self.computation_label(spec.cond),
                        self.computation_label(spec.body)
                    )?,
                    Operation::Conditional(spec) => {
                        write!(f, ", branches={{")?;
                        for (idx, branch) in spec.branches.iter().enumerate() {
                            if idx > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{}", self.computation_label(*branch))?;
                        }
                        write!(f, "}}")?;
                    }
                    Operation::Call(spec) => {
                        write!(f, ", to_apply={}", self.computation_label(spec.target))?
                    }
                    _ => {}
                }
                let node = NodeRef::new(computation.id, inst.id);
                if let Some(BackendConfig::Fusion(config)) = self.backend_configs.get(node) {
                    if let Some(cost) = config.reification_cost {
                        write!(
                            f,
                            ", reification_cost={{end_to_end_cycles={:.3}}}",
                            cost.end_to_end_cycles
                        )?;
                    }
                }
                writeln!(f)?;
            }
            writeln!(f, "  }}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        validate_computation_topology, DType, ElementwiseUnaryOp, FusionBackendConfig,
        FusionKind, ProgramBuilder, ReificationCost, ValueType,
    };

    fn fused_program() -> Program {
        let ty = ValueType::tensor(DType::F32, [8]);
        let mut builder = ProgramBuilder::new("m");
        let body = builder.computation("fused_exp", |b| {
            let p = b.parameter(0, ty.clone());
            b.unary(ElementwiseUnaryOp::Exp, p)
        });
        let entry = builder.computation("main", |b| {
            let p = b.parameter(0, ty.clone());
            b.fusion(FusionKind::Loop, body, vec![p], ty.clone())
        });
        builder.finish(entry)
    }

    #[test]
    fn only_structural_edits_bump_the_version() {
        let mut program = fused_program();
        let fusion = NodeRef::new(program.entry(), NodeId(1));
        program
            .set_backend_config(fusion, FusionBackendConfig::default())
            .unwrap();
        assert_eq!(program.structure_version(), 0);

        let scratch = program.add_computation("scratch", |b| {
            let p = b.parameter(0, ValueType::tensor(DType::F32, [8]));
            b.unary(ElementwiseUnaryOp::Abs, p)
        });
        assert_eq!(program.structure_version(), 1);
        let added = program.computation(scratch).unwrap();
        assert_eq!(added.name, "scratch");
        assert!(validate_computation_topology(added).is_ok());
        let entry = program.entry();
        assert!(program.computation_mut(entry).is_some());
        assert_eq!(program.structure_version(), 2);
    }

    #[test]
    fn writes_to_unknown_nodes_fail() {
        let mut program = fused_program();
        let missing = NodeRef::new(program.entry(), NodeId(9));
        let err = program
            .set_backend_config(missing, FusionBackendConfig::default())
            .unwrap_err();
        assert_eq!(err.code(), "config_write_failure");
        assert_eq!(
            program
                .backend_config::<FusionBackendConfig>(missing)
                .unwrap_err()
                .code(),
            "invalid_input"
        );
    }

    #[test]
    fn text_form_shows_fusion_cost() {
        let mut program = fused_program();
        let fusion = NodeRef::new(program.entry(), NodeId(1));
        let config = FusionBackendConfig {
            kind: None,
            reification_cost: Some(ReificationCost {
                end_to_end_cycles: 12.5,
                ..ReificationCost::default()
            }),
        };
        program.set_backend_config(fusion, config).unwrap();

        let text = program.to_text();
        assert!(text.contains("ENTRY %main"), "{text}");
        assert!(text.contains("calls=%fused_exp"), "{text}");
        assert!(text.contains("reification_cost={end_to_end_cycles=12.500}"), "{text}");
    }

    #[test]
    fn json_rejects_misplaced_computations() {
        let program = fused_program();
        let mut value: serde_json::Value =
            serde_json::from_str(&program.to_json_string().unwrap()).unwrap();
        value["computations"][0]["id"] = serde_json::json!(5);
        let err = Program::from_json_str(&value.to_string()).unwrap_err();
        assert!(matches!(err, ProgramSerdeError::ArenaMismatch { slot: 0, found: 5 }));
    }
}

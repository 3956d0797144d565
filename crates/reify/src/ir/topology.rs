use std::collections::HashSet;

use crate::error::{ReifyError, Result};
use crate::ir::spec::Computation;

/// Checks that every operand is defined earlier in the body and that the root exists.
pub fn validate_computation_topology(computation: &Computation) -> Result<()> {
    let mut available = HashSet::with_capacity(computation.body.len());
    for (position, instruction) in computation.body.iter().enumerate() {
        if instruction.id.index() != position {
            return Err(ReifyError::malformed_graph(format!(
                "computation '{}' holds node %{} at position {position}",
                computation.name, instruction.id.0
            )));
        }
        for operand in &instruction.operands {
            if !available.contains(operand) {
                return Err(ReifyError::malformed_graph(format!(
                    "operand %{} is missing before node %{} in computation '{}'",
                    operand.0, instruction.id.0, computation.name
                )));
            }
        }
        available.insert(instruction.id);
    }

    if computation.root_instruction().is_none() {
        return Err(ReifyError::malformed_graph(format!(
            "computation '{}' has no root node %{}",
            computation.name, computation.root.0
        )));
    }
    Ok(())
}

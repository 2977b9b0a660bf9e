//! Intraprocedural analyses backing the inference oracles.

mod locals;
mod opcode_semantics;
mod stack_types;
mod worklist;

pub(crate) use locals::LocalVariableTableOracle;
pub(crate) use stack_types::WorklistStackOracle;

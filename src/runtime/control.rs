//! Labels for structured control flow.
//!
//! A label is pushed when execution enters `block`, `loop` or `if` and popped
//! at the matching `end` or when a branch leaves it. Branch targets were
//! resolved by the validator, so a label only has to remember where to go and
//! how much of the operand stack belongs to it.

use crate::parser::instruction::BlockType;
use crate::parser::module::Module;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Block,
    /// Branches to a loop label restart the loop rather than leave it.
    Loop,
    If,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    pub kind: LabelKind,
    /// Values carried by a branch to this label: the block results, or the
    /// parameters for a loop.
    pub arity: usize,
    /// Operand stack height below the block's parameters.
    pub height: usize,
    /// Instruction a branch to this label continues at.
    pub continuation: usize,
}

/// Parameter and result counts of a block type.
pub fn block_arity(module: &Module, block_type: &BlockType) -> (usize, usize) {
    match block_type {
        BlockType::Empty => (0, 0),
        BlockType::Value(_) => (0, 1),
        BlockType::FuncType(idx) => module
            .types
            .get(*idx as usize)
            .map(|ty| (ty.params.len(), ty.results.len()))
            .unwrap_or((0, 0)),
    }
}

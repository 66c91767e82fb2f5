//! Call frames

use super::InstanceId;
use crate::parser::validate::FunctionCode;
use std::rc::Rc;

/// An active wasm function call.
///
/// The frame's locals (parameters first) occupy the operand stack from
/// `locals_base`; its labels occupy the executor's label stack from
/// `label_base`. Both are cut back to those marks when the call returns.
#[derive(Debug, Clone)]
pub struct Frame {
    pub instance: InstanceId,
    pub code: Rc<FunctionCode>,
    /// Next instruction to run when this frame is resumed.
    pub pc: usize,
    pub locals_base: usize,
    pub label_base: usize,
    /// Number of results the function returns.
    pub arity: usize,
}

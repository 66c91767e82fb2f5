//! Execution side of wasmbox.
//!
//! A [`Store`] owns every instantiated module together with the functions
//! they expose. Modules are instantiated against a [`Linker`] that carries the
//! host functions, memories and globals the embedder provides, and exported
//! functions are then driven by the non-recursive interpreter in
//! [`executor`].

pub mod config;
pub mod control;
pub mod executor;
pub mod frame;
pub mod instance;
pub mod linker;
pub mod memory;
pub mod ops;
pub mod stack;
pub mod store;
pub mod table;
pub mod value;
pub mod wasi;

pub use config::RuntimeConfig;
pub use instance::{Instance, InstanceId};
pub use linker::{Caller, HostFunc, Linker};
pub use memory::Memory;
pub use store::{FuncAddr, FunctionInstance, SharedGlobal, SharedMemory, SharedTable, Store};
pub use table::Table;
pub use value::Value;

use crate::parser::module::{FunctionType, Limits};
use crate::parser::validate::ValidationError;
use crate::parser::DecodeError;

/// Creates an empty store whose call stack may use at most `stack_size` bytes.
///
/// See [`RuntimeConfig::stack_size`] for how the budget is accounted.
pub fn new_runtime(stack_size: usize) -> Store {
    Store::with_config(RuntimeConfig { stack_size })
}

/// An abnormal termination of guest code.
///
/// A trap unwinds every wasm frame of the current embedder call; the messages
/// are the ones used by the WebAssembly reference test suite.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Trap {
    #[error("unreachable")]
    Unreachable,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    #[error("out of bounds table access")]
    TableOutOfBounds,
    #[error("undefined element")]
    UndefinedElement,
    #[error("uninitialized element")]
    UninitializedElement,
    #[error("indirect call type mismatch: expected {expected}, got {actual}")]
    IndirectCallTypeMismatch { expected: FunctionType, actual: FunctionType },
    #[error("call stack exhausted")]
    CallStackExhausted,
    /// Raised by a host callback to abort the guest.
    #[error("host abort: {0}")]
    Host(String),
    /// Operand stack ran dry. Only reachable by code that skipped validation.
    #[error("operand stack underflow")]
    StackUnderflow,
    /// Operand had the wrong type. Only reachable by code that skipped validation.
    #[error("operand type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

/// Failure to satisfy a module's imports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("unknown import: {module}.{field} has not been defined")]
    UnknownImport { module: String, field: String },
    #[error("incompatible import type for {module}.{field}: expected {expected}, got {actual}")]
    IncompatibleImport {
        module: String,
        field: String,
        expected: String,
        actual: String,
    },
}

impl LinkError {
    /// Module half of the offending import name.
    pub fn module(&self) -> &str {
        match self {
            LinkError::UnknownImport { module, .. } | LinkError::IncompatibleImport { module, .. } => module,
        }
    }

    /// Field half of the offending import name.
    pub fn field(&self) -> &str {
        match self {
            LinkError::UnknownImport { field, .. } | LinkError::IncompatibleImport { field, .. } => field,
        }
    }
}

/// Everything that can go wrong between loading bytes and getting results back.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Trap(#[from] Trap),
    #[error("unknown export: {0}")]
    UnknownExport(String),
    #[error("argument mismatch: expected {expected}, got {actual}")]
    ArgumentMismatch { expected: String, actual: String },
    #[error("unknown instance: {0}")]
    UnknownInstance(usize),
    #[error("instance has no memory")]
    NoMemory,
    #[error("invalid limits: {0}")]
    InvalidLimits(Limits),
    #[error("cannot allocate {bytes} bytes of linear memory")]
    OutOfMemory { bytes: usize },
}

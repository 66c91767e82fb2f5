//! Store configuration.

use serde::{Deserialize, Serialize};

/// Bytes charged per operand, local or global slot.
pub const SLOT_SIZE: usize = 8;

/// Slots charged per active call frame on top of its locals and operands.
pub const FRAME_SLOTS: usize = 4;

/// Default stack budget (64KiB).
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound, in bytes, on the interpreter stack of one embedder call.
    ///
    /// Every operand and local costs [`SLOT_SIZE`] bytes and every active
    /// frame [`FRAME_SLOTS`] slots more. A call that would not fit fails with
    /// `Trap::CallStackExhausted`.
    pub stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The stack budget in slots.
    pub fn slot_limit(&self) -> usize {
        self.stack_size / SLOT_SIZE
    }
}

//! Upper bounds on declared counts.
//!
//! A module header may claim any count it likes; these caps stop a few
//! malicious bytes from turning into a huge allocation before the decoder
//! notices the input is truncated. The values follow what browser engines
//! accept.

pub const MAX_TYPES: u32 = 1_000_000;
pub const MAX_FUNCTIONS: u32 = 1_000_000;
pub const MAX_IMPORTS: u32 = 100_000;
pub const MAX_EXPORTS: u32 = 100_000;
pub const MAX_GLOBALS: u32 = 1_000_000;
pub const MAX_TABLES: u32 = 100_000;
pub const MAX_MEMORIES: u32 = 100;
pub const MAX_ELEMENT_SEGMENTS: u32 = 100_000;
pub const MAX_DATA_SEGMENTS: u32 = 100_000;

pub const MAX_FUNCTION_PARAMS: u32 = 1_000;
pub const MAX_FUNCTION_RESULTS: u32 = 1_000;
pub const MAX_FUNCTION_LOCALS: u32 = 50_000;
pub const MAX_FUNCTION_SIZE: u32 = 7_654_321;

pub const MAX_BR_TABLE_LABELS: u32 = 65_536;
pub const MAX_SELECT_TYPES: u32 = 1_000;
pub const MAX_TABLE_ENTRIES: u32 = 10_000_000;

/// 4 GiB of 64 KiB pages.
pub const MAX_MEMORY_PAGES: u32 = 65_536;

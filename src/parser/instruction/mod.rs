//! WebAssembly instructions.
//!
//! One flat enum covers the MVP plus the sign-extension, non-trapping
//! float-to-int, multi-value, bulk memory and reference types proposals.
//! Instructions without immediates are listed once in the opcode tables below
//! so that decoding, encoding and naming cannot drift apart.

pub mod decode;
pub mod encode;

use super::module::{RefType, ValueType};
use fhex::ToHex;
use std::fmt;

/// Immediate of every load and store: the alignment hint (as a power of two)
/// and a constant offset added to the dynamic address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemArg {
    pub align: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValueType),
    /// Index into the type section; allows parameters and multiple results.
    FuncType(u32),
}

/// Expands `$mac!` with every opcode that takes no immediates.
macro_rules! for_each_plain_op {
    ($mac:ident) => {
        $mac! {
            0x00 => Unreachable, "unreachable";
            0x01 => Nop, "nop";
            0x05 => Else, "else";
            0x0B => End, "end";
            0x0F => Return, "return";
            0x1A => Drop, "drop";
            0x1B => Select, "select";
            0xD1 => RefIsNull, "ref.is_null";
            0x45 => I32Eqz, "i32.eqz";
            0x46 => I32Eq, "i32.eq";
            0x47 => I32Ne, "i32.ne";
            0x48 => I32LtS, "i32.lt_s";
            0x49 => I32LtU, "i32.lt_u";
            0x4A => I32GtS, "i32.gt_s";
            0x4B => I32GtU, "i32.gt_u";
            0x4C => I32LeS, "i32.le_s";
            0x4D => I32LeU, "i32.le_u";
            0x4E => I32GeS, "i32.ge_s";
            0x4F => I32GeU, "i32.ge_u";
            0x50 => I64Eqz, "i64.eqz";
            0x51 => I64Eq, "i64.eq";
            0x52 => I64Ne, "i64.ne";
            0x53 => I64LtS, "i64.lt_s";
            0x54 => I64LtU, "i64.lt_u";
            0x55 => I64GtS, "i64.gt_s";
            0x56 => I64GtU, "i64.gt_u";
            0x57 => I64LeS, "i64.le_s";
            0x58 => I64LeU, "i64.le_u";
            0x59 => I64GeS, "i64.ge_s";
            0x5A => I64GeU, "i64.ge_u";
            0x5B => F32Eq, "f32.eq";
            0x5C => F32Ne, "f32.ne";
            0x5D => F32Lt, "f32.lt";
            0x5E => F32Gt, "f32.gt";
            0x5F => F32Le, "f32.le";
            0x60 => F32Ge, "f32.ge";
            0x61 => F64Eq, "f64.eq";
            0x62 => F64Ne, "f64.ne";
            0x63 => F64Lt, "f64.lt";
            0x64 => F64Gt, "f64.gt";
            0x65 => F64Le, "f64.le";
            0x66 => F64Ge, "f64.ge";
            0x67 => I32Clz, "i32.clz";
            0x68 => I32Ctz, "i32.ctz";
            0x69 => I32Popcnt, "i32.popcnt";
            0x6A => I32Add, "i32.add";
            0x6B => I32Sub, "i32.sub";
            0x6C => I32Mul, "i32.mul";
            0x6D => I32DivS, "i32.div_s";
            0x6E => I32DivU, "i32.div_u";
            0x6F => I32RemS, "i32.rem_s";
            0x70 => I32RemU, "i32.rem_u";
            0x71 => I32And, "i32.and";
            0x72 => I32Or, "i32.or";
            0x73 => I32Xor, "i32.xor";
            0x74 => I32Shl, "i32.shl";
            0x75 => I32ShrS, "i32.shr_s";
            0x76 => I32ShrU, "i32.shr_u";
            0x77 => I32Rotl, "i32.rotl";
            0x78 => I32Rotr, "i32.rotr";
            0x79 => I64Clz, "i64.clz";
            0x7A => I64Ctz, "i64.ctz";
            0x7B => I64Popcnt, "i64.popcnt";
            0x7C => I64Add, "i64.add";
            0x7D => I64Sub, "i64.sub";
            0x7E => I64Mul, "i64.mul";
            0x7F => I64DivS, "i64.div_s";
            0x80 => I64DivU, "i64.div_u";
            0x81 => I64RemS, "i64.rem_s";
            0x82 => I64RemU, "i64.rem_u";
            0x83 => I64And, "i64.and";
            0x84 => I64Or, "i64.or";
            0x85 => I64Xor, "i64.xor";
            0x86 => I64Shl, "i64.shl";
            0x87 => I64ShrS, "i64.shr_s";
            0x88 => I64ShrU, "i64.shr_u";
            0x89 => I64Rotl, "i64.rotl";
            0x8A => I64Rotr, "i64.rotr";
            0x8B => F32Abs, "f32.abs";
            0x8C => F32Neg, "f32.neg";
            0x8D => F32Ceil, "f32.ceil";
            0x8E => F32Floor, "f32.floor";
            0x8F => F32Trunc, "f32.trunc";
            0x90 => F32Nearest, "f32.nearest";
            0x91 => F32Sqrt, "f32.sqrt";
            0x92 => F32Add, "f32.add";
            0x93 => F32Sub, "f32.sub";
            0x94 => F32Mul, "f32.mul";
            0x95 => F32Div, "f32.div";
            0x96 => F32Min, "f32.min";
            0x97 => F32Max, "f32.max";
            0x98 => F32Copysign, "f32.copysign";
            0x99 => F64Abs, "f64.abs";
            0x9A => F64Neg, "f64.neg";
            0x9B => F64Ceil, "f64.ceil";
            0x9C => F64Floor, "f64.floor";
            0x9D => F64Trunc, "f64.trunc";
            0x9E => F64Nearest, "f64.nearest";
            0x9F => F64Sqrt, "f64.sqrt";
            0xA0 => F64Add, "f64.add";
            0xA1 => F64Sub, "f64.sub";
            0xA2 => F64Mul, "f64.mul";
            0xA3 => F64Div, "f64.div";
            0xA4 => F64Min, "f64.min";
            0xA5 => F64Max, "f64.max";
            0xA6 => F64Copysign, "f64.copysign";
            0xA7 => I32WrapI64, "i32.wrap_i64";
            0xA8 => I32TruncF32S, "i32.trunc_f32_s";
            0xA9 => I32TruncF32U, "i32.trunc_f32_u";
            0xAA => I32TruncF64S, "i32.trunc_f64_s";
            0xAB => I32TruncF64U, "i32.trunc_f64_u";
            0xAC => I64ExtendI32S, "i64.extend_i32_s";
            0xAD => I64ExtendI32U, "i64.extend_i32_u";
            0xAE => I64TruncF32S, "i64.trunc_f32_s";
            0xAF => I64TruncF32U, "i64.trunc_f32_u";
            0xB0 => I64TruncF64S, "i64.trunc_f64_s";
            0xB1 => I64TruncF64U, "i64.trunc_f64_u";
            0xB2 => F32ConvertI32S, "f32.convert_i32_s";
            0xB3 => F32ConvertI32U, "f32.convert_i32_u";
            0xB4 => F32ConvertI64S, "f32.convert_i64_s";
            0xB5 => F32ConvertI64U, "f32.convert_i64_u";
            0xB6 => F32DemoteF64, "f32.demote_f64";
            0xB7 => F64ConvertI32S, "f64.convert_i32_s";
            0xB8 => F64ConvertI32U, "f64.convert_i32_u";
            0xB9 => F64ConvertI64S, "f64.convert_i64_s";
            0xBA => F64ConvertI64U, "f64.convert_i64_u";
            0xBB => F64PromoteF32, "f64.promote_f32";
            0xBC => I32ReinterpretF32, "i32.reinterpret_f32";
            0xBD => I64ReinterpretF64, "i64.reinterpret_f64";
            0xBE => F32ReinterpretI32, "f32.reinterpret_i32";
            0xBF => F64ReinterpretI64, "f64.reinterpret_i64";
            0xC0 => I32Extend8S, "i32.extend8_s";
            0xC1 => I32Extend16S, "i32.extend16_s";
            0xC2 => I64Extend8S, "i64.extend8_s";
            0xC3 => I64Extend16S, "i64.extend16_s";
            0xC4 => I64Extend32S, "i64.extend32_s";
        }
    };
}

/// Expands `$mac!` with the `0xFC`-prefixed saturating truncations.
macro_rules! for_each_saturating_op {
    ($mac:ident) => {
        $mac! {
            0 => I32TruncSatF32S, "i32.trunc_sat_f32_s";
            1 => I32TruncSatF32U, "i32.trunc_sat_f32_u";
            2 => I32TruncSatF64S, "i32.trunc_sat_f64_s";
            3 => I32TruncSatF64U, "i32.trunc_sat_f64_u";
            4 => I64TruncSatF32S, "i64.trunc_sat_f32_s";
            5 => I64TruncSatF32U, "i64.trunc_sat_f32_u";
            6 => I64TruncSatF64S, "i64.trunc_sat_f64_s";
            7 => I64TruncSatF64U, "i64.trunc_sat_f64_u";
        }
    };
}

/// Expands `$mac!` with every load and store, carrying the natural alignment
/// (log2 of the access width).
macro_rules! for_each_memory_op {
    ($mac:ident) => {
        $mac! {
            0x28 => I32Load, "i32.load", 2;
            0x29 => I64Load, "i64.load", 3;
            0x2A => F32Load, "f32.load", 2;
            0x2B => F64Load, "f64.load", 3;
            0x2C => I32Load8S, "i32.load8_s", 0;
            0x2D => I32Load8U, "i32.load8_u", 0;
            0x2E => I32Load16S, "i32.load16_s", 1;
            0x2F => I32Load16U, "i32.load16_u", 1;
            0x30 => I64Load8S, "i64.load8_s", 0;
            0x31 => I64Load8U, "i64.load8_u", 0;
            0x32 => I64Load16S, "i64.load16_s", 1;
            0x33 => I64Load16U, "i64.load16_u", 1;
            0x34 => I64Load32S, "i64.load32_s", 2;
            0x35 => I64Load32U, "i64.load32_u", 2;
            0x36 => I32Store, "i32.store", 2;
            0x37 => I64Store, "i64.store", 3;
            0x38 => F32Store, "f32.store", 2;
            0x39 => F64Store, "f64.store", 3;
            0x3A => I32Store8, "i32.store8", 0;
            0x3B => I32Store16, "i32.store16", 1;
            0x3C => I64Store8, "i64.store8", 0;
            0x3D => I64Store16, "i64.store16", 1;
            0x3E => I64Store32, "i64.store32", 2;
        }
    };
}

pub(crate) use for_each_memory_op;
pub(crate) use for_each_plain_op;
pub(crate) use for_each_saturating_op;

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // Control
    Unreachable,
    Nop,
    Block { block_type: BlockType },
    Loop { block_type: BlockType },
    If { block_type: BlockType },
    Else,
    End,
    Br { label_idx: u32 },
    BrIf { label_idx: u32 },
    BrTable { labels: Vec<u32>, default: u32 },
    Return,
    Call { func_idx: u32 },
    CallIndirect { type_idx: u32, table_idx: u32 },

    // Reference
    RefNull { ref_type: RefType },
    RefIsNull,
    RefFunc { func_idx: u32 },

    // Parametric
    Drop,
    Select,
    SelectTyped { types: Vec<ValueType> },

    // Variable
    LocalGet { local_idx: u32 },
    LocalSet { local_idx: u32 },
    LocalTee { local_idx: u32 },
    GlobalGet { global_idx: u32 },
    GlobalSet { global_idx: u32 },

    // Table
    TableGet { table_idx: u32 },
    TableSet { table_idx: u32 },
    TableInit { elem_idx: u32, table_idx: u32 },
    ElemDrop { elem_idx: u32 },
    TableCopy { dst_table: u32, src_table: u32 },
    TableGrow { table_idx: u32 },
    TableSize { table_idx: u32 },
    TableFill { table_idx: u32 },

    // Memory
    I32Load { memarg: MemArg },
    I64Load { memarg: MemArg },
    F32Load { memarg: MemArg },
    F64Load { memarg: MemArg },
    I32Load8S { memarg: MemArg },
    I32Load8U { memarg: MemArg },
    I32Load16S { memarg: MemArg },
    I32Load16U { memarg: MemArg },
    I64Load8S { memarg: MemArg },
    I64Load8U { memarg: MemArg },
    I64Load16S { memarg: MemArg },
    I64Load16U { memarg: MemArg },
    I64Load32S { memarg: MemArg },
    I64Load32U { memarg: MemArg },
    I32Store { memarg: MemArg },
    I64Store { memarg: MemArg },
    F32Store { memarg: MemArg },
    F64Store { memarg: MemArg },
    I32Store8 { memarg: MemArg },
    I32Store16 { memarg: MemArg },
    I64Store8 { memarg: MemArg },
    I64Store16 { memarg: MemArg },
    I64Store32 { memarg: MemArg },
    MemorySize,
    MemoryGrow,
    MemoryInit { data_idx: u32 },
    DataDrop { data_idx: u32 },
    MemoryCopy,
    MemoryFill,

    // Constants
    I32Const { value: i32 },
    I64Const { value: i64 },
    F32Const { value: f32 },
    F64Const { value: f64 },

    // Comparison
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    // Arithmetic
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    // Conversion
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
}

impl Instruction {
    /// Text-format name of the instruction, without immediates.
    pub fn mnemonic(&self) -> &'static str {
        macro_rules! plain_names {
            ($($op:literal => $name:ident, $text:literal;)*) => {
                match self {
                    $(Instruction::$name => return $text,)*
                    _ => {}
                }
            };
        }
        macro_rules! memory_names {
            ($($op:literal => $name:ident, $text:literal, $align:literal;)*) => {
                match self {
                    $(Instruction::$name { .. } => return $text,)*
                    _ => {}
                }
            };
        }
        for_each_plain_op!(plain_names);
        for_each_saturating_op!(plain_names);
        for_each_memory_op!(memory_names);

        match self {
            Instruction::Block { .. } => "block",
            Instruction::Loop { .. } => "loop",
            Instruction::If { .. } => "if",
            Instruction::Br { .. } => "br",
            Instruction::BrIf { .. } => "br_if",
            Instruction::BrTable { .. } => "br_table",
            Instruction::Call { .. } => "call",
            Instruction::CallIndirect { .. } => "call_indirect",
            Instruction::RefNull { .. } => "ref.null",
            Instruction::RefFunc { .. } => "ref.func",
            Instruction::SelectTyped { .. } => "select",
            Instruction::LocalGet { .. } => "local.get",
            Instruction::LocalSet { .. } => "local.set",
            Instruction::LocalTee { .. } => "local.tee",
            Instruction::GlobalGet { .. } => "global.get",
            Instruction::GlobalSet { .. } => "global.set",
            Instruction::TableGet { .. } => "table.get",
            Instruction::TableSet { .. } => "table.set",
            Instruction::TableInit { .. } => "table.init",
            Instruction::ElemDrop { .. } => "elem.drop",
            Instruction::TableCopy { .. } => "table.copy",
            Instruction::TableGrow { .. } => "table.grow",
            Instruction::TableSize { .. } => "table.size",
            Instruction::TableFill { .. } => "table.fill",
            Instruction::MemorySize => "memory.size",
            Instruction::MemoryGrow => "memory.grow",
            Instruction::MemoryInit { .. } => "memory.init",
            Instruction::DataDrop { .. } => "data.drop",
            Instruction::MemoryCopy => "memory.copy",
            Instruction::MemoryFill => "memory.fill",
            Instruction::I32Const { .. } => "i32.const",
            Instruction::I64Const { .. } => "i64.const",
            Instruction::F32Const { .. } => "f32.const",
            Instruction::F64Const { .. } => "f64.const",
            _ => "<unknown>",
        }
    }

    /// Log2 of the access width for loads and stores.
    pub fn natural_alignment(&self) -> Option<u32> {
        macro_rules! alignments {
            ($($op:literal => $name:ident, $text:literal, $align:literal;)*) => {
                match self {
                    $(Instruction::$name { .. } => Some($align),)*
                    _ => None,
                }
            };
        }
        for_each_memory_op!(alignments)
    }

    pub fn memarg(&self) -> Option<&MemArg> {
        macro_rules! memargs {
            ($($op:literal => $name:ident, $text:literal, $align:literal;)*) => {
                match self {
                    $(Instruction::$name { memarg } => Some(memarg),)*
                    _ => None,
                }
            };
        }
        for_each_memory_op!(memargs)
    }

    /// Whether this instruction opens a structured block closed by `end`.
    pub fn opens_block(&self) -> bool {
        matches!(
            self,
            Instruction::Block { .. } | Instruction::Loop { .. } | Instruction::If { .. }
        )
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockType::Empty => Ok(()),
            BlockType::Value(t) => write!(f, " (result {t})"),
            BlockType::FuncType(idx) => write!(f, " (type {idx})"),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        if let Some(memarg) = self.memarg() {
            if memarg.offset != 0 {
                write!(f, " offset={}", memarg.offset)?;
            }
            if Some(memarg.align) != self.natural_alignment() {
                write!(f, " align={}", 1u64 << memarg.align.min(63))?;
            }
            return Ok(());
        }
        match self {
            Instruction::Block { block_type }
            | Instruction::Loop { block_type }
            | Instruction::If { block_type } => write!(f, "{block_type}"),
            Instruction::Br { label_idx } | Instruction::BrIf { label_idx } => write!(f, " {label_idx}"),
            Instruction::BrTable { labels, default } => {
                for label in labels {
                    write!(f, " {label}")?;
                }
                write!(f, " {default}")
            }
            Instruction::Call { func_idx } | Instruction::RefFunc { func_idx } => write!(f, " {func_idx}"),
            Instruction::CallIndirect { type_idx, table_idx } => {
                write!(f, " {table_idx} (type {type_idx})")
            }
            Instruction::RefNull { ref_type } => write!(f, " {ref_type}"),
            Instruction::SelectTyped { types } => {
                for t in types {
                    write!(f, " (result {t})")?;
                }
                Ok(())
            }
            Instruction::LocalGet { local_idx }
            | Instruction::LocalSet { local_idx }
            | Instruction::LocalTee { local_idx } => write!(f, " {local_idx}"),
            Instruction::GlobalGet { global_idx } | Instruction::GlobalSet { global_idx } => {
                write!(f, " {global_idx}")
            }
            Instruction::TableGet { table_idx }
            | Instruction::TableSet { table_idx }
            | Instruction::TableGrow { table_idx }
            | Instruction::TableSize { table_idx }
            | Instruction::TableFill { table_idx } => write!(f, " {table_idx}"),
            Instruction::TableInit { elem_idx, table_idx } => write!(f, " {table_idx} {elem_idx}"),
            Instruction::ElemDrop { elem_idx } => write!(f, " {elem_idx}"),
            Instruction::TableCopy { dst_table, src_table } => write!(f, " {dst_table} {src_table}"),
            Instruction::MemoryInit { data_idx } | Instruction::DataDrop { data_idx } => write!(f, " {data_idx}"),
            Instruction::I32Const { value } => write!(f, " {value}"),
            Instruction::I64Const { value } => write!(f, " {value}"),
            Instruction::F32Const { value } => write!(f, " {}", value.to_hex()),
            Instruction::F64Const { value } => write!(f, " {}", value.to_hex()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_immediates() {
        assert_eq!(Instruction::I32Const { value: -7 }.to_string(), "i32.const -7");
        assert_eq!(Instruction::Br { label_idx: 2 }.to_string(), "br 2");
        assert_eq!(
            Instruction::BrTable {
                labels: vec![0, 1],
                default: 2
            }
            .to_string(),
            "br_table 0 1 2"
        );
        assert_eq!(
            Instruction::Block {
                block_type: BlockType::Value(ValueType::I32)
            }
            .to_string(),
            "block (result i32)"
        );
    }

    #[test]
    fn display_memarg_only_when_not_default() {
        let natural = Instruction::I32Load {
            memarg: MemArg { align: 2, offset: 0 },
        };
        assert_eq!(natural.to_string(), "i32.load");
        let unusual = Instruction::I64Store8 {
            memarg: MemArg { align: 0, offset: 16 },
        };
        assert_eq!(unusual.to_string(), "i64.store8 offset=16");
        let underaligned = Instruction::I32Store {
            memarg: MemArg { align: 0, offset: 0 },
        };
        assert_eq!(underaligned.to_string(), "i32.store align=1");
    }

    #[test]
    fn mnemonics_cover_every_table() {
        assert_eq!(Instruction::I64Extend32S.mnemonic(), "i64.extend32_s");
        assert_eq!(Instruction::I32TruncSatF64U.mnemonic(), "i32.trunc_sat_f64_u");
        assert_eq!(Instruction::MemoryFill.mnemonic(), "memory.fill");
        assert_eq!(
            Instruction::F64Load {
                memarg: MemArg::default()
            }
            .mnemonic(),
            "f64.load"
        );
    }

    #[test]
    fn float_constants_render_as_hex() {
        let text = Instruction::F32Const { value: 1.5 }.to_string();
        assert!(text.starts_with("f32.const 0x"), "{text}");
    }
}

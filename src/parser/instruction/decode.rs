use super::{for_each_memory_op, for_each_plain_op, for_each_saturating_op};
use super::{BlockType, Instruction, MemArg};
use crate::parser::encoding::{BLOCK_EMPTY, PREFIX_MISC};
use crate::parser::limits::{MAX_BR_TABLE_LABELS, MAX_SELECT_TYPES};
use crate::parser::module::{RefType, ValueType};
use crate::parser::reader::Reader;
use crate::parser::DecodeError;

macro_rules! decode_plain {
    ($($op:literal => $name:ident, $text:literal;)*) => {
        fn decode_plain(opcode: u8) -> Option<Instruction> {
            match opcode {
                $($op => Some(Instruction::$name),)*
                _ => None,
            }
        }
    };
}
for_each_plain_op!(decode_plain);

macro_rules! decode_saturating {
    ($($op:literal => $name:ident, $text:literal;)*) => {
        fn decode_saturating(sub_opcode: u32) -> Option<Instruction> {
            match sub_opcode {
                $($op => Some(Instruction::$name),)*
                _ => None,
            }
        }
    };
}
for_each_saturating_op!(decode_saturating);

macro_rules! decode_memory {
    ($($op:literal => $name:ident, $text:literal, $align:literal;)*) => {
        fn decode_memory(opcode: u8, reader: &mut Reader) -> Result<Option<Instruction>, DecodeError> {
            Ok(match opcode {
                $($op => Some(Instruction::$name { memarg: read_memarg(reader)? }),)*
                _ => None,
            })
        }
    };
}
for_each_memory_op!(decode_memory);

fn read_memarg(reader: &mut Reader) -> Result<MemArg, DecodeError> {
    let align = reader.read_vu32()?;
    let offset = reader.read_vu32()?;
    Ok(MemArg { align, offset })
}

fn read_block_type(reader: &mut Reader) -> Result<BlockType, DecodeError> {
    match reader.peek_byte() {
        Some(BLOCK_EMPTY) => {
            reader.read_byte()?;
            Ok(BlockType::Empty)
        }
        Some(byte) if ValueType::decode(byte).is_ok() => {
            reader.read_byte()?;
            Ok(BlockType::Value(ValueType::decode(byte)?))
        }
        _ => {
            let index = reader.read_vs33()?;
            if index < 0 {
                return Err(DecodeError::MalformedBlockType);
            }
            Ok(BlockType::FuncType(index as u32))
        }
    }
}

/// Memory instructions carry a memory index that must be zero in a module
/// with a single memory.
fn read_zero_byte(reader: &mut Reader) -> Result<(), DecodeError> {
    match reader.read_byte()? {
        0 => Ok(()),
        _ => Err(DecodeError::ZeroByteExpected),
    }
}

impl Instruction {
    pub fn decode(reader: &mut Reader) -> Result<Instruction, DecodeError> {
        let opcode = reader.read_byte()?;
        if let Some(inst) = decode_plain(opcode) {
            return Ok(inst);
        }
        if let Some(inst) = decode_memory(opcode, reader)? {
            return Ok(inst);
        }

        let inst = match opcode {
            0x02 => Instruction::Block {
                block_type: read_block_type(reader)?,
            },
            0x03 => Instruction::Loop {
                block_type: read_block_type(reader)?,
            },
            0x04 => Instruction::If {
                block_type: read_block_type(reader)?,
            },
            0x0C => Instruction::Br {
                label_idx: reader.read_vu32()?,
            },
            0x0D => Instruction::BrIf {
                label_idx: reader.read_vu32()?,
            },
            0x0E => {
                let count = reader.read_count("br_table labels", MAX_BR_TABLE_LABELS)?;
                let labels = (0..count)
                    .map(|_| reader.read_vu32())
                    .collect::<Result<Vec<_>, _>>()?;
                let default = reader.read_vu32()?;
                Instruction::BrTable { labels, default }
            }
            0x10 => Instruction::Call {
                func_idx: reader.read_vu32()?,
            },
            0x11 => {
                let type_idx = reader.read_vu32()?;
                let table_idx = reader.read_vu32()?;
                Instruction::CallIndirect { type_idx, table_idx }
            }
            0x1C => {
                let count = reader.read_count("select types", MAX_SELECT_TYPES)?;
                let types = (0..count)
                    .map(|_| reader.read_byte().and_then(ValueType::decode))
                    .collect::<Result<Vec<_>, _>>()?;
                Instruction::SelectTyped { types }
            }
            0x20 => Instruction::LocalGet {
                local_idx: reader.read_vu32()?,
            },
            0x21 => Instruction::LocalSet {
                local_idx: reader.read_vu32()?,
            },
            0x22 => Instruction::LocalTee {
                local_idx: reader.read_vu32()?,
            },
            0x23 => Instruction::GlobalGet {
                global_idx: reader.read_vu32()?,
            },
            0x24 => Instruction::GlobalSet {
                global_idx: reader.read_vu32()?,
            },
            0x25 => Instruction::TableGet {
                table_idx: reader.read_vu32()?,
            },
            0x26 => Instruction::TableSet {
                table_idx: reader.read_vu32()?,
            },
            0x3F => {
                read_zero_byte(reader)?;
                Instruction::MemorySize
            }
            0x40 => {
                read_zero_byte(reader)?;
                Instruction::MemoryGrow
            }
            0x41 => Instruction::I32Const {
                value: reader.read_vs32()?,
            },
            0x42 => Instruction::I64Const {
                value: reader.read_vs64()?,
            },
            0x43 => Instruction::F32Const {
                value: reader.read_f32()?,
            },
            0x44 => Instruction::F64Const {
                value: reader.read_f64()?,
            },
            0xD0 => Instruction::RefNull {
                ref_type: RefType::decode(reader.read_byte()?)?,
            },
            0xD2 => Instruction::RefFunc {
                func_idx: reader.read_vu32()?,
            },
            PREFIX_MISC => decode_misc(reader)?,
            other => return Err(DecodeError::IllegalOpcode(other)),
        };
        Ok(inst)
    }
}

fn decode_misc(reader: &mut Reader) -> Result<Instruction, DecodeError> {
    let sub_opcode = reader.read_vu32()?;
    if let Some(inst) = decode_saturating(sub_opcode) {
        return Ok(inst);
    }
    let inst = match sub_opcode {
        8 => {
            let data_idx = reader.read_vu32()?;
            read_zero_byte(reader)?;
            Instruction::MemoryInit { data_idx }
        }
        9 => Instruction::DataDrop {
            data_idx: reader.read_vu32()?,
        },
        10 => {
            read_zero_byte(reader)?;
            read_zero_byte(reader)?;
            Instruction::MemoryCopy
        }
        11 => {
            read_zero_byte(reader)?;
            Instruction::MemoryFill
        }
        12 => {
            let elem_idx = reader.read_vu32()?;
            let table_idx = reader.read_vu32()?;
            Instruction::TableInit { elem_idx, table_idx }
        }
        13 => Instruction::ElemDrop {
            elem_idx: reader.read_vu32()?,
        },
        14 => {
            let dst_table = reader.read_vu32()?;
            let src_table = reader.read_vu32()?;
            Instruction::TableCopy { dst_table, src_table }
        }
        15 => Instruction::TableGrow {
            table_idx: reader.read_vu32()?,
        },
        16 => Instruction::TableSize {
            table_idx: reader.read_vu32()?,
        },
        17 => Instruction::TableFill {
            table_idx: reader.read_vu32()?,
        },
        other => return Err(DecodeError::IllegalPrefixedOpcode(PREFIX_MISC, other)),
    };
    Ok(inst)
}

/// Decodes instructions up to and including the `end` that closes the
/// expression. Nested blocks are tracked so inner `end`s do not stop early.
pub fn decode_expression(reader: &mut Reader) -> Result<Vec<Instruction>, DecodeError> {
    let mut instructions = Vec::new();
    let mut depth = 0usize;
    loop {
        if reader.is_empty() {
            return Err(DecodeError::MissingEnd);
        }
        let inst = Instruction::decode(reader)?;
        if inst.opens_block() {
            depth += 1;
        }
        let closes = inst == Instruction::End;
        instructions.push(inst);
        if closes {
            if depth == 0 {
                return Ok(instructions);
            }
            depth -= 1;
        }
    }
}

use super::{for_each_memory_op, for_each_plain_op, for_each_saturating_op};
use super::{BlockType, Instruction};
use crate::parser::encoding::{WasmWrite, BLOCK_EMPTY, PREFIX_MISC};

impl BlockType {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            BlockType::Empty => buf.push(BLOCK_EMPTY),
            BlockType::Value(t) => buf.push(t.encode()),
            BlockType::FuncType(idx) => buf.put_i64_leb(i64::from(*idx)),
        }
    }
}

impl Instruction {
    /// Appends the binary encoding of this instruction to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        macro_rules! encode_plain {
            ($($op:literal => $name:ident, $text:literal;)*) => {
                match self {
                    $(Instruction::$name => {
                        buf.push($op);
                        return;
                    })*
                    _ => {}
                }
            };
        }
        macro_rules! encode_saturating {
            ($($op:literal => $name:ident, $text:literal;)*) => {
                match self {
                    $(Instruction::$name => {
                        buf.push(PREFIX_MISC);
                        buf.put_u32_leb($op);
                        return;
                    })*
                    _ => {}
                }
            };
        }
        macro_rules! encode_memory {
            ($($op:literal => $name:ident, $text:literal, $align:literal;)*) => {
                match self {
                    $(Instruction::$name { memarg } => {
                        buf.push($op);
                        buf.put_u32_leb(memarg.align);
                        buf.put_u32_leb(memarg.offset);
                        return;
                    })*
                    _ => {}
                }
            };
        }
        for_each_plain_op!(encode_plain);
        for_each_saturating_op!(encode_saturating);
        for_each_memory_op!(encode_memory);

        let misc = |buf: &mut Vec<u8>, sub: u32| {
            buf.push(PREFIX_MISC);
            buf.put_u32_leb(sub);
        };

        match self {
            Instruction::Block { block_type } => {
                buf.push(0x02);
                block_type.encode(buf);
            }
            Instruction::Loop { block_type } => {
                buf.push(0x03);
                block_type.encode(buf);
            }
            Instruction::If { block_type } => {
                buf.push(0x04);
                block_type.encode(buf);
            }
            Instruction::Br { label_idx } => {
                buf.push(0x0C);
                buf.put_u32_leb(*label_idx);
            }
            Instruction::BrIf { label_idx } => {
                buf.push(0x0D);
                buf.put_u32_leb(*label_idx);
            }
            Instruction::BrTable { labels, default } => {
                buf.push(0x0E);
                buf.put_u32_leb(labels.len() as u32);
                for label in labels {
                    buf.put_u32_leb(*label);
                }
                buf.put_u32_leb(*default);
            }
            Instruction::Call { func_idx } => {
                buf.push(0x10);
                buf.put_u32_leb(*func_idx);
            }
            Instruction::CallIndirect { type_idx, table_idx } => {
                buf.push(0x11);
                buf.put_u32_leb(*type_idx);
                buf.put_u32_leb(*table_idx);
            }
            Instruction::SelectTyped { types } => {
                buf.push(0x1C);
                buf.put_u32_leb(types.len() as u32);
                buf.extend(types.iter().map(|t| t.encode()));
            }
            Instruction::LocalGet { local_idx } => {
                buf.push(0x20);
                buf.put_u32_leb(*local_idx);
            }
            Instruction::LocalSet { local_idx } => {
                buf.push(0x21);
                buf.put_u32_leb(*local_idx);
            }
            Instruction::LocalTee { local_idx } => {
                buf.push(0x22);
                buf.put_u32_leb(*local_idx);
            }
            Instruction::GlobalGet { global_idx } => {
                buf.push(0x23);
                buf.put_u32_leb(*global_idx);
            }
            Instruction::GlobalSet { global_idx } => {
                buf.push(0x24);
                buf.put_u32_leb(*global_idx);
            }
            Instruction::TableGet { table_idx } => {
                buf.push(0x25);
                buf.put_u32_leb(*table_idx);
            }
            Instruction::TableSet { table_idx } => {
                buf.push(0x26);
                buf.put_u32_leb(*table_idx);
            }
            Instruction::MemorySize => buf.extend_from_slice(&[0x3F, 0x00]),
            Instruction::MemoryGrow => buf.extend_from_slice(&[0x40, 0x00]),
            Instruction::I32Const { value } => {
                buf.push(0x41);
                buf.put_i32_leb(*value);
            }
            Instruction::I64Const { value } => {
                buf.push(0x42);
                buf.put_i64_leb(*value);
            }
            Instruction::F32Const { value } => {
                buf.push(0x43);
                buf.put_f32(*value);
            }
            Instruction::F64Const { value } => {
                buf.push(0x44);
                buf.put_f64(*value);
            }
            Instruction::RefNull { ref_type } => {
                buf.push(0xD0);
                buf.push(ref_type.encode());
            }
            Instruction::RefFunc { func_idx } => {
                buf.push(0xD2);
                buf.put_u32_leb(*func_idx);
            }
            Instruction::MemoryInit { data_idx } => {
                misc(buf, 8);
                buf.put_u32_leb(*data_idx);
                buf.push(0x00);
            }
            Instruction::DataDrop { data_idx } => {
                misc(buf, 9);
                buf.put_u32_leb(*data_idx);
            }
            Instruction::MemoryCopy => {
                misc(buf, 10);
                buf.extend_from_slice(&[0x00, 0x00]);
            }
            Instruction::MemoryFill => {
                misc(buf, 11);
                buf.push(0x00);
            }
            Instruction::TableInit { elem_idx, table_idx } => {
                misc(buf, 12);
                buf.put_u32_leb(*elem_idx);
                buf.put_u32_leb(*table_idx);
            }
            Instruction::ElemDrop { elem_idx } => {
                misc(buf, 13);
                buf.put_u32_leb(*elem_idx);
            }
            Instruction::TableCopy { dst_table, src_table } => {
                misc(buf, 14);
                buf.put_u32_leb(*dst_table);
                buf.put_u32_leb(*src_table);
            }
            Instruction::TableGrow { table_idx } => {
                misc(buf, 15);
                buf.put_u32_leb(*table_idx);
            }
            Instruction::TableSize { table_idx } => {
                misc(buf, 16);
                buf.put_u32_leb(*table_idx);
            }
            Instruction::TableFill { table_idx } => {
                misc(buf, 17);
                buf.put_u32_leb(*table_idx);
            }
            // every remaining variant returned from one of the opcode tables above
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::instruction::decode::decode_expression;
    use crate::parser::instruction::MemArg;
    use crate::parser::module::{RefType, ValueType};
    use crate::parser::reader::Reader;

    #[test]
    fn encodes_back_to_the_decoded_bytes() {
        let body = vec![
            Instruction::Block {
                block_type: BlockType::Value(ValueType::I32),
            },
            Instruction::I32Const { value: -200 },
            Instruction::I64Const { value: i64::MIN },
            Instruction::Drop,
            Instruction::F64Const { value: f64::NAN },
            Instruction::Drop,
            Instruction::I64Store32 {
                memarg: MemArg { align: 1, offset: 300 },
            },
            Instruction::MemoryInit { data_idx: 4 },
            Instruction::TableCopy {
                dst_table: 1,
                src_table: 0,
            },
            Instruction::RefNull {
                ref_type: RefType::ExternRef,
            },
            Instruction::I32TruncSatF32U,
            Instruction::End,
            Instruction::End,
        ];
        let mut bytes = Vec::new();
        for inst in &body {
            inst.encode(&mut bytes);
        }
        let decoded = decode_expression(&mut Reader::new(&bytes)).unwrap();
        let mut again = Vec::new();
        for inst in &decoded {
            inst.encode(&mut again);
        }
        assert_eq!(bytes, again);
        assert_eq!(decoded.len(), body.len());
    }

    #[test]
    fn func_type_block_uses_signed_leb() {
        let mut buf = Vec::new();
        BlockType::FuncType(64).encode(&mut buf);
        // 64 needs two bytes as a signed LEB so it is not confused with a value type
        assert_eq!(buf, vec![0xc0, 0x00]);
    }
}

//! Binary module decoder.
//!
//! [`parse`] turns the bytes of a `.wasm` file into a [`module::Module`] in a
//! single pass. Anything that does not follow the binary format is rejected
//! with a [`DecodeError`]; type checking is left to [`validate`].

pub mod encoding;
pub mod instruction;
pub mod limits;
pub mod module;
pub mod reader;
pub mod validate;

use encoding::{SectionId, DESC_FUNC, DESC_GLOBAL, DESC_MEMORY, DESC_TABLE, LIMITS_MIN, LIMITS_MIN_MAX, TYPE_FUNC};
use instruction::decode::decode_expression;
use instruction::Instruction;
use limits::*;
use module::*;
use reader::Reader;
use std::convert::TryFrom;
use thiserror::Error;

/// A malformed module: the bytes do not follow the binary format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("magic header not detected")]
    BadMagic,

    #[error("unknown binary version {0}")]
    UnsupportedVersion(u32),

    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("integer representation too long")]
    IntegerTooLong,

    #[error("integer too large")]
    IntegerTooLarge,

    #[error("malformed UTF-8 encoding")]
    MalformedUtf8,

    #[error("malformed section id {0}")]
    MalformedSectionId(u8),

    #[error("unexpected {0} section: sections are out of order or duplicated")]
    UnexpectedSection(SectionId),

    #[error("section size mismatch in {0} section")]
    SectionSizeMismatch(SectionId),

    #[error("function and code section have inconsistent lengths")]
    FunctionCountMismatch,

    #[error("data count and data section have inconsistent lengths")]
    DataCountMismatch,

    #[error("malformed value type 0x{0:02x}")]
    MalformedValueType(u8),

    #[error("malformed reference type 0x{0:02x}")]
    MalformedRefType(u8),

    #[error("malformed function type, expected 0x60 got 0x{0:02x}")]
    MalformedFunctionType(u8),

    #[error("malformed block type")]
    MalformedBlockType,

    #[error("malformed limits flags 0x{0:02x}")]
    MalformedLimits(u8),

    #[error("malformed mutability 0x{0:02x}")]
    MalformedMutability(u8),

    #[error("malformed import kind 0x{0:02x}")]
    MalformedImportKind(u8),

    #[error("malformed export kind 0x{0:02x}")]
    MalformedExportKind(u8),

    #[error("malformed element segment flags {0}")]
    MalformedElementFlags(u32),

    #[error("malformed element kind 0x{0:02x}")]
    MalformedElementKind(u8),

    #[error("malformed data segment flags {0}")]
    MalformedDataFlags(u32),

    #[error("illegal opcode 0x{0:02x}")]
    IllegalOpcode(u8),

    #[error("illegal opcode 0x{0:02x} {1}")]
    IllegalPrefixedOpcode(u8, u32),

    #[error("zero byte expected")]
    ZeroByteExpected,

    #[error("END opcode expected")]
    MissingEnd,

    #[error("too many locals")]
    TooManyLocals,

    #[error("too many {what}: {count} exceeds the limit of {max}")]
    LimitExceeded { what: &'static str, count: u32, max: u32 },
}

/// Decodes a complete module. `name` is only used for diagnostics.
pub fn parse(name: &str, bytes: &[u8]) -> Result<Module, DecodeError> {
    let mut reader = Reader::new(bytes);
    read_header(&mut reader)?;

    let mut module = Module::new(name);
    let mut last: Option<SectionId> = None;

    while !reader.is_empty() {
        let id_byte = reader.read_byte()?;
        let id = SectionId::try_from(id_byte).map_err(DecodeError::MalformedSectionId)?;
        let size = reader.read_vu32()? as usize;
        let mut section = reader.sub_reader(size)?;

        if id == SectionId::Custom {
            let custom_name = section.read_name()?;
            let data = section.read_bytes(section.remaining())?.to_vec();
            log::debug!("{name}: custom section \"{custom_name}\" ({} bytes)", data.len());
            module.custom.push(CustomSection {
                name: custom_name,
                data,
                after: last,
            });
            continue;
        }

        if let Some(prev) = last {
            if id.rank() <= prev.rank() {
                return Err(DecodeError::UnexpectedSection(id));
            }
        }

        log::debug!("{name}: {id} section, {size} bytes");
        read_section(id, &mut section, &mut module)?;
        if !section.is_empty() {
            return Err(DecodeError::SectionSizeMismatch(id));
        }
        module.sections.push(id);
        last = Some(id);
    }

    if module.functions.len() != module.code.len() {
        return Err(DecodeError::FunctionCountMismatch);
    }
    if let Some(count) = module.data_count {
        if count as usize != module.data.len() {
            return Err(DecodeError::DataCountMismatch);
        }
    }

    Ok(module)
}

fn read_header(reader: &mut Reader) -> Result<(), DecodeError> {
    let magic = reader.read_bytes(4).map_err(|_| DecodeError::BadMagic)?;
    if magic != encoding::MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = reader.read_u32()?;
    if version != encoding::VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    Ok(())
}

fn read_section(id: SectionId, reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    match id {
        SectionId::Type => {
            let count = reader.read_count("types", MAX_TYPES)?;
            for _ in 0..count {
                module.types.push(read_function_type(reader)?);
            }
        }
        SectionId::Import => {
            let count = reader.read_count("imports", MAX_IMPORTS)?;
            for _ in 0..count {
                module.imports.push(read_import(reader)?);
            }
        }
        SectionId::Function => {
            let count = reader.read_count("functions", MAX_FUNCTIONS)?;
            for _ in 0..count {
                module.functions.push(reader.read_vu32()?);
            }
        }
        SectionId::Table => {
            let count = reader.read_count("tables", MAX_TABLES)?;
            for _ in 0..count {
                module.tables.push(read_table_type(reader)?);
            }
        }
        SectionId::Memory => {
            let count = reader.read_count("memories", MAX_MEMORIES)?;
            for _ in 0..count {
                module.memories.push(MemoryType {
                    limits: read_limits(reader)?,
                });
            }
        }
        SectionId::Global => {
            let count = reader.read_count("globals", MAX_GLOBALS)?;
            for _ in 0..count {
                let ty = read_global_type(reader)?;
                let init = read_const_expr(reader)?;
                module.globals.push(Global { ty, init });
            }
        }
        SectionId::Export => {
            let count = reader.read_count("exports", MAX_EXPORTS)?;
            for _ in 0..count {
                module.exports.push(read_export(reader)?);
            }
        }
        SectionId::Start => module.start = Some(reader.read_vu32()?),
        SectionId::Element => {
            let count = reader.read_count("element segments", MAX_ELEMENT_SEGMENTS)?;
            for _ in 0..count {
                module.elements.push(read_element_segment(reader)?);
            }
        }
        SectionId::Code => {
            let count = reader.read_count("function bodies", MAX_FUNCTIONS)?;
            if count as usize != module.functions.len() {
                return Err(DecodeError::FunctionCountMismatch);
            }
            for _ in 0..count {
                module.code.push(read_function_body(reader)?);
            }
        }
        SectionId::Data => {
            let count = reader.read_count("data segments", MAX_DATA_SEGMENTS)?;
            for _ in 0..count {
                module.data.push(read_data_segment(reader)?);
            }
        }
        SectionId::DataCount => module.data_count = Some(reader.read_vu32()?),
        SectionId::Custom => {}
    }
    Ok(())
}

fn read_value_types(reader: &mut Reader, what: &'static str, max: u32) -> Result<Vec<ValueType>, DecodeError> {
    let count = reader.read_count(what, max)?;
    (0..count)
        .map(|_| reader.read_byte().and_then(ValueType::decode))
        .collect()
}

fn read_function_type(reader: &mut Reader) -> Result<FunctionType, DecodeError> {
    let form = reader.read_byte()?;
    if form != TYPE_FUNC {
        return Err(DecodeError::MalformedFunctionType(form));
    }
    let params = read_value_types(reader, "parameters", MAX_FUNCTION_PARAMS)?;
    let results = read_value_types(reader, "results", MAX_FUNCTION_RESULTS)?;
    Ok(FunctionType { params, results })
}

fn read_limits(reader: &mut Reader) -> Result<Limits, DecodeError> {
    match reader.read_byte()? {
        LIMITS_MIN => Ok(Limits {
            min: reader.read_vu32()?,
            max: None,
        }),
        LIMITS_MIN_MAX => {
            let min = reader.read_vu32()?;
            let max = reader.read_vu32()?;
            Ok(Limits { min, max: Some(max) })
        }
        other => Err(DecodeError::MalformedLimits(other)),
    }
}

fn read_table_type(reader: &mut Reader) -> Result<TableType, DecodeError> {
    let element = RefType::decode(reader.read_byte()?)?;
    let limits = read_limits(reader)?;
    Ok(TableType { element, limits })
}

fn read_global_type(reader: &mut Reader) -> Result<GlobalType, DecodeError> {
    let value_type = ValueType::decode(reader.read_byte()?)?;
    let mutable = match reader.read_byte()? {
        0 => false,
        1 => true,
        other => return Err(DecodeError::MalformedMutability(other)),
    };
    Ok(GlobalType { value_type, mutable })
}

fn read_import(reader: &mut Reader) -> Result<Import, DecodeError> {
    let module = reader.read_name()?;
    let field = reader.read_name()?;
    let desc = match reader.read_byte()? {
        DESC_FUNC => ImportDesc::Function(reader.read_vu32()?),
        DESC_TABLE => ImportDesc::Table(read_table_type(reader)?),
        DESC_MEMORY => ImportDesc::Memory(MemoryType {
            limits: read_limits(reader)?,
        }),
        DESC_GLOBAL => ImportDesc::Global(read_global_type(reader)?),
        other => return Err(DecodeError::MalformedImportKind(other)),
    };
    Ok(Import { module, field, desc })
}

fn read_export(reader: &mut Reader) -> Result<Export, DecodeError> {
    let name = reader.read_name()?;
    let kind = reader.read_byte()?;
    let index = reader.read_vu32()?;
    let desc = match kind {
        DESC_FUNC => ExportDesc::Function(index),
        DESC_TABLE => ExportDesc::Table(index),
        DESC_MEMORY => ExportDesc::Memory(index),
        DESC_GLOBAL => ExportDesc::Global(index),
        other => return Err(DecodeError::MalformedExportKind(other)),
    };
    Ok(Export { name, desc })
}

fn read_const_expr(reader: &mut Reader) -> Result<ConstExpr, DecodeError> {
    let mut instructions = decode_expression(reader)?;
    // drop the terminating end
    instructions.pop();
    Ok(ConstExpr { instructions })
}

fn read_function_indices(reader: &mut Reader) -> Result<Vec<u32>, DecodeError> {
    let count = reader.read_count("element entries", MAX_TABLE_ENTRIES)?;
    (0..count).map(|_| reader.read_vu32()).collect()
}

fn read_element_exprs(reader: &mut Reader) -> Result<Vec<ConstExpr>, DecodeError> {
    let count = reader.read_count("element entries", MAX_TABLE_ENTRIES)?;
    (0..count).map(|_| read_const_expr(reader)).collect()
}

fn read_element_kind(reader: &mut Reader) -> Result<RefType, DecodeError> {
    match reader.read_byte()? {
        0x00 => Ok(RefType::FuncRef),
        other => Err(DecodeError::MalformedElementKind(other)),
    }
}

fn read_element_segment(reader: &mut Reader) -> Result<ElementSegment, DecodeError> {
    use encoding::{ELEM_EXPLICIT_TABLE_OR_DECLARATIVE, ELEM_EXPRESSIONS, ELEM_PASSIVE_OR_DECLARATIVE};

    let flags = reader.read_vu32()?;
    if flags > 7 {
        return Err(DecodeError::MalformedElementFlags(flags));
    }
    let non_active = flags & ELEM_PASSIVE_OR_DECLARATIVE != 0;
    let bit1 = flags & ELEM_EXPLICIT_TABLE_OR_DECLARATIVE != 0;
    let expressions = flags & ELEM_EXPRESSIONS != 0;

    let mode = if non_active {
        if bit1 {
            ElementMode::Declarative
        } else {
            ElementMode::Passive
        }
    } else {
        let table = if bit1 { reader.read_vu32()? } else { 0 };
        let offset = read_const_expr(reader)?;
        ElementMode::Active { table, offset }
    };

    // flags 0 and 4 imply funcref with no type byte on the wire
    let implicit_type = !non_active && !bit1;
    let ref_type = match (implicit_type, expressions) {
        (true, _) => RefType::FuncRef,
        (false, false) => read_element_kind(reader)?,
        (false, true) => RefType::decode(reader.read_byte()?)?,
    };

    let items = if expressions {
        ElementItems::Expressions(read_element_exprs(reader)?)
    } else {
        ElementItems::Functions(read_function_indices(reader)?)
    };

    Ok(ElementSegment {
        flags,
        ref_type,
        mode,
        items,
    })
}

fn read_data_segment(reader: &mut Reader) -> Result<DataSegment, DecodeError> {
    let flags = reader.read_vu32()?;
    let mode = match flags {
        encoding::DATA_ACTIVE => DataMode::Active {
            memory: 0,
            offset: read_const_expr(reader)?,
        },
        encoding::DATA_PASSIVE => DataMode::Passive,
        encoding::DATA_ACTIVE_EXPLICIT => {
            let memory = reader.read_vu32()?;
            DataMode::Active {
                memory,
                offset: read_const_expr(reader)?,
            }
        }
        other => return Err(DecodeError::MalformedDataFlags(other)),
    };
    let len = reader.read_vu32()? as usize;
    let bytes = reader.read_bytes(len)?.to_vec();
    Ok(DataSegment { flags, mode, bytes })
}

fn read_function_body(reader: &mut Reader) -> Result<FunctionBody, DecodeError> {
    let size = reader.read_vu32()?;
    if size > MAX_FUNCTION_SIZE {
        return Err(DecodeError::LimitExceeded {
            what: "function body bytes",
            count: size,
            max: MAX_FUNCTION_SIZE,
        });
    }
    let mut body = reader.sub_reader(size as usize)?;

    let group_count = body.read_vu32()?;
    let mut locals = Vec::new();
    let mut total: u64 = 0;
    for _ in 0..group_count {
        let count = body.read_vu32()?;
        total += u64::from(count);
        if total > u64::from(MAX_FUNCTION_LOCALS) {
            return Err(DecodeError::TooManyLocals);
        }
        let value_type = ValueType::decode(body.read_byte()?)?;
        locals.push(LocalGroup { count, value_type });
    }

    let instructions: Vec<Instruction> = decode_expression(&mut body)?;
    if !body.is_empty() {
        return Err(DecodeError::SectionSizeMismatch(SectionId::Code));
    }
    Ok(FunctionBody { locals, instructions })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: [u8; 8] = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

    fn with_header(sections: &[u8]) -> Vec<u8> {
        let mut bytes = HEADER.to_vec();
        bytes.extend_from_slice(sections);
        bytes
    }

    #[test]
    fn empty_module() {
        let module = parse("empty", &HEADER).unwrap();
        assert!(module.types.is_empty());
        assert!(module.sections.is_empty());
    }

    #[test]
    fn bad_magic_and_version() {
        assert_eq!(parse("m", b"\0asn\x01\0\0\0"), Err(DecodeError::BadMagic));
        assert_eq!(parse("m", b"\0as"), Err(DecodeError::BadMagic));
        assert_eq!(
            parse("m", b"\0asm\x02\0\0\0"),
            Err(DecodeError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn type_section() {
        // (type (func (param i32 i64) (result f32)))
        let bytes = with_header(&[0x01, 0x07, 0x01, 0x60, 0x02, 0x7f, 0x7e, 0x01, 0x7d]);
        let module = parse("m", &bytes).unwrap();
        assert_eq!(
            module.types,
            vec![FunctionType::new(
                vec![ValueType::I32, ValueType::I64],
                vec![ValueType::F32]
            )]
        );
        assert_eq!(module.sections, vec![SectionId::Type]);
    }

    #[test]
    fn truncated_section() {
        let bytes = with_header(&[0x01, 0x07, 0x01, 0x60]);
        assert!(matches!(parse("m", &bytes), Err(DecodeError::UnexpectedEof { .. })));
    }

    #[test]
    fn section_with_trailing_bytes() {
        // type section declares 2 bytes but the vector is empty
        let bytes = with_header(&[0x01, 0x02, 0x00, 0x00]);
        assert_eq!(
            parse("m", &bytes),
            Err(DecodeError::SectionSizeMismatch(SectionId::Type))
        );
    }

    #[test]
    fn sections_out_of_order() {
        // memory section followed by a type section
        let bytes = with_header(&[0x05, 0x03, 0x01, 0x00, 0x01, 0x01, 0x01, 0x00]);
        assert_eq!(
            parse("m", &bytes),
            Err(DecodeError::UnexpectedSection(SectionId::Type))
        );
    }

    #[test]
    fn duplicate_section() {
        let bytes = with_header(&[0x01, 0x01, 0x00, 0x01, 0x01, 0x00]);
        assert_eq!(
            parse("m", &bytes),
            Err(DecodeError::UnexpectedSection(SectionId::Type))
        );
    }

    #[test]
    fn unknown_section_id() {
        let bytes = with_header(&[0x0d, 0x00]);
        assert_eq!(parse("m", &bytes), Err(DecodeError::MalformedSectionId(13)));
    }

    #[test]
    fn function_without_code() {
        // type section + function section, no code section
        let bytes = with_header(&[0x01, 0x04, 0x01, 0x60, 0x00, 0x00, 0x03, 0x02, 0x01, 0x00]);
        assert_eq!(parse("m", &bytes), Err(DecodeError::FunctionCountMismatch));
    }

    #[test]
    fn custom_sections_remember_their_position() {
        let bytes = with_header(&[
            0x00, 0x03, 0x01, b'a', 0x07, // custom "a" before anything
            0x01, 0x01, 0x00, // empty type section
            0x00, 0x02, 0x01, b'b', // custom "b" after type
        ]);
        let module = parse("m", &bytes).unwrap();
        assert_eq!(module.custom.len(), 2);
        assert_eq!(module.custom[0].after, None);
        assert_eq!(module.custom[0].data, vec![0x07]);
        assert_eq!(module.custom[1].after, Some(SectionId::Type));
    }

    #[test]
    fn oversized_count_is_rejected_before_allocation() {
        // type section claiming 2^32-1 entries
        let bytes = with_header(&[0x01, 0x05, 0xff, 0xff, 0xff, 0xff, 0x0f]);
        assert!(matches!(parse("m", &bytes), Err(DecodeError::LimitExceeded { .. })));
    }

    #[test]
    fn too_many_locals() {
        let bytes = with_header(&[
            0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type
            0x03, 0x02, 0x01, 0x00, // function
            0x0a, 0x0c, 0x01, 0x0a, // code: one body of 10 bytes
            0x02, 0xff, 0xff, 0x03, 0x7f, // 65535 i32
            0xff, 0xff, 0x03, 0x7f, // another 65535 i32
            0x0b,
        ]);
        assert_eq!(parse("m", &bytes), Err(DecodeError::TooManyLocals));
    }
}

//! Encodes a [`Module`] back to the WebAssembly binary format.
//!
//! This is the inverse of [`crate::parser::parse`]. The decoder keeps enough
//! layout detail (which sections were present, where custom sections sat,
//! segment flags and local groupings) that a module decoded from canonical
//! bytes encodes back to exactly those bytes.
//!
//! ```text
//! module  ::= magic version section*
//! section ::= id:u8 size:u32 contents:byte*
//! ```
//!
//! A section is written when the decoded module contained it, or when it has
//! content. Integers are always written in their shortest LEB128 form.
//!
//! # Example
//!
//! ```
//! let bytes = wat::parse_str("(module (func))").unwrap();
//! let module = wasmbox::parser::parse("m", &bytes).unwrap();
//! assert_eq!(wasmbox::encoder::encode(&module).unwrap(), bytes);
//! ```

use crate::parser::encoding::{
    SectionId, WasmWrite, DESC_FUNC, DESC_GLOBAL, DESC_MEMORY, DESC_TABLE, ELEM_EXPLICIT_TABLE_OR_DECLARATIVE,
    ELEM_EXPRESSIONS, ELEM_PASSIVE_OR_DECLARATIVE, LIMITS_MIN, LIMITS_MIN_MAX, MAGIC, OP_END, TYPE_FUNC, VERSION,
};
use crate::parser::module::{
    ConstExpr, DataMode, DataSegment, ElementItems, ElementMode, ElementSegment, ExportDesc, FunctionBody,
    GlobalType, ImportDesc, Limits, Module,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Element segment flags that disagree with its mode or items.
    #[error("element segment {index} cannot be written with flags {flags}")]
    InvalidElementFlags { index: usize, flags: u32 },

    /// Data segment flags that disagree with its mode.
    #[error("data segment {index} cannot be written with flags {flags}")]
    InvalidDataFlags { index: usize, flags: u32 },
}

/// Encodes a module to binary format.
pub fn encode(module: &Module) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());

    encode_custom_sections(&mut buf, module, None);
    for id in SectionId::ORDERED {
        let contents = match id {
            SectionId::Type => encode_type_section(module),
            SectionId::Import => encode_import_section(module),
            SectionId::Function => encode_function_section(module),
            SectionId::Table => encode_table_section(module),
            SectionId::Memory => encode_memory_section(module),
            SectionId::Global => encode_global_section(module),
            SectionId::Export => encode_export_section(module),
            SectionId::Start => encode_start_section(module),
            SectionId::Element => encode_element_section(module)?,
            SectionId::DataCount => encode_data_count_section(module),
            SectionId::Code => encode_code_section(module),
            SectionId::Data => encode_data_section(module)?,
            SectionId::Custom => None,
        };
        if let Some(contents) = contents {
            emit_section(&mut buf, id, &contents);
        }
        encode_custom_sections(&mut buf, module, Some(id));
    }

    log::debug!("{}: encoded {} bytes", module.name, buf.len());
    Ok(buf)
}

/// Whether a section should be written, given whether it has anything in it.
fn wanted(module: &Module, id: SectionId, has_content: bool) -> bool {
    has_content || module.sections.contains(&id)
}

/// Starts a vector section: `None` when it is to be left out entirely.
fn vector_section(module: &Module, id: SectionId, len: usize) -> Option<Vec<u8>> {
    if !wanted(module, id, len > 0) {
        return None;
    }
    let mut contents = Vec::new();
    contents.put_u32_leb(len as u32);
    Some(contents)
}

/// ```text
/// typesec  ::= section_1(vec(functype))
/// functype ::= 0x60 vec(valtype) vec(valtype)
/// ```
fn encode_type_section(module: &Module) -> Option<Vec<u8>> {
    let mut contents = vector_section(module, SectionId::Type, module.types.len())?;
    for ty in &module.types {
        contents.push(TYPE_FUNC);
        contents.put_u32_leb(ty.params.len() as u32);
        contents.extend(ty.params.iter().map(|t| t.encode()));
        contents.put_u32_leb(ty.results.len() as u32);
        contents.extend(ty.results.iter().map(|t| t.encode()));
    }
    Some(contents)
}

/// ```text
/// importsec  ::= section_2(vec(import))
/// importdesc ::= 0x00 typeidx | 0x01 tabletype | 0x02 memtype | 0x03 globaltype
/// ```
fn encode_import_section(module: &Module) -> Option<Vec<u8>> {
    let mut contents = vector_section(module, SectionId::Import, module.imports.len())?;
    for import in &module.imports {
        contents.put_name(&import.module);
        contents.put_name(&import.field);
        match &import.desc {
            ImportDesc::Function(type_idx) => {
                contents.push(DESC_FUNC);
                contents.put_u32_leb(*type_idx);
            }
            ImportDesc::Table(table) => {
                contents.push(DESC_TABLE);
                contents.push(table.element.encode());
                emit_limits(&mut contents, &table.limits);
            }
            ImportDesc::Memory(memory) => {
                contents.push(DESC_MEMORY);
                emit_limits(&mut contents, &memory.limits);
            }
            ImportDesc::Global(global) => {
                contents.push(DESC_GLOBAL);
                emit_global_type(&mut contents, global);
            }
        }
    }
    Some(contents)
}

fn encode_function_section(module: &Module) -> Option<Vec<u8>> {
    let mut contents = vector_section(module, SectionId::Function, module.functions.len())?;
    for type_idx in &module.functions {
        contents.put_u32_leb(*type_idx);
    }
    Some(contents)
}

fn encode_table_section(module: &Module) -> Option<Vec<u8>> {
    let mut contents = vector_section(module, SectionId::Table, module.tables.len())?;
    for table in &module.tables {
        contents.push(table.element.encode());
        emit_limits(&mut contents, &table.limits);
    }
    Some(contents)
}

fn encode_memory_section(module: &Module) -> Option<Vec<u8>> {
    let mut contents = vector_section(module, SectionId::Memory, module.memories.len())?;
    for memory in &module.memories {
        emit_limits(&mut contents, &memory.limits);
    }
    Some(contents)
}

fn encode_global_section(module: &Module) -> Option<Vec<u8>> {
    let mut contents = vector_section(module, SectionId::Global, module.globals.len())?;
    for global in &module.globals {
        emit_global_type(&mut contents, &global.ty);
        emit_expression(&mut contents, &global.init);
    }
    Some(contents)
}

fn encode_export_section(module: &Module) -> Option<Vec<u8>> {
    let mut contents = vector_section(module, SectionId::Export, module.exports.len())?;
    for export in &module.exports {
        contents.put_name(&export.name);
        let (kind, index) = match export.desc {
            ExportDesc::Function(idx) => (DESC_FUNC, idx),
            ExportDesc::Table(idx) => (DESC_TABLE, idx),
            ExportDesc::Memory(idx) => (DESC_MEMORY, idx),
            ExportDesc::Global(idx) => (DESC_GLOBAL, idx),
        };
        contents.push(kind);
        contents.put_u32_leb(index);
    }
    Some(contents)
}

fn encode_start_section(module: &Module) -> Option<Vec<u8>> {
    let start = module.start?;
    let mut contents = Vec::new();
    contents.put_u32_leb(start);
    Some(contents)
}

/// ```text
/// elemsec ::= section_9(vec(elem))
/// ```
///
/// Each segment is written in the form its flags name; see
/// [`ELEM_PASSIVE_OR_DECLARATIVE`] for the meaning of the bits.
fn encode_element_section(module: &Module) -> Result<Option<Vec<u8>>, EncodeError> {
    let mut contents = match vector_section(module, SectionId::Element, module.elements.len()) {
        Some(contents) => contents,
        None => return Ok(None),
    };
    for (index, segment) in module.elements.iter().enumerate() {
        if !element_flags_agree(segment) {
            return Err(EncodeError::InvalidElementFlags {
                index,
                flags: segment.flags,
            });
        }
        let flags = segment.flags;
        contents.put_u32_leb(flags);

        if let ElementMode::Active { table, offset } = &segment.mode {
            if flags & ELEM_EXPLICIT_TABLE_OR_DECLARATIVE != 0 {
                contents.put_u32_leb(*table);
            }
            emit_expression(&mut contents, offset);
        }

        // flags 0 and 4 leave the element type implicit
        if flags & (ELEM_PASSIVE_OR_DECLARATIVE | ELEM_EXPLICIT_TABLE_OR_DECLARATIVE) != 0 {
            if flags & ELEM_EXPRESSIONS != 0 {
                contents.push(segment.ref_type.encode());
            } else {
                // elemkind funcref
                contents.push(0x00);
            }
        }

        match &segment.items {
            ElementItems::Functions(indices) => {
                contents.put_u32_leb(indices.len() as u32);
                for idx in indices {
                    contents.put_u32_leb(*idx);
                }
            }
            ElementItems::Expressions(exprs) => {
                contents.put_u32_leb(exprs.len() as u32);
                for expr in exprs {
                    emit_expression(&mut contents, expr);
                }
            }
        }
    }
    Ok(Some(contents))
}

fn element_flags_agree(segment: &ElementSegment) -> bool {
    let flags = segment.flags;
    if flags > 7 {
        return false;
    }
    let expressions = flags & ELEM_EXPRESSIONS != 0;
    if expressions != matches!(segment.items, ElementItems::Expressions(_)) {
        return false;
    }
    let non_active = flags & ELEM_PASSIVE_OR_DECLARATIVE != 0;
    let bit1 = flags & ELEM_EXPLICIT_TABLE_OR_DECLARATIVE != 0;
    match &segment.mode {
        ElementMode::Active { table, .. } => !non_active && (bit1 || *table == 0),
        ElementMode::Passive => non_active && !bit1,
        ElementMode::Declarative => non_active && bit1,
    }
}

fn encode_data_count_section(module: &Module) -> Option<Vec<u8>> {
    let count = module.data_count?;
    let mut contents = Vec::new();
    contents.put_u32_leb(count);
    Some(contents)
}

/// ```text
/// codesec ::= section_10(vec(code))
/// code    ::= size:u32 vec(locals) expr
/// ```
fn encode_code_section(module: &Module) -> Option<Vec<u8>> {
    let mut contents = vector_section(module, SectionId::Code, module.code.len())?;
    for body in &module.code {
        let encoded = encode_body(body);
        contents.put_blob(&encoded);
    }
    Some(contents)
}

fn encode_body(body: &FunctionBody) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_u32_leb(body.locals.len() as u32);
    for group in &body.locals {
        buf.put_u32_leb(group.count);
        buf.push(group.value_type.encode());
    }
    // bodies already carry their final end
    for inst in &body.instructions {
        inst.encode(&mut buf);
    }
    buf
}

fn encode_data_section(module: &Module) -> Result<Option<Vec<u8>>, EncodeError> {
    let mut contents = match vector_section(module, SectionId::Data, module.data.len()) {
        Some(contents) => contents,
        None => return Ok(None),
    };
    for (index, segment) in module.data.iter().enumerate() {
        emit_data_segment(&mut contents, index, segment)?;
    }
    Ok(Some(contents))
}

fn emit_data_segment(buf: &mut Vec<u8>, index: usize, segment: &DataSegment) -> Result<(), EncodeError> {
    let mismatch = EncodeError::InvalidDataFlags {
        index,
        flags: segment.flags,
    };
    buf.put_u32_leb(segment.flags);
    match (&segment.mode, segment.flags) {
        (DataMode::Active { memory: 0, offset }, 0) => emit_expression(buf, offset),
        (DataMode::Passive, 1) => {}
        (DataMode::Active { memory, offset }, 2) => {
            buf.put_u32_leb(*memory);
            emit_expression(buf, offset);
        }
        _ => return Err(mismatch),
    }
    buf.put_blob(&segment.bytes);
    Ok(())
}

fn encode_custom_sections(buf: &mut Vec<u8>, module: &Module, after: Option<SectionId>) {
    for custom in module.custom.iter().filter(|c| c.after == after) {
        let mut contents = Vec::new();
        contents.put_name(&custom.name);
        contents.extend_from_slice(&custom.data);
        emit_section(buf, SectionId::Custom, &contents);
    }
}

fn emit_section(buf: &mut Vec<u8>, id: SectionId, contents: &[u8]) {
    buf.push(id as u8);
    buf.put_blob(contents);
}

/// ```text
/// limits ::= 0x00 min:u32 | 0x01 min:u32 max:u32
/// ```
fn emit_limits(buf: &mut Vec<u8>, limits: &Limits) {
    match limits.max {
        Some(max) => {
            buf.push(LIMITS_MIN_MAX);
            buf.put_u32_leb(limits.min);
            buf.put_u32_leb(max);
        }
        None => {
            buf.push(LIMITS_MIN);
            buf.put_u32_leb(limits.min);
        }
    }
}

fn emit_global_type(buf: &mut Vec<u8>, ty: &GlobalType) {
    buf.push(ty.value_type.encode());
    buf.push(u8::from(ty.mutable));
}

/// Constant expressions are stored without their terminating end.
fn emit_expression(buf: &mut Vec<u8>, expr: &ConstExpr) {
    for inst in &expr.instructions {
        inst.encode(buf);
    }
    buf.push(OP_END);
}

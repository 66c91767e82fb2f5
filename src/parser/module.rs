//! In-memory representation of a decoded module.
//!
//! A [`Module`] mirrors the binary sections closely, keeping the small amount
//! of layout information (section presence, custom section placement, segment
//! flags, local groups) needed to encode it back to identical bytes.

use super::encoding::SectionId;
use super::instruction::Instruction;
use super::DecodeError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    FuncRef,
    ExternRef,
}

impl ValueType {
    pub fn decode(byte: u8) -> Result<ValueType, DecodeError> {
        match byte {
            0x7F => Ok(ValueType::I32),
            0x7E => Ok(ValueType::I64),
            0x7D => Ok(ValueType::F32),
            0x7C => Ok(ValueType::F64),
            0x70 => Ok(ValueType::FuncRef),
            0x6F => Ok(ValueType::ExternRef),
            other => Err(DecodeError::MalformedValueType(other)),
        }
    }

    pub fn encode(self) -> u8 {
        match self {
            ValueType::I32 => 0x7F,
            ValueType::I64 => 0x7E,
            ValueType::F32 => 0x7D,
            ValueType::F64 => 0x7C,
            ValueType::FuncRef => 0x70,
            ValueType::ExternRef => 0x6F,
        }
    }

    pub fn is_ref(self) -> bool {
        matches!(self, ValueType::FuncRef | ValueType::ExternRef)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::FuncRef => "funcref",
            ValueType::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefType {
    FuncRef,
    ExternRef,
}

impl RefType {
    pub fn decode(byte: u8) -> Result<RefType, DecodeError> {
        match byte {
            0x70 => Ok(RefType::FuncRef),
            0x6F => Ok(RefType::ExternRef),
            other => Err(DecodeError::MalformedRefType(other)),
        }
    }

    pub fn encode(self) -> u8 {
        ValueType::from(self).encode()
    }
}

impl From<RefType> for ValueType {
    fn from(rt: RefType) -> ValueType {
        match rt {
            RefType::FuncRef => ValueType::FuncRef,
            RefType::ExternRef => ValueType::ExternRef,
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefType::FuncRef => f.write_str("func"),
            RefType::ExternRef => f.write_str("extern"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FunctionType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FunctionType {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> FunctionType {
        FunctionType { params, results }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[ValueType]| types.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" ");
        write!(f, "[{}] -> [{}]", join(&self.params), join(&self.results))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}..", self.min),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub element: RefType,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDesc {
    /// Index into the type section.
    Function(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportDesc {
    Function(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub desc: ExportDesc,
}

/// A constant initialiser, stored without its terminating `end`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstExpr {
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementMode {
    Active { table: u32, offset: ConstExpr },
    Passive,
    Declarative,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementItems {
    Functions(Vec<u32>),
    Expressions(Vec<ConstExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    /// The 0..=7 encoding flag this segment was read with.
    pub flags: u32,
    pub ref_type: RefType,
    pub mode: ElementMode,
    pub items: ElementItems,
}

impl ElementSegment {
    pub fn len(&self) -> usize {
        match &self.items {
            ElementItems::Functions(funcs) => funcs.len(),
            ElementItems::Expressions(exprs) => exprs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Active { memory: u32, offset: ConstExpr },
    Passive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    /// The 0..=2 encoding flag this segment was read with.
    pub flags: u32,
    pub mode: DataMode,
    pub bytes: Vec<u8>,
}

/// A run of locals sharing one type, as declared in the code section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalGroup {
    pub count: u32,
    pub value_type: ValueType,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionBody {
    pub locals: Vec<LocalGroup>,
    /// Includes the final `end`.
    pub instructions: Vec<Instruction>,
}

impl FunctionBody {
    /// Declared locals expanded to one entry per slot (parameters excluded).
    pub fn local_types(&self) -> Vec<ValueType> {
        self.locals
            .iter()
            .flat_map(|group| std::iter::repeat(group.value_type).take(group.count as usize))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSection {
    pub name: String,
    pub data: Vec<u8>,
    /// The non-custom section this one followed, `None` if it came first.
    pub after: Option<SectionId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub name: String,
    pub types: Vec<FunctionType>,
    pub imports: Vec<Import>,
    /// Type index of each function defined in this module.
    pub functions: Vec<u32>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub code: Vec<FunctionBody>,
    pub data: Vec<DataSegment>,
    pub data_count: Option<u32>,
    pub custom: Vec<CustomSection>,
    /// Non-custom sections in the order they were read.
    pub sections: Vec<SectionId>,
}

impl Module {
    pub fn new(name: &str) -> Module {
        Module {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn imported_function_count(&self) -> u32 {
        self.imports
            .iter()
            .filter(|imp| matches!(imp.desc, ImportDesc::Function(_)))
            .count() as u32
    }

    pub fn imported_global_count(&self) -> u32 {
        self.imports
            .iter()
            .filter(|imp| matches!(imp.desc, ImportDesc::Global(_)))
            .count() as u32
    }

    /// Type index of a function in the combined (imports first) index space.
    pub fn function_type_index(&self, func_idx: u32) -> Option<u32> {
        let mut imported = self.imports.iter().filter_map(|imp| match imp.desc {
            ImportDesc::Function(type_idx) => Some(type_idx),
            _ => None,
        });
        let import_count = self.imported_function_count();
        if func_idx < import_count {
            imported.nth(func_idx as usize)
        } else {
            self.functions.get((func_idx - import_count) as usize).copied()
        }
    }

    pub fn function_type(&self, func_idx: u32) -> Option<&FunctionType> {
        self.function_type_index(func_idx)
            .and_then(|type_idx| self.types.get(type_idx as usize))
    }

    pub fn function_count(&self) -> u32 {
        self.imported_function_count() + self.functions.len() as u32
    }

    pub fn global_types(&self) -> Vec<GlobalType> {
        let imported = self.imports.iter().filter_map(|imp| match imp.desc {
            ImportDesc::Global(ty) => Some(ty),
            _ => None,
        });
        imported.chain(self.globals.iter().map(|g| g.ty)).collect()
    }

    pub fn table_types(&self) -> Vec<TableType> {
        let imported = self.imports.iter().filter_map(|imp| match imp.desc {
            ImportDesc::Table(ty) => Some(ty),
            _ => None,
        });
        imported.chain(self.tables.iter().copied()).collect()
    }

    pub fn memory_types(&self) -> Vec<MemoryType> {
        let imported = self.imports.iter().filter_map(|imp| match imp.desc {
            ImportDesc::Memory(ty) => Some(ty),
            _ => None,
        });
        imported.chain(self.memories.iter().copied()).collect()
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for (i, ty) in self.types.iter().enumerate() {
            writeln!(f, "  type[{i}] {ty}")?;
        }
        for imp in &self.imports {
            let desc = match &imp.desc {
                ImportDesc::Function(t) => format!("func type={t}"),
                ImportDesc::Table(t) => format!("table {} {}", t.element, t.limits),
                ImportDesc::Memory(m) => format!("memory {}", m.limits),
                ImportDesc::Global(g) => format!("global {}{}", if g.mutable { "mut " } else { "" }, g.value_type),
            };
            writeln!(f, "  import {}.{} {desc}", imp.module, imp.field)?;
        }
        let base = self.imported_function_count();
        for (i, type_idx) in self.functions.iter().enumerate() {
            let size = self.code.get(i).map_or(0, |body| body.instructions.len());
            writeln!(f, "  func[{}] type={type_idx} instructions={size}", base as usize + i)?;
        }
        for memory in &self.memories {
            writeln!(f, "  memory {}", memory.limits)?;
        }
        for export in &self.exports {
            writeln!(f, "  export \"{}\" {:?}", export.name, export.desc)?;
        }
        if let Some(start) = self.start {
            writeln!(f, "  start func[{start}]")?;
        }
        for custom in &self.custom {
            writeln!(f, "  custom \"{}\" ({} bytes)", custom.name, custom.data.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_with_imports() -> Module {
        let mut module = Module::new("test");
        module.types = vec![
            FunctionType::new(vec![ValueType::I32], vec![]),
            FunctionType::new(vec![], vec![ValueType::F64]),
        ];
        module.imports = vec![
            Import {
                module: "env".into(),
                field: "g".into(),
                desc: ImportDesc::Global(GlobalType {
                    value_type: ValueType::I64,
                    mutable: false,
                }),
            },
            Import {
                module: "env".into(),
                field: "log".into(),
                desc: ImportDesc::Function(0),
            },
        ];
        module.functions = vec![1];
        module
    }

    #[test]
    fn function_index_space_puts_imports_first() {
        let module = module_with_imports();
        assert_eq!(module.function_count(), 2);
        assert_eq!(module.function_type_index(0), Some(0));
        assert_eq!(module.function_type_index(1), Some(1));
        assert_eq!(module.function_type_index(2), None);
        assert_eq!(module.function_type(1).unwrap().results, vec![ValueType::F64]);
    }

    #[test]
    fn global_types_include_imports() {
        let mut module = module_with_imports();
        module.globals.push(Global {
            ty: GlobalType {
                value_type: ValueType::F32,
                mutable: true,
            },
            init: ConstExpr::default(),
        });
        let types = module.global_types();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].value_type, ValueType::I64);
        assert!(types[1].mutable);
    }

    #[test]
    fn local_groups_expand() {
        let body = FunctionBody {
            locals: vec![
                LocalGroup {
                    count: 2,
                    value_type: ValueType::I32,
                },
                LocalGroup {
                    count: 1,
                    value_type: ValueType::F64,
                },
            ],
            instructions: vec![Instruction::End],
        };
        assert_eq!(
            body.local_types(),
            vec![ValueType::I32, ValueType::I32, ValueType::F64]
        );
    }

    #[test]
    fn function_type_display() {
        let ty = FunctionType::new(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
        assert_eq!(ty.to_string(), "[i32 i32] -> [i32]");
    }
}

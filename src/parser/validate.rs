//! Module validation.
//!
//! [`validate`] is the only way to obtain a [`ValidModule`], and only a
//! [`ValidModule`] can be instantiated, so a module that fails these checks
//! never reaches the interpreter.
//!
//! Function bodies are checked with the operand/control stack algorithm from
//! the validation appendix of the core specification. While walking a body we
//! also record where each structured block ends and the deepest operand stack
//! it can reach, which is everything the interpreter needs to run it without
//! scanning for matching `end`s.

use super::instruction::{BlockType, Instruction, MemArg};
use super::limits::MAX_MEMORY_PAGES;
use super::module::ValueType::*;
use super::module::{
    ConstExpr, DataMode, ElementItems, ElementMode, ExportDesc, FunctionBody, FunctionType, GlobalType, ImportDesc,
    Limits, MemoryType, Module, RefType, TableType, ValueType,
};
use std::collections::HashSet;
use std::rc::Rc;
use thiserror::Error;
use MaybeValue::{Unknown, Val};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("type mismatch")]
    TypeMismatch,

    #[error("unknown type {0}")]
    UnknownType(u32),

    #[error("unknown function {0}")]
    UnknownFunction(u32),

    #[error("unknown table {0}")]
    UnknownTable(u32),

    #[error("unknown memory {0}")]
    UnknownMemory(u32),

    #[error("unknown global {0}")]
    UnknownGlobal(u32),

    #[error("unknown local {0}")]
    UnknownLocal(u32),

    #[error("unknown label {0}")]
    UnknownLabel(u32),

    #[error("unknown elem segment {0}")]
    UnknownElement(u32),

    #[error("unknown data segment {0}")]
    UnknownData(u32),

    #[error("global {0} is immutable")]
    ImmutableGlobal(u32),

    #[error("alignment must not be larger than natural")]
    BadAlignment,

    #[error("data count section required")]
    DataCountRequired,

    #[error("multiple memories")]
    MultipleMemories,

    #[error("size minimum must not be greater than maximum")]
    InvalidLimits,

    #[error("memory size must be at most 65536 pages (4GiB)")]
    MemoryTooLarge,

    #[error("duplicate export name \"{0}\"")]
    DuplicateExport(String),

    #[error("start function must take no parameters and return nothing")]
    InvalidStartFunction,

    #[error("constant expression required")]
    ConstantExpressionRequired,

    #[error("undeclared function reference {0}")]
    UndeclaredFunctionReference(u32),

    #[error("invalid result arity")]
    InvalidResultArity,

    #[error("else without a matching if")]
    ElseWithoutIf,

    #[error("unbalanced block structure")]
    UnbalancedBlocks,

    #[error("function {func}, instruction {pc}: {source}")]
    InFunction {
        func: u32,
        pc: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// The underlying error, looking through function context.
    pub fn kind(&self) -> &ValidationError {
        match self {
            ValidationError::InFunction { source, .. } => source.kind(),
            other => other,
        }
    }
}

/// Where control goes when a structured instruction is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockTarget {
    /// Position of the matching `end`.
    pub end_pc: u32,
    /// Position of the `else` of an `if`, when there is one.
    pub else_pc: Option<u32>,
}

/// A validated function body, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCode {
    pub type_idx: u32,
    /// Declared locals, parameters excluded.
    pub locals: Vec<ValueType>,
    pub instructions: Vec<Instruction>,
    /// Indexed by instruction position; only filled in for `block`, `loop`,
    /// `if` and `else`.
    pub targets: Vec<BlockTarget>,
    /// Deepest operand stack the body can reach, locals not included.
    pub max_height: u32,
}

/// A module that passed validation.
#[derive(Debug, Clone)]
pub struct ValidModule {
    module: Rc<Module>,
    code: Vec<Rc<FunctionCode>>,
}

impl ValidModule {
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn shared_module(&self) -> Rc<Module> {
        Rc::clone(&self.module)
    }

    pub fn name(&self) -> &str {
        &self.module.name
    }

    /// Bodies of the functions defined by the module, imports excluded.
    pub fn code(&self) -> &[Rc<FunctionCode>] {
        &self.code
    }
}

/// Checks `module` and, if it is valid, returns it in executable form.
pub fn validate(module: Module) -> Result<ValidModule, ValidationError> {
    let code = {
        let ctx = Context::new(&module)?;
        ctx.check_module()?;

        let base = module.imported_function_count();
        let mut code = Vec::with_capacity(module.code.len());
        for (i, body) in module.code.iter().enumerate() {
            let func = base + i as u32;
            let type_idx = module.functions[i];
            let compiled = CodeValidator::new(&ctx, type_idx, body)?
                .run(&body.instructions)
                .map_err(|(pc, err)| ValidationError::InFunction {
                    func,
                    pc,
                    source: Box::new(err),
                })?;
            code.push(Rc::new(compiled));
        }
        code
    };

    log::debug!(
        "{}: valid, {} functions, {} imports",
        module.name,
        module.code.len(),
        module.imports.len()
    );
    Ok(ValidModule {
        module: Rc::new(module),
        code,
    })
}

/// Module-wide index spaces that instructions and segments refer to.
struct Context<'a> {
    module: &'a Module,
    funcs: Vec<u32>,
    tables: Vec<TableType>,
    memories: Vec<MemoryType>,
    globals: Vec<GlobalType>,
    imported_globals: u32,
    /// Functions that may be named by `ref.func` inside code.
    refs: HashSet<u32>,
}

impl<'a> Context<'a> {
    fn new(module: &'a Module) -> Result<Context<'a>, ValidationError> {
        let mut funcs = Vec::new();
        for import in &module.imports {
            if let ImportDesc::Function(type_idx) = import.desc {
                funcs.push(type_idx);
            }
        }
        funcs.extend(module.functions.iter().copied());
        for &type_idx in &funcs {
            if type_idx as usize >= module.types.len() {
                return Err(ValidationError::UnknownType(type_idx));
            }
        }

        fn collect(refs: &mut HashSet<u32>, expr: &ConstExpr) {
            for inst in &expr.instructions {
                if let Instruction::RefFunc { func_idx } = inst {
                    refs.insert(*func_idx);
                }
            }
        }

        let mut refs = HashSet::new();
        for global in &module.globals {
            collect(&mut refs, &global.init);
        }
        for segment in &module.elements {
            match &segment.items {
                ElementItems::Functions(indices) => refs.extend(indices.iter().copied()),
                ElementItems::Expressions(exprs) => {
                    for expr in exprs {
                        collect(&mut refs, expr);
                    }
                }
            }
        }
        for export in &module.exports {
            if let ExportDesc::Function(idx) = export.desc {
                refs.insert(idx);
            }
        }

        Ok(Context {
            module,
            funcs,
            tables: module.table_types(),
            memories: module.memory_types(),
            globals: module.global_types(),
            imported_globals: module.imported_global_count(),
            refs,
        })
    }

    fn func_type(&self, func_idx: u32) -> Result<&'a FunctionType, ValidationError> {
        let type_idx = self
            .funcs
            .get(func_idx as usize)
            .ok_or(ValidationError::UnknownFunction(func_idx))?;
        self.block_type_index(*type_idx)
    }

    fn block_type_index(&self, type_idx: u32) -> Result<&'a FunctionType, ValidationError> {
        self.module
            .types
            .get(type_idx as usize)
            .ok_or(ValidationError::UnknownType(type_idx))
    }

    fn table(&self, table_idx: u32) -> Result<&TableType, ValidationError> {
        self.tables
            .get(table_idx as usize)
            .ok_or(ValidationError::UnknownTable(table_idx))
    }

    fn memory(&self, memory_idx: u32) -> Result<&MemoryType, ValidationError> {
        self.memories
            .get(memory_idx as usize)
            .ok_or(ValidationError::UnknownMemory(memory_idx))
    }

    fn global(&self, global_idx: u32) -> Result<&GlobalType, ValidationError> {
        self.globals
            .get(global_idx as usize)
            .ok_or(ValidationError::UnknownGlobal(global_idx))
    }

    fn element_type(&self, elem_idx: u32) -> Result<RefType, ValidationError> {
        self.module
            .elements
            .get(elem_idx as usize)
            .map(|segment| segment.ref_type)
            .ok_or(ValidationError::UnknownElement(elem_idx))
    }

    fn check_data_index(&self, data_idx: u32) -> Result<(), ValidationError> {
        let count = self.module.data_count.ok_or(ValidationError::DataCountRequired)?;
        if data_idx >= count {
            return Err(ValidationError::UnknownData(data_idx));
        }
        Ok(())
    }

    fn check_module(&self) -> Result<(), ValidationError> {
        for table in &self.tables {
            check_limits(&table.limits, u32::MAX)?;
        }
        if self.memories.len() > 1 {
            return Err(ValidationError::MultipleMemories);
        }
        for memory in &self.memories {
            check_limits(&memory.limits, MAX_MEMORY_PAGES)?;
        }

        for global in &self.module.globals {
            self.check_const_expr(&global.init, global.ty.value_type)?;
        }

        let mut names = HashSet::new();
        for export in &self.module.exports {
            if !names.insert(export.name.as_str()) {
                return Err(ValidationError::DuplicateExport(export.name.clone()));
            }
            match export.desc {
                ExportDesc::Function(idx) => self.func_type(idx).map(|_| ())?,
                ExportDesc::Table(idx) => self.table(idx).map(|_| ())?,
                ExportDesc::Memory(idx) => self.memory(idx).map(|_| ())?,
                ExportDesc::Global(idx) => self.global(idx).map(|_| ())?,
            }
        }

        if let Some(start) = self.module.start {
            let ty = self.func_type(start)?;
            if !ty.params.is_empty() || !ty.results.is_empty() {
                return Err(ValidationError::InvalidStartFunction);
            }
        }

        for segment in &self.module.elements {
            if let ElementMode::Active { table, offset } = &segment.mode {
                if self.table(*table)?.element != segment.ref_type {
                    return Err(ValidationError::TypeMismatch);
                }
                self.check_const_expr(offset, I32)?;
            }
            match &segment.items {
                ElementItems::Functions(indices) => {
                    for &idx in indices {
                        self.func_type(idx)?;
                    }
                }
                ElementItems::Expressions(exprs) => {
                    for expr in exprs {
                        self.check_const_expr(expr, segment.ref_type.into())?;
                    }
                }
            }
        }

        for segment in &self.module.data {
            if let DataMode::Active { memory, offset } = &segment.mode {
                self.memory(*memory)?;
                self.check_const_expr(offset, I32)?;
            }
        }

        Ok(())
    }

    /// Initialisers may only use constants, references and imported
    /// immutable globals, and must leave exactly one value of `expected`.
    fn check_const_expr(&self, expr: &ConstExpr, expected: ValueType) -> Result<(), ValidationError> {
        let mut stack = Vec::new();
        for inst in &expr.instructions {
            let ty = match inst {
                Instruction::I32Const { .. } => I32,
                Instruction::I64Const { .. } => I64,
                Instruction::F32Const { .. } => F32,
                Instruction::F64Const { .. } => F64,
                Instruction::RefNull { ref_type } => ValueType::from(*ref_type),
                Instruction::RefFunc { func_idx } => {
                    self.func_type(*func_idx)?;
                    FuncRef
                }
                Instruction::GlobalGet { global_idx } => {
                    if *global_idx >= self.imported_globals {
                        return Err(ValidationError::UnknownGlobal(*global_idx));
                    }
                    let global = self.global(*global_idx)?;
                    if global.mutable {
                        return Err(ValidationError::ConstantExpressionRequired);
                    }
                    global.value_type
                }
                _ => return Err(ValidationError::ConstantExpressionRequired),
            };
            stack.push(ty);
        }
        if stack != [expected] {
            return Err(ValidationError::TypeMismatch);
        }
        Ok(())
    }
}

fn check_limits(limits: &Limits, ceiling: u32) -> Result<(), ValidationError> {
    if limits.min > ceiling || limits.max.map_or(false, |max| max > ceiling) {
        return Err(ValidationError::MemoryTooLarge);
    }
    if limits.max.map_or(false, |max| limits.min > max) {
        return Err(ValidationError::InvalidLimits);
    }
    Ok(())
}

/// An operand type, or the bottom type produced by popping from the
/// polymorphic stack that follows an unconditional branch.
#[derive(PartialEq, Debug, Clone, Copy)]
enum MaybeValue {
    Val(ValueType),
    Unknown,
}

impl MaybeValue {
    fn is_num(&self) -> bool {
        match self {
            Val(v) => !v.is_ref(),
            Unknown => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
    Else,
}

#[derive(Debug, Clone)]
struct CtrlFrame {
    kind: FrameKind,
    /// Position of the instruction that opened the frame.
    start_pc: usize,
    start_types: Vec<ValueType>,
    end_types: Vec<ValueType>,
    height: usize,
    unreachable: bool,
}

struct CodeValidator<'a> {
    ctx: &'a Context<'a>,
    type_idx: u32,
    /// Parameters followed by declared locals.
    locals: Vec<ValueType>,
    declared: Vec<ValueType>,
    results: Vec<ValueType>,
    vals: Vec<MaybeValue>,
    ctrls: Vec<CtrlFrame>,
    targets: Vec<BlockTarget>,
    max_height: usize,
}

impl<'a> CodeValidator<'a> {
    fn new(ctx: &'a Context<'a>, type_idx: u32, body: &FunctionBody) -> Result<CodeValidator<'a>, ValidationError> {
        let ty = ctx.block_type_index(type_idx)?;
        let declared = body.local_types();
        let mut locals = ty.params.clone();
        locals.extend_from_slice(&declared);
        Ok(CodeValidator {
            ctx,
            type_idx,
            locals,
            declared,
            results: ty.results.clone(),
            vals: Vec::new(),
            ctrls: Vec::new(),
            targets: vec![BlockTarget::default(); body.instructions.len()],
            max_height: 0,
        })
    }

    fn run(mut self, instructions: &[Instruction]) -> Result<FunctionCode, (usize, ValidationError)> {
        // parameters live in locals, so the function frame starts empty
        self.push_ctrl(FrameKind::Function, 0, vec![], self.results.clone());
        for (pc, inst) in instructions.iter().enumerate() {
            if self.ctrls.is_empty() {
                return Err((pc, ValidationError::UnbalancedBlocks));
            }
            self.validate(pc, inst).map_err(|err| (pc, err))?;
        }
        if !self.ctrls.is_empty() {
            return Err((instructions.len(), ValidationError::UnbalancedBlocks));
        }
        Ok(FunctionCode {
            type_idx: self.type_idx,
            locals: self.declared,
            instructions: instructions.to_vec(),
            targets: self.targets,
            max_height: self.max_height as u32,
        })
    }

    fn push_val(&mut self, val: MaybeValue) {
        self.vals.push(val);
        self.max_height = self.max_height.max(self.vals.len());
    }

    fn push_vals(&mut self, types: &[ValueType]) {
        for ty in types {
            self.push_val(Val(*ty));
        }
    }

    fn pop_val(&mut self) -> Result<MaybeValue, ValidationError> {
        let frame = self.ctrls.last().ok_or(ValidationError::UnbalancedBlocks)?;
        if self.vals.len() == frame.height {
            return if frame.unreachable {
                Ok(Unknown)
            } else {
                Err(ValidationError::TypeMismatch)
            };
        }
        self.vals.pop().ok_or(ValidationError::TypeMismatch)
    }

    fn pop_expected(&mut self, expected: ValueType) -> Result<MaybeValue, ValidationError> {
        match self.pop_val()? {
            Val(actual) if actual != expected => Err(ValidationError::TypeMismatch),
            popped => Ok(popped),
        }
    }

    /// Pops `types` (the last one is on top) and returns what was popped in
    /// stack order.
    fn pop_expecteds(&mut self, types: &[ValueType]) -> Result<Vec<MaybeValue>, ValidationError> {
        let mut popped = Vec::with_capacity(types.len());
        for ty in types.iter().rev() {
            popped.push(self.pop_expected(*ty)?);
        }
        popped.reverse();
        Ok(popped)
    }

    fn push_ctrl(&mut self, kind: FrameKind, start_pc: usize, start_types: Vec<ValueType>, end_types: Vec<ValueType>) {
        let height = self.vals.len();
        self.push_vals(&start_types);
        self.ctrls.push(CtrlFrame {
            kind,
            start_pc,
            start_types,
            end_types,
            height,
            unreachable: false,
        });
    }

    fn pop_ctrl(&mut self) -> Result<CtrlFrame, ValidationError> {
        let end_types = self
            .ctrls
            .last()
            .map(|frame| frame.end_types.clone())
            .ok_or(ValidationError::UnbalancedBlocks)?;
        self.pop_expecteds(&end_types)?;
        let frame = self.ctrls.pop().ok_or(ValidationError::UnbalancedBlocks)?;
        if self.vals.len() != frame.height {
            return Err(ValidationError::TypeMismatch);
        }
        Ok(frame)
    }

    fn label_types(&self, label_idx: u32) -> Result<Vec<ValueType>, ValidationError> {
        let depth = label_idx as usize;
        if depth >= self.ctrls.len() {
            return Err(ValidationError::UnknownLabel(label_idx));
        }
        let frame = &self.ctrls[self.ctrls.len() - 1 - depth];
        Ok(if frame.kind == FrameKind::Loop {
            frame.start_types.clone()
        } else {
            frame.end_types.clone()
        })
    }

    fn unreachable(&mut self) -> Result<(), ValidationError> {
        let frame = self.ctrls.last_mut().ok_or(ValidationError::UnbalancedBlocks)?;
        self.vals.truncate(frame.height);
        frame.unreachable = true;
        Ok(())
    }

    fn sig_unary(&mut self, input: ValueType, output: ValueType) -> Result<(), ValidationError> {
        self.pop_expected(input)?;
        self.push_val(Val(output));
        Ok(())
    }

    fn sig_binary(&mut self, input: ValueType, output: ValueType) -> Result<(), ValidationError> {
        self.pop_expected(input)?;
        self.pop_expected(input)?;
        self.push_val(Val(output));
        Ok(())
    }

    fn local(&self, local_idx: u32) -> Result<ValueType, ValidationError> {
        self.locals
            .get(local_idx as usize)
            .copied()
            .ok_or(ValidationError::UnknownLocal(local_idx))
    }

    fn block_signature(&self, block_type: BlockType) -> Result<(Vec<ValueType>, Vec<ValueType>), ValidationError> {
        match block_type {
            BlockType::Empty => Ok((vec![], vec![])),
            BlockType::Value(ty) => Ok((vec![], vec![ty])),
            BlockType::FuncType(idx) => {
                let ty = self.ctx.block_type_index(idx)?;
                Ok((ty.params.clone(), ty.results.clone()))
            }
        }
    }

    fn check_memarg(&self, inst: &Instruction, memarg: &MemArg) -> Result<(), ValidationError> {
        self.ctx.memory(0)?;
        if Some(memarg.align) > inst.natural_alignment() {
            return Err(ValidationError::BadAlignment);
        }
        Ok(())
    }

    fn load(&mut self, inst: &Instruction, memarg: &MemArg, ty: ValueType) -> Result<(), ValidationError> {
        self.check_memarg(inst, memarg)?;
        self.sig_unary(I32, ty)
    }

    fn store(&mut self, inst: &Instruction, memarg: &MemArg, ty: ValueType) -> Result<(), ValidationError> {
        self.check_memarg(inst, memarg)?;
        self.pop_expected(ty)?;
        self.pop_expected(I32)?;
        Ok(())
    }

    fn validate(&mut self, pc: usize, inst: &Instruction) -> Result<(), ValidationError> {
        use Instruction::*;

        match inst {
            Unreachable => self.unreachable()?,
            Nop => {}

            Block { block_type } | Loop { block_type } | If { block_type } => {
                if matches!(inst, If { .. }) {
                    self.pop_expected(I32)?;
                }
                let (params, results) = self.block_signature(*block_type)?;
                self.pop_expecteds(&params)?;
                let kind = match inst {
                    Loop { .. } => FrameKind::Loop,
                    If { .. } => FrameKind::If,
                    _ => FrameKind::Block,
                };
                self.push_ctrl(kind, pc, params, results);
            }

            Else => {
                let frame = self.pop_ctrl()?;
                if frame.kind != FrameKind::If {
                    return Err(ValidationError::ElseWithoutIf);
                }
                self.targets[frame.start_pc].else_pc = Some(pc as u32);
                self.push_ctrl(FrameKind::Else, frame.start_pc, frame.start_types, frame.end_types);
            }

            End => {
                let frame = self.pop_ctrl()?;
                // an if without else behaves as if the else passed its inputs through
                if frame.kind == FrameKind::If && frame.start_types != frame.end_types {
                    return Err(ValidationError::TypeMismatch);
                }
                if frame.kind != FrameKind::Function {
                    let target = &mut self.targets[frame.start_pc];
                    target.end_pc = pc as u32;
                    if let Some(else_pc) = target.else_pc {
                        self.targets[else_pc as usize].end_pc = pc as u32;
                    }
                }
                self.push_vals(&frame.end_types);
            }

            Br { label_idx } => {
                let types = self.label_types(*label_idx)?;
                self.pop_expecteds(&types)?;
                self.unreachable()?;
            }

            BrIf { label_idx } => {
                self.pop_expected(I32)?;
                let types = self.label_types(*label_idx)?;
                self.pop_expecteds(&types)?;
                self.push_vals(&types);
            }

            BrTable { labels, default } => {
                self.pop_expected(I32)?;
                let default_types = self.label_types(*default)?;
                let arity = default_types.len();
                for label in labels {
                    let types = self.label_types(*label)?;
                    if types.len() != arity {
                        return Err(ValidationError::TypeMismatch);
                    }
                    // put back exactly what was popped so an unknown stays unknown
                    for val in self.pop_expecteds(&types)? {
                        self.push_val(val);
                    }
                }
                self.pop_expecteds(&default_types)?;
                self.unreachable()?;
            }

            Return => {
                let results = self.results.clone();
                self.pop_expecteds(&results)?;
                self.unreachable()?;
            }

            Call { func_idx } => {
                let ty = self.ctx.func_type(*func_idx)?;
                self.pop_expecteds(&ty.params)?;
                self.push_vals(&ty.results);
            }

            CallIndirect { type_idx, table_idx } => {
                if self.ctx.table(*table_idx)?.element != RefType::FuncRef {
                    return Err(ValidationError::TypeMismatch);
                }
                self.pop_expected(I32)?;
                let ty = self.ctx.block_type_index(*type_idx)?;
                self.pop_expecteds(&ty.params)?;
                self.push_vals(&ty.results);
            }

            RefNull { ref_type } => self.push_val(Val((*ref_type).into())),

            RefIsNull => {
                if let Val(ty) = self.pop_val()? {
                    if !ty.is_ref() {
                        return Err(ValidationError::TypeMismatch);
                    }
                }
                self.push_val(Val(I32));
            }

            RefFunc { func_idx } => {
                self.ctx.func_type(*func_idx)?;
                if !self.ctx.refs.contains(func_idx) {
                    return Err(ValidationError::UndeclaredFunctionReference(*func_idx));
                }
                self.push_val(Val(FuncRef));
            }

            Drop => {
                self.pop_val()?;
            }

            Select => {
                self.pop_expected(I32)?;
                let t1 = self.pop_val()?;
                let t2 = self.pop_val()?;
                if !t1.is_num() || !t2.is_num() {
                    return Err(ValidationError::TypeMismatch);
                }
                match (t1, t2) {
                    (Val(a), Val(b)) if a != b => return Err(ValidationError::TypeMismatch),
                    (Unknown, other) => self.push_val(other),
                    (known, _) => self.push_val(known),
                }
            }

            SelectTyped { types } => {
                if types.len() != 1 {
                    return Err(ValidationError::InvalidResultArity);
                }
                let ty = types[0];
                self.pop_expected(I32)?;
                self.pop_expected(ty)?;
                self.pop_expected(ty)?;
                self.push_val(Val(ty));
            }

            LocalGet { local_idx } => {
                let ty = self.local(*local_idx)?;
                self.push_val(Val(ty));
            }
            LocalSet { local_idx } => {
                let ty = self.local(*local_idx)?;
                self.pop_expected(ty)?;
            }
            LocalTee { local_idx } => {
                let ty = self.local(*local_idx)?;
                self.sig_unary(ty, ty)?;
            }

            GlobalGet { global_idx } => {
                let ty = self.ctx.global(*global_idx)?.value_type;
                self.push_val(Val(ty));
            }
            GlobalSet { global_idx } => {
                let global = *self.ctx.global(*global_idx)?;
                if !global.mutable {
                    return Err(ValidationError::ImmutableGlobal(*global_idx));
                }
                self.pop_expected(global.value_type)?;
            }

            TableGet { table_idx } => {
                let ty = self.ctx.table(*table_idx)?.element.into();
                self.sig_unary(I32, ty)?;
            }
            TableSet { table_idx } => {
                let ty = self.ctx.table(*table_idx)?.element.into();
                self.pop_expected(ty)?;
                self.pop_expected(I32)?;
            }
            TableSize { table_idx } => {
                self.ctx.table(*table_idx)?;
                self.push_val(Val(I32));
            }
            TableGrow { table_idx } => {
                let ty = self.ctx.table(*table_idx)?.element.into();
                self.pop_expected(I32)?;
                self.pop_expected(ty)?;
                self.push_val(Val(I32));
            }
            TableFill { table_idx } => {
                let ty = self.ctx.table(*table_idx)?.element.into();
                self.pop_expecteds(&[I32, ty, I32])?;
            }
            TableCopy { dst_table, src_table } => {
                let dst = self.ctx.table(*dst_table)?.element;
                let src = self.ctx.table(*src_table)?.element;
                if dst != src {
                    return Err(ValidationError::TypeMismatch);
                }
                self.pop_expecteds(&[I32, I32, I32])?;
            }
            TableInit { elem_idx, table_idx } => {
                let table = self.ctx.table(*table_idx)?.element;
                if self.ctx.element_type(*elem_idx)? != table {
                    return Err(ValidationError::TypeMismatch);
                }
                self.pop_expecteds(&[I32, I32, I32])?;
            }
            ElemDrop { elem_idx } => {
                self.ctx.element_type(*elem_idx)?;
            }

            I32Load { memarg }
            | I32Load8S { memarg }
            | I32Load8U { memarg }
            | I32Load16S { memarg }
            | I32Load16U { memarg } => self.load(inst, memarg, I32)?,
            I64Load { memarg }
            | I64Load8S { memarg }
            | I64Load8U { memarg }
            | I64Load16S { memarg }
            | I64Load16U { memarg }
            | I64Load32S { memarg }
            | I64Load32U { memarg } => self.load(inst, memarg, I64)?,
            F32Load { memarg } => self.load(inst, memarg, F32)?,
            F64Load { memarg } => self.load(inst, memarg, F64)?,
            I32Store { memarg } | I32Store8 { memarg } | I32Store16 { memarg } => self.store(inst, memarg, I32)?,
            I64Store { memarg } | I64Store8 { memarg } | I64Store16 { memarg } | I64Store32 { memarg } => {
                self.store(inst, memarg, I64)?
            }
            F32Store { memarg } => self.store(inst, memarg, F32)?,
            F64Store { memarg } => self.store(inst, memarg, F64)?,

            MemorySize => {
                self.ctx.memory(0)?;
                self.push_val(Val(I32));
            }
            MemoryGrow => {
                self.ctx.memory(0)?;
                self.sig_unary(I32, I32)?;
            }
            MemoryFill | MemoryCopy => {
                self.ctx.memory(0)?;
                self.pop_expecteds(&[I32, I32, I32])?;
            }
            MemoryInit { data_idx } => {
                self.ctx.check_data_index(*data_idx)?;
                self.ctx.memory(0)?;
                self.pop_expecteds(&[I32, I32, I32])?;
            }
            DataDrop { data_idx } => self.ctx.check_data_index(*data_idx)?,

            I32Const { .. } => self.push_val(Val(I32)),
            I64Const { .. } => self.push_val(Val(I64)),
            F32Const { .. } => self.push_val(Val(F32)),
            F64Const { .. } => self.push_val(Val(F64)),

            // itestop
            I32Eqz => self.sig_unary(I32, I32)?,
            I64Eqz => self.sig_unary(I64, I32)?,

            // irelop / frelop
            I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS | I32GeU => {
                self.sig_binary(I32, I32)?
            }
            I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS | I64GeU => {
                self.sig_binary(I64, I32)?
            }
            F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge => self.sig_binary(F32, I32)?,
            F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => self.sig_binary(F64, I32)?,

            // iunop / ibinop
            I32Clz | I32Ctz | I32Popcnt | I32Extend8S | I32Extend16S => self.sig_unary(I32, I32)?,
            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or | I32Xor | I32Shl
            | I32ShrS | I32ShrU | I32Rotl | I32Rotr => self.sig_binary(I32, I32)?,
            I64Clz | I64Ctz | I64Popcnt | I64Extend8S | I64Extend16S | I64Extend32S => self.sig_unary(I64, I64)?,
            I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or | I64Xor | I64Shl
            | I64ShrS | I64ShrU | I64Rotl | I64Rotr => self.sig_binary(I64, I64)?,

            // funop / fbinop
            F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt => self.sig_unary(F32, F32)?,
            F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign => self.sig_binary(F32, F32)?,
            F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => self.sig_unary(F64, F64)?,
            F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => self.sig_binary(F64, F64)?,

            // cvtop
            I32WrapI64 => self.sig_unary(I64, I32)?,
            I32TruncF32S | I32TruncF32U | I32TruncSatF32S | I32TruncSatF32U | I32ReinterpretF32 => {
                self.sig_unary(F32, I32)?
            }
            I32TruncF64S | I32TruncF64U | I32TruncSatF64S | I32TruncSatF64U => self.sig_unary(F64, I32)?,
            I64ExtendI32S | I64ExtendI32U => self.sig_unary(I32, I64)?,
            I64TruncF32S | I64TruncF32U | I64TruncSatF32S | I64TruncSatF32U => self.sig_unary(F32, I64)?,
            I64TruncF64S | I64TruncF64U | I64TruncSatF64S | I64TruncSatF64U | I64ReinterpretF64 => {
                self.sig_unary(F64, I64)?
            }
            F32ConvertI32S | F32ConvertI32U | F32ReinterpretI32 => self.sig_unary(I32, F32)?,
            F32ConvertI64S | F32ConvertI64U => self.sig_unary(I64, F32)?,
            F32DemoteF64 => self.sig_unary(F64, F32)?,
            F64ConvertI32S | F64ConvertI32U => self.sig_unary(I32, F64)?,
            F64ConvertI64S | F64ConvertI64U | F64ReinterpretI64 => self.sig_unary(I64, F64)?,
            F64PromoteF32 => self.sig_unary(F32, F64)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::module::{Export, Global, LocalGroup};
    use crate::parser::parse;

    fn from_wat(source: &str) -> Module {
        let bytes = wat::parse_str(source).unwrap();
        parse("test", &bytes).unwrap()
    }

    /// A module with a single function of the given type and body.
    fn single_function(params: Vec<ValueType>, results: Vec<ValueType>, body: Vec<Instruction>) -> Module {
        let mut module = Module::new("test");
        module.types.push(FunctionType::new(params, results));
        module.functions.push(0);
        module.code.push(FunctionBody {
            locals: vec![LocalGroup {
                count: 1,
                value_type: I64,
            }],
            instructions: body,
        });
        module
    }

    fn body_error(module: Module) -> ValidationError {
        validate(module).unwrap_err().kind().clone()
    }

    #[test]
    fn valid_module_keeps_code() {
        let valid = validate(from_wat(
            r#"(module
                (func (export "add") (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add))"#,
        ))
        .unwrap();
        assert_eq!(valid.code().len(), 1);
        assert_eq!(valid.code()[0].max_height, 2);
        assert!(valid.module().export("add").is_some());
    }

    #[test]
    fn type_mismatch() {
        let module = single_function(
            vec![],
            vec![ValueType::I32],
            vec![Instruction::I64Const { value: 1 }, Instruction::End],
        );
        let err = validate(module).unwrap_err();
        assert!(matches!(err, ValidationError::InFunction { func: 0, pc: 1, .. }), "{err:?}");
        assert_eq!(err.kind(), &ValidationError::TypeMismatch);
    }

    #[test]
    fn stack_is_polymorphic_after_unreachable() {
        // i32.add pops two unknowns, leaving an i32 for the result
        let module = single_function(
            vec![],
            vec![ValueType::I32],
            vec![Instruction::Unreachable, Instruction::I32Add, Instruction::End],
        );
        assert!(validate(module).is_ok());

        let module = single_function(
            vec![],
            vec![ValueType::F64],
            vec![Instruction::Unreachable, Instruction::End],
        );
        assert!(validate(module).is_ok());
    }

    #[test]
    fn polymorphic_stack_still_checks_known_values() {
        // the i64 pushed after unreachable is real and cannot feed i32.add
        let module = single_function(
            vec![],
            vec![ValueType::I32],
            vec![
                Instruction::Unreachable,
                Instruction::I64Const { value: 0 },
                Instruction::I32Add,
                Instruction::End,
            ],
        );
        assert_eq!(body_error(module), ValidationError::TypeMismatch);
    }

    #[test]
    fn unknown_label_and_local() {
        let module = single_function(vec![], vec![], vec![Instruction::Br { label_idx: 1 }, Instruction::End]);
        assert_eq!(body_error(module), ValidationError::UnknownLabel(1));

        // one i64 declared local, so index 1 is out of range
        let module = single_function(
            vec![],
            vec![],
            vec![Instruction::LocalGet { local_idx: 1 }, Instruction::Drop, Instruction::End],
        );
        assert_eq!(body_error(module), ValidationError::UnknownLocal(1));
    }

    #[test]
    fn block_targets_are_recorded() {
        let valid = validate(from_wat(
            r#"(module
                (func (param i32) (result i32)
                    (if (result i32) (local.get 0)
                        (then (i32.const 1))
                        (else (block (result i32) (i32.const 2))))))"#,
        ))
        .unwrap();
        let code = &valid.code()[0];
        let insts = &code.instructions;
        let if_pc = insts.iter().position(|i| matches!(i, Instruction::If { .. })).unwrap();
        let else_pc = insts.iter().position(|i| *i == Instruction::Else).unwrap();
        let block_pc = insts.iter().position(|i| matches!(i, Instruction::Block { .. })).unwrap();

        let if_target = code.targets[if_pc];
        assert_eq!(if_target.else_pc, Some(else_pc as u32));
        assert_eq!(insts[if_target.end_pc as usize], Instruction::End);
        assert_eq!(code.targets[else_pc].end_pc, if_target.end_pc);
        assert_eq!(code.targets[block_pc].end_pc as usize, block_pc + 2);
    }

    #[test]
    fn if_without_else_must_pass_params_through() {
        let module = single_function(
            vec![],
            vec![ValueType::I32],
            vec![
                Instruction::I32Const { value: 1 },
                Instruction::If {
                    block_type: BlockType::Value(ValueType::I32),
                },
                Instruction::I32Const { value: 2 },
                Instruction::End,
                Instruction::End,
            ],
        );
        assert_eq!(body_error(module), ValidationError::TypeMismatch);
    }

    #[test]
    fn immutable_global_cannot_be_set() {
        let mut module = single_function(
            vec![],
            vec![],
            vec![
                Instruction::I32Const { value: 1 },
                Instruction::GlobalSet { global_idx: 0 },
                Instruction::End,
            ],
        );
        module.globals.push(Global {
            ty: GlobalType {
                value_type: ValueType::I32,
                mutable: false,
            },
            init: ConstExpr {
                instructions: vec![Instruction::I32Const { value: 0 }],
            },
        });
        assert_eq!(body_error(module), ValidationError::ImmutableGlobal(0));
    }

    #[test]
    fn over_aligned_access() {
        let mut module = single_function(
            vec![],
            vec![],
            vec![
                Instruction::I32Const { value: 0 },
                Instruction::I32Load8U {
                    memarg: MemArg { align: 1, offset: 0 },
                },
                Instruction::Drop,
                Instruction::End,
            ],
        );
        module.memories.push(MemoryType {
            limits: Limits { min: 1, max: None },
        });
        assert_eq!(body_error(module), ValidationError::BadAlignment);
    }

    #[test]
    fn memory_instructions_need_a_memory() {
        let module = single_function(
            vec![],
            vec![ValueType::I32],
            vec![Instruction::MemorySize, Instruction::End],
        );
        assert_eq!(body_error(module), ValidationError::UnknownMemory(0));
    }

    #[test]
    fn module_level_checks() {
        let mut module = single_function(vec![ValueType::I32], vec![], vec![Instruction::End]);
        module.start = Some(0);
        assert_eq!(validate(module).unwrap_err(), ValidationError::InvalidStartFunction);

        let mut module = single_function(vec![], vec![], vec![Instruction::End]);
        for _ in 0..2 {
            module.exports.push(Export {
                name: "f".into(),
                desc: ExportDesc::Function(0),
            });
        }
        assert_eq!(validate(module).unwrap_err(), ValidationError::DuplicateExport("f".into()));

        let mut module = Module::new("test");
        module.memories.push(MemoryType {
            limits: Limits {
                min: 2,
                max: Some(1),
            },
        });
        assert_eq!(validate(module).unwrap_err(), ValidationError::InvalidLimits);

        let mut module = Module::new("test");
        module.memories.push(MemoryType {
            limits: Limits { min: 65537, max: None },
        });
        assert_eq!(validate(module).unwrap_err(), ValidationError::MemoryTooLarge);
    }

    #[test]
    fn global_initialiser_must_be_constant() {
        let mut module = Module::new("test");
        module.globals.push(Global {
            ty: GlobalType {
                value_type: ValueType::I32,
                mutable: false,
            },
            init: ConstExpr {
                instructions: vec![
                    Instruction::I32Const { value: 1 },
                    Instruction::I32Const { value: 2 },
                    Instruction::I32Add,
                ],
            },
        });
        assert_eq!(validate(module).unwrap_err(), ValidationError::ConstantExpressionRequired);
    }

    #[test]
    fn ref_func_must_be_declared() {
        let module = single_function(
            vec![],
            vec![],
            vec![Instruction::RefFunc { func_idx: 0 }, Instruction::Drop, Instruction::End],
        );
        assert_eq!(body_error(module), ValidationError::UndeclaredFunctionReference(0));

        let valid = from_wat(
            r#"(module
                (func $f (export "f") ref.func $f drop))"#,
        );
        assert!(validate(valid).is_ok());
    }

    #[test]
    fn data_drop_needs_data_count() {
        let module = single_function(vec![], vec![], vec![Instruction::DataDrop { data_idx: 0 }, Instruction::End]);
        assert_eq!(body_error(module), ValidationError::DataCountRequired);
    }
}

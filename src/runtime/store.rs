//! The Store: owner of every instance and every function address.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Store                           │
//! │  functions (FuncAddr -> FunctionInstance)                │
//! │    [0]: Host { wasi_snapshot_preview1.fd_write }         │
//! │    [1]: Wasm { instance #0, code }                       │
//! │  instances (InstanceId -> Instance)                      │
//! │    [0]: game.wasm                                        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Instantiation resolves every import against a [`Linker`] before anything
//! is allocated, so a [`LinkError`] leaves the store exactly as it was. Later
//! failures (a segment out of range, a trap in the start function) roll the
//! store back as well; the only effects that survive are writes into memories
//! and tables that were imported from the linker.

use super::config::RuntimeConfig;
use super::executor::Executor;
use super::linker::{Definition, HostFunc, Linker};
use super::{Instance, InstanceId, LinkError, Memory, RuntimeError, Table, Trap, Value};
use crate::parser::instruction::Instruction;
use crate::parser::module::{
    ConstExpr, DataMode, ElementItems, ElementMode, ExportDesc, FunctionType, Import, ImportDesc, Limits, Module,
    ValueType,
};
use crate::parser::validate::{FunctionCode, ValidModule};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Index into the Store's function space.
///
/// Function addresses are unique across instances, which is what lets a
/// `funcref` or a table slot point at a function of any instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncAddr(pub usize);

/// A global shared between its defining and importing sides. `Value` is
/// `Copy`, so a `Cell` is enough.
pub type SharedGlobal = Rc<Cell<Value>>;

/// A memory shared between instances and the host.
pub type SharedMemory = Rc<RefCell<Memory>>;

pub type SharedTable = Rc<RefCell<Table>>;

pub enum FunctionInstance {
    /// A function defined by a module.
    Wasm {
        instance_id: InstanceId,
        code: Rc<FunctionCode>,
        func_type: FunctionType,
    },
    /// A host callback bound to a function import.
    Host {
        func: HostFunc,
        func_type: FunctionType,
        /// `module.field` it was imported as.
        name: String,
    },
}

impl FunctionInstance {
    pub fn func_type(&self) -> &FunctionType {
        match self {
            FunctionInstance::Wasm { func_type, .. } | FunctionInstance::Host { func_type, .. } => func_type,
        }
    }
}

/// Imports resolved against a linker, in import order per kind.
struct ResolvedImports {
    functions: Vec<(String, HostFunc, FunctionType)>,
    tables: Vec<SharedTable>,
    memories: Vec<SharedMemory>,
    globals: Vec<SharedGlobal>,
}

fn import_kind(desc: &ImportDesc) -> &'static str {
    match desc {
        ImportDesc::Function(_) => "function",
        ImportDesc::Table(_) => "table",
        ImportDesc::Memory(_) => "memory",
        ImportDesc::Global(_) => "global",
    }
}

/// An imported memory or table must be at least as large as declared, and if
/// the import declares a maximum the provided one must have one no larger.
fn limits_match(actual_min: u32, actual_max: Option<u32>, expected: &Limits) -> bool {
    if actual_min < expected.min {
        return false;
    }
    match (expected.max, actual_max) {
        (None, _) => true,
        (Some(expected), Some(actual)) => actual <= expected,
        (Some(_), None) => false,
    }
}

fn embedder_borrow(import: &Import) -> RuntimeError {
    RuntimeError::Trap(Trap::Host(format!(
        "{}.{} is borrowed by the embedder",
        import.module, import.field
    )))
}

fn resolve_imports(module: &Module, linker: &Linker) -> Result<ResolvedImports, RuntimeError> {
    let mut resolved = ResolvedImports {
        functions: Vec::new(),
        tables: Vec::new(),
        memories: Vec::new(),
        globals: Vec::new(),
    };
    for import in &module.imports {
        let incompatible = |expected: String, actual: String| LinkError::IncompatibleImport {
            module: import.module.clone(),
            field: import.field.clone(),
            expected,
            actual,
        };
        let definition = linker
            .get(&import.module, &import.field)
            .ok_or_else(|| LinkError::UnknownImport {
                module: import.module.clone(),
                field: import.field.clone(),
            })?;
        match (&import.desc, definition) {
            (ImportDesc::Function(type_idx), Definition::Function { func, ty }) => {
                let expected = module.types.get(*type_idx as usize).cloned().unwrap_or_default();
                if *ty != expected {
                    return Err(incompatible(expected.to_string(), ty.to_string()).into());
                }
                let name = format!("{}.{}", import.module, import.field);
                resolved.functions.push((name, Rc::clone(func), expected));
            }
            (ImportDesc::Table(ty), Definition::Table(table)) => {
                let (element, min, max) = {
                    let table = table.try_borrow().map_err(|_| embedder_borrow(import))?;
                    (table.ref_type(), table.size(), table.max())
                };
                if element != ty.element || !limits_match(min, max, &ty.limits) {
                    let actual = Limits { min, max };
                    return Err(incompatible(
                        format!("table {} {}", ty.limits, ty.element),
                        format!("table {actual} {element}"),
                    )
                    .into());
                }
                resolved.tables.push(Rc::clone(table));
            }
            (ImportDesc::Memory(ty), Definition::Memory(memory)) => {
                let (min, max) = {
                    let memory = memory.try_borrow().map_err(|_| embedder_borrow(import))?;
                    (memory.size(), memory.max_pages())
                };
                if !limits_match(min, max, &ty.limits) {
                    let actual = Limits { min, max };
                    return Err(incompatible(format!("memory {}", ty.limits), format!("memory {actual}")).into());
                }
                resolved.memories.push(Rc::clone(memory));
            }
            (ImportDesc::Global(ty), Definition::Global { global, mutable }) => {
                let actual = global.get().typ();
                if actual != ty.value_type || *mutable != ty.mutable {
                    let describe = |t: ValueType, m: bool| if m { format!("global mut {t}") } else { format!("global {t}") };
                    return Err(incompatible(describe(ty.value_type, ty.mutable), describe(actual, *mutable)).into());
                }
                resolved.globals.push(Rc::clone(global));
            }
            (desc, definition) => {
                return Err(incompatible(import_kind(desc).to_string(), definition.kind().to_string()).into());
            }
        }
    }
    Ok(resolved)
}

/// Evaluates a constant initialiser against the globals and functions
/// allocated so far.
fn eval_const(expr: &ConstExpr, globals: &[SharedGlobal], functions: &[FuncAddr]) -> Result<Value, Trap> {
    let mut result = None;
    for inst in &expr.instructions {
        result = Some(match inst {
            Instruction::I32Const { value } => Value::I32(*value),
            Instruction::I64Const { value } => Value::I64(*value),
            Instruction::F32Const { value } => Value::F32(*value),
            Instruction::F64Const { value } => Value::F64(*value),
            Instruction::RefNull { ref_type } => Value::null(*ref_type),
            Instruction::RefFunc { func_idx } => Value::FuncRef(Some(
                functions.get(*func_idx as usize).copied().ok_or(Trap::UndefinedElement)?,
            )),
            Instruction::GlobalGet { global_idx } => globals
                .get(*global_idx as usize)
                .map(|g| g.get())
                .ok_or(Trap::StackUnderflow)?,
            other => {
                return Err(Trap::TypeMismatch {
                    expected: "constant instruction".to_string(),
                    actual: other.mnemonic().to_string(),
                })
            }
        });
    }
    result.ok_or(Trap::StackUnderflow)
}

fn offset_of(value: Value) -> Result<u32, Trap> {
    value.as_i32().map(|v| v as u32).ok_or_else(|| Trap::TypeMismatch {
        expected: "i32".to_string(),
        actual: value.typ().to_string(),
    })
}

fn describe_types(types: impl Iterator<Item = ValueType>) -> String {
    let names: Vec<String> = types.map(|t| t.to_string()).collect();
    format!("[{}]", names.join(" "))
}

pub struct Store {
    config: RuntimeConfig,
    functions: Vec<FunctionInstance>,
    instances: Vec<Instance>,
}

impl Default for Store {
    fn default() -> Self {
        Self::with_config(RuntimeConfig::default())
    }
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Store {
            config,
            functions: Vec::new(),
            instances: Vec::new(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Instantiates `module`, binding its imports from `linker`, and runs its
    /// start function.
    ///
    /// # Errors
    /// - `Link` if an import is missing or has the wrong type; nothing is
    ///   allocated in that case
    /// - `Trap` if a segment does not fit or the start function traps; the
    ///   partially built instance is discarded
    pub fn instantiate(&mut self, module: &ValidModule, linker: &Linker) -> Result<InstanceId, RuntimeError> {
        let imports = resolve_imports(module.module(), linker)?;

        let function_mark = self.functions.len();
        let instance_id = InstanceId(self.instances.len());
        match self.initialise(module, imports, instance_id) {
            Ok(()) => {
                log::debug!(
                    "instantiated {} as {instance_id} ({} functions)",
                    module.name(),
                    self.functions.len() - function_mark
                );
                Ok(instance_id)
            }
            Err(err) => {
                self.functions.truncate(function_mark);
                self.instances.truncate(instance_id.0);
                log::debug!("instantiation of {} failed: {err}", module.name());
                Err(err)
            }
        }
    }

    fn initialise(
        &mut self,
        valid: &ValidModule,
        imports: ResolvedImports,
        instance_id: InstanceId,
    ) -> Result<(), RuntimeError> {
        let module = valid.shared_module();

        let mut functions = Vec::with_capacity(module.function_count() as usize);
        for (name, func, func_type) in imports.functions {
            functions.push(FuncAddr(self.functions.len()));
            self.functions.push(FunctionInstance::Host { func, func_type, name });
        }
        for code in valid.code() {
            let func_type = module.types.get(code.type_idx as usize).cloned().unwrap_or_default();
            functions.push(FuncAddr(self.functions.len()));
            self.functions.push(FunctionInstance::Wasm {
                instance_id,
                code: Rc::clone(code),
                func_type,
            });
        }

        let mut memories = imports.memories;
        for ty in &module.memories {
            let memory = Memory::new(ty.limits.min, ty.limits.max)?;
            memories.push(Rc::new(RefCell::new(memory)));
        }

        let mut tables = imports.tables;
        tables.extend(module.tables.iter().map(|ty| Rc::new(RefCell::new(Table::new(ty)))));

        let mut globals = imports.globals;
        for global in &module.globals {
            let value = eval_const(&global.init, &globals, &functions)?;
            globals.push(Rc::new(Cell::new(value)));
        }

        let mut elements = Vec::with_capacity(module.elements.len());
        for segment in &module.elements {
            let values: Vec<Value> = match &segment.items {
                ElementItems::Functions(indices) => indices
                    .iter()
                    .map(|idx| {
                        functions
                            .get(*idx as usize)
                            .map(|addr| Value::FuncRef(Some(*addr)))
                            .ok_or(Trap::UndefinedElement)
                    })
                    .collect::<Result<_, _>>()?,
                ElementItems::Expressions(exprs) => exprs
                    .iter()
                    .map(|expr| eval_const(expr, &globals, &functions))
                    .collect::<Result<_, _>>()?,
            };
            elements.push(Rc::from(values));
        }
        let data = module.data.iter().map(|segment| Rc::from(segment.bytes.as_slice())).collect();

        self.instances.push(Instance {
            elements_dropped: vec![Cell::new(false); module.elements.len()],
            data_dropped: vec![Cell::new(false); module.data.len()],
            module: Rc::clone(&module),
            functions,
            tables,
            memories,
            globals,
            elements,
            data,
        });
        let instance = &self.instances[instance_id.0];

        for (idx, segment) in module.elements.iter().enumerate() {
            match &segment.mode {
                ElementMode::Active { table, offset } => {
                    let offset = offset_of(eval_const(offset, &instance.globals, &instance.functions)?)?;
                    let values = instance.element(idx as u32);
                    instance
                        .table_mut(*table)?
                        .init(offset, values, 0, values.len() as u32)?;
                    instance.drop_element(idx as u32);
                }
                ElementMode::Declarative => instance.drop_element(idx as u32),
                ElementMode::Passive => {}
            }
        }
        for (idx, segment) in module.data.iter().enumerate() {
            if let DataMode::Active { offset, .. } = &segment.mode {
                let offset = offset_of(eval_const(offset, &instance.globals, &instance.functions)?)?;
                instance
                    .memory_mut()?
                    .init(offset, &segment.bytes, 0, segment.bytes.len() as u32)?;
                instance.drop_data(idx as u32);
            }
        }

        if let Some(start) = module.start {
            let addr = instance.function(start)?;
            log::debug!("running start function {start} of {}", module.name);
            self.invoke(addr, &[])?;
        }
        Ok(())
    }

    pub fn instance(&self, id: InstanceId) -> Result<&Instance, RuntimeError> {
        self.instances.get(id.0).ok_or(RuntimeError::UnknownInstance(id.0))
    }

    pub(crate) fn instance_ref(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.0)
    }

    pub fn function(&self, addr: FuncAddr) -> Option<&FunctionInstance> {
        self.functions.get(addr.0)
    }

    pub fn func_type(&self, addr: FuncAddr) -> Option<&FunctionType> {
        self.function(addr).map(FunctionInstance::func_type)
    }

    /// Address of the function exported as `name`.
    pub fn find_function(&self, instance: InstanceId, name: &str) -> Result<FuncAddr, RuntimeError> {
        let instance = self.instance(instance)?;
        match instance.export(name).map(|export| &export.desc) {
            Some(ExportDesc::Function(idx)) => Ok(instance.function(*idx)?),
            _ => Err(RuntimeError::UnknownExport(name.to_string())),
        }
    }

    /// Calls the function at `addr` with `args`, which must match its
    /// parameter types.
    ///
    /// Guest accesses to a memory or table the embedder is still borrowing in
    /// a conflicting way trap with [`Trap::Host`] rather than panicking.
    pub fn invoke(&self, addr: FuncAddr, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let func_type = self
            .func_type(addr)
            .ok_or_else(|| RuntimeError::UnknownExport(format!("function address {}", addr.0)))?;
        let arity_ok = func_type.params.len() == args.len();
        if !arity_ok || func_type.params.iter().zip(args).any(|(ty, arg)| *ty != arg.typ()) {
            return Err(RuntimeError::ArgumentMismatch {
                expected: describe_types(func_type.params.iter().copied()),
                actual: describe_types(args.iter().map(Value::typ)),
            });
        }
        Executor::new(self).call(addr, args.to_vec()).map_err(|trap| {
            log::debug!("call to function {} trapped: {trap}", addr.0);
            RuntimeError::Trap(trap)
        })
    }

    /// Calls the function exported as `name`.
    pub fn invoke_export(&self, instance: InstanceId, name: &str, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let addr = self.find_function(instance, name)?;
        self.invoke(addr, args)
    }

    /// The instance's memory, for host-side reads and writes.
    pub fn memory(&self, instance: InstanceId) -> Result<SharedMemory, RuntimeError> {
        self.instance(instance)?.memory().cloned().ok_or(RuntimeError::NoMemory)
    }

    /// Current value of the global exported as `name`.
    pub fn global(&self, instance: InstanceId, name: &str) -> Result<Value, RuntimeError> {
        let instance = self.instance(instance)?;
        match instance.export(name).map(|export| &export.desc) {
            Some(ExportDesc::Global(idx)) => Ok(instance.global(*idx)?.get()),
            _ => Err(RuntimeError::UnknownExport(name.to_string())),
        }
    }
}

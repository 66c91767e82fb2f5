//! Host definitions that satisfy module imports.
//!
//! The linker maps `(module, field)` pairs to host functions, tables,
//! memories and globals. Registering a pair that already exists replaces the earlier
//! definition: the last registration wins. That is what lets the WASI bridge
//! publish the same callbacks under several namespaces, and lets an embedder
//! override any single call afterwards.

use super::memory::Memory;
use super::store::{SharedGlobal, SharedMemory, SharedTable};
use super::{InstanceId, RuntimeError, Table, Trap, Value};
use crate::parser::limits::MAX_TABLE_ENTRIES;
use crate::parser::module::{FunctionType, TableType};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// A host callback. It receives the calling instance's view and the
/// arguments, and returns the results or a trap.
pub type HostFunc = Rc<dyn Fn(&Caller<'_>, &[Value]) -> Result<Vec<Value>, Trap>>;

/// What a host callback can see of the instance that called it.
pub struct Caller<'a> {
    instance: Option<InstanceId>,
    memory: Option<&'a SharedMemory>,
}

impl<'a> Caller<'a> {
    pub(crate) fn new(instance: Option<InstanceId>, memory: Option<&'a SharedMemory>) -> Self {
        Caller { instance, memory }
    }

    /// The calling instance, or `None` when the embedder invoked the host
    /// function directly.
    pub fn instance(&self) -> Option<InstanceId> {
        self.instance
    }

    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    /// Bounds-checked read access to the caller's memory.
    pub fn memory(&self) -> Result<Ref<'_, Memory>, Trap> {
        let memory = self.memory.ok_or_else(|| Trap::Host("caller has no memory".to_string()))?;
        memory
            .try_borrow()
            .map_err(|_| Trap::Host("caller memory is already borrowed".to_string()))
    }

    /// Bounds-checked write access to the caller's memory.
    pub fn memory_mut(&self) -> Result<RefMut<'_, Memory>, Trap> {
        let memory = self.memory.ok_or_else(|| Trap::Host("caller has no memory".to_string()))?;
        memory
            .try_borrow_mut()
            .map_err(|_| Trap::Host("caller memory is already borrowed".to_string()))
    }
}

/// One registered import.
#[derive(Clone)]
pub enum Definition {
    Function { func: HostFunc, ty: FunctionType },
    Table(SharedTable),
    Memory(SharedMemory),
    Global { global: SharedGlobal, mutable: bool },
}

impl Definition {
    pub fn kind(&self) -> &'static str {
        match self {
            Definition::Function { .. } => "function",
            Definition::Table(_) => "table",
            Definition::Memory(_) => "memory",
            Definition::Global { .. } => "global",
        }
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Definition::Function { ty, .. } => write!(f, "Function({ty})"),
            Definition::Table(table) => match table.try_borrow() {
                Ok(table) => write!(f, "Table({} {})", table.size(), table.ref_type()),
                Err(_) => f.write_str("Table(borrowed)"),
            },
            Definition::Memory(memory) => match memory.try_borrow() {
                Ok(memory) => write!(f, "Memory({} pages)", memory.size()),
                Err(_) => f.write_str("Memory(borrowed)"),
            },
            Definition::Global { global, mutable } => {
                write!(f, "Global({}, mutable: {mutable})", global.get())
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct Linker {
    definitions: HashMap<(String, String), Definition>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    fn define(&mut self, module: &str, field: &str, definition: Definition) {
        let previous = self
            .definitions
            .insert((module.to_string(), field.to_string()), definition);
        if let Some(previous) = previous {
            log::debug!(
                "{module}.{field}: replacing earlier {} definition, latest registration wins",
                previous.kind()
            );
        }
    }

    /// Registers `callback` as the function import `module.field` with the
    /// given signature. A later registration of the same pair replaces this
    /// one.
    pub fn link_function<F>(&mut self, module: &str, field: &str, callback: F, signature: FunctionType) -> &mut Self
    where
        F: Fn(&Caller<'_>, &[Value]) -> Result<Vec<Value>, Trap> + 'static,
    {
        self.link_host(module, field, Rc::new(callback), signature)
    }

    /// Like [`Linker::link_function`] for an already shared callback, so one
    /// closure can back several names.
    pub fn link_host(&mut self, module: &str, field: &str, func: HostFunc, signature: FunctionType) -> &mut Self {
        self.define(module, field, Definition::Function { func, ty: signature });
        self
    }

    /// Creates a table of `ty.limits.min` null references that every instance
    /// importing `module.field` will share. Active element segments of those
    /// instances write into it, and `call_indirect` dispatches through it.
    ///
    /// # Errors
    /// `InvalidLimits` if the maximum is below the minimum or either exceeds
    /// the table size limit.
    pub fn link_table(&mut self, module: &str, field: &str, ty: TableType) -> Result<SharedTable, RuntimeError> {
        let limits = ty.limits;
        if limits.min > MAX_TABLE_ENTRIES || limits.max.is_some_and(|max| max > MAX_TABLE_ENTRIES || max < limits.min) {
            return Err(RuntimeError::InvalidLimits(limits));
        }
        let table = Rc::new(RefCell::new(Table::new(&ty)));
        self.define(module, field, Definition::Table(Rc::clone(&table)));
        Ok(table)
    }

    /// Creates a memory of `min` pages that every instance importing
    /// `module.field` will share, and returns a handle to it.
    pub fn link_memory(
        &mut self,
        module: &str,
        field: &str,
        min: u32,
        max: Option<u32>,
    ) -> Result<SharedMemory, RuntimeError> {
        let memory = Rc::new(RefCell::new(Memory::new(min, max)?));
        self.define(module, field, Definition::Memory(Rc::clone(&memory)));
        Ok(memory)
    }

    /// Defines the global import `module.field`. Writes by the guest to a
    /// mutable global are visible through the returned handle.
    pub fn link_global(&mut self, module: &str, field: &str, value: Value, mutable: bool) -> SharedGlobal {
        let global = Rc::new(Cell::new(value));
        self.define(
            module,
            field,
            Definition::Global {
                global: Rc::clone(&global),
                mutable,
            },
        );
        global
    }

    pub fn get(&self, module: &str, field: &str) -> Option<&Definition> {
        self.definitions.get(&(module.to_string(), field.to_string()))
    }

    pub fn contains(&self, module: &str, field: &str) -> bool {
        self.get(module, field).is_some()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl fmt::Debug for Linker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.definitions.keys().map(|(m, n)| format!("{m}.{n}")).collect();
        names.sort();
        f.debug_struct("Linker").field("definitions", &names).finish()
    }
}

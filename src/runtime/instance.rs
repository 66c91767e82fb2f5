//! Module instances

use super::store::{FuncAddr, SharedGlobal, SharedMemory, SharedTable};
use super::{Memory, Table, Trap, Value};
use crate::parser::module::{Export, Module};
use std::cell::{Cell, Ref, RefMut};
use std::fmt;
use std::rc::Rc;

/// Index of an instance in its [`Store`](super::Store).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub usize);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The runtime state of one instantiated module.
///
/// Index spaces (functions, tables, memories, globals) are laid out exactly as
/// in the module: imports first, then definitions.
pub struct Instance {
    pub(crate) module: Rc<Module>,
    pub(crate) functions: Vec<FuncAddr>,
    pub(crate) tables: Vec<SharedTable>,
    pub(crate) memories: Vec<SharedMemory>,
    pub(crate) globals: Vec<SharedGlobal>,
    pub(crate) elements: Vec<Rc<[Value]>>,
    pub(crate) data: Vec<Rc<[u8]>>,
    /// Set by `elem.drop` and for active and declarative segments once
    /// instantiation has applied them. A dropped segment reads as empty.
    pub(crate) elements_dropped: Vec<Cell<bool>>,
    pub(crate) data_dropped: Vec<Cell<bool>>,
}

impl Instance {
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.module.export(name)
    }

    pub fn function(&self, idx: u32) -> Result<FuncAddr, Trap> {
        self.functions.get(idx as usize).copied().ok_or(Trap::UndefinedElement)
    }

    /// Memory 0, the only one a valid module can have.
    pub fn memory(&self) -> Option<&SharedMemory> {
        self.memories.first()
    }

    fn memory_or_trap(&self) -> Result<&SharedMemory, Trap> {
        self.memories.first().ok_or(Trap::MemoryOutOfBounds)
    }

    /// Memory 0 for a guest read. An embedder still holding a mutable
    /// borrow gets a trap back instead of a panic.
    pub(crate) fn memory_ref(&self) -> Result<Ref<'_, Memory>, Trap> {
        self.memory_or_trap()?
            .try_borrow()
            .map_err(|_| Trap::Host("memory is borrowed by the embedder".to_string()))
    }

    pub(crate) fn memory_mut(&self) -> Result<RefMut<'_, Memory>, Trap> {
        self.memory_or_trap()?
            .try_borrow_mut()
            .map_err(|_| Trap::Host("memory is borrowed by the embedder".to_string()))
    }

    pub(crate) fn table(&self, idx: u32) -> Result<&SharedTable, Trap> {
        self.tables.get(idx as usize).ok_or(Trap::TableOutOfBounds)
    }

    pub(crate) fn table_ref(&self, idx: u32) -> Result<Ref<'_, Table>, Trap> {
        self.table(idx)?
            .try_borrow()
            .map_err(|_| Trap::Host(format!("table {idx} is borrowed by the embedder")))
    }

    pub(crate) fn table_mut(&self, idx: u32) -> Result<RefMut<'_, Table>, Trap> {
        self.table(idx)?
            .try_borrow_mut()
            .map_err(|_| Trap::Host(format!("table {idx} is borrowed by the embedder")))
    }

    pub(crate) fn global(&self, idx: u32) -> Result<&SharedGlobal, Trap> {
        self.globals.get(idx as usize).ok_or(Trap::StackUnderflow)
    }

    pub(crate) fn element(&self, idx: u32) -> &[Value] {
        let idx = idx as usize;
        match (self.elements.get(idx), self.elements_dropped.get(idx)) {
            (Some(segment), Some(dropped)) if !dropped.get() => &segment[..],
            _ => &[][..],
        }
    }

    pub(crate) fn drop_element(&self, idx: u32) {
        if let Some(dropped) = self.elements_dropped.get(idx as usize) {
            dropped.set(true);
        }
    }

    pub(crate) fn data_segment(&self, idx: u32) -> &[u8] {
        let idx = idx as usize;
        match (self.data.get(idx), self.data_dropped.get(idx)) {
            (Some(segment), Some(dropped)) if !dropped.get() => &segment[..],
            _ => &[][..],
        }
    }

    pub(crate) fn drop_data(&self, idx: u32) {
        if let Some(dropped) = self.data_dropped.get(idx as usize) {
            dropped.set(true);
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("module", &self.module.name)
            .field("functions", &self.functions.len())
            .field("tables", &self.tables.len())
            .field("memories", &self.memories.len())
            .field("globals", &self.globals.len())
            .finish()
    }
}

//! Tables: typed, growable vectors of references.
//!
//! A function table is what `call_indirect` dispatches through, so reads that
//! miss the table trap with [`Trap::UndefinedElement`] at the call site while
//! plain `table.get`/`table.set` report [`Trap::TableOutOfBounds`].

use super::{Trap, Value};
use crate::parser::limits::MAX_TABLE_ENTRIES;
use crate::parser::module::{Limits, RefType, TableType};

#[derive(Debug)]
pub struct Table {
    ref_type: RefType,
    elements: Vec<Value>,
    limits: Limits,
}

impl Table {
    /// A table of `ty.limits.min` null references.
    pub fn new(ty: &TableType) -> Self {
        Table {
            ref_type: ty.element,
            elements: vec![Value::null(ty.element); ty.limits.min as usize],
            limits: ty.limits,
        }
    }

    pub fn ref_type(&self) -> RefType {
        self.ref_type
    }

    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn max(&self) -> Option<u32> {
        self.limits.max
    }

    pub fn get(&self, index: u32) -> Result<Value, Trap> {
        self.elements.get(index as usize).copied().ok_or(Trap::TableOutOfBounds)
    }

    pub fn set(&mut self, index: u32, value: Value) -> Result<(), Trap> {
        let slot = self.elements.get_mut(index as usize).ok_or(Trap::TableOutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Appends `delta` copies of `init`, returning the old size or -1 if the
    /// table would pass its maximum.
    pub fn grow(&mut self, delta: u32, init: Value) -> i32 {
        let old = self.size();
        let max = self.limits.max.unwrap_or(MAX_TABLE_ENTRIES);
        match old.checked_add(delta) {
            Some(new) if new <= max => {
                self.elements.resize(new as usize, init);
                self.limits.min = new;
                old as i32
            }
            _ => -1,
        }
    }

    fn range(&self, start: u32, len: u32) -> Result<std::ops::Range<usize>, Trap> {
        let end = u64::from(start) + u64::from(len);
        if end > self.elements.len() as u64 {
            return Err(Trap::TableOutOfBounds);
        }
        Ok(start as usize..end as usize)
    }

    pub fn fill(&mut self, start: u32, value: Value, len: u32) -> Result<(), Trap> {
        let range = self.range(start, len)?;
        self.elements[range].fill(value);
        Ok(())
    }

    /// `table.copy` within one table.
    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        let src = self.range(src, len)?;
        let dst = self.range(dst, len)?;
        self.elements.copy_within(src, dst.start);
        Ok(())
    }

    /// `table.copy` between two distinct tables.
    pub fn copy_from(&mut self, dst: u32, other: &Table, src: u32, len: u32) -> Result<(), Trap> {
        let src = other.range(src, len)?;
        let dst = self.range(dst, len)?;
        self.elements[dst].copy_from_slice(&other.elements[src]);
        Ok(())
    }

    /// `table.init` and active element segments.
    pub fn init(&mut self, dst: u32, segment: &[Value], src: u32, len: u32) -> Result<(), Trap> {
        let src_end = u64::from(src) + u64::from(len);
        if src_end > segment.len() as u64 {
            return Err(Trap::TableOutOfBounds);
        }
        let dst = self.range(dst, len)?;
        self.elements[dst].copy_from_slice(&segment[src as usize..src_end as usize]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FuncAddr;

    fn funcref_table(min: u32, max: Option<u32>) -> Table {
        Table::new(&TableType {
            element: RefType::FuncRef,
            limits: Limits { min, max },
        })
    }

    #[test]
    fn starts_null() {
        let table = funcref_table(3, None);
        assert_eq!(table.size(), 3);
        assert_eq!(table.get(2), Ok(Value::FuncRef(None)));
        assert_eq!(table.get(3), Err(Trap::TableOutOfBounds));
    }

    #[test]
    fn grow_respects_max() {
        let mut table = funcref_table(1, Some(2));
        let f = Value::FuncRef(Some(FuncAddr(4)));
        assert_eq!(table.grow(1, f), 1);
        assert_eq!(table.get(1), Ok(f));
        assert_eq!(table.grow(1, f), -1);
        assert_eq!(table.size(), 2);
    }

    #[test]
    fn init_and_copy() {
        let mut table = funcref_table(4, None);
        let seg: Vec<Value> = (0..3).map(|i| Value::FuncRef(Some(FuncAddr(i)))).collect();
        table.init(1, &seg, 0, 3).unwrap();
        assert_eq!(table.init(2, &seg, 0, 3), Err(Trap::TableOutOfBounds));
        table.copy_within(0, 1, 2).unwrap();
        assert_eq!(table.get(0), Ok(Value::FuncRef(Some(FuncAddr(0)))));
        assert_eq!(table.get(1), Ok(Value::FuncRef(Some(FuncAddr(1)))));

        let mut other = funcref_table(2, None);
        other.copy_from(0, &table, 2, 2).unwrap();
        assert_eq!(other.get(1), Ok(Value::FuncRef(Some(FuncAddr(2)))));
        table.fill(0, Value::FuncRef(None), 4).unwrap();
        assert!(table.get(3).unwrap().is_null());
    }
}

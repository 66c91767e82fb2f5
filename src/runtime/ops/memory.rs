//! Loads, stores and the bulk memory instructions.
//!
//! The effective address of a load or store is the popped i32 (as unsigned)
//! plus the static offset, computed without wrapping; any byte of the access
//! beyond the current memory size traps.

use super::{Stack, Trap, Value};
use crate::parser::instruction::Instruction;
use crate::runtime::Memory;

/// Executes a load or store instruction against `memory`.
pub fn load_store(stack: &mut Stack, memory: &mut Memory, inst: &Instruction) -> Result<(), Trap> {
    macro_rules! load {
        ($memarg:expr, $n:literal, |$b:ident| $value:expr) => {{
            let addr = stack.pop_u32()?;
            let $b: [u8; $n] = memory.load(addr, $memarg.offset)?;
            stack.push($value);
        }};
    }
    macro_rules! store {
        ($memarg:expr, $pop:ident, |$v:ident| $bytes:expr) => {{
            let $v = stack.$pop()?;
            let addr = stack.pop_u32()?;
            memory.store(addr, $memarg.offset, &$bytes)?;
        }};
    }

    match inst {
        Instruction::I32Load { memarg } => load!(memarg, 4, |b| Value::I32(i32::from_le_bytes(b))),
        Instruction::I64Load { memarg } => load!(memarg, 8, |b| Value::I64(i64::from_le_bytes(b))),
        Instruction::F32Load { memarg } => load!(memarg, 4, |b| Value::F32(f32::from_le_bytes(b))),
        Instruction::F64Load { memarg } => load!(memarg, 8, |b| Value::F64(f64::from_le_bytes(b))),
        Instruction::I32Load8S { memarg } => load!(memarg, 1, |b| Value::I32(i32::from(b[0] as i8))),
        Instruction::I32Load8U { memarg } => load!(memarg, 1, |b| Value::I32(i32::from(b[0]))),
        Instruction::I32Load16S { memarg } => load!(memarg, 2, |b| Value::I32(i32::from(i16::from_le_bytes(b)))),
        Instruction::I32Load16U { memarg } => load!(memarg, 2, |b| Value::I32(i32::from(u16::from_le_bytes(b)))),
        Instruction::I64Load8S { memarg } => load!(memarg, 1, |b| Value::I64(i64::from(b[0] as i8))),
        Instruction::I64Load8U { memarg } => load!(memarg, 1, |b| Value::I64(i64::from(b[0]))),
        Instruction::I64Load16S { memarg } => load!(memarg, 2, |b| Value::I64(i64::from(i16::from_le_bytes(b)))),
        Instruction::I64Load16U { memarg } => load!(memarg, 2, |b| Value::I64(i64::from(u16::from_le_bytes(b)))),
        Instruction::I64Load32S { memarg } => load!(memarg, 4, |b| Value::I64(i64::from(i32::from_le_bytes(b)))),
        Instruction::I64Load32U { memarg } => load!(memarg, 4, |b| Value::I64(i64::from(u32::from_le_bytes(b)))),
        Instruction::I32Store { memarg } => store!(memarg, pop_i32, |v| v.to_le_bytes()),
        Instruction::I64Store { memarg } => store!(memarg, pop_i64, |v| v.to_le_bytes()),
        Instruction::F32Store { memarg } => store!(memarg, pop_f32, |v| v.to_le_bytes()),
        Instruction::F64Store { memarg } => store!(memarg, pop_f64, |v| v.to_le_bytes()),
        Instruction::I32Store8 { memarg } => store!(memarg, pop_i32, |v| [v as u8]),
        Instruction::I32Store16 { memarg } => store!(memarg, pop_i32, |v| (v as u16).to_le_bytes()),
        Instruction::I64Store8 { memarg } => store!(memarg, pop_i64, |v| [v as u8]),
        Instruction::I64Store16 { memarg } => store!(memarg, pop_i64, |v| (v as u16).to_le_bytes()),
        Instruction::I64Store32 { memarg } => store!(memarg, pop_i64, |v| (v as u32).to_le_bytes()),
        other => {
            return Err(Trap::TypeMismatch {
                expected: "load or store".to_string(),
                actual: other.mnemonic().to_string(),
            })
        }
    }
    Ok(())
}

/// `memory.size`
pub fn size(stack: &mut Stack, memory: &Memory) {
    stack.push(Value::I32(memory.size() as i32));
}

/// `memory.grow`: pushes the old page count, or -1 with the memory unchanged.
pub fn grow(stack: &mut Stack, memory: &mut Memory) -> Result<(), Trap> {
    let delta = stack.pop_u32()?;
    stack.push(Value::I32(memory.grow(delta)));
    Ok(())
}

/// `memory.fill`
pub fn fill(stack: &mut Stack, memory: &mut Memory) -> Result<(), Trap> {
    let len = stack.pop_u32()?;
    let value = stack.pop_i32()?;
    let dst = stack.pop_u32()?;
    memory.fill(dst, value as u8, len)
}

/// `memory.copy`
pub fn copy(stack: &mut Stack, memory: &mut Memory) -> Result<(), Trap> {
    let len = stack.pop_u32()?;
    let src = stack.pop_u32()?;
    let dst = stack.pop_u32()?;
    memory.copy_within(dst, src, len)
}

/// `memory.init` from `segment`, which is empty once dropped.
pub fn init(stack: &mut Stack, memory: &mut Memory, segment: &[u8]) -> Result<(), Trap> {
    let len = stack.pop_u32()?;
    let src = stack.pop_u32()?;
    let dst = stack.pop_u32()?;
    memory.init(dst, segment, src, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::instruction::MemArg;

    fn memarg(offset: u32) -> MemArg {
        MemArg { align: 0, offset }
    }

    #[test]
    fn narrow_loads_extend() {
        let mut memory = Memory::new(1, None).unwrap();
        memory.write_bytes(0, &[0xFE, 0xFF]).unwrap();
        let mut stack = Stack::new();

        stack.push(Value::I32(0));
        load_store(&mut stack, &mut memory, &Instruction::I32Load8S { memarg: memarg(0) }).unwrap();
        assert_eq!(stack.pop(), Ok(Value::I32(-2)));

        stack.push(Value::I32(0));
        load_store(&mut stack, &mut memory, &Instruction::I64Load16U { memarg: memarg(0) }).unwrap();
        assert_eq!(stack.pop(), Ok(Value::I64(0xFFFE)));
    }

    #[test]
    fn store_truncates_and_applies_offset() {
        let mut memory = Memory::new(1, None).unwrap();
        let mut stack = Stack::new();
        stack.push(Value::I32(4));
        stack.push(Value::I64(0x1122_3344_5566));
        load_store(&mut stack, &mut memory, &Instruction::I64Store16 { memarg: memarg(2) }).unwrap();
        assert_eq!(memory.read_bytes(6, 3).unwrap(), &[0x66, 0x55, 0]);
    }

    #[test]
    fn offset_past_the_end_traps() {
        let mut memory = Memory::new(1, None).unwrap();
        let mut stack = Stack::new();
        stack.push(Value::I32(-1));
        let inst = Instruction::I32Load { memarg: memarg(1) };
        assert_eq!(load_store(&mut stack, &mut memory, &inst), Err(Trap::MemoryOutOfBounds));
    }

    #[test]
    fn grow_pushes_old_size_or_minus_one() {
        let mut memory = Memory::new(1, Some(2)).unwrap();
        let mut stack = Stack::new();
        stack.push(Value::I32(1));
        grow(&mut stack, &mut memory).unwrap();
        assert_eq!(stack.pop(), Ok(Value::I32(1)));
        stack.push(Value::I32(1));
        grow(&mut stack, &mut memory).unwrap();
        assert_eq!(stack.pop(), Ok(Value::I32(-1)));
        size(&mut stack, &memory);
        assert_eq!(stack.pop(), Ok(Value::I32(2)));
    }

    #[test]
    fn fill_and_copy() {
        let mut memory = Memory::new(1, None).unwrap();
        let mut stack = Stack::new();
        stack.push_all([Value::I32(8), Value::I32(0x1AB), Value::I32(3)]);
        fill(&mut stack, &mut memory).unwrap();
        stack.push_all([Value::I32(0), Value::I32(8), Value::I32(3)]);
        copy(&mut stack, &mut memory).unwrap();
        assert_eq!(memory.read_bytes(0, 3).unwrap(), &[0xAB; 3]);
    }
}

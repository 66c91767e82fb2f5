//! The operand stack.
//!
//! Locals of every active frame live on this same stack below the frame's
//! operands, so its length is what the call depth budget is measured in.

use super::{FuncAddr, Trap, Value};

#[derive(Debug, Default)]
pub struct Stack {
    values: Vec<Value>,
}

macro_rules! typed_pop {
    ($($name:ident => $variant:ident($ty:ty), $label:literal;)*) => {
        $(
            #[inline]
            pub fn $name(&mut self) -> Result<$ty, Trap> {
                match self.pop()? {
                    Value::$variant(v) => Ok(v),
                    other => Err(Trap::TypeMismatch {
                        expected: $label.to_string(),
                        actual: other.typ().to_string(),
                    }),
                }
            }
        )*
    };
}

impl Stack {
    pub fn new() -> Self {
        Stack { values: Vec::new() }
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn push_all(&mut self, values: impl IntoIterator<Item = Value>) {
        self.values.extend(values);
    }

    #[inline]
    pub fn pop(&mut self) -> Result<Value, Trap> {
        self.values.pop().ok_or(Trap::StackUnderflow)
    }

    typed_pop! {
        pop_i32 => I32(i32), "i32";
        pop_i64 => I64(i64), "i64";
        pop_f32 => F32(f32), "f32";
        pop_f64 => F64(f64), "f64";
        pop_funcref => FuncRef(Option<FuncAddr>), "funcref";
    }

    /// Pops an i32 and reinterprets it as an unsigned address or length.
    #[inline]
    pub fn pop_u32(&mut self) -> Result<u32, Trap> {
        self.pop_i32().map(|v| v as u32)
    }

    pub fn peek(&self) -> Result<&Value, Trap> {
        self.values.last().ok_or(Trap::StackUnderflow)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Value, Trap> {
        self.values.get(index).copied().ok_or(Trap::StackUnderflow)
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<(), Trap> {
        let slot = self.values.get_mut(index).ok_or(Trap::StackUnderflow)?;
        *slot = value;
        Ok(())
    }

    /// Removes and returns the top `count` values, bottom first.
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, Trap> {
        let at = self.values.len().checked_sub(count).ok_or(Trap::StackUnderflow)?;
        Ok(self.values.split_off(at))
    }

    /// Drops everything between `height` and the top `arity` values, which
    /// slide down to sit at `height`. This is how branches unwind a block.
    pub fn unwind(&mut self, height: usize, arity: usize) -> Result<(), Trap> {
        let len = self.values.len();
        let from = len.checked_sub(arity).ok_or(Trap::StackUnderflow)?;
        if from < height {
            return Err(Trap::StackUnderflow);
        }
        if from != height {
            self.values.copy_within(from..len, height);
            self.values.truncate(height + arity);
        }
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

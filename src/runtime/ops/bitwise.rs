//! Bitwise integer operations: logic, shifts, rotates and bit counts.
//!
//! Shift and rotate counts are taken modulo the operand width.

use super::{Stack, Trap, Value};

macro_rules! binop {
    ($($name:ident: $pop:ident => $variant:ident, |$a:ident, $b:ident| $body:expr;)*) => {
        $(
            pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
                let $b = stack.$pop()?;
                let $a = stack.$pop()?;
                stack.push(Value::$variant($body));
                Ok(())
            }
        )*
    };
}

macro_rules! unop {
    ($($name:ident: $pop:ident => $variant:ident, |$a:ident| $body:expr;)*) => {
        $(
            pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
                let $a = stack.$pop()?;
                stack.push(Value::$variant($body));
                Ok(())
            }
        )*
    };
}

binop! {
    i32_and: pop_i32 => I32, |a, b| a & b;
    i32_or: pop_i32 => I32, |a, b| a | b;
    i32_xor: pop_i32 => I32, |a, b| a ^ b;
    i32_shl: pop_i32 => I32, |a, b| a.wrapping_shl(b as u32);
    i32_shr_s: pop_i32 => I32, |a, b| a.wrapping_shr(b as u32);
    i32_shr_u: pop_i32 => I32, |a, b| (a as u32).wrapping_shr(b as u32) as i32;
    i32_rotl: pop_i32 => I32, |a, b| a.rotate_left(b as u32 % 32);
    i32_rotr: pop_i32 => I32, |a, b| a.rotate_right(b as u32 % 32);

    i64_and: pop_i64 => I64, |a, b| a & b;
    i64_or: pop_i64 => I64, |a, b| a | b;
    i64_xor: pop_i64 => I64, |a, b| a ^ b;
    i64_shl: pop_i64 => I64, |a, b| a.wrapping_shl(b as u32);
    i64_shr_s: pop_i64 => I64, |a, b| a.wrapping_shr(b as u32);
    i64_shr_u: pop_i64 => I64, |a, b| (a as u64).wrapping_shr(b as u32) as i64;
    i64_rotl: pop_i64 => I64, |a, b| a.rotate_left((b as u64 % 64) as u32);
    i64_rotr: pop_i64 => I64, |a, b| a.rotate_right((b as u64 % 64) as u32);
}

unop! {
    i32_clz: pop_i32 => I32, |a| a.leading_zeros() as i32;
    i32_ctz: pop_i32 => I32, |a| a.trailing_zeros() as i32;
    i32_popcnt: pop_i32 => I32, |a| a.count_ones() as i32;

    i64_clz: pop_i64 => I64, |a| i64::from(a.leading_zeros());
    i64_ctz: pop_i64 => I64, |a| i64::from(a.trailing_zeros());
    i64_popcnt: pop_i64 => I64, |a| i64::from(a.count_ones());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_i64(op: fn(&mut Stack) -> Result<(), Trap>, a: i64, b: i64) -> i64 {
        let mut stack = Stack::new();
        stack.push(Value::I64(a));
        stack.push(Value::I64(b));
        op(&mut stack).unwrap();
        stack.pop_i64().unwrap()
    }

    #[test]
    fn shift_counts_wrap() {
        let mut stack = Stack::new();
        stack.push(Value::I32(1));
        stack.push(Value::I32(33));
        i32_shl(&mut stack).unwrap();
        assert_eq!(stack.pop_i32(), Ok(2));

        assert_eq!(binary_i64(i64_shr_u, -1, 65), i64::MAX);
        assert_eq!(binary_i64(i64_shr_s, -8, 1), -4);
        // a huge 64-bit count must not truncate into a small one
        assert_eq!(binary_i64(i64_rotl, 1, 0x1_0000_0001), 2);
    }

    #[test]
    fn rotates() {
        let mut stack = Stack::new();
        stack.push(Value::I32(0x8000_0001u32 as i32));
        stack.push(Value::I32(1));
        i32_rotl(&mut stack).unwrap();
        assert_eq!(stack.pop_i32(), Ok(3));
        assert_eq!(binary_i64(i64_rotr, 1, 1), i64::MIN);
    }

    #[test]
    fn bit_counts() {
        let mut stack = Stack::new();
        stack.push(Value::I32(0));
        i32_clz(&mut stack).unwrap();
        assert_eq!(stack.pop_i32(), Ok(32));
        stack.push(Value::I64(0x00F0));
        i64_ctz(&mut stack).unwrap();
        assert_eq!(stack.pop_i64(), Ok(4));
        stack.push(Value::I64(-1));
        i64_popcnt(&mut stack).unwrap();
        assert_eq!(stack.pop_i64(), Ok(64));
    }
}

//! Tests and comparisons. Every result is an i32 of 0 or 1; any comparison
//! with a NaN operand is false except `ne`.

use super::{Stack, Trap, Value};

macro_rules! relop {
    ($($name:ident: $pop:ident, |$a:ident, $b:ident| $body:expr;)*) => {
        $(
            pub fn $name(stack: &mut Stack) -> Result<(), Trap> {
                let $b = stack.$pop()?;
                let $a = stack.$pop()?;
                stack.push(Value::I32(i32::from($body)));
                Ok(())
            }
        )*
    };
}

pub fn i32_eqz(stack: &mut Stack) -> Result<(), Trap> {
    let a = stack.pop_i32()?;
    stack.push(Value::I32(i32::from(a == 0)));
    Ok(())
}

pub fn i64_eqz(stack: &mut Stack) -> Result<(), Trap> {
    let a = stack.pop_i64()?;
    stack.push(Value::I32(i32::from(a == 0)));
    Ok(())
}

relop! {
    i32_eq: pop_i32, |a, b| a == b;
    i32_ne: pop_i32, |a, b| a != b;
    i32_lt_s: pop_i32, |a, b| a < b;
    i32_lt_u: pop_i32, |a, b| (a as u32) < (b as u32);
    i32_gt_s: pop_i32, |a, b| a > b;
    i32_gt_u: pop_i32, |a, b| (a as u32) > (b as u32);
    i32_le_s: pop_i32, |a, b| a <= b;
    i32_le_u: pop_i32, |a, b| (a as u32) <= (b as u32);
    i32_ge_s: pop_i32, |a, b| a >= b;
    i32_ge_u: pop_i32, |a, b| (a as u32) >= (b as u32);

    i64_eq: pop_i64, |a, b| a == b;
    i64_ne: pop_i64, |a, b| a != b;
    i64_lt_s: pop_i64, |a, b| a < b;
    i64_lt_u: pop_i64, |a, b| (a as u64) < (b as u64);
    i64_gt_s: pop_i64, |a, b| a > b;
    i64_gt_u: pop_i64, |a, b| (a as u64) > (b as u64);
    i64_le_s: pop_i64, |a, b| a <= b;
    i64_le_u: pop_i64, |a, b| (a as u64) <= (b as u64);
    i64_ge_s: pop_i64, |a, b| a >= b;
    i64_ge_u: pop_i64, |a, b| (a as u64) >= (b as u64);

    f32_eq: pop_f32, |a, b| a == b;
    f32_ne: pop_f32, |a, b| a != b;
    f32_lt: pop_f32, |a, b| a < b;
    f32_gt: pop_f32, |a, b| a > b;
    f32_le: pop_f32, |a, b| a <= b;
    f32_ge: pop_f32, |a, b| a >= b;

    f64_eq: pop_f64, |a, b| a == b;
    f64_ne: pop_f64, |a, b| a != b;
    f64_lt: pop_f64, |a, b| a < b;
    f64_gt: pop_f64, |a, b| a > b;
    f64_le: pop_f64, |a, b| a <= b;
    f64_ge: pop_f64, |a, b| a >= b;
}

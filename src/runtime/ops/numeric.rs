//! Arithmetic on integers and floats.
//!
//! Integer arithmetic wraps. Division traps on a zero divisor and signed
//! division also on `MIN / -1`, the one quotient that does not fit. Float
//! operations follow IEEE 754; `min` and `max` propagate NaN and order
//! `-0.0` below `+0.0`, and `nearest` rounds ties to even.

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

macro_rules! signed_division {
    ($div:ident, $rem:ident, $t:ty) => {
        fn $div(a: $t, b: $t) -> Result<$t, Trap> {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            a.checked_div(b).ok_or(Trap::IntegerOverflow)
        }

        /// `MIN % -1` is 0 rather than an overflow.
        fn $rem(a: $t, b: $t) -> Result<$t, Trap> {
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            Ok(a.wrapping_rem(b))
        }
    };
}

macro_rules! unsigned_division {
    ($div:ident, $rem:ident, $t:ty, $u:ty) => {
        fn $div(a: $t, b: $t) -> Result<$t, Trap> {
            (a as $u).checked_div(b as $u).map(|q| q as $t).ok_or(Trap::IntegerDivideByZero)
        }

        fn $rem(a: $t, b: $t) -> Result<$t, Trap> {
            (a as $u).checked_rem(b as $u).map(|r| r as $t).ok_or(Trap::IntegerDivideByZero)
        }
    };
}

signed_division!(div_s32, rem_s32, i32);
signed_division!(div_s64, rem_s64, i64);
unsigned_division!(div_u32, rem_u32, i32, u32);
unsigned_division!(div_u64, rem_u64, i64, u64);

macro_rules! float_helpers {
    ($t:ty, $min:ident, $max:ident) => {
        pub(crate) fn $min(a: $t, b: $t) -> $t {
            if a.is_nan() || b.is_nan() {
                // any NaN operand yields a NaN; adding keeps a payload
                return a + b;
            }
            if a == b {
                // only differs for zeros of opposite sign
                return if a.is_sign_negative() { a } else { b };
            }
            a.min(b)
        }

        pub(crate) fn $max(a: $t, b: $t) -> $t {
            if a.is_nan() || b.is_nan() {
                return a + b;
            }
            if a == b {
                return if a.is_sign_positive() { a } else { b };
            }
            a.max(b)
        }
    };
}

float_helpers!(f32, fmin32, fmax32);
float_helpers!(f64, fmin64, fmax64);

binop! {
    i32_add: pop_i32 => I32, |a, b| a.wrapping_add(b);
    i32_sub: pop_i32 => I32, |a, b| a.wrapping_sub(b);
    i32_mul: pop_i32 => I32, |a, b| a.wrapping_mul(b);
    i32_div_s: pop_i32 => I32, |a, b| div_s32(a, b)?;
    i32_div_u: pop_i32 => I32, |a, b| div_u32(a, b)?;
    i32_rem_s: pop_i32 => I32, |a, b| rem_s32(a, b)?;
    i32_rem_u: pop_i32 => I32, |a, b| rem_u32(a, b)?;

    i64_add: pop_i64 => I64, |a, b| a.wrapping_add(b);
    i64_sub: pop_i64 => I64, |a, b| a.wrapping_sub(b);
    i64_mul: pop_i64 => I64, |a, b| a.wrapping_mul(b);
    i64_div_s: pop_i64 => I64, |a, b| div_s64(a, b)?;
    i64_div_u: pop_i64 => I64, |a, b| div_u64(a, b)?;
    i64_rem_s: pop_i64 => I64, |a, b| rem_s64(a, b)?;
    i64_rem_u: pop_i64 => I64, |a, b| rem_u64(a, b)?;

    f32_add: pop_f32 => F32, |a, b| a + b;
    f32_sub: pop_f32 => F32, |a, b| a - b;
    f32_mul: pop_f32 => F32, |a, b| a * b;
    f32_div: pop_f32 => F32, |a, b| a / b;
    f32_min: pop_f32 => F32, |a, b| fmin32(a, b);
    f32_max: pop_f32 => F32, |a, b| fmax32(a, b);
    f32_copysign: pop_f32 => F32, |a, b| a.copysign(b);

    f64_add: pop_f64 => F64, |a, b| a + b;
    f64_sub: pop_f64 => F64, |a, b| a - b;
    f64_mul: pop_f64 => F64, |a, b| a * b;
    f64_div: pop_f64 => F64, |a, b| a / b;
    f64_min: pop_f64 => F64, |a, b| fmin64(a, b);
    f64_max: pop_f64 => F64, |a, b| fmax64(a, b);
    f64_copysign: pop_f64 => F64, |a, b| a.copysign(b);
}

unop! {
    f32_abs: pop_f32 => F32, |a| a.abs();
    f32_neg: pop_f32 => F32, |a| -a;
    f32_ceil: pop_f32 => F32, |a| a.ceil();
    f32_floor: pop_f32 => F32, |a| a.floor();
    f32_trunc: pop_f32 => F32, |a| a.trunc();
    f32_nearest: pop_f32 => F32, |a| a.round_ties_even();
    f32_sqrt: pop_f32 => F32, |a| a.sqrt();

    f64_abs: pop_f64 => F64, |a| a.abs();
    f64_neg: pop_f64 => F64, |a| -a;
    f64_ceil: pop_f64 => F64, |a| a.ceil();
    f64_floor: pop_f64 => F64, |a| a.floor();
    f64_trunc: pop_f64 => F64, |a| a.trunc();
    f64_nearest: pop_f64 => F64, |a| a.round_ties_even();
    f64_sqrt: pop_f64 => F64, |a| a.sqrt();
}

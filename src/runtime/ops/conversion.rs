//! Conversions between numeric types.
//!
//! The trapping float-to-integer truncations reject NaN with
//! `InvalidConversionToInteger` and values whose truncation does not fit with
//! `IntegerOverflow`. The `_sat` forms clamp instead, which is exactly what a
//! Rust `as` cast does (NaN becomes 0).

use super::{Stack, Trap, Value};

/// Truncates `x` (a widened f32 or an f64) if `lower < trunc(x) < upper`.
/// Both bounds are exclusive and exactly representable as f64.
fn checked_trunc(x: f64, lower: f64, upper: f64) -> Result<f64, Trap> {
    if x.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    let t = x.trunc();
    if t <= lower || t >= upper {
        return Err(Trap::IntegerOverflow);
    }
    Ok(t)
}

const I32_BOUNDS: (f64, f64) = (-2147483649.0, 2147483648.0);
const U32_BOUNDS: (f64, f64) = (-1.0, 4294967296.0);
// -2^63 itself is allowed; the next f64 down is -2^63 - 2048
const I64_BOUNDS: (f64, f64) = (-9223372036854777856.0, 9223372036854775808.0);
const U64_BOUNDS: (f64, f64) = (-1.0, 18446744073709551616.0);

macro_rules! convert {
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

convert! {
    i32_wrap_i64: pop_i64 => I32, |a| a as i32;
    i64_extend_i32_s: pop_i32 => I64, |a| i64::from(a);
    i64_extend_i32_u: pop_i32 => I64, |a| i64::from(a as u32);

    i32_trunc_f32_s: pop_f32 => I32, |a| checked_trunc(f64::from(a), I32_BOUNDS.0, I32_BOUNDS.1)? as i32;
    i32_trunc_f32_u: pop_f32 => I32, |a| checked_trunc(f64::from(a), U32_BOUNDS.0, U32_BOUNDS.1)? as u32 as i32;
    i32_trunc_f64_s: pop_f64 => I32, |a| checked_trunc(a, I32_BOUNDS.0, I32_BOUNDS.1)? as i32;
    i32_trunc_f64_u: pop_f64 => I32, |a| checked_trunc(a, U32_BOUNDS.0, U32_BOUNDS.1)? as u32 as i32;
    i64_trunc_f32_s: pop_f32 => I64, |a| checked_trunc(f64::from(a), I64_BOUNDS.0, I64_BOUNDS.1)? as i64;
    i64_trunc_f32_u: pop_f32 => I64, |a| checked_trunc(f64::from(a), U64_BOUNDS.0, U64_BOUNDS.1)? as u64 as i64;
    i64_trunc_f64_s: pop_f64 => I64, |a| checked_trunc(a, I64_BOUNDS.0, I64_BOUNDS.1)? as i64;
    i64_trunc_f64_u: pop_f64 => I64, |a| checked_trunc(a, U64_BOUNDS.0, U64_BOUNDS.1)? as u64 as i64;

    i32_trunc_sat_f32_s: pop_f32 => I32, |a| a as i32;
    i32_trunc_sat_f32_u: pop_f32 => I32, |a| a as u32 as i32;
    i32_trunc_sat_f64_s: pop_f64 => I32, |a| a as i32;
    i32_trunc_sat_f64_u: pop_f64 => I32, |a| a as u32 as i32;
    i64_trunc_sat_f32_s: pop_f32 => I64, |a| a as i64;
    i64_trunc_sat_f32_u: pop_f32 => I64, |a| a as u64 as i64;
    i64_trunc_sat_f64_s: pop_f64 => I64, |a| a as i64;
    i64_trunc_sat_f64_u: pop_f64 => I64, |a| a as u64 as i64;

    f32_convert_i32_s: pop_i32 => F32, |a| a as f32;
    f32_convert_i32_u: pop_i32 => F32, |a| a as u32 as f32;
    f32_convert_i64_s: pop_i64 => F32, |a| a as f32;
    f32_convert_i64_u: pop_i64 => F32, |a| a as u64 as f32;
    f64_convert_i32_s: pop_i32 => F64, |a| f64::from(a);
    f64_convert_i32_u: pop_i32 => F64, |a| f64::from(a as u32);
    f64_convert_i64_s: pop_i64 => F64, |a| a as f64;
    f64_convert_i64_u: pop_i64 => F64, |a| a as u64 as f64;
    f32_demote_f64: pop_f64 => F32, |a| a as f32;
    f64_promote_f32: pop_f32 => F64, |a| f64::from(a);

    i32_reinterpret_f32: pop_f32 => I32, |a| a.to_bits() as i32;
    i64_reinterpret_f64: pop_f64 => I64, |a| a.to_bits() as i64;
    f32_reinterpret_i32: pop_i32 => F32, |a| f32::from_bits(a as u32);
    f64_reinterpret_i64: pop_i64 => F64, |a| f64::from_bits(a as u64);

    i32_extend8_s: pop_i32 => I32, |a| i32::from(a as i8);
    i32_extend16_s: pop_i32 => I32, |a| i32::from(a as i16);
    i64_extend8_s: pop_i64 => I64, |a| i64::from(a as i8);
    i64_extend16_s: pop_i64 => I64, |a| i64::from(a as i16);
    i64_extend32_s: pop_i64 => I64, |a| i64::from(a as i32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn apply(op: fn(&mut Stack) -> Result<(), Trap>, input: Value) -> Result<Value, Trap> {
        let mut stack = Stack::new();
        stack.push(input);
        op(&mut stack)?;
        stack.pop()
    }

    #[rstest]
    #[case(i32_trunc_f32_s, Value::F32(-2147483648.0), Ok(Value::I32(i32::MIN)))]
    #[case(i32_trunc_f32_s, Value::F32(2147483648.0), Err(Trap::IntegerOverflow))]
    #[case(i32_trunc_f64_s, Value::F64(-2147483648.9), Ok(Value::I32(i32::MIN)))]
    #[case(i32_trunc_f64_s, Value::F64(-2147483649.0), Err(Trap::IntegerOverflow))]
    #[case(i32_trunc_f64_u, Value::F64(-0.9), Ok(Value::I32(0)))]
    #[case(i32_trunc_f64_u, Value::F64(-1.0), Err(Trap::IntegerOverflow))]
    #[case(i32_trunc_f64_u, Value::F64(4294967295.5), Ok(Value::I32(-1)))]
    #[case(i64_trunc_f64_s, Value::F64(-9223372036854775808.0), Ok(Value::I64(i64::MIN)))]
    #[case(i64_trunc_f64_s, Value::F64(9223372036854775808.0), Err(Trap::IntegerOverflow))]
    #[case(i64_trunc_f32_u, Value::F32(f32::NAN), Err(Trap::InvalidConversionToInteger))]
    #[case(i64_trunc_f64_u, Value::F64(f64::INFINITY), Err(Trap::IntegerOverflow))]
    fn trapping_truncation(
        #[case] op: fn(&mut Stack) -> Result<(), Trap>,
        #[case] input: Value,
        #[case] expected: Result<Value, Trap>,
    ) {
        assert_eq!(apply(op, input), expected);
    }

    #[rstest]
    #[case(i32_trunc_sat_f32_s, Value::F32(f32::NAN), Value::I32(0))]
    #[case(i32_trunc_sat_f64_s, Value::F64(1e10), Value::I32(i32::MAX))]
    #[case(i32_trunc_sat_f64_u, Value::F64(-5.0), Value::I32(0))]
    #[case(i64_trunc_sat_f64_u, Value::F64(f64::INFINITY), Value::I64(-1))]
    #[case(i64_trunc_sat_f32_s, Value::F32(f32::NEG_INFINITY), Value::I64(i64::MIN))]
    fn saturating_truncation(
        #[case] op: fn(&mut Stack) -> Result<(), Trap>,
        #[case] input: Value,
        #[case] expected: Value,
    ) {
        assert_eq!(apply(op, input), Ok(expected));
    }

    #[test]
    fn sign_extension_and_reinterpretation() {
        assert_eq!(apply(i32_extend8_s, Value::I32(0x80)), Ok(Value::I32(-128)));
        assert_eq!(apply(i64_extend32_s, Value::I64(0xFFFF_FFFF)), Ok(Value::I64(-1)));
        assert_eq!(apply(i64_extend_i32_u, Value::I32(-1)), Ok(Value::I64(0xFFFF_FFFF)));
        assert_eq!(apply(i32_reinterpret_f32, Value::F32(-0.0)), Ok(Value::I32(i32::MIN)));
        assert_eq!(
            apply(f32_convert_i32_u, Value::I32(-1)),
            Ok(Value::F32(4294967296.0))
        );
    }
}

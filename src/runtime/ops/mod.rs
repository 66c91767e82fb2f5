//! Instruction semantics, one module per instruction category.
//!
//! Every operation pops its operands from the [`Stack`] and pushes its result,
//! so the executor only has to route instructions here. Control flow,
//! variables and tables need executor state and are handled there.

pub mod bitwise;
pub mod comparison;
pub mod conversion;
pub mod memory;
pub mod numeric;

pub(crate) use crate::runtime::stack::Stack;
pub(crate) use crate::runtime::{Trap, Value};

use crate::parser::instruction::Instruction;

/// Executes a numeric, comparison or conversion instruction. These are the
/// instructions that touch nothing but the operand stack.
pub fn stack_op(stack: &mut Stack, inst: &Instruction) -> Result<(), Trap> {
    use Instruction as I;
    match inst {
        I::I32Eqz => comparison::i32_eqz(stack),
        I::I32Eq => comparison::i32_eq(stack),
        I::I32Ne => comparison::i32_ne(stack),
        I::I32LtS => comparison::i32_lt_s(stack),
        I::I32LtU => comparison::i32_lt_u(stack),
        I::I32GtS => comparison::i32_gt_s(stack),
        I::I32GtU => comparison::i32_gt_u(stack),
        I::I32LeS => comparison::i32_le_s(stack),
        I::I32LeU => comparison::i32_le_u(stack),
        I::I32GeS => comparison::i32_ge_s(stack),
        I::I32GeU => comparison::i32_ge_u(stack),
        I::I64Eqz => comparison::i64_eqz(stack),
        I::I64Eq => comparison::i64_eq(stack),
        I::I64Ne => comparison::i64_ne(stack),
        I::I64LtS => comparison::i64_lt_s(stack),
        I::I64LtU => comparison::i64_lt_u(stack),
        I::I64GtS => comparison::i64_gt_s(stack),
        I::I64GtU => comparison::i64_gt_u(stack),
        I::I64LeS => comparison::i64_le_s(stack),
        I::I64LeU => comparison::i64_le_u(stack),
        I::I64GeS => comparison::i64_ge_s(stack),
        I::I64GeU => comparison::i64_ge_u(stack),
        I::F32Eq => comparison::f32_eq(stack),
        I::F32Ne => comparison::f32_ne(stack),
        I::F32Lt => comparison::f32_lt(stack),
        I::F32Gt => comparison::f32_gt(stack),
        I::F32Le => comparison::f32_le(stack),
        I::F32Ge => comparison::f32_ge(stack),
        I::F64Eq => comparison::f64_eq(stack),
        I::F64Ne => comparison::f64_ne(stack),
        I::F64Lt => comparison::f64_lt(stack),
        I::F64Gt => comparison::f64_gt(stack),
        I::F64Le => comparison::f64_le(stack),
        I::F64Ge => comparison::f64_ge(stack),

        I::I32Clz => bitwise::i32_clz(stack),
        I::I32Ctz => bitwise::i32_ctz(stack),
        I::I32Popcnt => bitwise::i32_popcnt(stack),
        I::I32And => bitwise::i32_and(stack),
        I::I32Or => bitwise::i32_or(stack),
        I::I32Xor => bitwise::i32_xor(stack),
        I::I32Shl => bitwise::i32_shl(stack),
        I::I32ShrS => bitwise::i32_shr_s(stack),
        I::I32ShrU => bitwise::i32_shr_u(stack),
        I::I32Rotl => bitwise::i32_rotl(stack),
        I::I32Rotr => bitwise::i32_rotr(stack),
        I::I64Clz => bitwise::i64_clz(stack),
        I::I64Ctz => bitwise::i64_ctz(stack),
        I::I64Popcnt => bitwise::i64_popcnt(stack),
        I::I64And => bitwise::i64_and(stack),
        I::I64Or => bitwise::i64_or(stack),
        I::I64Xor => bitwise::i64_xor(stack),
        I::I64Shl => bitwise::i64_shl(stack),
        I::I64ShrS => bitwise::i64_shr_s(stack),
        I::I64ShrU => bitwise::i64_shr_u(stack),
        I::I64Rotl => bitwise::i64_rotl(stack),
        I::I64Rotr => bitwise::i64_rotr(stack),

        I::I32Add => numeric::i32_add(stack),
        I::I32Sub => numeric::i32_sub(stack),
        I::I32Mul => numeric::i32_mul(stack),
        I::I32DivS => numeric::i32_div_s(stack),
        I::I32DivU => numeric::i32_div_u(stack),
        I::I32RemS => numeric::i32_rem_s(stack),
        I::I32RemU => numeric::i32_rem_u(stack),
        I::I64Add => numeric::i64_add(stack),
        I::I64Sub => numeric::i64_sub(stack),
        I::I64Mul => numeric::i64_mul(stack),
        I::I64DivS => numeric::i64_div_s(stack),
        I::I64DivU => numeric::i64_div_u(stack),
        I::I64RemS => numeric::i64_rem_s(stack),
        I::I64RemU => numeric::i64_rem_u(stack),
        I::F32Abs => numeric::f32_abs(stack),
        I::F32Neg => numeric::f32_neg(stack),
        I::F32Ceil => numeric::f32_ceil(stack),
        I::F32Floor => numeric::f32_floor(stack),
        I::F32Trunc => numeric::f32_trunc(stack),
        I::F32Nearest => numeric::f32_nearest(stack),
        I::F32Sqrt => numeric::f32_sqrt(stack),
        I::F32Add => numeric::f32_add(stack),
        I::F32Sub => numeric::f32_sub(stack),
        I::F32Mul => numeric::f32_mul(stack),
        I::F32Div => numeric::f32_div(stack),
        I::F32Min => numeric::f32_min(stack),
        I::F32Max => numeric::f32_max(stack),
        I::F32Copysign => numeric::f32_copysign(stack),
        I::F64Abs => numeric::f64_abs(stack),
        I::F64Neg => numeric::f64_neg(stack),
        I::F64Ceil => numeric::f64_ceil(stack),
        I::F64Floor => numeric::f64_floor(stack),
        I::F64Trunc => numeric::f64_trunc(stack),
        I::F64Nearest => numeric::f64_nearest(stack),
        I::F64Sqrt => numeric::f64_sqrt(stack),
        I::F64Add => numeric::f64_add(stack),
        I::F64Sub => numeric::f64_sub(stack),
        I::F64Mul => numeric::f64_mul(stack),
        I::F64Div => numeric::f64_div(stack),
        I::F64Min => numeric::f64_min(stack),
        I::F64Max => numeric::f64_max(stack),
        I::F64Copysign => numeric::f64_copysign(stack),

        I::I32WrapI64 => conversion::i32_wrap_i64(stack),
        I::I32TruncF32S => conversion::i32_trunc_f32_s(stack),
        I::I32TruncF32U => conversion::i32_trunc_f32_u(stack),
        I::I32TruncF64S => conversion::i32_trunc_f64_s(stack),
        I::I32TruncF64U => conversion::i32_trunc_f64_u(stack),
        I::I64ExtendI32S => conversion::i64_extend_i32_s(stack),
        I::I64ExtendI32U => conversion::i64_extend_i32_u(stack),
        I::I64TruncF32S => conversion::i64_trunc_f32_s(stack),
        I::I64TruncF32U => conversion::i64_trunc_f32_u(stack),
        I::I64TruncF64S => conversion::i64_trunc_f64_s(stack),
        I::I64TruncF64U => conversion::i64_trunc_f64_u(stack),
        I::F32ConvertI32S => conversion::f32_convert_i32_s(stack),
        I::F32ConvertI32U => conversion::f32_convert_i32_u(stack),
        I::F32ConvertI64S => conversion::f32_convert_i64_s(stack),
        I::F32ConvertI64U => conversion::f32_convert_i64_u(stack),
        I::F32DemoteF64 => conversion::f32_demote_f64(stack),
        I::F64ConvertI32S => conversion::f64_convert_i32_s(stack),
        I::F64ConvertI32U => conversion::f64_convert_i32_u(stack),
        I::F64ConvertI64S => conversion::f64_convert_i64_s(stack),
        I::F64ConvertI64U => conversion::f64_convert_i64_u(stack),
        I::F64PromoteF32 => conversion::f64_promote_f32(stack),
        I::I32ReinterpretF32 => conversion::i32_reinterpret_f32(stack),
        I::I64ReinterpretF64 => conversion::i64_reinterpret_f64(stack),
        I::F32ReinterpretI32 => conversion::f32_reinterpret_i32(stack),
        I::F64ReinterpretI64 => conversion::f64_reinterpret_i64(stack),
        I::I32Extend8S => conversion::i32_extend8_s(stack),
        I::I32Extend16S => conversion::i32_extend16_s(stack),
        I::I64Extend8S => conversion::i64_extend8_s(stack),
        I::I64Extend16S => conversion::i64_extend16_s(stack),
        I::I64Extend32S => conversion::i64_extend32_s(stack),
        I::I32TruncSatF32S => conversion::i32_trunc_sat_f32_s(stack),
        I::I32TruncSatF32U => conversion::i32_trunc_sat_f32_u(stack),
        I::I32TruncSatF64S => conversion::i32_trunc_sat_f64_s(stack),
        I::I32TruncSatF64U => conversion::i32_trunc_sat_f64_u(stack),
        I::I64TruncSatF32S => conversion::i64_trunc_sat_f32_s(stack),
        I::I64TruncSatF32U => conversion::i64_trunc_sat_f32_u(stack),
        I::I64TruncSatF64S => conversion::i64_trunc_sat_f64_s(stack),
        I::I64TruncSatF64U => conversion::i64_trunc_sat_f64_u(stack),

        other => Err(Trap::TypeMismatch {
            expected: "numeric instruction".to_string(),
            actual: other.mnemonic().to_string(),
        }),
    }
}

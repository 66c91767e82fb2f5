//! Encoder tests: decoding a module and encoding it again reproduces the
//! input byte for byte.
//!
//! The `wat` crate writes every integer in its shortest LEB128 form, which is
//! also what the encoder writes, so its output is a convenient source of
//! canonical binaries.

mod common;

use common::wat_to_wasm;
use rstest::rstest;
use wasmbox::{encoder, parser};

fn assert_round_trip(wasm: &[u8]) {
    let module = parser::parse("round-trip", wasm).unwrap_or_else(|e| panic!("decode failed: {e}"));
    let encoded = encoder::encode(&module).unwrap_or_else(|e| panic!("encode failed: {e}"));
    assert_eq!(encoded, wasm, "re-encoded bytes differ from the input");
}

#[rstest]
#[case::empty("(module)")]
#[case::types_and_functions(
    r#"(module
         (type (func (param i32 i64) (result f32)))
         (func (type 0) f32.const 1.5)
         (func (param f64) (result f64 f64) local.get 0 local.get 0))"#
)]
#[case::imports(
    r#"(module
         (import "env" "f" (func (param i32)))
         (import "env" "t" (table 2 funcref))
         (import "env" "m" (memory 1 4))
         (import "env" "g" (global (mut i64))))"#
)]
#[case::locals_grouped(
    r#"(module
         (func (local i32 i32 i64) (local f32)
           i32.const 0 local.set 1))"#
)]
#[case::structured_control(
    r#"(module
         (func (param i32) (result i32)
           (block (result i32)
             (loop
               local.get 0
               br_if 1
               (if (local.get 0) (then nop) (else br 1)))
             i32.const 7)))"#
)]
#[case::br_table_and_select(
    r#"(module
         (func (param i32) (result i32)
           (block (block (br_table 0 1 0 (local.get 0))))
           i32.const 1 i32.const 2 local.get 0 select
           i32.const 3 i32.const 4 local.get 0 (select (result i32))
           i32.add))"#
)]
#[case::memory_and_data(
    r#"(module
         (memory (export "mem") 1 2)
         (data (i32.const 16) "hello")
         (func (result i32)
           (i32.store16 offset=4 align=1 (i32.const 0) (i32.const 9))
           (i64.load32_u offset=8 (i32.const 0))
           i32.wrap_i64))"#
)]
#[case::passive_data_and_bulk_memory(
    r#"(module
         (memory 1)
         (data $d "abc")
         (func
           (memory.init $d (i32.const 0) (i32.const 0) (i32.const 3))
           (data.drop $d)
           (memory.copy (i32.const 4) (i32.const 0) (i32.const 3))
           (memory.fill (i32.const 0) (i32.const 0) (i32.const 2))))"#
)]
#[case::tables_and_elements(
    r#"(module
         (type $t (func (result i32)))
         (table $tab 4 funcref)
         (elem (i32.const 1) $a $b)
         (elem $p funcref (ref.func $a))
         (elem declare func $b)
         (func $a (result i32) i32.const 1)
         (func $b (result i32) i32.const 2)
         (func (param i32) (result i32)
           (table.init $tab $p (i32.const 0) (i32.const 0) (i32.const 1))
           (elem.drop $p)
           (drop (ref.func $b))
           (call_indirect (type $t) (local.get 0))))"#
)]
#[case::globals_exports_start(
    r#"(module
         (global $g (mut i32) (i32.const -5))
         (global (export "pi") f64 (f64.const 3.14159))
         (func $init (global.set $g (i32.const 1)))
         (export "init" (func $init))
         (start $init))"#
)]
#[case::numeric_extensions(
    r#"(module
         (func (param f32 i64) (result i32)
           (drop (i32.trunc_sat_f32_s (local.get 0)))
           (drop (i64.extend32_s (local.get 1)))
           (drop (i64.trunc_sat_f64_u (f64.promote_f32 (local.get 0))))
           (i32.extend8_s (i32.const 0x80))))"#
)]
#[case::reference_types(
    r#"(module
         (table $ext 1 externref)
         (func (param externref) (result i32)
           (table.set $ext (i32.const 0) (local.get 0))
           (drop (table.grow $ext (ref.null extern) (i32.const 1)))
           (ref.is_null (table.get $ext (i32.const 0)))))"#
)]
fn wat_modules_round_trip(#[case] wat: &str) {
    assert_round_trip(&wat_to_wasm(wat));
}

#[test]
fn custom_sections_keep_their_place() {
    let wasm = wat_to_wasm(
        r#"(module
             (@custom "first" (before first) "\01\02")
             (type (func))
             (@custom "after-type" (after type) "x")
             (func (type 0))
             (@custom "last" "tail"))"#,
    );
    assert_round_trip(&wasm);
}

#[test]
fn names_section_is_carried_through() {
    // Identifiers make `wat` emit a "name" custom section
    assert_round_trip(&wat_to_wasm(
        r#"(module (func $named (param $x i32) (local $y i64)))"#,
    ));
}

#[test]
fn padded_leb_is_written_in_shortest_form() {
    #[rustfmt::skip]
    let padded = [
        0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00,
        // type section whose size 4 is padded to two bytes
        0x01, 0x84, 0x00, 0x01, 0x60, 0x00, 0x00,
    ];
    let module = parser::parse("padded", &padded).unwrap();
    let encoded = encoder::encode(&module).unwrap();
    assert_eq!(
        encoded,
        [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01, 0x04, 0x01, 0x60, 0x00, 0x00]
    );
    // the shortened form is itself stable
    assert_round_trip(&encoded);
}

#[test]
fn decoded_module_can_be_edited_and_encoded() {
    let wasm = wat_to_wasm(r#"(module (memory 1))"#);
    let mut module = parser::parse("edit", &wasm).unwrap();
    module.memories[0].limits.max = Some(3);
    let edited = encoder::encode(&module).unwrap();
    let reparsed = parser::parse("edited", &edited).unwrap();
    assert_eq!(reparsed.memories[0].limits.max, Some(3));
}

//! A small WebAssembly interpreter with a virtual-file WASI surface.
//!
//! wasmbox decodes, validates and executes WebAssembly 1.0 modules (plus the
//! sign-extension, saturating conversion, bulk memory and reference type
//! extensions) and can encode a decoded module back to bytes.
//!
//! # Modules
//!
//! - [`parser`] -- Binary decoder and validator. Reads `.wasm` bytes into a [`parser::module::Module`]
//!   and checks it into a [`parser::validate::ValidModule`].
//! - [`encoder`] -- Binary encoder. Serialises a `Module` back to `.wasm` bytes.
//! - [`runtime`] -- Store, linker, the interpreter and the WASI bridge.
//!
//! # Example
//!
//! ```
//! use wasmbox::runtime::{Linker, Store, Value};
//!
//! // (module (func (export "add") (param i32 i32) (result i32)
//! //   local.get 0 local.get 1 i32.add))
//! let bytes = [
//!     0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01, 0x07, 0x01, 0x60, 0x02, 0x7f,
//!     0x7f, 0x01, 0x7f, 0x03, 0x02, 0x01, 0x00, 0x07, 0x07, 0x01, 0x03, 0x61, 0x64, 0x64,
//!     0x00, 0x00, 0x0a, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b,
//! ];
//! let module = wasmbox::load("add", &bytes).unwrap();
//!
//! let mut store = Store::new();
//! let id = store.instantiate(&module, &Linker::new()).unwrap();
//! let results = store.invoke_export(id, "add", &[Value::I32(2), Value::I32(3)]).unwrap();
//! assert_eq!(results, vec![Value::I32(5)]);
//! ```
//!
//! # Specification
//!
//! Targets the [WebAssembly core specification](https://webassembly.github.io/spec/core/)
//! binary format, version 1.

pub mod encoder;
pub mod parser;
pub mod runtime;

pub use runtime::RuntimeError;

/// Decodes and validates `bytes` in one step.
pub fn load(name: &str, bytes: &[u8]) -> Result<parser::validate::ValidModule, RuntimeError> {
    let module = parser::parse(name, bytes)?;
    Ok(parser::validate::validate(module)?)
}

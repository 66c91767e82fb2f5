//! Common test utilities shared between integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use wasmbox::parser::validate::ValidModule;
use wasmbox::runtime::{InstanceId, Linker, Store};

/// Captured writer that stores output for testing
#[derive(Clone, Default)]
pub struct CapturedWriter(pub Rc<RefCell<Vec<u8>>>);

impl CapturedWriter {
    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Helper to compile WAT to WASM
pub fn wat_to_wasm(wat: &str) -> Vec<u8> {
    wat::parse_str(wat).expect("Failed to parse WAT")
}

/// Compile, decode and validate a WAT module.
pub fn load_wat(wat: &str) -> ValidModule {
    wasmbox::load("test", &wat_to_wasm(wat)).expect("Failed to load module")
}

/// Instantiate a WAT module in a fresh store with the given linker.
pub fn instantiate(wat: &str, linker: &Linker) -> (Store, InstanceId) {
    let module = load_wat(wat);
    let mut store = Store::new();
    let id = store.instantiate(&module, linker).expect("Failed to instantiate");
    (store, id)
}

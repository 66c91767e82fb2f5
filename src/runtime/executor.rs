//! The interpreter loop.
//!
//! Execution is non-recursive: a wasm call pushes a [`Frame`] and a return
//! pops one, so guest recursion depth is bounded by the store's stack budget
//! rather than by the host thread's stack. Host functions run in place,
//! synchronously, with the calling instance's memory.
//!
//! Each frame's locals sit on the shared operand stack directly below its
//! operands. Before a frame is pushed the executor checks that its locals, its
//! deepest possible operand stack (computed by the validator) and the frame
//! overhead all fit in the budget, so nothing inside the frame needs checking
//! again.

use super::config::FRAME_SLOTS;
use super::control::{block_arity, Label, LabelKind};
use super::frame::Frame;
use super::linker::Caller;
use super::ops::{self, memory as memory_ops};
use super::stack::Stack;
use super::store::{FuncAddr, FunctionInstance, Store};
use super::{Instance, InstanceId, Trap, Value};
use crate::parser::instruction::{BlockType, Instruction};
use crate::parser::validate::FunctionCode;
use std::rc::Rc;

/// Why a frame stopped running.
enum Flow {
    /// The frame calls `addr` and resumes at `resume` afterwards.
    Call { addr: FuncAddr, resume: usize },
    /// The frame is done; its results are on top of the stack.
    Return,
}

pub struct Executor<'a> {
    store: &'a Store,
    stack: Stack,
    frames: Vec<Frame>,
    labels: Vec<Label>,
    slot_limit: usize,
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a Store) -> Self {
        Executor {
            store,
            stack: Stack::new(),
            frames: Vec::new(),
            labels: Vec::new(),
            slot_limit: store.config().slot_limit(),
        }
    }

    /// Runs the function at `addr` to completion and returns its results.
    /// Arguments are assumed to match its type.
    pub fn call(mut self, addr: FuncAddr, args: Vec<Value>) -> Result<Vec<Value>, Trap> {
        let arity = self
            .store
            .func_type(addr)
            .ok_or(Trap::UndefinedElement)?
            .results
            .len();
        self.stack.push_all(args);
        self.enter(addr, None)?;
        self.run()?;
        self.stack.pop_n(arity)
    }

    /// Starts a call whose arguments are already on the stack. A wasm
    /// function gets a new frame; a host function runs to completion here.
    fn enter(&mut self, addr: FuncAddr, caller: Option<InstanceId>) -> Result<(), Trap> {
        let store = self.store;
        match store.function(addr).ok_or(Trap::UndefinedElement)? {
            FunctionInstance::Host { func, func_type, name } => {
                let args = self.stack.pop_n(func_type.params.len())?;
                let memory = caller.and_then(|id| store.instance_ref(id)).and_then(Instance::memory);
                let results = func(&Caller::new(caller, memory), &args)?;
                let types_match = results.len() == func_type.results.len()
                    && results.iter().zip(&func_type.results).all(|(v, ty)| v.typ() == *ty);
                if !types_match {
                    return Err(Trap::Host(format!(
                        "{name} returned {} but is declared {func_type}",
                        super::value::format_values(&results)
                    )));
                }
                self.stack.push_all(results);
                Ok(())
            }
            FunctionInstance::Wasm {
                instance_id,
                code,
                func_type,
            } => {
                let needed = self.stack.len()
                    + code.locals.len()
                    + code.max_height as usize
                    + (self.frames.len() + 1) * FRAME_SLOTS;
                if needed > self.slot_limit {
                    return Err(Trap::CallStackExhausted);
                }
                let locals_base = self
                    .stack
                    .len()
                    .checked_sub(func_type.params.len())
                    .ok_or(Trap::StackUnderflow)?;
                self.stack.push_all(code.locals.iter().map(|ty| Value::default_for(*ty)));
                self.frames.push(Frame {
                    instance: *instance_id,
                    code: Rc::clone(code),
                    pc: 0,
                    locals_base,
                    label_base: self.labels.len(),
                    arity: func_type.results.len(),
                });
                Ok(())
            }
        }
    }

    fn run(&mut self) -> Result<(), Trap> {
        let store = self.store;
        while let Some(frame) = self.frames.last() {
            let code = Rc::clone(&frame.code);
            let instance_id = frame.instance;
            let instance = store.instance_ref(instance_id).ok_or(Trap::UndefinedElement)?;
            let pc = frame.pc;
            let (locals_base, label_base) = (frame.locals_base, frame.label_base);

            match self.run_frame(&code, instance, pc, locals_base, label_base)? {
                Flow::Call { addr, resume } => {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.pc = resume;
                    }
                    self.enter(addr, Some(instance_id))?;
                }
                Flow::Return => {
                    if let Some(frame) = self.frames.pop() {
                        let results = self.stack.pop_n(frame.arity)?;
                        self.stack.truncate(frame.locals_base);
                        self.stack.push_all(results);
                        self.labels.truncate(frame.label_base);
                    }
                }
            }
        }
        Ok(())
    }

    /// Leaves the label `depth` levels up, returning where execution goes
    /// next, or `None` when the branch targets the function body itself.
    fn branch(&mut self, label_base: usize, depth: u32) -> Result<Option<usize>, Trap> {
        let depth = depth as usize;
        if depth >= self.labels.len() - label_base {
            return Ok(None);
        }
        let idx = self.labels.len() - 1 - depth;
        let label = self.labels[idx];
        self.stack.unwind(label.height, label.arity)?;
        match label.kind {
            LabelKind::Loop => self.labels.truncate(idx + 1),
            LabelKind::Block | LabelKind::If => self.labels.truncate(idx),
        }
        Ok(Some(label.continuation))
    }

    fn push_label(
        &mut self,
        instance: &Instance,
        kind: LabelKind,
        block_type: &BlockType,
        continuation: usize,
    ) -> Result<(), Trap> {
        let (params, results) = block_arity(&instance.module, block_type);
        let height = self.stack.len().checked_sub(params).ok_or(Trap::StackUnderflow)?;
        let arity = if kind == LabelKind::Loop { params } else { results };
        self.labels.push(Label {
            kind,
            arity,
            height,
            continuation,
        });
        Ok(())
    }

    /// Runs one frame from `pc` until it calls out or returns.
    fn run_frame(
        &mut self,
        code: &FunctionCode,
        instance: &Instance,
        mut pc: usize,
        locals_base: usize,
        label_base: usize,
    ) -> Result<Flow, Trap> {
        let store = self.store;
        loop {
            let Some(inst) = code.instructions.get(pc) else {
                return Ok(Flow::Return);
            };
            match inst {
                Instruction::Unreachable => return Err(Trap::Unreachable),
                Instruction::Nop => {}
                Instruction::Block { block_type } => {
                    let end = code.targets[pc].end_pc as usize;
                    self.push_label(instance, LabelKind::Block, block_type, end + 1)?;
                }
                Instruction::Loop { block_type } => {
                    self.push_label(instance, LabelKind::Loop, block_type, pc + 1)?;
                }
                Instruction::If { block_type } => {
                    let condition = self.stack.pop_i32()?;
                    let target = code.targets[pc];
                    self.push_label(instance, LabelKind::If, block_type, target.end_pc as usize + 1)?;
                    if condition == 0 {
                        // the else arm, or the `end` that pops the label
                        pc = match target.else_pc {
                            Some(else_pc) => else_pc as usize + 1,
                            None => target.end_pc as usize,
                        };
                        continue;
                    }
                }
                Instruction::Else => {
                    // reached only by finishing the then arm
                    pc = code.targets[pc].end_pc as usize;
                    continue;
                }
                Instruction::End => {
                    if self.labels.len() > label_base {
                        self.labels.pop();
                    } else {
                        return Ok(Flow::Return);
                    }
                }
                Instruction::Br { label_idx } => match self.branch(label_base, *label_idx)? {
                    Some(next) => {
                        pc = next;
                        continue;
                    }
                    None => return Ok(Flow::Return),
                },
                Instruction::BrIf { label_idx } => {
                    if self.stack.pop_i32()? != 0 {
                        match self.branch(label_base, *label_idx)? {
                            Some(next) => {
                                pc = next;
                                continue;
                            }
                            None => return Ok(Flow::Return),
                        }
                    }
                }
                Instruction::BrTable { labels, default } => {
                    let index = self.stack.pop_u32()? as usize;
                    let depth = labels.get(index).copied().unwrap_or(*default);
                    match self.branch(label_base, depth)? {
                        Some(next) => {
                            pc = next;
                            continue;
                        }
                        None => return Ok(Flow::Return),
                    }
                }
                Instruction::Return => return Ok(Flow::Return),
                Instruction::Call { func_idx } => {
                    return Ok(Flow::Call {
                        addr: instance.function(*func_idx)?,
                        resume: pc + 1,
                    });
                }
                Instruction::CallIndirect { type_idx, table_idx } => {
                    let elem_idx = self.stack.pop_u32()?;
                    let entry = instance
                        .table_ref(*table_idx)?
                        .get(elem_idx)
                        .map_err(|_| Trap::UndefinedElement)?;
                    let Value::FuncRef(Some(addr)) = entry else {
                        return Err(Trap::UninitializedElement);
                    };
                    let expected = instance
                        .module
                        .types
                        .get(*type_idx as usize)
                        .ok_or(Trap::UndefinedElement)?;
                    let actual = store.func_type(addr).ok_or(Trap::UndefinedElement)?;
                    if actual != expected {
                        return Err(Trap::IndirectCallTypeMismatch {
                            expected: expected.clone(),
                            actual: actual.clone(),
                        });
                    }
                    return Ok(Flow::Call { addr, resume: pc + 1 });
                }

                Instruction::RefNull { ref_type } => self.stack.push(Value::null(*ref_type)),
                Instruction::RefIsNull => {
                    let value = self.stack.pop()?;
                    self.stack.push(Value::I32(i32::from(value.is_null())));
                }
                Instruction::RefFunc { func_idx } => {
                    let addr = instance.function(*func_idx)?;
                    self.stack.push(Value::FuncRef(Some(addr)));
                }

                Instruction::Drop => {
                    self.stack.pop()?;
                }
                Instruction::Select | Instruction::SelectTyped { .. } => {
                    let condition = self.stack.pop_i32()?;
                    let second = self.stack.pop()?;
                    let first = self.stack.pop()?;
                    self.stack.push(if condition != 0 { first } else { second });
                }

                Instruction::LocalGet { local_idx } => {
                    let value = self.stack.get(locals_base + *local_idx as usize)?;
                    self.stack.push(value);
                }
                Instruction::LocalSet { local_idx } => {
                    let value = self.stack.pop()?;
                    self.stack.set(locals_base + *local_idx as usize, value)?;
                }
                Instruction::LocalTee { local_idx } => {
                    let value = *self.stack.peek()?;
                    self.stack.set(locals_base + *local_idx as usize, value)?;
                }
                Instruction::GlobalGet { global_idx } => {
                    let value = instance.global(*global_idx)?.get();
                    self.stack.push(value);
                }
                Instruction::GlobalSet { global_idx } => {
                    let value = self.stack.pop()?;
                    instance.global(*global_idx)?.set(value);
                }

                Instruction::TableGet { table_idx } => {
                    let index = self.stack.pop_u32()?;
                    let value = instance.table_ref(*table_idx)?.get(index)?;
                    self.stack.push(value);
                }
                Instruction::TableSet { table_idx } => {
                    let value = self.stack.pop()?;
                    let index = self.stack.pop_u32()?;
                    instance.table_mut(*table_idx)?.set(index, value)?;
                }
                Instruction::TableSize { table_idx } => {
                    let size = instance.table_ref(*table_idx)?.size();
                    self.stack.push(Value::I32(size as i32));
                }
                Instruction::TableGrow { table_idx } => {
                    let delta = self.stack.pop_u32()?;
                    let init = self.stack.pop()?;
                    let old = instance.table_mut(*table_idx)?.grow(delta, init);
                    self.stack.push(Value::I32(old));
                }
                Instruction::TableFill { table_idx } => {
                    let len = self.stack.pop_u32()?;
                    let value = self.stack.pop()?;
                    let start = self.stack.pop_u32()?;
                    instance.table_mut(*table_idx)?.fill(start, value, len)?;
                }
                Instruction::TableCopy { dst_table, src_table } => {
                    let len = self.stack.pop_u32()?;
                    let src = self.stack.pop_u32()?;
                    let dst = self.stack.pop_u32()?;
                    // one table imported under two indices still aliases
                    if dst_table == src_table || Rc::ptr_eq(instance.table(*dst_table)?, instance.table(*src_table)?) {
                        instance.table_mut(*dst_table)?.copy_within(dst, src, len)?;
                    } else {
                        let source = instance.table_ref(*src_table)?;
                        instance.table_mut(*dst_table)?.copy_from(dst, &source, src, len)?;
                    }
                }
                Instruction::TableInit { elem_idx, table_idx } => {
                    let len = self.stack.pop_u32()?;
                    let src = self.stack.pop_u32()?;
                    let dst = self.stack.pop_u32()?;
                    let segment = instance.element(*elem_idx);
                    instance.table_mut(*table_idx)?.init(dst, segment, src, len)?;
                }
                Instruction::ElemDrop { elem_idx } => instance.drop_element(*elem_idx),

                inst if inst.memarg().is_some() => {
                    let mut memory = instance.memory_mut()?;
                    memory_ops::load_store(&mut self.stack, &mut memory, inst)?;
                }
                Instruction::MemorySize => memory_ops::size(&mut self.stack, &*instance.memory_ref()?),
                Instruction::MemoryGrow => {
                    memory_ops::grow(&mut self.stack, &mut *instance.memory_mut()?)?;
                }
                Instruction::MemoryFill => {
                    memory_ops::fill(&mut self.stack, &mut *instance.memory_mut()?)?;
                }
                Instruction::MemoryCopy => {
                    memory_ops::copy(&mut self.stack, &mut *instance.memory_mut()?)?;
                }
                Instruction::MemoryInit { data_idx } => {
                    let segment = instance.data_segment(*data_idx);
                    memory_ops::init(&mut self.stack, &mut *instance.memory_mut()?, segment)?;
                }
                Instruction::DataDrop { data_idx } => instance.drop_data(*data_idx),

                Instruction::I32Const { value } => self.stack.push(Value::I32(*value)),
                Instruction::I64Const { value } => self.stack.push(Value::I64(*value)),
                Instruction::F32Const { value } => self.stack.push(Value::F32(*value)),
                Instruction::F64Const { value } => self.stack.push(Value::F64(*value)),

                other => ops::stack_op(&mut self.stack, other)?,
            }
            pc += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse;
    use crate::parser::validate::validate;
    use crate::runtime::{new_runtime, InstanceId, Linker, RuntimeError, Store, Trap, Value};

    fn load(store: &mut Store, wat: &str) -> InstanceId {
        let bytes = wat::parse_str(wat).unwrap();
        let module = validate(parse("test", &bytes).unwrap()).unwrap();
        store.instantiate(&module, &Linker::new()).unwrap()
    }

    fn call(store: &Store, id: InstanceId, name: &str, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        store.invoke_export(id, name, args)
    }

    #[test]
    fn nested_blocks_and_branches() {
        let mut store = Store::new();
        let id = load(
            &mut store,
            r#"(module
                (func (export "classify") (param i32) (result i32)
                  (block $out (result i32)
                    (block $neg
                      (br_if $neg (i32.lt_s (local.get 0) (i32.const 0)))
                      (br $out (i32.const 1)))
                    (i32.const -1))))"#,
        );
        assert_eq!(call(&store, id, "classify", &[Value::I32(5)]).unwrap(), vec![Value::I32(1)]);
        assert_eq!(call(&store, id, "classify", &[Value::I32(-5)]).unwrap(), vec![Value::I32(-1)]);
    }

    #[test]
    fn loop_with_block_params() {
        let mut store = Store::new();
        let id = load(
            &mut store,
            r#"(module
                (type $acc (func (param i32) (result i32)))
                (func (export "sum") (param $n i32) (result i32)
                  (i32.const 0)
                  (loop $again (type $acc)
                    (i32.add (local.get $n))
                    (local.set $n (i32.sub (local.get $n) (i32.const 1)))
                    (br_if $again (i32.gt_s (local.get $n) (i32.const 0)) )
                  )))"#,
        );
        assert_eq!(call(&store, id, "sum", &[Value::I32(4)]).unwrap(), vec![Value::I32(10)]);
    }

    #[test]
    fn if_else_and_br_table() {
        let mut store = Store::new();
        let id = load(
            &mut store,
            r#"(module
                (func (export "pick") (param i32) (result i32)
                  (block (block (block
                    (br_table 0 1 2 (local.get 0)))
                    (return (i32.const 10)))
                    (return (i32.const 20)))
                  (i32.const 30))
                (func (export "sign") (param i32) (result i32)
                  (if (result i32) (local.get 0)
                    (then (i32.const 1))
                    (else (i32.const 0)))))"#,
        );
        for (arg, expected) in [(0, 10), (1, 20), (2, 30), (99, 30)] {
            assert_eq!(
                call(&store, id, "pick", &[Value::I32(arg)]).unwrap(),
                vec![Value::I32(expected)]
            );
        }
        assert_eq!(call(&store, id, "sign", &[Value::I32(7)]).unwrap(), vec![Value::I32(1)]);
        assert_eq!(call(&store, id, "sign", &[Value::I32(0)]).unwrap(), vec![Value::I32(0)]);
    }

    #[test]
    fn recursion_and_multi_value() {
        let mut store = Store::new();
        let id = load(
            &mut store,
            r#"(module
                (func $fac (export "fac") (param i64) (result i64)
                  (if (result i64) (i64.eqz (local.get 0))
                    (then (i64.const 1))
                    (else (i64.mul (local.get 0) (call $fac (i64.sub (local.get 0) (i64.const 1)))))))
                (func $pair (result i32 i64) (i32.const 1) (i64.const 2))
                (func (export "swap") (result i64 i32)
                  (local i32)
                  (call $pair)
                  (local.set 0 (i32.wrap_i64))
                  (drop)
                  (i64.const 7)
                  (local.get 0)))"#,
        );
        assert_eq!(call(&store, id, "fac", &[Value::I64(20)]).unwrap(), vec![Value::I64(2432902008176640000)]);
        assert_eq!(
            call(&store, id, "swap", &[]).unwrap(),
            vec![Value::I64(7), Value::I32(2)]
        );
    }

    #[test]
    fn unbounded_recursion_exhausts_the_stack() {
        let mut store = new_runtime(16 * 1024);
        let id = load(&mut store, r#"(module (func $f (export "f") (call $f)))"#);
        let err = call(&store, id, "f", &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::Trap(Trap::CallStackExhausted)));
        // the store stays usable afterwards
        assert!(matches!(call(&store, id, "f", &[]), Err(RuntimeError::Trap(Trap::CallStackExhausted))));
    }

    #[test]
    fn unreachable_traps() {
        let mut store = Store::new();
        let id = load(&mut store, r#"(module (func (export "f") (unreachable)))"#);
        assert!(matches!(call(&store, id, "f", &[]), Err(RuntimeError::Trap(Trap::Unreachable))));
    }

    #[test]
    fn tables_and_references() {
        let mut store = Store::new();
        let id = load(
            &mut store,
            r#"(module
                (table $t 2 funcref)
                (elem declare func $one)
                (func $one (result i32) (i32.const 1))
                (func (export "grow") (result i32)
                  (table.grow $t (ref.func $one) (i32.const 3)))
                (func (export "size") (result i32) (table.size $t))
                (func (export "null_at") (param i32) (result i32)
                  (ref.is_null (table.get $t (local.get 0)))))"#,
        );
        assert_eq!(call(&store, id, "grow", &[]).unwrap(), vec![Value::I32(2)]);
        assert_eq!(call(&store, id, "size", &[]).unwrap(), vec![Value::I32(5)]);
        assert_eq!(call(&store, id, "null_at", &[Value::I32(0)]).unwrap(), vec![Value::I32(1)]);
        assert_eq!(call(&store, id, "null_at", &[Value::I32(4)]).unwrap(), vec![Value::I32(0)]);
        assert!(matches!(
            call(&store, id, "null_at", &[Value::I32(5)]),
            Err(RuntimeError::Trap(Trap::TableOutOfBounds))
        ));
    }

    #[test]
    fn passive_data_and_drop() {
        let mut store = Store::new();
        let id = load(
            &mut store,
            r#"(module
                (memory 1)
                (data $d "wasm")
                (func (export "init") (param i32)
                  (memory.init $d (local.get 0) (i32.const 0) (i32.const 4)))
                (func (export "drop") (data.drop $d)))"#,
        );
        call(&store, id, "init", &[Value::I32(16)]).unwrap();
        assert_eq!(store.memory(id).unwrap().borrow().read_bytes(16, 4).unwrap(), b"wasm");
        call(&store, id, "drop", &[]).unwrap();
        assert!(matches!(
            call(&store, id, "init", &[Value::I32(16)]),
            Err(RuntimeError::Trap(Trap::MemoryOutOfBounds))
        ));
    }
}

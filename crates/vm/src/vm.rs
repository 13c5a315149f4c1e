//! The `Vm` struct and its dispatch loop (§4.8-§4.9).
//!
//! One step of `run` decodes a single `ember_core::opcode::Op` from the
//! current fiber's top frame and executes it. Object-model types are all
//! `Rc<RefCell<HeapObj>>`, so every handler below follows the same shape:
//! borrow just long enough to read or clone what it needs, drop the
//! borrow, then mutate. Holding two borrows of the same `Obj` across a
//! call is a panic waiting to happen, not a compile error, so this
//! discipline is load-bearing.

use crate::error::{VmError, VmResult};
use ember_core::object::{
    CallFrame, FiberState, Heap, HeapObj, ObjClass, ObjClosure, ObjFiber, ObjInstance, ObjModule,
    UpvalueState,
};
use ember_core::opcode::{decode, Op};
use ember_core::{Obj, SymbolTable, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

/// A Rust-implemented method. Mirrors the base spec's "native function
/// pointer" dispatch kind, minus the payload living on `Method` itself
/// (see `ember_core::object::Method`'s doc comment for why).
pub type NativeFn = fn(&mut Vm, &[Value]) -> NativeOutcome;

pub enum NativeOutcome {
    Return(Value),
    Error(String),
    /// The native already drove a fiber switch itself (`Thread.call`,
    /// `Thread.yield`, `Thread.suspend`); the dispatch loop must reload
    /// its frame/ip from `Vm::current` rather than write a return value.
    SwitchedFiber,
}

/// Handles onto every builtin class, resolved once at bootstrap (§4.7).
pub struct CoreClasses {
    pub object: Obj,
    pub class: Obj,
    pub bool_: Obj,
    pub null: Obj,
    pub num: Obj,
    pub string: Obj,
    pub list: Obj,
    pub map: Obj,
    pub range: Obj,
    pub fn_: Obj,
    pub thread: Obj,
    pub system: Obj,
}

pub struct Vm {
    pub heap: Heap,
    pub method_names: SymbolTable,
    pub modules: HashMap<String, Obj>,
    pub core_module: Obj,
    pub classes: CoreClasses,
    natives: HashMap<(usize, usize), NativeFn>,
    pub(crate) current: Option<Obj>,
    pub search_paths: Vec<PathBuf>,
}

impl Vm {
    pub fn new() -> VmResult<Self> {
        let mut heap = Heap::new();
        let core_module = heap.alloc(HeapObj::Module(ObjModule::new(None)));
        let mut method_names = SymbolTable::new();
        let classes = crate::core_module::bootstrap_classes(&mut heap);
        let mut vm = Vm {
            heap,
            method_names,
            modules: HashMap::new(),
            core_module,
            classes,
            natives: HashMap::new(),
            current: None,
            search_paths: vec![PathBuf::from(".")],
        };
        crate::natives::install(&mut vm);
        crate::core_module::declare_core_variables(&mut vm);
        crate::core_module::run_prelude(&mut vm)?;
        Ok(vm)
    }

    // ---- class model ----------------------------------------------

    pub fn class_of(&self, value: &Value) -> Obj {
        match value {
            Value::Null => self.classes.null.clone(),
            Value::Bool(_) => self.classes.bool_.clone(),
            Value::Number(_) => self.classes.num.clone(),
            Value::Undefined => self.classes.null.clone(),
            Value::Object(o) => match &*o.borrow() {
                HeapObj::Str(_) => self.classes.string.clone(),
                HeapObj::List(_) => self.classes.list.clone(),
                HeapObj::Map(_) => self.classes.map.clone(),
                HeapObj::Range(_) => self.classes.range.clone(),
                HeapObj::Fn(_) | HeapObj::Closure(_) => self.classes.fn_.clone(),
                HeapObj::Fiber(_) => self.classes.thread.clone(),
                HeapObj::Instance(inst) => inst.class.clone(),
                HeapObj::Class(c) => c.metaclass.clone().expect("every class has a metaclass"),
                HeapObj::Module(_) | HeapObj::Upvalue(_) => {
                    unreachable!("module/upvalue values never escape to script code")
                }
            },
        }
    }

    pub fn class_is(&self, value_class: &Obj, target: &Obj) -> bool {
        let mut cur = value_class.clone();
        loop {
            if Rc::ptr_eq(&cur, target) {
                return true;
            }
            let next = with_class(&cur, |c| c.superclass.clone());
            match next {
                Some(n) => cur = n,
                None => return false,
            }
        }
    }

    /// Build a new class inheriting `superclass`'s method table by copying
    /// it down at creation time, rather than walking a superclass chain on
    /// every lookup (§3 "Method table invariant"). Used by `CREATE_CLASS`;
    /// builtin classes go through `new_subclass` directly during bootstrap,
    /// before a `Vm` exists to call this on.
    pub(crate) fn instantiate_class(&mut self, name: String, superclass: Obj, extra_fields: usize) -> Obj {
        new_subclass(&mut self.heap, &self.classes.class, name, superclass, extra_fields)
    }

    pub fn bind_native(&mut self, class: &Obj, signature: &str, f: NativeFn) {
        let symbol = self.method_names.intern(signature);
        with_class_mut(class, |c| c.set_method(symbol, ember_core::object::Method::Primitive));
        self.natives.insert((Rc::as_ptr(class) as usize, symbol), f);
    }

    pub fn bind_static_native(&mut self, class: &Obj, signature: &str, f: NativeFn) {
        let metaclass = with_class(class, |c| c.metaclass.clone().expect("class has a metaclass"));
        self.bind_native(&metaclass, signature, f);
    }

    /// Binds `signature` (one of `call()`..`call(_,...,_)`) as the `Fn.call`
    /// trampoline: the receiver itself is the closure to invoke.
    pub fn bind_fn_call(&mut self, class: &Obj, signature: &str) {
        let symbol = self.method_names.intern(signature);
        with_class_mut(class, |c| c.set_method(symbol, ember_core::object::Method::FnCall));
    }

    fn lookup_native(&self, class: &Obj, symbol: usize) -> Option<NativeFn> {
        self.natives.get(&(Rc::as_ptr(class) as usize, symbol)).copied()
    }

    // ---- running modules --------------------------------------------

    /// Compile and run `source` as a fresh top-level module, returning the
    /// `<script>` function's result (§6 `execute_module`).
    pub fn execute_module(&mut self, file: &str, source: &str) -> VmResult<Value> {
        tracing::debug!(file, "executing module");
        let module = self.heap.alloc(HeapObj::Module(ObjModule::new(Some(file.to_string()))));
        self.copy_core_variables_into(&module);
        self.modules.insert(file.to_string(), module.clone());
        self.run_module(file, source, module)
    }

    pub(crate) fn copy_core_variables_into(&mut self, module: &Obj) {
        let vars = with_module(&self.core_module, |m| {
            m.variable_names.iter().cloned().zip(m.variable_values.iter().cloned()).collect::<Vec<_>>()
        });
        with_module_mut(module, |m| {
            for (name, value) in vars {
                m.declare_variable(&name, value);
            }
        });
    }

    pub(crate) fn run_module(&mut self, file: &str, source: &str, module: Obj) -> VmResult<Value> {
        let script_fn =
            ember_compiler::Compiler::compile_module(file, source, module, &mut self.heap, &mut self.method_names)?;
        let closure = self.heap.alloc(HeapObj::Closure(ObjClosure { function: script_fn, upvalues: Vec::new() }));
        let fiber = self.heap.alloc(HeapObj::Fiber(ObjFiber::new()));
        with_fiber_mut(&fiber, |f| {
            f.stack.push(Value::Null);
            f.frames.push(CallFrame { ip: 0, closure, stack_start: 0 });
        });
        self.run(fiber)
    }

    /// The dispatch loop. Runs `fiber` (and whatever fibers it transitively
    /// resumes) until the outermost one returns.
    pub(crate) fn run(&mut self, fiber: Obj) -> VmResult<Value> {
        with_fiber_mut(&fiber, |f| f.state = FiberState::Running);
        self.current = Some(fiber);
        loop {
            let current = self.current.clone().expect("dispatch loop always has a current fiber");
            let (closure, ip, stack_start) = with_fiber(&current, |f| {
                let frame = f.frames.last().expect("running fiber always has a frame");
                (frame.closure.clone(), frame.ip, frame.stack_start)
            });
            let function = with_closure(&closure, |c| c.function.clone());
            let (op, next_ip) = with_fn(&function, |fo| decode(&fo.code, ip, &fo.constants));
            with_fiber_mut(&current, |f| f.frames.last_mut().unwrap().ip = next_ip);

            if let Some(value) = self.execute(&current, &closure, &function, stack_start, op, next_ip)? {
                return Ok(value);
            }
        }
    }

    /// Executes one decoded instruction. Returns `Some(value)` when the
    /// whole `run` call should end (the outermost fiber returned).
    #[allow(clippy::too_many_arguments)]
    fn execute(
        &mut self,
        fiber: &Obj,
        closure: &Obj,
        function: &Obj,
        stack_start: usize,
        op: Op,
        next_ip: usize,
    ) -> VmResult<Option<Value>> {
        match op {
            Op::LoadConstant(i) => {
                let v = with_fn(function, |f| f.constants[i as usize].clone());
                push(fiber, v);
            }
            Op::PushNull => push(fiber, Value::Null),
            Op::PushTrue => push(fiber, Value::Bool(true)),
            Op::PushFalse => push(fiber, Value::Bool(false)),
            Op::LoadLocalVar(slot) => {
                let v = stack_get(fiber, stack_start + slot as usize);
                push(fiber, v);
            }
            Op::StoreLocalVar(slot) => {
                let v = peek(fiber);
                stack_set(fiber, stack_start + slot as usize, v);
            }
            Op::LoadUpvalue(idx) => {
                let up = with_closure(closure, |c| c.upvalues[idx as usize].clone());
                push(fiber, read_upvalue(&up));
            }
            Op::StoreUpvalue(idx) => {
                let up = with_closure(closure, |c| c.upvalues[idx as usize].clone());
                write_upvalue(&up, peek(fiber));
            }
            Op::LoadModuleVar(i) => {
                let module = with_fn(function, |f| f.module.clone());
                let v = with_module(&module, |m| m.variable_values[i as usize].clone());
                push(fiber, v);
            }
            Op::StoreModuleVar(i) => {
                let module = with_fn(function, |f| f.module.clone());
                let v = peek(fiber);
                with_module_mut(&module, |m| m.variable_values[i as usize] = v);
            }
            Op::LoadThisField(idx) => {
                let this = stack_get(fiber, stack_start);
                let v = with_instance_val(&this, |inst| inst.fields[idx as usize].clone());
                push(fiber, v);
            }
            Op::StoreThisField(idx) => {
                let this = stack_get(fiber, stack_start);
                let this = this.as_object().expect("this must be an object");
                let v = peek(fiber);
                with_instance_mut(this, |inst| inst.fields[idx as usize] = v);
            }
            Op::Pop => {
                pop(fiber);
            }
            Op::Call { arg_count, symbol } => {
                self.dispatch_call(fiber, arg_count, symbol as usize)?;
            }
            Op::Super { arg_count, symbol, superclass_const } => {
                let superclass = with_fn(function, |f| f.constants[superclass_const as usize].clone());
                let superclass = superclass.as_object().cloned().expect("super constant must be a class");
                self.dispatch_call_on(fiber, arg_count, symbol as usize, superclass)?;
            }
            Op::Jump(offset) => with_fiber_mut(fiber, |f| f.frames.last_mut().unwrap().ip = next_ip + offset as usize),
            Op::Loop(offset) => with_fiber_mut(fiber, |f| f.frames.last_mut().unwrap().ip = next_ip - offset as usize),
            Op::JumpIfFalse(offset) => {
                let cond = pop(fiber);
                if cond.is_falsey() {
                    with_fiber_mut(fiber, |f| f.frames.last_mut().unwrap().ip = next_ip + offset as usize);
                }
            }
            Op::And(offset) => {
                if peek(fiber).is_falsey() {
                    with_fiber_mut(fiber, |f| f.frames.last_mut().unwrap().ip = next_ip + offset as usize);
                } else {
                    pop(fiber);
                }
            }
            Op::Or(offset) => {
                if peek(fiber).is_truthy() {
                    with_fiber_mut(fiber, |f| f.frames.last_mut().unwrap().ip = next_ip + offset as usize);
                } else {
                    pop(fiber);
                }
            }
            Op::CloseUpvalue => {
                let limit = stack_len(fiber) - 1;
                close_upvalues_above(fiber, limit);
                pop(fiber);
            }
            Op::Return => {
                return self.do_return(fiber);
            }
            Op::Construct => {
                let class_val = stack_get(fiber, stack_start);
                let class_obj = class_val.as_object().cloned().expect("CONSTRUCT receiver must be a class");
                let num_fields = with_class(&class_obj, |c| c.num_fields);
                let instance =
                    self.heap.alloc(HeapObj::Instance(ObjInstance { class: class_obj, fields: vec![Value::Null; num_fields] }));
                stack_set(fiber, stack_start, Value::Object(instance));
            }
            Op::CreateClass(field_count) => {
                let superclass = pop(fiber);
                let name = pop(fiber);
                let superclass = superclass
                    .as_object()
                    .cloned()
                    .filter(|o| matches!(&*o.borrow(), HeapObj::Class(_)))
                    .ok_or_else(|| VmError::Runtime("invalid superclass".to_string()))?;
                let name = with_str(&name, |s| s.value.clone());
                let class_obj = self.instantiate_class(name, superclass, field_count as usize);
                push(fiber, Value::Object(class_obj));
            }
            Op::CreateClosure { fn_const, upvalues } => {
                let fn_obj = with_fn(function, |f| f.constants[fn_const as usize].clone());
                let fn_obj = fn_obj.as_object().cloned().expect("CreateClosure constant must be a function");
                let mut resolved = Vec::with_capacity(upvalues.len());
                for (is_local, index) in upvalues {
                    if is_local {
                        resolved.push(self.capture_upvalue(fiber, stack_start + index as usize));
                    } else {
                        resolved.push(with_closure(closure, |c| c.upvalues[index as usize].clone()));
                    }
                }
                let closure_obj = self.heap.alloc(HeapObj::Closure(ObjClosure { function: fn_obj, upvalues: resolved }));
                push(fiber, Value::Object(closure_obj));
            }
            Op::InstanceMethod(symbol) => {
                let method_closure = pop(fiber);
                let class_val = pop(fiber);
                let class_obj = class_val.as_object().cloned().expect("InstanceMethod target must be a class");
                let method_closure = method_closure.as_object().cloned().expect("InstanceMethod value must be a closure");
                let superclass = with_class(&class_obj, |c| c.superclass.clone());
                patch_super_slots(&method_closure, superclass);
                with_class_mut(&class_obj, |c| c.set_method(symbol as usize, ember_core::object::Method::Block(method_closure)));
            }
            Op::StaticMethod(symbol) => {
                let method_closure = pop(fiber);
                let class_val = pop(fiber);
                let class_obj = class_val.as_object().cloned().expect("StaticMethod target must be a class");
                let metaclass = with_class(&class_obj, |c| c.metaclass.clone().expect("class has a metaclass"));
                let method_closure = method_closure.as_object().cloned().expect("StaticMethod value must be a closure");
                let superclass = with_class(&metaclass, |c| c.superclass.clone());
                patch_super_slots(&method_closure, superclass);
                with_class_mut(&metaclass, |c| c.set_method(symbol as usize, ember_core::object::Method::Block(method_closure)));
            }
            Op::End => unreachable!("End is a break placeholder, rewritten before execution reaches it"),
        }
        Ok(None)
    }

    fn do_return(&mut self, fiber: &Obj) -> VmResult<Option<Value>> {
        let ret_val = peek(fiber);
        let frame_stack_start = with_fiber(fiber, |f| f.frames.last().unwrap().stack_start);
        close_upvalues_above(fiber, frame_stack_start);
        with_fiber_mut(fiber, |f| {
            f.stack.truncate(frame_stack_start);
            f.stack.push(ret_val.clone());
            f.frames.pop();
        });
        let frames_left = with_fiber(fiber, |f| f.frames.len());
        if frames_left > 0 {
            return Ok(None);
        }
        let caller = with_fiber(fiber, |f| f.caller.clone());
        with_fiber_mut(fiber, |f| f.state = FiberState::Done);
        match caller {
            Some(caller_fiber) => {
                push(&caller_fiber, ret_val);
                self.current = Some(caller_fiber);
                Ok(None)
            }
            None => Ok(Some(ret_val)),
        }
    }

    /// `CallN`: resolve the method on the receiver's own class.
    fn dispatch_call(&mut self, fiber: &Obj, arg_count: u8, symbol: usize) -> VmResult<()> {
        let base = stack_len(fiber) - arg_count as usize - 1;
        let receiver = stack_get(fiber, base);
        let class = self.class_of(&receiver);
        self.invoke(fiber, base, arg_count, symbol, class)
    }

    /// `SuperN`: resolve the method starting at an explicit class (the
    /// enclosing method's superclass), rather than the receiver's own.
    fn dispatch_call_on(&mut self, fiber: &Obj, arg_count: u8, symbol: usize, class: Obj) -> VmResult<()> {
        let base = stack_len(fiber) - arg_count as usize - 1;
        self.invoke(fiber, base, arg_count, symbol, class)
    }

    fn invoke(&mut self, fiber: &Obj, base: usize, arg_count: u8, symbol: usize, class: Obj) -> VmResult<()> {
        let method = with_class(&class, |c| c.method(symbol).cloned());
        let Some(method) = method else {
            let name = self.method_names.name(symbol).unwrap_or("?").to_string();
            let class_name = with_class(&class, |c| c.name.clone());
            return Err(VmError::Runtime(format!("{class_name} does not implement '{name}'")));
        };
        match method {
            ember_core::object::Method::Primitive => {
                let native = self.lookup_native(&class, symbol).unwrap_or_else(|| {
                    let name = self.method_names.name(symbol).unwrap_or("?");
                    panic!("no native registered for bound primitive method '{name}'")
                });
                let args: Vec<Value> = with_fiber(fiber, |f| f.stack[base..].to_vec());
                match native(self, &args) {
                    NativeOutcome::Return(v) => {
                        with_fiber_mut(fiber, |f| f.stack.truncate(base));
                        push(fiber, v);
                    }
                    NativeOutcome::Error(msg) => return Err(VmError::Runtime(msg)),
                    NativeOutcome::SwitchedFiber => {
                        // The receiver/args slot this call occupied becomes
                        // the result slot a later resume or return fills in
                        // (`do_return`'s caller branch, or a future
                        // `Thread.call`/`yield` targeting this fiber).
                        with_fiber_mut(fiber, |f| f.stack.truncate(base));
                    }
                }
                Ok(())
            }
            ember_core::object::Method::FnCall => {
                let closure = stack_get(fiber, base);
                let closure_obj = closure
                    .as_object()
                    .cloned()
                    .filter(|o| matches!(&*o.borrow(), HeapObj::Closure(_)))
                    .ok_or_else(|| VmError::Runtime("not a function".to_string()))?;
                self.push_call_frame(fiber, base, closure_obj, arg_count)
            }
            ember_core::object::Method::Block(body) => self.push_call_frame(fiber, base, body, arg_count),
        }
    }

    fn push_call_frame(&mut self, fiber: &Obj, base: usize, closure: Obj, arg_count: u8) -> VmResult<()> {
        let arity = with_closure(&closure, |c| with_fn(&c.function, |f| f.arity));
        if arity != arg_count {
            return Err(VmError::Runtime(format!("expected {arity} argument(s), got {arg_count}")));
        }
        with_fiber_mut(fiber, |f| f.frames.push(CallFrame { ip: 0, closure, stack_start: base }));
        Ok(())
    }

    fn capture_upvalue(&mut self, fiber: &Obj, slot: usize) -> Obj {
        let existing = with_fiber(fiber, |f| {
            f.open_upvalues
                .iter()
                .find(|u| matches!(&*u.borrow(), HeapObj::Upvalue(uv) if matches!(uv.state, UpvalueState::Open { slot: s, .. } if s == slot)))
                .cloned()
        });
        if let Some(u) = existing {
            return u;
        }
        let new_up = self.heap.alloc(HeapObj::Upvalue(ember_core::object::ObjUpvalue {
            state: UpvalueState::Open { fiber: fiber.clone(), slot },
        }));
        with_fiber_mut(fiber, |f| {
            let pos = f
                .open_upvalues
                .iter()
                .position(|u| match &*u.borrow() {
                    HeapObj::Upvalue(uv) => matches!(uv.state, UpvalueState::Open { slot: s, .. } if s < slot),
                    _ => false,
                })
                .unwrap_or(f.open_upvalues.len());
            f.open_upvalues.insert(pos, new_up.clone());
        });
        new_up
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new().expect("core bootstrap never fails to compile")
    }
}

/// Builds a class (and its metaclass) that inherits `superclass`'s method
/// table by copying it down, plus the metaclass chain that lets static
/// methods inherit the same way (§9 "Class / metaclass bootstrap"). Free
/// function so bootstrap can call it before a `Vm` exists.
pub(crate) fn new_subclass(heap: &mut Heap, class_class: &Obj, name: String, superclass: Obj, extra_fields: usize) -> Obj {
    let (super_methods, super_num_fields, super_metaclass) =
        with_class(&superclass, |c| (c.methods.clone(), c.num_fields, c.metaclass.clone()));
    let class_obj = heap.alloc(HeapObj::Class(ObjClass {
        name: name.clone(),
        superclass: Some(superclass),
        metaclass: None,
        is_metaclass: false,
        num_fields: super_num_fields + extra_fields,
        methods: super_methods,
    }));
    let meta_super = super_metaclass.unwrap_or_else(|| class_class.clone());
    let meta_methods = with_class(&meta_super, |c| c.methods.clone());
    let metaclass_obj = heap.alloc(HeapObj::Class(ObjClass {
        name: format!("{name} metaclass"),
        superclass: Some(meta_super),
        metaclass: Some(class_class.clone()),
        is_metaclass: true,
        num_fields: 0,
        methods: meta_methods,
    }));
    with_class_mut(&class_obj, |c| c.metaclass = Some(metaclass_obj));
    class_obj
}

/// Patches every `super`-dispatch constant slot in `closure`'s function to
/// point at `superclass`, now that the enclosing `CREATE_CLASS` has run
/// (`ObjFn::super_const_slots`, §4.6).
fn patch_super_slots(closure: &Obj, superclass: Option<Obj>) {
    let Some(superclass) = superclass else { return };
    with_fn_mut_via_closure(closure, |f| {
        for &slot in &f.super_const_slots {
            f.constants[slot as usize] = Value::Object(superclass.clone());
        }
    });
}

fn with_fn_mut_via_closure(closure: &Obj, f: impl FnOnce(&mut ember_core::object::ObjFn)) {
    let function = with_closure(closure, |c| c.function.clone());
    let mut b = function.borrow_mut();
    if let HeapObj::Fn(fo) = &mut *b {
        f(fo);
    }
}

fn read_upvalue(up: &Obj) -> Value {
    match &*up.borrow() {
        HeapObj::Upvalue(uv) => match &uv.state {
            UpvalueState::Open { fiber, slot } => with_fiber(fiber, |f| f.stack[*slot].clone()),
            UpvalueState::Closed(v) => v.clone(),
        },
        _ => unreachable!("LoadUpvalue/StoreUpvalue operand must be an upvalue"),
    }
}

fn write_upvalue(up: &Obj, value: Value) {
    let target = match &*up.borrow() {
        HeapObj::Upvalue(uv) => match &uv.state {
            UpvalueState::Open { fiber, slot } => Some((fiber.clone(), *slot)),
            UpvalueState::Closed(_) => None,
        },
        _ => unreachable!(),
    };
    match target {
        Some((fiber, slot)) => with_fiber_mut(&fiber, |f| f.stack[slot] = value),
        None => {
            let mut b = up.borrow_mut();
            if let HeapObj::Upvalue(uv) = &mut *b {
                uv.state = UpvalueState::Closed(value);
            }
        }
    }
}

fn close_upvalues_above(fiber: &Obj, limit: usize) {
    loop {
        let front = with_fiber(fiber, |f| f.open_upvalues.first().cloned());
        let Some(up) = front else { break };
        let slot = match &*up.borrow() {
            HeapObj::Upvalue(uv) => match uv.state {
                UpvalueState::Open { slot, .. } => Some(slot),
                UpvalueState::Closed(_) => None,
            },
            _ => unreachable!(),
        };
        match slot {
            Some(slot) if slot >= limit => {
                let value = with_fiber(fiber, |f| f.stack[slot].clone());
                {
                    let mut b = up.borrow_mut();
                    if let HeapObj::Upvalue(uv) = &mut *b {
                        uv.state = UpvalueState::Closed(value);
                    }
                }
                with_fiber_mut(fiber, |f| {
                    f.open_upvalues.remove(0);
                });
            }
            _ => break,
        }
    }
}

// ---- small Rc<RefCell<HeapObj>> access helpers ------------------------

pub(crate) fn with_fiber<R>(obj: &Obj, f: impl FnOnce(&ObjFiber) -> R) -> R {
    match &*obj.borrow() {
        HeapObj::Fiber(fib) => f(fib),
        _ => unreachable!("expected a fiber"),
    }
}

pub(crate) fn with_fiber_mut<R>(obj: &Obj, f: impl FnOnce(&mut ObjFiber) -> R) -> R {
    match &mut *obj.borrow_mut() {
        HeapObj::Fiber(fib) => f(fib),
        _ => unreachable!("expected a fiber"),
    }
}

pub(crate) fn with_closure<R>(obj: &Obj, f: impl FnOnce(&ObjClosure) -> R) -> R {
    match &*obj.borrow() {
        HeapObj::Closure(c) => f(c),
        _ => unreachable!("expected a closure"),
    }
}

pub(crate) fn with_fn<R>(obj: &Obj, f: impl FnOnce(&ember_core::object::ObjFn) -> R) -> R {
    match &*obj.borrow() {
        HeapObj::Fn(fo) => f(fo),
        _ => unreachable!("expected a function"),
    }
}

pub(crate) fn with_class<R>(obj: &Obj, f: impl FnOnce(&ObjClass) -> R) -> R {
    match &*obj.borrow() {
        HeapObj::Class(c) => f(c),
        _ => unreachable!("expected a class"),
    }
}

pub(crate) fn with_class_mut<R>(obj: &Obj, f: impl FnOnce(&mut ObjClass) -> R) -> R {
    match &mut *obj.borrow_mut() {
        HeapObj::Class(c) => f(c),
        _ => unreachable!("expected a class"),
    }
}

pub(crate) fn with_instance<R>(obj: &Obj, f: impl FnOnce(&ObjInstance) -> R) -> R {
    match &*obj.borrow() {
        HeapObj::Instance(i) => f(i),
        _ => unreachable!("expected an instance"),
    }
}

pub(crate) fn with_instance_mut<R>(obj: &Obj, f: impl FnOnce(&mut ObjInstance) -> R) -> R {
    match &mut *obj.borrow_mut() {
        HeapObj::Instance(i) => f(i),
        _ => unreachable!("expected an instance"),
    }
}

pub(crate) fn with_instance_val<R>(v: &Value, f: impl FnOnce(&ObjInstance) -> R) -> R {
    with_instance(v.as_object().expect("expected an instance value"), f)
}

pub(crate) fn with_module<R>(obj: &Obj, f: impl FnOnce(&ObjModule) -> R) -> R {
    match &*obj.borrow() {
        HeapObj::Module(m) => f(m),
        _ => unreachable!("expected a module"),
    }
}

pub(crate) fn with_module_mut<R>(obj: &Obj, f: impl FnOnce(&mut ObjModule) -> R) -> R {
    match &mut *obj.borrow_mut() {
        HeapObj::Module(m) => f(m),
        _ => unreachable!("expected a module"),
    }
}

pub(crate) fn with_str<R>(v: &Value, f: impl FnOnce(&ember_core::object::ObjString) -> R) -> R {
    match v.as_object().map(|o| o.borrow()) {
        Some(b) => match &*b {
            HeapObj::Str(s) => f(s),
            _ => panic!("expected a string value"),
        },
        None => panic!("expected a string value"),
    }
}

fn push(fiber: &Obj, v: Value) {
    with_fiber_mut(fiber, |f| f.stack.push(v));
}

fn pop(fiber: &Obj) -> Value {
    with_fiber_mut(fiber, |f| f.stack.pop().expect("stack underflow"))
}

fn peek(fiber: &Obj) -> Value {
    with_fiber(fiber, |f| f.stack.last().cloned().expect("stack is empty"))
}

fn stack_get(fiber: &Obj, idx: usize) -> Value {
    with_fiber(fiber, |f| f.stack[idx].clone())
}

fn stack_set(fiber: &Obj, idx: usize, v: Value) {
    with_fiber_mut(fiber, |f| f.stack[idx] = v);
}

fn stack_len(fiber: &Obj) -> usize {
    with_fiber(fiber, |f| f.stack.len())
}

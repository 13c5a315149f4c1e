//! The native method library (§4.10): one module per builtin class, each
//! registering its methods onto `Vm::classes` via `Vm::bind_native` /
//! `Vm::bind_static_native`. Grounded in the teacher's `*_ops.rs` native
//! modules — one file per conceptual unit, each a flat set of `fn(&mut Vm,
//! &[Value]) -> NativeOutcome` functions registered from a single
//! `install`.

mod bool_null;
mod class_native;
mod fn_native;
mod list;
mod map;
mod num;
mod object;
mod range;
mod string;
mod system;
mod thread;

use crate::vm::{NativeOutcome, Vm};
use ember_core::object::{HeapObj, ObjList, ObjMap, ObjRange, ObjString};
use ember_core::Value;

pub(crate) fn install(vm: &mut Vm) {
    object::install(vm);
    class_native::install(vm);
    num::install(vm);
    bool_null::install(vm);
    string::install(vm);
    list::install(vm);
    map::install(vm);
    range::install(vm);
    thread::install(vm);
    system::install(vm);
    fn_native::install(vm);
}

pub(crate) fn ok(v: Value) -> NativeOutcome {
    NativeOutcome::Return(v)
}

pub(crate) fn err(msg: impl Into<String>) -> NativeOutcome {
    NativeOutcome::Error(msg.into())
}

pub(crate) fn alloc_str(vm: &mut Vm, s: impl Into<String>) -> Value {
    Value::Object(vm.heap.alloc(HeapObj::Str(ObjString::new(s))))
}

pub(crate) fn alloc_list(vm: &mut Vm, elements: Vec<Value>) -> Value {
    Value::Object(vm.heap.alloc(HeapObj::List(ObjList { elements })))
}

pub(crate) fn alloc_range(vm: &mut Vm, from: f64, to: f64) -> Value {
    Value::Object(vm.heap.alloc(HeapObj::Range(ObjRange { from, to, inclusive: true })))
}

pub(crate) fn new_map(vm: &mut Vm) -> Value {
    Value::Object(vm.heap.alloc(HeapObj::Map(ObjMap::new())))
}

pub(crate) fn as_num(v: &Value) -> Result<f64, String> {
    v.as_number().ok_or_else(|| "expected a number".to_string())
}

pub(crate) fn as_str(v: &Value) -> Result<String, String> {
    v.as_object()
        .and_then(|o| match &*o.borrow() {
            HeapObj::Str(s) => Some(s.value.clone()),
            _ => None,
        })
        .ok_or_else(|| "expected a string".to_string())
}

//! Cycle-collecting mark/sweep pass (§9 DESIGN NOTES: "classOfClass is its
//! own metaclass" — a deliberate `Rc` cycle plain reference counting can
//! never free on its own, plus any cycle user code builds out of instances
//! and closures). Acyclic garbage already collects itself the moment its
//! last `Rc` drops; this pass exists only to break cycles among objects
//! the mark phase can't reach from a root.
//!
//! Mark walks from every root (the core module, every loaded module, the
//! running fiber, and the builtin classes themselves — the metaclass cycle
//! is rooted here deliberately) over each object's outgoing `Obj`/`Value`
//! references. Anything left unmarked afterward is unreachable from script
//! code; its internal references are cleared so any `Rc` cycle it was part
//! of drops to zero naturally, then `Heap::compact` drops the dead slots.

use crate::vm::Vm;
use ember_core::object::{HeapObj, UpvalueState};
use ember_core::{Obj, Value};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub fn collect(vm: &mut Vm) {
    let before = vm.heap.live_count();
    vm.heap.clear_marks();
    let index_of: HashMap<usize, usize> =
        vm.heap.live_objects_indexed().map(|(i, o)| (Rc::as_ptr(&o) as usize, i)).collect();

    let mut stack = roots(vm);
    let mut seen: HashSet<usize> = HashSet::new();
    while let Some(obj) = stack.pop() {
        let ptr = Rc::as_ptr(&obj) as usize;
        if !seen.insert(ptr) {
            continue;
        }
        if let Some(&idx) = index_of.get(&ptr) {
            vm.heap.mark(idx);
        }
        push_children(&mut stack, &obj);
    }

    for (idx, obj) in vm.heap.live_objects_indexed().collect::<Vec<_>>() {
        if !vm.heap.is_marked(idx) {
            clear_references(&obj);
        }
    }
    vm.heap.compact();
    tracing::debug!(before, after = vm.heap.live_count(), "gc pass complete");
}

fn roots(vm: &Vm) -> Vec<Obj> {
    let mut roots = vec![
        vm.core_module.clone(),
        vm.classes.object.clone(),
        vm.classes.class.clone(),
        vm.classes.bool_.clone(),
        vm.classes.null.clone(),
        vm.classes.num.clone(),
        vm.classes.string.clone(),
        vm.classes.list.clone(),
        vm.classes.map.clone(),
        vm.classes.range.clone(),
        vm.classes.fn_.clone(),
        vm.classes.thread.clone(),
        vm.classes.system.clone(),
    ];
    roots.extend(vm.modules.values().cloned());
    if let Some(current) = &vm.current {
        roots.push(current.clone());
    }
    roots
}

fn push_value(stack: &mut Vec<Obj>, v: &Value) {
    if let Value::Object(o) = v {
        stack.push(o.clone());
    }
}

fn push_children(stack: &mut Vec<Obj>, obj: &Obj) {
    match &*obj.borrow() {
        HeapObj::Str(_) | HeapObj::Range(_) => {}
        HeapObj::List(l) => l.elements.iter().for_each(|v| push_value(stack, v)),
        HeapObj::Map(m) => m.iter().for_each(|(k, v)| {
            push_value(stack, k);
            push_value(stack, v);
        }),
        HeapObj::Fn(f) => {
            f.constants.iter().for_each(|v| push_value(stack, v));
            stack.push(f.module.clone());
        }
        HeapObj::Closure(c) => {
            stack.push(c.function.clone());
            stack.extend(c.upvalues.iter().cloned());
        }
        HeapObj::Upvalue(u) => match &u.state {
            UpvalueState::Open { fiber, .. } => stack.push(fiber.clone()),
            UpvalueState::Closed(v) => push_value(stack, v),
        },
        HeapObj::Class(c) => {
            if let Some(s) = &c.superclass {
                stack.push(s.clone());
            }
            if let Some(m) = &c.metaclass {
                stack.push(m.clone());
            }
            for method in c.methods.iter().flatten() {
                if let ember_core::object::Method::Block(closure) = method {
                    stack.push(closure.clone());
                }
            }
        }
        HeapObj::Instance(i) => {
            stack.push(i.class.clone());
            i.fields.iter().for_each(|v| push_value(stack, v));
        }
        HeapObj::Module(m) => m.variable_values.iter().for_each(|v| push_value(stack, v)),
        HeapObj::Fiber(f) => {
            f.stack.iter().for_each(|v| push_value(stack, v));
            f.frames.iter().for_each(|fr| stack.push(fr.closure.clone()));
            stack.extend(f.open_upvalues.iter().cloned());
            if let Some(c) = &f.caller {
                stack.push(c.clone());
            }
        }
    }
}

/// Breaks any `Rc` cycle an unreachable object participates in by
/// dropping its own outgoing references.
fn clear_references(obj: &Obj) {
    match &mut *obj.borrow_mut() {
        HeapObj::Str(_) | HeapObj::Range(_) => {}
        HeapObj::List(l) => l.elements.clear(),
        HeapObj::Map(m) => m.clear(),
        HeapObj::Fn(f) => {
            f.constants.clear();
        }
        HeapObj::Closure(c) => c.upvalues.clear(),
        HeapObj::Upvalue(u) => u.state = UpvalueState::Closed(Value::Null),
        HeapObj::Class(c) => {
            c.superclass = None;
            c.metaclass = None;
            c.methods.clear();
        }
        HeapObj::Instance(i) => i.fields.clear(),
        HeapObj::Module(m) => m.variable_values.clear(),
        HeapObj::Fiber(f) => {
            f.stack.clear();
            f.frames.clear();
            f.open_upvalues.clear();
            f.caller = None;
        }
    }
}

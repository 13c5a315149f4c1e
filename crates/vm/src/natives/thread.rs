//! `Thread` (§4.10, §5 CONCURRENCY & RESOURCE MODEL): fibers. `call`/
//! `call(_)`/`yield`/`yield(_)` drive the dispatch loop's existing
//! caller-chain fiber switch (`Vm::do_return` already resumes a caller when
//! a fiber finishes; these natives are the other half, switching *before*
//! a fiber finishes).

use super::{err, ok};
use crate::vm::{with_closure, with_fiber, with_fiber_mut, with_fn, NativeOutcome, Vm};
use ember_core::object::{CallFrame, HeapObj, ObjFiber};
use ember_core::Value;

pub(crate) fn install(vm: &mut Vm) {
    let thread = vm.classes.thread.clone();
    vm.bind_static_native(&thread, "new(_)", new);
    vm.bind_static_native(&thread, "abort(_)", abort);
    vm.bind_static_native(&thread, "current", current);
    vm.bind_static_native(&thread, "suspend()", suspend);
    vm.bind_static_native(&thread, "yield(_)", yield_with_value);
    vm.bind_static_native(&thread, "yield()", yield_bare);

    vm.bind_native(&thread, "call()", call_bare);
    vm.bind_native(&thread, "call(_)", call_with_value);
    vm.bind_native(&thread, "isDone", is_done);
}

fn new(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let Some(closure) = args[1].as_object().cloned().filter(|o| matches!(&*o.borrow(), HeapObj::Closure(_))) else {
        return err("Thread.new expects a function");
    };
    let fiber = vm.heap.alloc(HeapObj::Fiber(ObjFiber::new()));
    with_fiber_mut(&fiber, |f| {
        f.stack.push(Value::Object(closure.clone()));
        f.frames.push(CallFrame { ip: 0, closure, stack_start: 0 });
    });
    ok(Value::Object(fiber))
}

fn abort(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let message = match super::as_str(&args[1]) {
        Ok(s) => s,
        Err(_) => "thread aborted".to_string(),
    };
    NativeOutcome::Error(message)
}

fn current(vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    ok(Value::Object(vm.current.clone().expect("dispatch loop always has a current fiber")))
}

fn call_impl(vm: &mut Vm, target: ember_core::Obj, resume_value: Value) -> NativeOutcome {
    let done = with_fiber(&target, |f| f.is_done());
    if done {
        return err("cannot call a finished thread");
    }
    let never_started = with_fiber(&target, |f| f.stack.len() == 1 && f.frames.len() == 1 && f.frames[0].ip == 0);
    if never_started {
        let arity = with_fiber(&target, |f| {
            let closure = f.frames.last().expect("thread has an entry frame").closure.clone();
            with_closure(&closure, |c| with_fn(&c.function, |fo| fo.arity))
        });
        if arity >= 1 {
            with_fiber_mut(&target, |f| f.stack.push(resume_value));
        }
    } else {
        with_fiber_mut(&target, |f| f.stack.push(resume_value));
    }
    let caller = vm.current.clone().expect("dispatch loop always has a current fiber");
    with_fiber_mut(&target, |f| f.caller = Some(caller));
    vm.current = Some(target);
    NativeOutcome::SwitchedFiber
}

fn call_bare(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let Some(target) = args[0].as_object().cloned() else { return err("not a thread") };
    call_impl(vm, target, Value::Null)
}

fn call_with_value(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let Some(target) = args[0].as_object().cloned() else { return err("not a thread") };
    call_impl(vm, target, args[1].clone())
}

fn yield_to_caller(vm: &mut Vm, value: Value) -> NativeOutcome {
    let current = vm.current.clone().expect("dispatch loop always has a current fiber");
    let caller = with_fiber(&current, |f| f.caller.clone());
    let Some(caller) = caller else {
        return err("cannot yield from the root fiber");
    };
    with_fiber_mut(&caller, |f| f.stack.push(value));
    with_fiber_mut(&current, |f| f.caller = None);
    vm.current = Some(caller);
    NativeOutcome::SwitchedFiber
}

fn yield_bare(vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    yield_to_caller(vm, Value::Null)
}

fn yield_with_value(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let value = args[1].clone();
    yield_to_caller(vm, value)
}

/// Top-level suspend (no caller to resume) isn't reachable through this
/// driver, which only ever runs a module to completion; documented in
/// `DESIGN.md`.
fn suspend(vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    yield_to_caller(vm, Value::Null)
}

fn is_done(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let Some(target) = args[0].as_object() else { return err("not a thread") };
    ok(Value::Bool(with_fiber(target, |f| f.is_done())))
}

//! `Fn` (§4.10): closures as first-class values. `call()`..`call(_,...,_)`
//! (arities 0..=16) are bound with `Method::FnCall` rather than a native
//! function — the receiver itself is the closure to invoke (see
//! `Vm::invoke`).

use super::ok;
use crate::vm::{NativeOutcome, Vm};
use ember_core::{Signature, Value};

pub(crate) fn install(vm: &mut Vm) {
    let fn_ = vm.classes.fn_.clone();
    vm.bind_static_native(&fn_, "new(_)", new);
    for arity in 0..=16u8 {
        let sig = Signature::method("call", arity).canonical();
        vm.bind_fn_call(&fn_, &sig);
    }
}

fn new(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(args[1].clone())
}

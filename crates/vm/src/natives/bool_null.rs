//! `Bool` and `Null` (§4.10): both are just `toString` plus a `!` that
//! overrides `Object`'s (which assumes truthy).

use super::{alloc_str, ok};
use crate::vm::{NativeOutcome, Vm};
use ember_core::Value;

pub(crate) fn install(vm: &mut Vm) {
    let bool_ = vm.classes.bool_.clone();
    vm.bind_native(&bool_, "toString", bool_to_string);
    vm.bind_native(&bool_, "!()", bool_not);

    let null = vm.classes.null.clone();
    vm.bind_native(&null, "toString", null_to_string);
    vm.bind_native(&null, "!()", null_not);
}

fn bool_to_string(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let b = matches!(args[0], Value::Bool(true));
    ok(alloc_str(vm, if b { "true" } else { "false" }))
}

fn bool_not(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(Value::Bool(!args[0].is_truthy()))
}

fn null_to_string(vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    ok(alloc_str(vm, "null"))
}

fn null_not(_vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    ok(Value::Bool(true))
}

//! `System` (§4.10, §4.11): the host-facing static surface — stdout,
//! the clock, GC, and module import.

use super::{as_str, err, ok};
use crate::vm::{NativeOutcome, Vm};
use ember_core::Value;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn install(vm: &mut Vm) {
    let system = vm.classes.system.clone();
    vm.bind_static_native(&system, "clock", clock);
    vm.bind_static_native(&system, "gc()", gc);
    vm.bind_static_native(&system, "importModule(_)", import_module);
    vm.bind_static_native(&system, "getModuleVariable(_,_)", get_module_variable);
    vm.bind_static_native(&system, "writeString_(_)", write_string);
}

fn clock(_vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0);
    ok(Value::Number(secs))
}

fn gc(vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    crate::gc::collect(vm);
    ok(Value::Null)
}

fn import_module(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let name = match as_str(&args[1]) {
        Ok(s) => s,
        Err(e) => return err(e),
    };
    match crate::module::import_module(vm, &name) {
        Ok(()) => ok(Value::Null),
        Err(e) => err(e),
    }
}

fn get_module_variable(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let module_name = match as_str(&args[1]) {
        Ok(s) => s,
        Err(e) => return err(e),
    };
    let var_name = match as_str(&args[2]) {
        Ok(s) => s,
        Err(e) => return err(e),
    };
    match crate::module::get_module_variable(vm, &module_name, &var_name) {
        Ok(v) => ok(v),
        Err(e) => err(e),
    }
}

fn write_string(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let s = match as_str(&args[1]) {
        Ok(s) => s,
        Err(e) => return err(e),
    };
    print!("{s}");
    let _ = std::io::stdout().flush();
    ok(Value::Null)
}

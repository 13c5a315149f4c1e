//! `Class` (§4.10): introspection methods available on class values
//! themselves (`SomeClass.name`, `SomeClass.supertype`, ...).

use super::{alloc_str, ok};
use crate::vm::{with_class, NativeOutcome, Vm};
use ember_core::Value;

pub(crate) fn install(vm: &mut Vm) {
    let class = vm.classes.class.clone();
    vm.bind_native(&class, "name", name);
    vm.bind_native(&class, "toString", to_string);
    vm.bind_native(&class, "supertype", supertype);
}

fn name(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let class_obj = args[0].as_object().expect("receiver is a class").clone();
    let name = with_class(&class_obj, |c| c.name.clone());
    ok(alloc_str(vm, name))
}

fn to_string(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    name(vm, args)
}

fn supertype(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let class_obj = args[0].as_object().expect("receiver is a class").clone();
    let superclass = with_class(&class_obj, |c| c.superclass.clone());
    ok(superclass.map(Value::Object).unwrap_or(Value::Null))
}

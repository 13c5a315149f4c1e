//! `Object` (§4.10): the methods every value inherits unless its own class
//! overrides them.

use super::{alloc_str, err, ok};
use crate::vm::{with_class, NativeOutcome, Vm};
use ember_core::object::HeapObj;
use ember_core::Value;

pub(crate) fn install(vm: &mut Vm) {
    let object = vm.classes.object.clone();
    vm.bind_native(&object, "!()", not_);
    vm.bind_native(&object, "==(_)", eq);
    vm.bind_native(&object, "!=(_)", ne);
    vm.bind_native(&object, "is(_)", is);
    vm.bind_native(&object, "toString", to_string);
    vm.bind_native(&object, "type", type_);
}

fn not_(_vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    ok(Value::Bool(false))
}

fn eq(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(Value::Bool(args[0] == args[1]))
}

fn ne(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(Value::Bool(args[0] != args[1]))
}

fn is(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let Some(class_obj) = args[1].as_object().cloned().filter(|o| matches!(&*o.borrow(), HeapObj::Class(_))) else {
        return err("right operand of 'is' must be a class");
    };
    let value_class = vm.class_of(&args[0]);
    ok(Value::Bool(vm.class_is(&value_class, &class_obj)))
}

fn to_string(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let class = vm.class_of(&args[0]);
    let name = with_class(&class, |c| c.name.clone());
    ok(alloc_str(vm, format!("instance of {name}")))
}

fn type_(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let class = vm.class_of(&args[0]);
    ok(Value::Object(class))
}

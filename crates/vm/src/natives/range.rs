//! `Range` (§4.10). `iterate`/`iteratorValue` walk from `from` to `to`
//! inclusive, one step per call, ascending or descending per their relative
//! order.

use super::{err, ok};
use crate::vm::{NativeOutcome, Vm};
use ember_core::object::HeapObj;
use ember_core::Value;

pub(crate) fn install(vm: &mut Vm) {
    let range = vm.classes.range.clone();
    vm.bind_native(&range, "from", from);
    vm.bind_native(&range, "to", to);
    vm.bind_native(&range, "min", min);
    vm.bind_native(&range, "max", max);
    vm.bind_native(&range, "iterate(_)", iterate);
    vm.bind_native(&range, "iteratorValue(_)", iterator_value);
}

fn with_range<R>(args: &[Value], f: impl FnOnce(&ember_core::object::ObjRange) -> R) -> R {
    match &*args[0].as_object().expect("receiver is a range").borrow() {
        HeapObj::Range(r) => f(r),
        _ => unreachable!("receiver is a range"),
    }
}

fn from(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(Value::Number(with_range(args, |r| r.from)))
}

fn to(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(Value::Number(with_range(args, |r| r.to)))
}

fn min(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(Value::Number(with_range(args, |r| r.from.min(r.to))))
}

fn max(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(Value::Number(with_range(args, |r| r.from.max(r.to))))
}

fn iterate(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let (from, to, ascending) = with_range(args, |r| (r.from, r.to, r.from <= r.to));
    match &args[1] {
        Value::Null => ok(Value::Number(from)),
        Value::Number(cur) => {
            let next = if ascending { cur + 1.0 } else { cur - 1.0 };
            let done = if ascending { next > to } else { next < to };
            if done {
                ok(Value::Null)
            } else {
                ok(Value::Number(next))
            }
        }
        _ => err("iterator must be a number or null"),
    }
}

fn iterator_value(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match &args[1] {
        Value::Number(n) => ok(Value::Number(*n)),
        _ => err("iterator value out of bounds"),
    }
}

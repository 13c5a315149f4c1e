//! `List` (§4.10). `iterate`/`iteratorValue` implement the opaque,
//! 1-based-internally iterator protocol the `for` desugaring drives.

use super::{alloc_list, as_num, err, ok};
use crate::vm::{NativeOutcome, Vm};
use ember_core::object::HeapObj;
use ember_core::Value;

pub(crate) fn install(vm: &mut Vm) {
    let list = vm.classes.list.clone();
    vm.bind_static_native(&list, "new()", new);

    vm.bind_native(&list, "[_]", subscript);
    vm.bind_native(&list, "[_]=(_)", subscript_set);
    vm.bind_native(&list, "add(_)", add);
    vm.bind_native(&list, "addCore_(_)", add);
    vm.bind_native(&list, "insert(_,_)", insert);
    vm.bind_native(&list, "removeAt(_)", remove_at);
    vm.bind_native(&list, "clear()", clear);
    vm.bind_native(&list, "count", count);
    vm.bind_native(&list, "iterate(_)", iterate);
    vm.bind_native(&list, "iteratorValue(_)", iterator_value);
}

fn new(vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    ok(alloc_list(vm, Vec::new()))
}

fn resolve_index(len: usize, n: f64) -> Option<usize> {
    let idx = n as i64;
    let idx = if idx < 0 { idx + len as i64 } else { idx };
    if idx < 0 || idx as usize >= len {
        None
    } else {
        Some(idx as usize)
    }
}

fn subscript(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a list").clone();
    let n = match as_num(&args[1]) {
        Ok(n) => n,
        Err(e) => return err(e),
    };
    let result = match &*receiver.borrow() {
        HeapObj::List(l) => match resolve_index(l.elements.len(), n) {
            Some(i) => ok(l.elements[i].clone()),
            None => err("list index out of bounds"),
        },
        _ => unreachable!("receiver is a list"),
    };
    result
}

fn subscript_set(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a list").clone();
    let n = match as_num(&args[1]) {
        Ok(n) => n,
        Err(e) => return err(e),
    };
    let value = args[2].clone();
    let result = match &mut *receiver.borrow_mut() {
        HeapObj::List(l) => match resolve_index(l.elements.len(), n) {
            Some(i) => {
                l.elements[i] = value.clone();
                ok(value)
            }
            None => err("list index out of bounds"),
        },
        _ => unreachable!("receiver is a list"),
    };
    result
}

fn add(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a list").clone();
    let value = args[1].clone();
    let result = match &mut *receiver.borrow_mut() {
        HeapObj::List(l) => {
            l.elements.push(value.clone());
            ok(value)
        }
        _ => unreachable!("receiver is a list"),
    };
    result
}

fn insert(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a list").clone();
    let n = match as_num(&args[1]) {
        Ok(n) => n,
        Err(e) => return err(e),
    };
    let value = args[2].clone();
    let result = match &mut *receiver.borrow_mut() {
        HeapObj::List(l) => {
            let len = l.elements.len();
            let idx = n as i64;
            let idx = if idx < 0 { idx + len as i64 + 1 } else { idx };
            if idx < 0 || idx as usize > len {
                return err("list index out of bounds");
            }
            l.elements.insert(idx as usize, value.clone());
            ok(value)
        }
        _ => unreachable!("receiver is a list"),
    };
    result
}

fn remove_at(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a list").clone();
    let n = match as_num(&args[1]) {
        Ok(n) => n,
        Err(e) => return err(e),
    };
    let result = match &mut *receiver.borrow_mut() {
        HeapObj::List(l) => match resolve_index(l.elements.len(), n) {
            Some(i) => ok(l.elements.remove(i)),
            None => err("list index out of bounds"),
        },
        _ => unreachable!("receiver is a list"),
    };
    result
}

fn clear(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a list").clone();
    let result = match &mut *receiver.borrow_mut() {
        HeapObj::List(l) => {
            l.elements.clear();
            ok(Value::Null)
        }
        _ => unreachable!("receiver is a list"),
    };
    result
}

fn count(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a list").clone();
    let result = match &*receiver.borrow() {
        HeapObj::List(l) => ok(Value::Number(l.elements.len() as f64)),
        _ => unreachable!("receiver is a list"),
    };
    result
}

fn iterate(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a list").clone();
    let len = match &*receiver.borrow() {
        HeapObj::List(l) => l.elements.len(),
        _ => unreachable!("receiver is a list"),
    };
    let next = match &args[1] {
        Value::Null => {
            if len == 0 {
                return ok(Value::Null);
            }
            1.0
        }
        Value::Number(i) => {
            let next = i + 1.0;
            if (next as usize) > len {
                return ok(Value::Null);
            }
            next
        }
        _ => return err("iterator must be a number or null"),
    };
    ok(Value::Number(next))
}

fn iterator_value(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a list").clone();
    let i = match as_num(&args[1]) {
        Ok(n) => n as usize,
        Err(e) => return err(e),
    };
    let result = match &*receiver.borrow() {
        HeapObj::List(l) if i >= 1 && i <= l.elements.len() => ok(l.elements[i - 1].clone()),
        HeapObj::List(_) => err("iterator value out of bounds"),
        _ => unreachable!("receiver is a list"),
    };
    result
}

//! `Map` (§4.10). `iterate`/`iteratorValue` walk entries in the open-
//! addressed table's slot order; `iteratorValue` returns a 2-element
//! `[key, value]` `List` rather than the base spec's separate `MapEntry`
//! type, a deliberate simplification (see `DESIGN.md`).

use super::{alloc_list, as_num, err, new_map, ok};
use crate::vm::{NativeOutcome, Vm};
use ember_core::object::HeapObj;
use ember_core::{value_hash, Value};

pub(crate) fn install(vm: &mut Vm) {
    let map = vm.classes.map.clone();
    vm.bind_static_native(&map, "new()", new);

    vm.bind_native(&map, "[_]", subscript);
    vm.bind_native(&map, "[_]=(_)", subscript_set);
    vm.bind_native(&map, "addCore_(_,_)", subscript_set);
    vm.bind_native(&map, "remove(_)", remove);
    vm.bind_native(&map, "clear()", clear);
    vm.bind_native(&map, "containsKey(_)", contains_key);
    vm.bind_native(&map, "count", count);
    vm.bind_native(&map, "iterate(_)", iterate);
    vm.bind_native(&map, "iteratorValue(_)", iterator_value);
}

fn new(vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    ok(new_map(vm))
}

fn hash_of(v: &Value) -> Result<u64, String> {
    value_hash(v).ok_or_else(|| "key is not a hashable type".to_string())
}

fn subscript(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a map").clone();
    let hash = match hash_of(&args[1]) {
        Ok(h) => h,
        Err(e) => return err(e),
    };
    let result = match &*receiver.borrow() {
        HeapObj::Map(m) => ok(m.get(hash, &args[1]).cloned().unwrap_or(Value::Null)),
        _ => unreachable!("receiver is a map"),
    };
    result
}

fn subscript_set(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a map").clone();
    let hash = match hash_of(&args[1]) {
        Ok(h) => h,
        Err(e) => return err(e),
    };
    let value = args[2].clone();
    let result = match &mut *receiver.borrow_mut() {
        HeapObj::Map(m) => {
            m.insert(hash, args[1].clone(), value.clone());
            ok(value)
        }
        _ => unreachable!("receiver is a map"),
    };
    result
}

fn remove(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a map").clone();
    let hash = match hash_of(&args[1]) {
        Ok(h) => h,
        Err(e) => return err(e),
    };
    let result = match &mut *receiver.borrow_mut() {
        HeapObj::Map(m) => ok(m.remove(hash, &args[1]).unwrap_or(Value::Null)),
        _ => unreachable!("receiver is a map"),
    };
    result
}

fn clear(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a map").clone();
    let result = match &mut *receiver.borrow_mut() {
        HeapObj::Map(m) => {
            m.clear();
            ok(Value::Null)
        }
        _ => unreachable!("receiver is a map"),
    };
    result
}

fn contains_key(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a map").clone();
    let hash = match hash_of(&args[1]) {
        Ok(h) => h,
        Err(e) => return err(e),
    };
    let result = match &*receiver.borrow() {
        HeapObj::Map(m) => ok(Value::Bool(m.contains(hash, &args[1]))),
        _ => unreachable!("receiver is a map"),
    };
    result
}

fn count(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a map").clone();
    let result = match &*receiver.borrow() {
        HeapObj::Map(m) => ok(Value::Number(m.len() as f64)),
        _ => unreachable!("receiver is a map"),
    };
    result
}

fn iterate(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a map").clone();
    let len = match &*receiver.borrow() {
        HeapObj::Map(m) => m.len(),
        _ => unreachable!("receiver is a map"),
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

fn iterator_value(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let receiver = args[0].as_object().expect("receiver is a map").clone();
    let i = match as_num(&args[1]) {
        Ok(n) => n as usize,
        Err(e) => return err(e),
    };
    let entry = match &*receiver.borrow() {
        HeapObj::Map(m) => m.iter().nth(i.wrapping_sub(1)).map(|(k, v)| (k.clone(), v.clone())),
        _ => unreachable!("receiver is a map"),
    };
    match entry {
        Some((k, v)) => ok(alloc_list(vm, vec![k, v])),
        None => err("iterator value out of bounds"),
    }
}

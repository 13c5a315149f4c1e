//! `String` (§4.10). Indices are byte offsets except `count`, which counts
//! Unicode scalar values, matching `codePointAt_`/`byteAt_`'s split between
//! "byte" and "code point" views of the same buffer.

use super::{alloc_str, as_num, as_str, err, ok};
use crate::vm::{NativeOutcome, Vm};
use ember_core::object::HeapObj;
use ember_core::Value;

pub(crate) fn install(vm: &mut Vm) {
    let string = vm.classes.string.clone();
    vm.bind_static_native(&string, "fromCodePoint(_)", from_code_point);

    vm.bind_native(&string, "+(_)", concat);
    vm.bind_native(&string, "[_]", subscript);
    vm.bind_native(&string, "byteAt_(_)", byte_at);
    vm.bind_native(&string, "byteCount_", byte_count);
    vm.bind_native(&string, "codePointAt_(_)", code_point_at);
    vm.bind_native(&string, "contains(_)", contains);
    vm.bind_native(&string, "indexOf(_)", index_of);
    vm.bind_native(&string, "startsWith(_)", starts_with);
    vm.bind_native(&string, "endsWith(_)", ends_with);
    vm.bind_native(&string, "toString", to_string);
    vm.bind_native(&string, "count", count);
}

fn concat(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match (as_str(&args[0]), as_str(&args[1])) {
        (Ok(a), Ok(b)) => ok(alloc_str(vm, format!("{a}{b}"))),
        (Err(e), _) | (_, Err(e)) => err(e),
    }
}

fn subscript(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let s = match as_str(&args[0]) {
        Ok(s) => s,
        Err(e) => return err(e),
    };
    if let Some(range_obj) = args[1].as_object() {
        if let HeapObj::Range(r) = &*range_obj.borrow() {
            let bytes = s.as_bytes();
            let (lo, hi) = if r.from <= r.to { (r.from, r.to) } else { (r.to, r.from) };
            let lo = (lo as usize).min(bytes.len());
            let hi = (hi as usize + 1).min(bytes.len());
            let slice = if lo <= hi { &bytes[lo..hi] } else { &[] };
            return ok(alloc_str(vm, String::from_utf8_lossy(slice).into_owned()));
        }
    }
    let idx = match as_num(&args[1]) {
        Ok(n) => n as i64,
        Err(e) => return err(e),
    };
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let idx = if idx < 0 { idx + len } else { idx };
    if idx < 0 || idx >= len {
        return err("string index out of bounds");
    }
    ok(alloc_str(vm, chars[idx as usize].to_string()))
}

fn byte_at(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let s = match as_str(&args[0]) {
        Ok(s) => s,
        Err(e) => return err(e),
    };
    let idx = match as_num(&args[1]) {
        Ok(n) => n as usize,
        Err(e) => return err(e),
    };
    match s.as_bytes().get(idx) {
        Some(b) => ok(Value::Number(*b as f64)),
        None => err("byte index out of bounds"),
    }
}

fn byte_count(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match as_str(&args[0]) {
        Ok(s) => ok(Value::Number(s.as_bytes().len() as f64)),
        Err(e) => err(e),
    }
}

fn code_point_at(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let s = match as_str(&args[0]) {
        Ok(s) => s,
        Err(e) => return err(e),
    };
    let idx = match as_num(&args[1]) {
        Ok(n) => n as usize,
        Err(e) => return err(e),
    };
    match s[idx..].chars().next() {
        Some(c) => ok(Value::Number(c as u32 as f64)),
        None => err("byte index out of bounds"),
    }
}

fn contains(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match (as_str(&args[0]), as_str(&args[1])) {
        (Ok(a), Ok(b)) => ok(Value::Bool(a.contains(&b))),
        (Err(e), _) | (_, Err(e)) => err(e),
    }
}

fn index_of(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match (as_str(&args[0]), as_str(&args[1])) {
        (Ok(a), Ok(b)) => ok(Value::Number(a.find(&b).map(|i| i as f64).unwrap_or(-1.0))),
        (Err(e), _) | (_, Err(e)) => err(e),
    }
}

fn starts_with(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match (as_str(&args[0]), as_str(&args[1])) {
        (Ok(a), Ok(b)) => ok(Value::Bool(a.starts_with(&b))),
        (Err(e), _) | (_, Err(e)) => err(e),
    }
}

fn ends_with(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match (as_str(&args[0]), as_str(&args[1])) {
        (Ok(a), Ok(b)) => ok(Value::Bool(a.ends_with(&b))),
        (Err(e), _) | (_, Err(e)) => err(e),
    }
}

fn to_string(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(args[0].clone())
}

fn count(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match as_str(&args[0]) {
        Ok(s) => ok(Value::Number(s.chars().count() as f64)),
        Err(e) => err(e),
    }
}

fn from_code_point(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let n = match as_num(&args[1]) {
        Ok(n) => n as u32,
        Err(e) => return err(e),
    };
    match char::from_u32(n) {
        Some(c) => ok(alloc_str(vm, c.to_string())),
        None => err("invalid code point"),
    }
}

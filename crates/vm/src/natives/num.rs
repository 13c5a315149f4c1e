//! `Num` (§4.10): arithmetic, comparison, bitwise, and classification
//! methods on `f64`.

use super::{alloc_range, alloc_str, as_num, err, ok};
use crate::vm::{NativeOutcome, Vm};
use ember_core::Value;

pub(crate) fn install(vm: &mut Vm) {
    let num = vm.classes.num.clone();
    vm.bind_static_native(&num, "fromString(_)", from_string);
    vm.bind_static_native(&num, "pi", pi);
    vm.bind_static_native(&num, "min(_,_)", min);
    vm.bind_static_native(&num, "max(_,_)", max);
    vm.bind_static_native(&num, "largest", largest);
    vm.bind_static_native(&num, "smallest", smallest);

    vm.bind_native(&num, "+(_)", add);
    vm.bind_native(&num, "-(_)", sub);
    vm.bind_native(&num, "*(_)", mul);
    vm.bind_native(&num, "/(_)", div);
    vm.bind_native(&num, "%(_)", rem);
    vm.bind_native(&num, ">(_)", gt);
    vm.bind_native(&num, ">=(_)", ge);
    vm.bind_native(&num, "<(_)", lt);
    vm.bind_native(&num, "<=(_)", le);
    vm.bind_native(&num, "&(_)", bitand);
    vm.bind_native(&num, "|(_)", bitor);
    vm.bind_native(&num, ">>(_)", shr);
    vm.bind_native(&num, "<<(_)", shl);
    vm.bind_native(&num, "~()", bitnot);
    vm.bind_native(&num, "-()", neg);
    vm.bind_native(&num, "..(_)", range_ctor);
    vm.bind_native(&num, "abs", abs);
    vm.bind_native(&num, "acos", acos);
    vm.bind_native(&num, "asin", asin);
    vm.bind_native(&num, "atan", atan);
    vm.bind_native(&num, "ceil", ceil);
    vm.bind_native(&num, "cos", cos);
    vm.bind_native(&num, "floor", floor);
    vm.bind_native(&num, "sin", sin);
    vm.bind_native(&num, "sqrt", sqrt);
    vm.bind_native(&num, "tan", tan);
    vm.bind_native(&num, "truncate", truncate);
    vm.bind_native(&num, "fraction", fraction);
    vm.bind_native(&num, "isInfinity", is_infinity);
    vm.bind_native(&num, "isInteger", is_integer);
    vm.bind_native(&num, "isNan", is_nan);
    vm.bind_native(&num, "toString", to_string);
    vm.bind_native(&num, "==(_)", eq);
    vm.bind_native(&num, "!=(_)", ne);
}

fn binop(args: &[Value], f: impl FnOnce(f64, f64) -> f64) -> Result<f64, String> {
    Ok(f(as_num(&args[0])?, as_num(&args[1])?))
}

fn add(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(args, |a, b| a + b) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn sub(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(args, |a, b| a - b) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn mul(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(args, |a, b| a * b) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn div(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(args, |a, b| a / b) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn rem(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(args, |a, b| a % b) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn cmp(args: &[Value], f: impl FnOnce(f64, f64) -> bool) -> Result<bool, String> {
    Ok(f(as_num(&args[0])?, as_num(&args[1])?))
}

fn gt(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    cmp(args, |a, b| a > b).map(Value::Bool).map(ok).unwrap_or_else(err)
}

fn ge(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    cmp(args, |a, b| a >= b).map(Value::Bool).map(ok).unwrap_or_else(err)
}

fn lt(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    cmp(args, |a, b| a < b).map(Value::Bool).map(ok).unwrap_or_else(err)
}

fn le(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    cmp(args, |a, b| a <= b).map(Value::Bool).map(ok).unwrap_or_else(err)
}

fn bitand(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(args, |a, b| ((a as i64) & (b as i64)) as f64) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn bitor(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(args, |a, b| ((a as i64) | (b as i64)) as f64) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn shl(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(args, |a, b| ((a as i64) << (b as i64)) as f64) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn shr(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(args, |a, b| ((a as i64) >> (b as i64)) as f64) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn bitnot(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match as_num(&args[0]) {
        Ok(n) => ok(Value::Number(!(n as i64) as f64)),
        Err(e) => err(e),
    }
}

fn neg(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match as_num(&args[0]) {
        Ok(n) => ok(Value::Number(-n)),
        Err(e) => err(e),
    }
}

fn range_ctor(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    let from = match as_num(&args[0]) {
        Ok(n) => n,
        Err(e) => return err(e),
    };
    let to = match as_num(&args[1]) {
        Ok(n) => n,
        Err(e) => return err(e),
    };
    ok(alloc_range(vm, from, to))
}

macro_rules! unary_math {
    ($name:ident, $f:expr) => {
        fn $name(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
            match as_num(&args[0]) {
                Ok(n) => ok(Value::Number(($f)(n))),
                Err(e) => err(e),
            }
        }
    };
}

unary_math!(abs, f64::abs);
unary_math!(acos, f64::acos);
unary_math!(asin, f64::asin);
unary_math!(atan, f64::atan);
unary_math!(ceil, f64::ceil);
unary_math!(cos, f64::cos);
unary_math!(floor, f64::floor);
unary_math!(sin, f64::sin);
unary_math!(sqrt, f64::sqrt);
unary_math!(tan, f64::tan);
unary_math!(truncate, f64::trunc);
unary_math!(fraction, f64::fract);

fn is_infinity(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match as_num(&args[0]) {
        Ok(n) => ok(Value::Bool(n.is_infinite())),
        Err(e) => err(e),
    }
}

fn is_integer(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match as_num(&args[0]) {
        Ok(n) => ok(Value::Bool(n.is_finite() && n.fract() == 0.0)),
        Err(e) => err(e),
    }
}

fn is_nan(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match as_num(&args[0]) {
        Ok(n) => ok(Value::Bool(n.is_nan())),
        Err(e) => err(e),
    }
}

fn to_string(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match as_num(&args[0]) {
        Ok(n) => ok(alloc_str(vm, format!("{n}"))),
        Err(e) => err(e),
    }
}

fn eq(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(Value::Bool(args[0] == args[1]))
}

fn ne(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    ok(Value::Bool(args[0] != args[1]))
}

fn from_string(vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match super::as_str(&args[1]) {
        Ok(s) => ok(s.trim().parse::<f64>().map(Value::Number).unwrap_or(Value::Null)),
        Err(e) => err(e),
    }
}

fn pi(_vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    ok(Value::Number(std::f64::consts::PI))
}

fn min(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(&args[1..], f64::min) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn max(_vm: &mut Vm, args: &[Value]) -> NativeOutcome {
    match binop(&args[1..], f64::max) {
        Ok(n) => ok(Value::Number(n)),
        Err(e) => err(e),
    }
}

fn largest(_vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    ok(Value::Number(f64::MAX))
}

fn smallest(_vm: &mut Vm, _args: &[Value]) -> NativeOutcome {
    ok(Value::Number(f64::MIN_POSITIVE))
}

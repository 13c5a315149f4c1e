//! The tagged `Value` type.
//!
//! A `Value` is the uniform type every stack slot, constant-pool entry and
//! field holds: `Undefined`, `Null`, the two booleans, a `Number` (IEEE-754
//! `f64`), or an `Object` reference onto the heap. There is no `Rc`-free
//! representation for numbers-vs-objects distinction beyond this enum; the
//! "16 bytes, NaN-boxing-free" layout the base spec describes is an
//! implementation detail of the reference VM, not an observable contract,
//! so this crate uses a plain tagged enum rather than bit-packing a float.

use crate::object::Obj;
use std::fmt;

/// A language-level value.
#[derive(Clone)]
pub enum Value {
    /// Used only for uninitialized module-variable slots; never observable
    /// from script code (see `Signature`/forward module references).
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Object(Obj),
}

impl Value {
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn is_truthy(&self) -> bool {
        !self.is_falsey()
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Obj> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "<undefined>"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Object(o) => write!(f, "<object {:p}>", std::rc::Rc::as_ptr(o)),
        }
    }
}

/// Structural equality for strings and ranges, identity for other object
/// kinds, numeric equality for numbers, tag equality for singletons.
///
/// This mirrors §3 ("Value (tagged)") of the base specification exactly.
/// Hash for use as a `Map` key, consistent with `PartialEq` (§8: "`hash(s1)
/// == hash(s2)` whenever `s1.bytes == s2.bytes`"). Returns `None` for
/// object kinds that are not valid map keys (lists, maps, instances,
/// functions, closures, modules, fibers) — callers surface this as the
/// "key of non-hashable type" runtime error (§7).
pub fn value_hash(v: &Value) -> Option<u64> {
    use crate::object::HeapObj;
    match v {
        Value::Undefined => Some(0),
        Value::Null => Some(1),
        Value::Bool(b) => Some(if *b { 2 } else { 3 }),
        Value::Number(n) => Some(n.to_bits()),
        Value::Object(o) => match &*o.borrow() {
            HeapObj::Str(s) => Some(s.hash),
            HeapObj::Range(r) => {
                let mut h = r.from.to_bits();
                h = h.wrapping_mul(0x100000001b3) ^ r.to.to_bits();
                Some(h)
            }
            HeapObj::Class(c) => Some(crate::object::fnv1a(c.name.as_bytes())),
            _ => None,
        },
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use crate::object::HeapObj;
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => {
                if std::rc::Rc::ptr_eq(a, b) {
                    return true;
                }
                match (&*a.borrow(), &*b.borrow()) {
                    (HeapObj::Str(sa), HeapObj::Str(sb)) => sa.value == sb.value,
                    (HeapObj::Range(ra), HeapObj::Range(rb)) => {
                        ra.from == rb.from && ra.to == rb.to && ra.inclusive == rb.inclusive
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

//! Method signatures (§4.5): the canonical string form that gets interned
//! into `allMethodNames`, and the `{ type, name, length, argNum }` shape
//! the compiler builds while parsing a method header or a call site.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    Getter,
    Setter,
    Method,
    Constructor,
    Subscript,
    SubscriptSetter,
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub kind: SignatureKind,
    pub name: String,
    pub arg_count: u8,
}

impl Signature {
    pub fn getter(name: impl Into<String>) -> Self {
        Signature { kind: SignatureKind::Getter, name: name.into(), arg_count: 0 }
    }

    pub fn setter(name: impl Into<String>) -> Self {
        Signature { kind: SignatureKind::Setter, name: name.into(), arg_count: 1 }
    }

    pub fn method(name: impl Into<String>, arg_count: u8) -> Self {
        Signature { kind: SignatureKind::Method, name: name.into(), arg_count }
    }

    pub fn constructor(arg_count: u8) -> Self {
        Signature { kind: SignatureKind::Constructor, name: "new".to_string(), arg_count }
    }

    /// `index_count` is the number of `_` inside the brackets; for
    /// `SubscriptSetter` the RHS `_` is not counted here (it is implicit
    /// in the `=(_)` suffix), matching §4.10's "internally the setter's
    /// argNum is one more than the number of index slots".
    pub fn subscript(index_count: u8) -> Self {
        Signature { kind: SignatureKind::Subscript, name: String::new(), arg_count: index_count }
    }

    pub fn subscript_setter(index_count: u8) -> Self {
        Signature {
            kind: SignatureKind::SubscriptSetter,
            name: String::new(),
            arg_count: index_count + 1,
        }
    }

    /// The canonical string form interned into `allMethodNames`.
    pub fn canonical(&self) -> String {
        match self.kind {
            SignatureKind::Getter => self.name.clone(),
            SignatureKind::Setter => format!("{}=(_)", self.name),
            SignatureKind::Method => format!("{}({})", self.name, underscores(self.arg_count)),
            SignatureKind::Constructor => {
                format!("new({})", underscores(self.arg_count))
            }
            SignatureKind::Subscript => format!("[{}]", underscores(self.arg_count)),
            SignatureKind::SubscriptSetter => {
                let index_count = self.arg_count - 1;
                format!("[{}]=(_)", underscores(index_count))
            }
        }
    }
}

fn underscores(n: u8) -> String {
    std::iter::repeat("_").take(n as usize).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms_match_spec_table() {
        assert_eq!(Signature::getter("foo").canonical(), "foo");
        assert_eq!(Signature::setter("foo").canonical(), "foo=(_)");
        assert_eq!(Signature::method("bar", 2).canonical(), "bar(_,_)");
        assert_eq!(Signature::constructor(1).canonical(), "new(_)");
        assert_eq!(Signature::subscript(2).canonical(), "[_,_]");
        assert_eq!(Signature::subscript(1).canonical(), "[_]");
        assert_eq!(Signature::subscript_setter(1).canonical(), "[_]=(_)");
    }
}

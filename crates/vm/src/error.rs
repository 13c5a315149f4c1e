//! Errors that can abort `execute_module` itself, as opposed to in-language
//! runtime errors, which live in `ObjFiber::error` (§7).
//!
//! Hand-rolled, mirroring `ember-compiler::error::CompileError`: a plain
//! enum implementing `std::error::Error` + `Display`, no `thiserror`.

use std::fmt;

#[derive(Debug, Clone)]
pub enum VmError {
    /// Lex/parse/compile failure before any bytecode ran.
    Compile(ember_compiler::CompileError),
    /// An uncaught runtime error reached the top of the fiber stack
    /// (§7: "a top-level runtime error terminates the VM").
    Runtime(String),
    /// The driver asked for a module whose source could not be read.
    ModuleNotFound(String),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::Compile(e) => write!(f, "{e}"),
            VmError::Runtime(msg) => write!(f, "runtime error: {msg}"),
            VmError::ModuleNotFound(name) => write!(f, "could not find module '{name}'"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<ember_compiler::CompileError> for VmError {
    fn from(e: ember_compiler::CompileError) -> Self {
        VmError::Compile(e)
    }
}

pub type VmResult<T> = Result<T, VmError>;

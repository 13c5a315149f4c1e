//! Compile-time error type.
//!
//! Hand-rolled, mirroring `ember-vm`'s sibling error types and
//! `seqc::codegen::CodeGenError` in the teacher codebase: a plain enum
//! implementing `std::error::Error` + `Display`, no `thiserror`.

use std::fmt;

#[derive(Debug, Clone)]
pub struct CompileError {
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        CompileError { file: file.into(), line, message: message.into() }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

pub type CompileResult<T> = Result<T, CompileError>;

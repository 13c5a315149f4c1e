//! Lexer, Pratt parser, and bytecode emitter for Ember (§4).
//!
//! `ember-compiler` turns source text into an `ObjFn` ready for
//! `ember-vm` to run: no separate AST stage, no separate linking step —
//! `Compiler::compile_module` is the one entry point, producing the
//! top-level `<script>` function for a module.

pub mod compiler;
pub mod error;
pub mod lexer;
pub mod signature;
pub mod token;

pub use compiler::Compiler;
pub use error::{CompileError, CompileResult};
pub use lexer::Lexer;
pub use token::{Token, TokenKind};

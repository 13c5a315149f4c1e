//! Ember Core: value and object model shared by the compiler and the VM
//!
//! This crate provides the language-level primitives that the compiler
//! (`ember-compiler`) and the virtual machine (`ember-vm`) both need to
//! agree on:
//!
//! - `Value`: the tagged stack/constant-pool value (Undefined, Null,
//!   booleans, Number, Object).
//! - `object`: the eleven heap-object variants (string, list, map, range,
//!   function, closure, upvalue, class, instance, module, fiber) and the
//!   allocator that links every one of them onto the VM-global object list.
//! - `symbol`: the growable name-interning table used for `allMethodNames`
//!   and module-variable name tables.
//! - `opcode`: the bytecode instruction set, shared so the compiler emits
//!   exactly what the VM dispatch loop decodes.
//! - `signature`: canonical method-signature construction, used by the
//!   compiler to intern method names and by the VM to look methods up.
//!
//! # Modules
//!
//! - `value`: the tagged `Value` type and its equality/truthiness rules.
//! - `object`: heap objects and the `Heap` allocator.
//! - `symbol`: `SymbolTable`, a name -> stable index interner.
//! - `opcode`: `Op`, the fixed-width bytecode instruction set.
//! - `signature`: `Signature`, canonical method-signature strings.

pub mod object;
pub mod opcode;
pub mod signature;
pub mod symbol;
pub mod value;

pub use object::{
    Heap, HeapObj, ObjClass, ObjClosure, ObjFiber, ObjFn, ObjInstance, ObjList, ObjMap,
    ObjModule, ObjRange, ObjString, ObjUpvalue, Obj, UpvalueState,
};
pub use opcode::Op;
pub use signature::{Signature, SignatureKind};
pub use symbol::SymbolTable;
pub use value::{value_hash, Value};

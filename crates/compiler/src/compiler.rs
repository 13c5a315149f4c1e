//! The single-pass Pratt-parser compiler (§4.2-§4.6).
//!
//! One `Unit` per compile unit (module body, function, method, or
//! block-argument lambda, §4.2), each owning an in-progress `ObjFn`. The
//! compiler fuses parsing and bytecode emission in one pass, the way the
//! base spec's reference compiler does — there is no intermediate AST.
//! Every binary and unary operator compiles to a method call (§4.5):
//! `a + b` is `a.+(b)`, dispatched the same as any other message send.

use crate::error::{CompileError, CompileResult};
use crate::lexer::Lexer;
use crate::signature as names;
use crate::token::{Token, TokenKind};
use ember_core::object::{Heap, HeapObj, ObjFn, ObjString};
use ember_core::opcode::raw;
use ember_core::signature::Signature;
use ember_core::{Obj, SymbolTable, Value};

const MAX_LOCALS: usize = 128;
const MAX_UPVALUES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Lowest,
    Assign,
    Condition,
    LogicOr,
    LogicAnd,
    Equal,
    Is,
    Compare,
    BitOr,
    BitAnd,
    BitShift,
    Range,
    Term,
    Factor,
    Unary,
    Call,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Lowest,
            Lowest => Assign,
            Assign => Condition,
            Condition => LogicOr,
            LogicOr => LogicAnd,
            LogicAnd => Equal,
            Equal => Is,
            Is => Compare,
            Compare => BitOr,
            BitOr => BitAnd,
            BitAnd => BitShift,
            BitShift => Range,
            Range => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Call,
        }
    }
}

struct Local {
    name: String,
    depth: i32,
    is_captured: bool,
}

struct UpvalueDesc {
    is_local: bool,
    index: u8,
}

struct LoopRecord {
    /// Offset of the condition re-check, where `continue` jumps back to.
    start: usize,
    depth: i32,
    /// Offsets of `raw::END` placeholders emitted for `break`, patched to
    /// `Jump` once the loop's end is known.
    breaks: Vec<usize>,
}

struct ClassInfo {
    /// Field names declared so far, in first-use order; index into this
    /// vector is the `LOAD_THIS_FIELD`/`STORE_THIS_FIELD` operand.
    field_names: Vec<String>,
}

/// One in-progress `ObjFn`: its code, constants, and locals/upvalues
/// bookkeeping. The compiler keeps a stack of these, one per nested
/// function/method/block currently being compiled (§4.2).
struct Unit {
    code: Vec<u8>,
    lines: Vec<u32>,
    constants: Vec<Value>,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
    num_slots: i32,
    max_slots: usize,
    loops: Vec<LoopRecord>,
    arity: u8,
    super_slots: Vec<u16>,
}

impl Unit {
    fn new(is_method: bool) -> Self {
        let slot0_name = if is_method { "this" } else { "" };
        Unit {
            code: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
            locals: vec![Local { name: slot0_name.to_string(), depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
            num_slots: 1,
            max_slots: 1,
            loops: Vec::new(),
            arity: 0,
            super_slots: Vec::new(),
        }
    }
}

pub struct Compiler<'h> {
    lexer: Lexer,
    cur: Token,
    prev: Token,
    file: String,
    heap: &'h mut Heap,
    method_names: &'h mut SymbolTable,
    units: Vec<Unit>,
    classes: Vec<ClassInfo>,
    module: Obj,
}

type PrefixFn<'h> = fn(&mut Compiler<'h>, bool) -> CompileResult<()>;
type InfixFn<'h> = fn(&mut Compiler<'h>, bool) -> CompileResult<()>;

struct Rule<'h> {
    prefix: Option<PrefixFn<'h>>,
    infix: Option<InfixFn<'h>>,
    precedence: Precedence,
    operator: Option<&'static str>,
}

fn rule<'h>(kind: TokenKind) -> Rule<'h> {
    use TokenKind::*;
    let none = Rule { prefix: None, infix: None, precedence: Precedence::None, operator: None };
    match kind {
        Number | String | Null | True | False => {
            Rule { prefix: Some(Compiler::literal), ..none }
        }
        Identifier => Rule { prefix: Some(Compiler::variable), ..none },
        Interpolation => Rule { prefix: Some(Compiler::interpolation), ..none },
        This => Rule { prefix: Some(Compiler::this_expr), ..none },
        Super => Rule { prefix: Some(Compiler::super_expr), ..none },
        LeftParen => Rule { prefix: Some(Compiler::grouping), ..none },
        LeftBracket => Rule {
            prefix: Some(Compiler::list_literal),
            infix: Some(Compiler::subscript),
            precedence: Precedence::Call,
            operator: None,
        },
        LeftBrace => Rule { prefix: Some(Compiler::map_literal), ..none },
        Dot => Rule { infix: Some(Compiler::dot_infix), precedence: Precedence::Call, ..none },
        Minus => Rule {
            prefix: Some(Compiler::unary),
            infix: Some(Compiler::binary),
            precedence: Precedence::Term,
            operator: Some("-"),
        },
        Bang => Rule { prefix: Some(Compiler::unary), precedence: Precedence::Unary, operator: Some("!"), ..none },
        Tilde => Rule { prefix: Some(Compiler::unary), precedence: Precedence::Unary, operator: Some("~"), ..none },
        Plus => Rule { infix: Some(Compiler::binary), precedence: Precedence::Term, operator: Some("+"), ..none },
        Star => Rule { infix: Some(Compiler::binary), precedence: Precedence::Factor, operator: Some("*"), ..none },
        Slash => Rule { infix: Some(Compiler::binary), precedence: Precedence::Factor, operator: Some("/"), ..none },
        Percent => Rule { infix: Some(Compiler::binary), precedence: Precedence::Factor, operator: Some("%"), ..none },
        Amp => Rule { infix: Some(Compiler::binary), precedence: Precedence::BitAnd, operator: Some("&"), ..none },
        Pipe => Rule { infix: Some(Compiler::binary), precedence: Precedence::BitOr, operator: Some("|"), ..none },
        ShiftLeft => Rule { infix: Some(Compiler::binary), precedence: Precedence::BitShift, operator: Some("<<"), ..none },
        ShiftRight => Rule { infix: Some(Compiler::binary), precedence: Precedence::BitShift, operator: Some(">>"), ..none },
        EqEq => Rule { infix: Some(Compiler::binary), precedence: Precedence::Equal, operator: Some("=="), ..none },
        BangEq => Rule { infix: Some(Compiler::binary), precedence: Precedence::Equal, operator: Some("!="), ..none },
        Greater => Rule { infix: Some(Compiler::binary), precedence: Precedence::Compare, operator: Some(">"), ..none },
        GreaterEq => Rule { infix: Some(Compiler::binary), precedence: Precedence::Compare, operator: Some(">="), ..none },
        Less => Rule { infix: Some(Compiler::binary), precedence: Precedence::Compare, operator: Some("<"), ..none },
        LessEq => Rule { infix: Some(Compiler::binary), precedence: Precedence::Compare, operator: Some("<="), ..none },
        DotDot => Rule { infix: Some(Compiler::range_expr), precedence: Precedence::Range, operator: None, ..none },
        Is => Rule { infix: Some(Compiler::is_expr), precedence: Precedence::Is, ..none },
        AmpAmp => Rule { infix: Some(Compiler::and_expr), precedence: Precedence::LogicAnd, ..none },
        PipePipe => Rule { infix: Some(Compiler::or_expr), precedence: Precedence::LogicOr, ..none },
        Question => Rule { infix: Some(Compiler::conditional), precedence: Precedence::Condition, ..none },
        _ => none,
    }
}

impl<'h> Compiler<'h> {
    pub fn compile_module(
        file: impl Into<String>,
        source: &str,
        module: Obj,
        heap: &'h mut Heap,
        method_names: &'h mut SymbolTable,
    ) -> CompileResult<Obj> {
        let file = file.into();
        tracing::debug!(file, len = source.len(), "compiling module");
        let mut lexer = Lexer::new(file.clone(), source);
        let first = lexer.next_token(heap)?;
        let mut compiler = Compiler {
            lexer,
            cur: first,
            prev: Token::eof(0),
            file,
            heap,
            method_names,
            units: vec![Unit::new(false)],
            classes: Vec::new(),
            module,
        };
        compiler.run()
    }

    fn run(mut self) -> CompileResult<Obj> {
        while !self.check(TokenKind::Eof) {
            self.declaration()?;
        }
        self.finalize_module()?;
        self.emit_simple(raw::PUSH_NULL, 1);
        self.emit_simple(raw::RETURN, -1);
        let unit = self.units.pop().expect("module unit");
        let module = self.module.clone();
        Ok(self.heap.alloc(HeapObj::Fn(ObjFn {
            code: unit.code,
            constants: unit.constants,
            module,
            arity: 0,
            upvalue_count: 0,
            max_slots: unit.max_slots,
            debug_name: "<script>".to_string(),
            lines: unit.lines,
            super_const_slots: unit.super_slots,
        })))
    }

    // ---- token stream -----------------------------------------------

    fn advance(&mut self) -> CompileResult<()> {
        let line = self.cur.line;
        self.prev = std::mem::replace(&mut self.cur, Token::eof(line));
        self.cur = self.lexer.next_token(self.heap)?;
        Ok(())
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.cur.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> CompileResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind, msg: &str) -> CompileResult<()> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error_at_current(msg))
        }
    }

    fn error_at_current(&self, msg: impl Into<String>) -> CompileError {
        CompileError::new(self.file.clone(), self.cur.line, msg.into())
    }

    fn error_prev(&self, msg: impl Into<String>) -> CompileError {
        CompileError::new(self.file.clone(), self.prev.line, msg.into())
    }

    // ---- unit / scope --------------------------------------------------

    fn unit(&mut self) -> &mut Unit {
        self.units.last_mut().expect("at least one compile unit")
    }

    fn is_module_scope(&self) -> bool {
        self.units.len() == 1 && self.units[0].scope_depth == 0
    }

    fn begin_scope(&mut self) {
        self.unit().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let depth = self.unit().scope_depth;
        while let Some(local) = self.unit().locals.last() {
            if local.depth < depth {
                break;
            }
            let captured = local.is_captured;
            self.unit().locals.pop();
            self.unit().num_slots -= 1;
            if captured {
                self.emit_simple(raw::CLOSE_UPVALUE, 0);
            } else {
                self.emit_simple(raw::POP, 0);
            }
        }
        self.unit().scope_depth -= 1;
    }

    // ---- emission --------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.prev.line;
        self.unit().code.push(byte);
        self.unit().lines.push(line);
    }

    fn emit_u16(&mut self, value: u16) {
        let bytes = value.to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    fn adjust(&mut self, delta: i32) {
        let unit = self.unit();
        unit.num_slots += delta;
        if unit.num_slots as usize > unit.max_slots {
            unit.max_slots = unit.num_slots as usize;
        }
    }

    fn emit_simple(&mut self, opcode: u8, delta: i32) {
        self.emit_byte(opcode);
        self.adjust(delta);
    }

    fn emit_u8_operand(&mut self, opcode: u8, operand: u8, delta: i32) {
        self.emit_byte(opcode);
        self.emit_byte(operand);
        self.adjust(delta);
    }

    fn emit_u16_operand(&mut self, opcode: u8, operand: u16, delta: i32) {
        self.emit_byte(opcode);
        self.emit_u16(operand);
        self.adjust(delta);
    }

    /// Emits a jump instruction with a placeholder offset, returning the
    /// position of the operand to patch once the target is known.
    fn emit_jump(&mut self, opcode: u8, delta: i32) -> usize {
        self.emit_byte(opcode);
        let pos = self.unit().code.len();
        self.emit_u16(0xffff);
        self.adjust(delta);
        pos
    }

    fn patch_jump(&mut self, operand_pos: usize) -> CompileResult<()> {
        let target = self.unit().code.len();
        let offset = target - operand_pos - 2;
        if offset > u16::MAX as usize {
            return Err(self.error_prev("jump target too far"));
        }
        let bytes = (offset as u16).to_be_bytes();
        self.unit().code[operand_pos] = bytes[0];
        self.unit().code[operand_pos + 1] = bytes[1];
        Ok(())
    }

    fn emit_loop(&mut self, start: usize) -> CompileResult<()> {
        self.emit_byte(raw::LOOP);
        let offset = self.unit().code.len() + 2 - start;
        if offset > u16::MAX as usize {
            return Err(self.error_prev("loop body too large"));
        }
        self.emit_u16(offset as u16);
        Ok(())
    }

    fn add_constant(&mut self, value: Value) -> CompileResult<u16> {
        let unit = self.unit();
        if let Some(pos) = unit.constants.iter().position(|v| *v == value) {
            return Ok(pos as u16);
        }
        if unit.constants.len() >= u16::MAX as usize {
            return Err(self.error_prev("too many constants in one function"));
        }
        unit.constants.push(value);
        Ok((unit.constants.len() - 1) as u16)
    }

    fn emit_constant(&mut self, value: Value) -> CompileResult<()> {
        let index = self.add_constant(value)?;
        self.emit_u16_operand(raw::LOAD_CONSTANT, index, 1);
        Ok(())
    }

    fn intern_string_constant(&mut self, text: &str) -> CompileResult<()> {
        let obj = self.heap.alloc(HeapObj::Str(ObjString::new(text)));
        self.emit_constant(Value::Object(obj))
    }

    /// Emits the call instruction for `sig`, interning its canonical name
    /// into the shared method-name symbol table (§4.5).
    fn emit_call(&mut self, sig: &Signature) -> CompileResult<()> {
        let symbol = self.method_names.intern(&sig.canonical()) as u16;
        self.emit_u16_operand(raw::CALL_0 + sig.arg_count, symbol, -(sig.arg_count as i32));
        Ok(())
    }

    // ---- locals / upvalues -------------------------------------------

    /// Names the value currently sitting on top of the compile-time stack
    /// (already pushed by the preceding expression/statement) as a local.
    /// Does not itself change the tracked stack height — use
    /// `declare_param` for a slot nothing has pushed into yet.
    fn declare_local(&mut self, name: &str) -> CompileResult<u8> {
        let unit = self.unit();
        let depth = unit.scope_depth;
        for local in unit.locals.iter().rev() {
            if local.depth < depth {
                break;
            }
            if local.name == name {
                return Err(self.error_prev(format!("'{name}' is already declared in this scope")));
            }
        }
        if unit.locals.len() >= MAX_LOCALS {
            return Err(self.error_prev("too many local variables in one function"));
        }
        let slot = (unit.num_slots - 1) as u8;
        unit.locals.push(Local { name: name.to_string(), depth, is_captured: false });
        Ok(slot)
    }

    /// Reserves a new slot for a function/method parameter: the caller's
    /// `Call` already placed the argument there before the callee's body
    /// starts running, so unlike `declare_local` this does advance the
    /// tracked stack height.
    fn declare_param(&mut self, name: &str) -> CompileResult<u8> {
        self.adjust(1);
        self.declare_local(name)
    }

    fn resolve_local(unit: &Unit, name: &str) -> Option<u8> {
        unit.locals.iter().rposition(|l| l.name == name).map(|i| i as u8)
    }

    fn resolve_upvalue(units: &mut [Unit], depth: usize, name: &str) -> CompileResult<Option<u8>> {
        if depth == 0 {
            return Ok(None);
        }
        if let Some(local_index) = Self::resolve_local(&units[depth - 1], name) {
            units[depth - 1].locals[local_index as usize].is_captured = true;
            return Ok(Some(Self::add_upvalue(&mut units[depth], true, local_index)?));
        }
        if let Some(outer_index) = Self::resolve_upvalue(units, depth - 1, name)? {
            return Ok(Some(Self::add_upvalue(&mut units[depth], false, outer_index)?));
        }
        Ok(None)
    }

    fn add_upvalue(unit: &mut Unit, is_local: bool, index: u8) -> CompileResult<u8> {
        for (i, up) in unit.upvalues.iter().enumerate() {
            if up.is_local == is_local && up.index == index {
                return Ok(i as u8);
            }
        }
        if unit.upvalues.len() >= MAX_UPVALUES {
            return Err(CompileError::new("", 0, "too many closed-over variables in one function"));
        }
        unit.upvalues.push(UpvalueDesc { is_local, index });
        Ok((unit.upvalues.len() - 1) as u8)
    }

    // ---- module variables ----------------------------------------------

    fn find_module_variable(&self, name: &str) -> Option<usize> {
        match &*self.module.borrow() {
            HeapObj::Module(m) => m.find_variable(name),
            _ => unreachable!("compiler's module slot always holds a Module"),
        }
    }

    /// Resolves `name` as a module variable, declaring a line-number
    /// placeholder if it hasn't been seen yet (forward reference, §4.2
    /// rule 2 — top-level `fun`/`class` declarations may reference each
    /// other regardless of textual order).
    fn resolve_or_forward_module_var(&mut self, name: &str, line: u32) -> usize {
        if let Some(index) = self.find_module_variable(name) {
            return index;
        }
        match &mut *self.module.borrow_mut() {
            HeapObj::Module(m) => m.declare_variable(name, Value::Number(line as f64)),
            _ => unreachable!("compiler's module slot always holds a Module"),
        }
    }

    /// Defines `name` as a module variable for a real `var`/`fun`/`class`
    /// declaration, overwriting a forward-reference placeholder if one
    /// exists, and erroring on a genuine redefinition.
    fn define_module_variable(&mut self, name: &str, value: Value) -> CompileResult<usize> {
        if let Some(index) = self.find_module_variable(name) {
            let already_defined = match &*self.module.borrow() {
                HeapObj::Module(m) => !matches!(m.variable_values[index], Value::Number(_)),
                _ => unreachable!(),
            };
            if already_defined {
                return Err(self.error_prev(format!("module variable '{name}' is already defined")));
            }
            match &mut *self.module.borrow_mut() {
                HeapObj::Module(m) => m.variable_values[index] = value,
                _ => unreachable!(),
            }
            return Ok(index);
        }
        match &mut *self.module.borrow_mut() {
            HeapObj::Module(m) => Ok(m.declare_variable(name, value)),
            _ => unreachable!(),
        }
    }

    fn finalize_module(&mut self) -> CompileResult<()> {
        let module = self.module.borrow();
        if let HeapObj::Module(m) = &*module {
            for (name, value) in m.variable_names.iter().zip(m.variable_values.iter()) {
                if matches!(value, Value::Number(_)) {
                    return Err(CompileError::new(
                        self.file.clone(),
                        0,
                        format!("variable '{name}' is used but never defined"),
                    ));
                }
            }
        }
        Ok(())
    }

    // ---- declarations --------------------------------------------------

    fn declaration(&mut self) -> CompileResult<()> {
        if self.matches(TokenKind::Var)? {
            self.var_decl()
        } else if self.matches(TokenKind::Fun)? {
            self.fun_decl()
        } else if self.matches(TokenKind::Class)? {
            self.class_decl()
        } else if self.matches(TokenKind::Import)? {
            self.import_stmt()
        } else {
            self.statement()
        }
    }

    /// `import X` desugars to `System.importModule("X")`, discarding the
    /// result. `import X for a, b` additionally binds each named variable
    /// via `System.getModuleVariable("X", "a")` (§4.11).
    fn import_stmt(&mut self) -> CompileResult<()> {
        self.expect(TokenKind::String, "expected a module path string after 'import'")?;
        let path = self.prev.value.clone();
        let line = self.prev.line;
        self.load_named_at("System", line)?;
        self.emit_constant(path.clone())?;
        self.emit_call(&Signature::method("importModule", 1))?;
        self.emit_simple(raw::POP, -1);
        if self.matches(TokenKind::For)? {
            loop {
                self.expect(TokenKind::Identifier, "expected a variable name after 'for'")?;
                let var_name = self.prev.lexeme.clone();
                let var_line = self.prev.line;
                self.load_named_at("System", var_line)?;
                self.emit_constant(path.clone())?;
                self.intern_string_constant(&var_name)?;
                self.emit_call(&Signature::method("getModuleVariable", 2))?;
                if self.is_module_scope() {
                    let index = self.define_module_variable(&var_name, Value::Null)? as u16;
                    self.emit_u16_operand(raw::STORE_MODULE_VAR, index, 0);
                    self.emit_simple(raw::POP, -1);
                } else {
                    self.declare_local(&var_name)?;
                }
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        Ok(())
    }

    fn var_decl(&mut self) -> CompileResult<()> {
        self.expect(TokenKind::Identifier, "expected variable name")?;
        let name = self.prev.lexeme.clone();
        if self.matches(TokenKind::Eq)? {
            self.expression()?;
        } else {
            self.emit_simple(raw::PUSH_NULL, 1);
        }
        if self.is_module_scope() {
            let index = self.define_module_variable(&name, Value::Null)? as u16;
            self.emit_u16_operand(raw::STORE_MODULE_VAR, index, 0);
            self.emit_simple(raw::POP, -1);
        } else {
            self.declare_local(&name)?;
        }
        Ok(())
    }

    fn parse_param_list(&mut self) -> CompileResult<Vec<String>> {
        self.expect(TokenKind::LeftParen, "expected '(' before parameter list")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expect(TokenKind::Identifier, "expected parameter name")?;
                params.push(self.prev.lexeme.clone());
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "expected ')' after parameters")?;
        Ok(params)
    }

    fn fun_decl(&mut self) -> CompileResult<()> {
        self.expect(TokenKind::Identifier, "expected function name")?;
        let name = self.prev.lexeme.clone();
        let var_name = names::fn_by_name(&name);
        let module_index = if self.is_module_scope() {
            Some(self.resolve_or_forward_module_var(&var_name, self.prev.line))
        } else {
            None
        };
        let params = self.parse_param_list()?;
        let arg_count = params.len() as u8;
        self.compile_function_body(params, false)?;
        self.finish_function(format!("{name}({})", field_underscores(arg_count)))?;
        if self.is_module_scope() {
            let index = self.define_module_variable(&var_name, Value::Null)? as u16;
            debug_assert_eq!(Some(index as usize), module_index);
            self.emit_u16_operand(raw::STORE_MODULE_VAR, index, 0);
            self.emit_simple(raw::POP, -1);
        } else {
            self.declare_local(&var_name)?;
        }
        Ok(())
    }

    fn compile_function_body(&mut self, params: Vec<String>, body_already_open: bool) -> CompileResult<()> {
        self.units.push(Unit::new(false));
        self.unit().arity = params.len() as u8;
        for p in &params {
            self.declare_param(p)?;
        }
        if !body_already_open {
            self.expect(TokenKind::LeftBrace, "expected '{' to begin function body")?;
        }
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration()?;
        }
        self.expect(TokenKind::RightBrace, "expected '}' after function body")?;
        self.emit_simple(raw::PUSH_NULL, 1);
        self.emit_simple(raw::RETURN, -1);
        Ok(())
    }

    /// Pops the innermost `Unit`, builds its `ObjFn`, and emits
    /// `CreateClosure` (with upvalue descriptors) into the now-current
    /// enclosing unit (§4.6).
    fn finish_function(&mut self, debug_name: String) -> CompileResult<()> {
        let unit = self.units.pop().expect("a pushed function unit");
        let module = self.module.clone();
        let fn_obj = self.heap.alloc(HeapObj::Fn(ObjFn {
            code: unit.code,
            constants: unit.constants,
            module,
            arity: unit.arity,
            upvalue_count: unit.upvalues.len() as u8,
            max_slots: unit.max_slots,
            debug_name,
            lines: unit.lines,
            super_const_slots: unit.super_slots,
        }));
        let fn_const = self.add_constant(Value::Object(fn_obj))?;
        self.emit_byte(raw::CREATE_CLOSURE);
        self.emit_u16(fn_const);
        for up in &unit.upvalues {
            self.emit_byte(if up.is_local { 1 } else { 0 });
            self.emit_byte(up.index);
        }
        self.adjust(1);
        Ok(())
    }

    // ---- classes --------------------------------------------------------

    fn class_decl(&mut self) -> CompileResult<()> {
        if self.units.len() > 1 {
            return Err(self.error_prev("classes cannot be declared inside a function"));
        }
        self.expect(TokenKind::Identifier, "expected class name")?;
        let class_name = self.prev.lexeme.clone();
        let line = self.prev.line;
        tracing::trace!(class = class_name.as_str(), line, "compiling class declaration");
        self.intern_string_constant(&class_name)?;
        if self.matches(TokenKind::Is)? {
            self.expression()?;
        } else {
            self.load_named_at("Object", line)?;
        }
        self.emit_byte(raw::CREATE_CLASS);
        let field_count_pos = self.unit().code.len();
        self.emit_byte(0);
        self.adjust(-1);

        let class_slot = if self.is_module_scope() {
            None
        } else {
            Some(self.declare_local(&class_name)?)
        };
        let module_index = if self.is_module_scope() {
            Some(self.define_module_variable(&class_name, Value::Null)?)
        } else {
            None
        };
        if let Some(index) = module_index {
            self.emit_u16_operand(raw::STORE_MODULE_VAR, index as u16, 0);
        }

        self.classes.push(ClassInfo { field_names: Vec::new() });
        self.expect(TokenKind::LeftBrace, "expected '{' to begin class body")?;
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.class_member(class_slot, module_index)?;
        }
        self.expect(TokenKind::RightBrace, "expected '}' after class body")?;
        let info = self.classes.pop().expect("pushed at class_decl entry");
        let field_count = info.field_names.len() as u8;
        self.unit().code[field_count_pos] = field_count;
        self.emit_simple(raw::POP, -1);
        Ok(())
    }

    /// Reloads the class object onto the stack before compiling a method
    /// body (§4.5): `InstanceMethod`/`StaticMethod` pop `[class, closure]`,
    /// so the class value from `CREATE_CLASS` must be reloaded fresh
    /// before each member rather than left sitting under every closure.
    fn reload_class(&mut self, class_slot: Option<u8>, module_index: Option<usize>) {
        if let Some(slot) = class_slot {
            self.emit_u8_operand(raw::LOAD_LOCAL, slot, 1);
        } else if let Some(index) = module_index {
            self.emit_u16_operand(raw::LOAD_MODULE_VAR, index as u16, 1);
        } else {
            unreachable!("class_decl always sets exactly one of class_slot/module_index")
        }
    }

    fn emit_instance_method(&mut self, sig: &Signature, is_static: bool) -> CompileResult<()> {
        let symbol = self.method_names.intern(&sig.canonical()) as u16;
        let opcode = if is_static { raw::STATIC_METHOD } else { raw::INSTANCE_METHOD };
        self.emit_u16_operand(opcode, symbol, -2);
        Ok(())
    }

    /// Pushes a fresh method-compile `Unit` (always with a `this` slot 0,
    /// even for constructors — slot 0 starts out holding the class value
    /// and `CONSTRUCT` replaces it with a new instance in place).
    fn compile_method_value(&mut self, params: Vec<String>, is_constructor: bool) -> CompileResult<()> {
        self.units.push(Unit::new(true));
        self.unit().arity = params.len() as u8;
        if is_constructor {
            self.emit_simple(raw::CONSTRUCT, 0);
        }
        for p in &params {
            self.declare_param(p)?;
        }
        self.expect(TokenKind::LeftBrace, "expected '{' to begin method body")?;
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration()?;
        }
        self.expect(TokenKind::RightBrace, "expected '}' after method body")?;
        self.emit_simple(raw::PUSH_NULL, 1);
        self.emit_simple(raw::RETURN, -1);
        Ok(())
    }

    fn class_member(&mut self, class_slot: Option<u8>, module_index: Option<usize>) -> CompileResult<()> {
        let is_static = self.matches(TokenKind::Static)?;

        if self.matches(TokenKind::LeftBracket)? {
            return self.compile_subscript_method(is_static, class_slot, module_index);
        }

        let sig_name = if let Some(op_name) = rule(self.cur.kind).operator {
            self.advance()?;
            op_name.to_string()
        } else {
            self.expect(TokenKind::Identifier, "expected a method name")?;
            self.prev.lexeme.clone()
        };

        if sig_name == "new" && !is_static {
            let params = self.parse_param_list()?;
            let arg_count = params.len() as u8;
            self.reload_class(class_slot, module_index);
            self.compile_method_value(params, true)?;
            self.finish_function(format!("new({})", field_underscores(arg_count)))?;
            return self.emit_instance_method(&Signature::constructor(arg_count), is_static);
        }

        if self.matches(TokenKind::Eq)? {
            self.expect(TokenKind::LeftParen, "expected '(' after '=' in setter")?;
            self.expect(TokenKind::Identifier, "expected setter parameter name")?;
            let param = self.prev.lexeme.clone();
            self.expect(TokenKind::RightParen, "expected ')' after setter parameter")?;
            self.reload_class(class_slot, module_index);
            self.compile_method_value(vec![param], false)?;
            self.finish_function(format!("{sig_name}=(_)"))?;
            return self.emit_instance_method(&Signature::setter(sig_name), is_static);
        }

        if self.check(TokenKind::LeftParen) {
            let params = self.parse_param_list()?;
            let arg_count = params.len() as u8;
            self.reload_class(class_slot, module_index);
            self.compile_method_value(params, false)?;
            self.finish_function(format!("{sig_name}({})", field_underscores(arg_count)))?;
            return self.emit_instance_method(&Signature::method(sig_name, arg_count), is_static);
        }

        // No parens, no '=': a getter (`name { ... }`).
        self.reload_class(class_slot, module_index);
        self.compile_method_value(Vec::new(), false)?;
        self.finish_function(sig_name.clone())?;
        self.emit_instance_method(&Signature::getter(sig_name), is_static)
    }

    fn compile_subscript_method(
        &mut self,
        is_static: bool,
        class_slot: Option<u8>,
        module_index: Option<usize>,
    ) -> CompileResult<()> {
        let mut params = Vec::new();
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.expect(TokenKind::Identifier, "expected subscript parameter name")?;
                params.push(self.prev.lexeme.clone());
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightBracket, "expected ']'")?;
        let index_count = params.len() as u8;

        if self.matches(TokenKind::Eq)? {
            self.expect(TokenKind::LeftParen, "expected '(' after '=' in subscript setter")?;
            self.expect(TokenKind::Identifier, "expected subscript setter value parameter")?;
            params.push(self.prev.lexeme.clone());
            self.expect(TokenKind::RightParen, "expected ')'")?;
            self.reload_class(class_slot, module_index);
            self.compile_method_value(params, false)?;
            self.finish_function(format!("[{}]=(_)", field_underscores(index_count)))?;
            return self.emit_instance_method(&Signature::subscript_setter(index_count), is_static);
        }

        self.reload_class(class_slot, module_index);
        self.compile_method_value(params, false)?;
        self.finish_function(format!("[{}]", field_underscores(index_count)))?;
        self.emit_instance_method(&Signature::subscript(index_count), is_static)
    }

    // ---- statements ------------------------------------------------

    fn statement(&mut self) -> CompileResult<()> {
        if self.matches(TokenKind::If)? {
            self.if_stmt()
        } else if self.matches(TokenKind::While)? {
            self.while_stmt()
        } else if self.matches(TokenKind::For)? {
            self.for_stmt()
        } else if self.matches(TokenKind::Return)? {
            self.return_stmt()
        } else if self.matches(TokenKind::Break)? {
            self.break_stmt()
        } else if self.matches(TokenKind::Continue)? {
            self.continue_stmt()
        } else if self.matches(TokenKind::LeftBrace)? {
            self.begin_scope();
            while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
                self.declaration()?;
            }
            self.expect(TokenKind::RightBrace, "expected '}' after block")?;
            self.end_scope();
            Ok(())
        } else {
            self.expression_stmt()
        }
    }

    fn expression_stmt(&mut self) -> CompileResult<()> {
        self.expression()?;
        self.emit_simple(raw::POP, -1);
        Ok(())
    }

    fn if_stmt(&mut self) -> CompileResult<()> {
        self.expect(TokenKind::LeftParen, "expected '(' after 'if'")?;
        self.expression()?;
        self.expect(TokenKind::RightParen, "expected ')' after condition")?;
        let then_jump = self.emit_jump(raw::JUMP_IF_FALSE, -1);
        self.statement()?;
        if self.matches(TokenKind::Else)? {
            let else_jump = self.emit_jump(raw::JUMP, 0);
            self.patch_jump(then_jump)?;
            self.statement()?;
            self.patch_jump(else_jump)?;
        } else {
            self.patch_jump(then_jump)?;
        }
        Ok(())
    }

    fn while_stmt(&mut self) -> CompileResult<()> {
        let loop_start = self.unit().code.len();
        let depth = self.unit().scope_depth;
        self.unit().loops.push(LoopRecord { start: loop_start, depth, breaks: Vec::new() });
        self.expect(TokenKind::LeftParen, "expected '(' after 'while'")?;
        self.expression()?;
        self.expect(TokenKind::RightParen, "expected ')' after condition")?;
        let exit_jump = self.emit_jump(raw::JUMP_IF_FALSE, -1);
        self.statement()?;
        self.emit_loop(loop_start)?;
        self.patch_jump(exit_jump)?;
        let record = self.unit().loops.pop().expect("pushed above");
        for break_pos in record.breaks {
            self.unit().code[break_pos - 1] = raw::JUMP;
            self.patch_jump(break_pos)?;
        }
        Ok(())
    }

    /// Desugars `for (name in expr) body` (§4.2 [FULL-3]) into hidden
    /// `<seq>`/`<iter>` locals driving the `iterate(_)`/`iteratorValue(_)`
    /// protocol: `<seq> = expr; <iter> = null; while (<iter> = <seq>.iterate(<iter>)) { var name = <seq>.iteratorValue(<iter>); body }`.
    fn for_stmt(&mut self) -> CompileResult<()> {
        self.begin_scope();
        self.expect(TokenKind::LeftParen, "expected '(' after 'for'")?;
        self.expect(TokenKind::Identifier, "expected loop variable name")?;
        let var_name = self.prev.lexeme.clone();
        self.expect_in_keyword()?;
        self.expression()?;
        let seq_slot = self.declare_local("<seq>")?;
        self.expect(TokenKind::RightParen, "expected ')' after for-loop sequence")?;

        self.emit_simple(raw::PUSH_NULL, 1);
        let iter_slot = self.declare_local("<iter>")?;

        let loop_start = self.unit().code.len();
        let depth = self.unit().scope_depth;
        self.unit().loops.push(LoopRecord { start: loop_start, depth, breaks: Vec::new() });

        self.emit_u8_operand(raw::LOAD_LOCAL, seq_slot, 1);
        self.emit_u8_operand(raw::LOAD_LOCAL, iter_slot, 1);
        self.emit_call(&Signature::method("iterate", 1))?;
        self.emit_u8_operand(raw::STORE_LOCAL, iter_slot, 0);
        let exit_jump = self.emit_jump(raw::JUMP_IF_FALSE, -1);

        self.begin_scope();
        self.emit_u8_operand(raw::LOAD_LOCAL, seq_slot, 1);
        self.emit_u8_operand(raw::LOAD_LOCAL, iter_slot, 1);
        self.emit_call(&Signature::method("iteratorValue", 1))?;
        self.declare_local(&var_name)?;
        self.statement()?;
        self.end_scope();

        self.emit_loop(loop_start)?;
        self.patch_jump(exit_jump)?;
        let record = self.unit().loops.pop().expect("pushed above");
        for break_pos in record.breaks {
            self.unit().code[break_pos - 1] = raw::JUMP;
            self.patch_jump(break_pos)?;
        }
        self.end_scope();
        Ok(())
    }

    /// The lexer treats `in` as an ordinary identifier (§4.1); the parser
    /// recognizes it contextually here, the one place it is meaningful.
    fn expect_in_keyword(&mut self) -> CompileResult<()> {
        if self.check(TokenKind::Identifier) && self.cur.lexeme == "in" {
            self.advance()
        } else {
            Err(self.error_at_current("expected 'in' in for-loop header"))
        }
    }

    fn return_stmt(&mut self) -> CompileResult<()> {
        if self.check(TokenKind::RightBrace) {
            self.emit_simple(raw::PUSH_NULL, 1);
        } else {
            self.expression()?;
        }
        self.emit_simple(raw::RETURN, -1);
        Ok(())
    }

    fn pop_locals_above(&mut self, depth: i32) {
        let captured_flags: Vec<bool> = self
            .unit()
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth > depth)
            .map(|local| local.is_captured)
            .collect();
        let line = self.prev.line;
        for is_captured in captured_flags {
            // Emitted directly as a byte write, bypassing `locals`
            // bookkeeping: `end_scope` (called later by the enclosing
            // block) owns popping the compiler's local-slot records, this
            // only unwinds the *runtime* stack so `break`/`continue` can
            // jump out from inside nested blocks.
            if is_captured {
                self.unit().code.push(raw::CLOSE_UPVALUE);
            } else {
                self.unit().code.push(raw::POP);
            }
            self.unit().lines.push(line);
        }
    }

    fn break_stmt(&mut self) -> CompileResult<()> {
        let depth = self.unit().loops.last().map(|l| l.depth).ok_or_else(|| self.error_prev("'break' outside of a loop"))?;
        self.pop_locals_above(depth);
        let pos = self.unit().code.len() + 1;
        self.emit_byte(raw::END);
        self.emit_u16(0xffff);
        self.unit().loops.last_mut().expect("checked above").breaks.push(pos);
        Ok(())
    }

    fn continue_stmt(&mut self) -> CompileResult<()> {
        let record_depth = self.unit().loops.last().map(|l| l.depth).ok_or_else(|| self.error_prev("'continue' outside of a loop"))?;
        let start = self.unit().loops.last().unwrap().start;
        self.pop_locals_above(record_depth);
        self.emit_loop(start)
    }

    // ---- expressions -----------------------------------------------

    fn expression(&mut self) -> CompileResult<()> {
        self.parse_precedence(Precedence::Lowest)
    }

    fn parse_precedence(&mut self, min_prec: Precedence) -> CompileResult<()> {
        self.advance()?;
        let prefix = rule(self.prev.kind).prefix.ok_or_else(|| self.error_prev("expected an expression"))?;
        let can_assign = min_prec <= Precedence::Assign;
        prefix(self, can_assign)?;

        while min_prec <= rule(self.cur.kind).precedence {
            self.advance()?;
            let infix = rule(self.prev.kind).infix.expect("precedence table entry without infix fn");
            infix(self, can_assign)?;
        }

        if can_assign && self.matches(TokenKind::Eq)? {
            return Err(self.error_prev("invalid assignment target"));
        }
        Ok(())
    }

    fn literal(&mut self, _can_assign: bool) -> CompileResult<()> {
        match self.prev.kind {
            TokenKind::Number | TokenKind::String => {
                let value = self.prev.value.clone();
                self.emit_constant(value)
            }
            TokenKind::Null => {
                self.emit_simple(raw::PUSH_NULL, 1);
                Ok(())
            }
            TokenKind::True => {
                self.emit_simple(raw::PUSH_TRUE, 1);
                Ok(())
            }
            TokenKind::False => {
                self.emit_simple(raw::PUSH_FALSE, 1);
                Ok(())
            }
            _ => unreachable!("rule() only dispatches literal() for these kinds"),
        }
    }

    /// `"head%(expr)tail"` compiles as `head + expr.toString + tail`,
    /// walking the lexer's `Interpolation, <expr>, (Interpolation, <expr>)*,
    /// String` token chain (§4.1): after `self.expression()` returns, the
    /// lexer has already re-entered string-scanning mode and `self.cur` is
    /// either the next `Interpolation` fragment or the closing `String`.
    fn interpolation(&mut self, _can_assign: bool) -> CompileResult<()> {
        let head = self.prev.value.clone();
        self.emit_constant(head)?;
        loop {
            self.expression()?;
            self.emit_call(&Signature::getter("toString"))?;
            self.emit_call(&Signature::method("+", 1))?;
            if self.matches(TokenKind::Interpolation)? {
                let frag = self.prev.value.clone();
                self.emit_constant(frag)?;
                self.emit_call(&Signature::method("+", 1))?;
                continue;
            }
            self.expect(TokenKind::String, "unterminated string interpolation")?;
            let tail = self.prev.value.clone();
            self.emit_constant(tail)?;
            self.emit_call(&Signature::method("+", 1))?;
            break;
        }
        Ok(())
    }

    fn load_named(&mut self, name: &str) -> CompileResult<()> {
        let line = self.prev.line;
        self.load_named_at(name, line)
    }

    fn load_named_at(&mut self, name: &str, line: u32) -> CompileResult<()> {
        if let Some(slot) = Self::resolve_local(self.units.last().unwrap(), name) {
            self.emit_u8_operand(raw::LOAD_LOCAL, slot, 1);
            return Ok(());
        }
        let depth = self.units.len() - 1;
        if let Some(up) = Self::resolve_upvalue(&mut self.units, depth, name)? {
            self.emit_u8_operand(raw::LOAD_UPVALUE, up, 1);
            return Ok(());
        }
        let index = self.resolve_or_forward_module_var(name, line);
        self.emit_u16_operand(raw::LOAD_MODULE_VAR, index as u16, 1);
        Ok(())
    }

    fn this_expr(&mut self, can_assign: bool) -> CompileResult<()> {
        if self.matches(TokenKind::Dot)? {
            self.expect(TokenKind::Identifier, "expected a field or method name after 'this.'")?;
            let name = self.prev.lexeme.clone();
            if self.check(TokenKind::LeftParen) || self.check(TokenKind::LeftBrace) {
                self.load_named("this")?;
                return self.finish_dotted_call(name, can_assign);
            }
            if can_assign && self.matches(TokenKind::Eq)? {
                self.expression()?;
                let index = self.field_index(&name);
                self.emit_u8_operand(raw::STORE_THIS_FIELD, index, 0);
                return Ok(());
            }
            let index = self.field_index(&name);
            self.emit_u8_operand(raw::LOAD_THIS_FIELD, index, 1);
            return Ok(());
        }
        self.load_named("this")
    }

    /// First-use field declaration: the class-local index assigned here
    /// does not account for inherited fields (§4.5 open question, see
    /// `DESIGN.md`) — subclass fields simply start again at 0.
    fn field_index(&mut self, name: &str) -> u8 {
        let info = self.classes.last_mut().expect("'this' field access outside of a class body");
        if let Some(i) = info.field_names.iter().position(|f| f == name) {
            return i as u8;
        }
        info.field_names.push(name.to_string());
        (info.field_names.len() - 1) as u8
    }

    /// `super.name` / `super.name(args)`: pushes `this` as the receiver
    /// and allocates a `Value::Null` placeholder constant, recorded in
    /// `Unit::super_slots` so `finish_function` carries it into
    /// `ObjFn::super_const_slots` for `ember-vm`'s `CREATE_CLASS` handler
    /// to patch once the real superclass object exists (§4.5, §4.6).
    fn super_expr(&mut self, can_assign: bool) -> CompileResult<()> {
        if self.classes.is_empty() {
            return Err(self.error_prev("'super' can only be used inside a class method"));
        }
        self.load_named("this")?;
        self.expect(TokenKind::Dot, "expected '.' after 'super'")?;
        self.expect(TokenKind::Identifier, "expected a method name after 'super.'")?;
        let name = self.prev.lexeme.clone();

        let super_const = self.add_constant(Value::Null)?;
        self.unit().super_slots.push(super_const);

        if can_assign && self.matches(TokenKind::Eq)? {
            self.expression()?;
            return self.emit_super_call(&Signature::setter(name), super_const);
        }
        if self.matches(TokenKind::LeftParen)? {
            let count = self.finish_call_args()?;
            return self.emit_super_call(&Signature::method(name, count), super_const);
        }
        self.emit_super_call(&Signature::getter(name), super_const)
    }

    fn emit_super_call(&mut self, sig: &Signature, super_const: u16) -> CompileResult<()> {
        let symbol = self.method_names.intern(&sig.canonical()) as u16;
        self.emit_byte(raw::SUPER_0 + sig.arg_count);
        self.emit_u16(symbol);
        self.emit_u16(super_const);
        self.adjust(-(sig.arg_count as i32));
        Ok(())
    }

    fn variable(&mut self, can_assign: bool) -> CompileResult<()> {
        let name = self.prev.lexeme.clone();
        let line = self.prev.line;

        // Bare `name(args)` sugar (§4.2 rule 1): resolve through the
        // local/upvalue chain first; only if neither matches AND the name
        // is immediately called does it fall through to the `"Fn " + name`
        // module-variable convention.
        let depth = self.units.len() - 1;
        if Self::resolve_local(self.units.last().unwrap(), &name).is_none()
            && Self::resolve_upvalue(&mut self.units, depth, &name)?.is_none()
            && self.check(TokenKind::LeftParen)
        {
            let fn_var = names::fn_by_name(&name);
            self.load_named_at(&fn_var, line)?;
            self.expect(TokenKind::LeftParen, "expected '(' after function reference")?;
            let count = self.finish_call_args()?;
            return self.emit_call(&Signature::method("call", count));
        }

        if can_assign && self.matches(TokenKind::Eq)? {
            self.expression()?;
            if let Some(slot) = Self::resolve_local(self.units.last().unwrap(), &name) {
                self.emit_u8_operand(raw::STORE_LOCAL, slot, 0);
                return Ok(());
            }
            let depth = self.units.len() - 1;
            if let Some(up) = Self::resolve_upvalue(&mut self.units, depth, &name)? {
                self.emit_u8_operand(raw::STORE_UPVALUE, up, 0);
                return Ok(());
            }
            let index = self.resolve_or_forward_module_var(&name, line);
            self.emit_u16_operand(raw::STORE_MODULE_VAR, index as u16, 0);
            return Ok(());
        }

        self.load_named_at(&name, line)
    }

    fn grouping(&mut self, _can_assign: bool) -> CompileResult<()> {
        self.expression()?;
        self.expect(TokenKind::RightParen, "expected ')' after expression")
    }

    /// Parses `(args...)`, already past the opening `(`, returning the
    /// argument count. Also accepts a trailing block argument (§4.2
    /// [FULL-?] Wren-style `fn(args) { |v| ... }` is not supported; block
    /// arguments attach directly after the call, see `parse_block_argument`).
    fn finish_call_args(&mut self) -> CompileResult<u8> {
        let mut count = 0u8;
        if !self.check(TokenKind::RightParen) {
            loop {
                if count == raw::MAX_CALL_ARGS {
                    return Err(self.error_prev("too many arguments in call"));
                }
                self.expression()?;
                count += 1;
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "expected ')' after arguments")?;
        Ok(count)
    }

    /// `name { |p, q| body }` or `name {}`: a brace-delimited lambda
    /// compiled as one extra trailing call argument (§4.2, Wren-style
    /// block arguments to methods like `Thread.new { ... }`).
    fn parse_block_argument(&mut self, base_count: u8) -> CompileResult<u8> {
        self.expect(TokenKind::LeftBrace, "expected '{' to begin block argument")?;
        let mut params = Vec::new();
        if self.matches(TokenKind::Pipe)? {
            if !self.check(TokenKind::Pipe) {
                loop {
                    self.expect(TokenKind::Identifier, "expected block parameter name")?;
                    params.push(self.prev.lexeme.clone());
                    if !self.matches(TokenKind::Comma)? {
                        break;
                    }
                }
            }
            self.expect(TokenKind::Pipe, "expected closing '|' after block parameters")?;
        }
        self.compile_function_body(params, true)?;
        self.finish_function("<block>".to_string())?;
        if base_count == raw::MAX_CALL_ARGS {
            return Err(self.error_prev("too many arguments in call"));
        }
        Ok(base_count + 1)
    }

    fn finish_dotted_call(&mut self, name: String, can_assign: bool) -> CompileResult<()> {
        if can_assign && self.matches(TokenKind::Eq)? {
            self.expression()?;
            return self.emit_call(&Signature::setter(name));
        }
        if self.matches(TokenKind::LeftParen)? {
            let mut count = self.finish_call_args()?;
            if self.check(TokenKind::LeftBrace) {
                count = self.parse_block_argument(count)?;
            }
            return self.emit_call(&Signature::method(name, count));
        }
        if self.check(TokenKind::LeftBrace) {
            let count = self.parse_block_argument(0)?;
            return self.emit_call(&Signature::method(name, count));
        }
        self.emit_call(&Signature::getter(name))
    }

    fn dot_infix(&mut self, can_assign: bool) -> CompileResult<()> {
        self.expect(TokenKind::Identifier, "expected a property name after '.'")?;
        let name = self.prev.lexeme.clone();
        self.finish_dotted_call(name, can_assign)
    }

    /// `[args...]` / `[args...] = value` as the infix following some
    /// receiver expression (§4.10): the subscript operator method table.
    fn subscript(&mut self, can_assign: bool) -> CompileResult<()> {
        let mut count = 0u8;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.expression()?;
                count += 1;
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightBracket, "expected ']'")?;
        if can_assign && self.matches(TokenKind::Eq)? {
            self.expression()?;
            return self.emit_call(&Signature::subscript_setter(count));
        }
        self.emit_call(&Signature::subscript(count))
    }

    fn unary(&mut self, _can_assign: bool) -> CompileResult<()> {
        let op = rule(self.prev.kind).operator.expect("unary rule always carries an operator");
        self.parse_precedence(Precedence::Unary)?;
        self.emit_call(&Signature::method(op, 0))
    }

    fn binary(&mut self, _can_assign: bool) -> CompileResult<()> {
        let op = rule(self.prev.kind).operator.expect("binary rule always carries an operator");
        let precedence = rule(self.prev.kind).precedence;
        self.parse_precedence(precedence.next())?;
        self.emit_call(&Signature::method(op, 1))
    }

    fn range_expr(&mut self, _can_assign: bool) -> CompileResult<()> {
        self.parse_precedence(Precedence::Range.next())?;
        self.emit_call(&Signature::method("..", 1))
    }

    fn is_expr(&mut self, _can_assign: bool) -> CompileResult<()> {
        self.parse_precedence(Precedence::Is.next())?;
        self.emit_call(&Signature::method("is", 1))
    }

    /// `a && b`: if `a` is falsey, short-circuits keeping `a` as the
    /// result; otherwise discards `a` and evaluates to `b` (§4.9, `And`'s
    /// documented net stack effect is 0 — it conditionally skips past the
    /// `Pop` that would otherwise discard the left operand).
    fn and_expr(&mut self, _can_assign: bool) -> CompileResult<()> {
        let end_jump = self.emit_jump(raw::AND, 0);
        self.emit_simple(raw::POP, -1);
        self.parse_precedence(Precedence::LogicAnd.next())?;
        self.patch_jump(end_jump)
    }

    fn or_expr(&mut self, _can_assign: bool) -> CompileResult<()> {
        let end_jump = self.emit_jump(raw::OR, 0);
        self.emit_simple(raw::POP, -1);
        self.parse_precedence(Precedence::LogicOr.next())?;
        self.patch_jump(end_jump)
    }

    fn conditional(&mut self, _can_assign: bool) -> CompileResult<()> {
        let then_jump = self.emit_jump(raw::JUMP_IF_FALSE, -1);
        self.parse_precedence(Precedence::Condition)?;
        let else_jump = self.emit_jump(raw::JUMP, 0);
        self.expect(TokenKind::Colon, "expected ':' in conditional expression")?;
        self.patch_jump(then_jump)?;
        self.parse_precedence(Precedence::Assign)?;
        self.patch_jump(else_jump)
    }

    /// `[a, b, c]`: constructs via `List.new()`, tracks the fresh
    /// collection's own stack slot directly (bypassing named-locals
    /// bookkeeping, since it's an anonymous mid-expression temporary),
    /// then `add`s each element, leaving the list at that slot as the
    /// literal's result (§4.2 [FULL-2]).
    fn list_literal(&mut self, _can_assign: bool) -> CompileResult<()> {
        let line = self.prev.line;
        self.load_named_at("List", line)?;
        self.emit_call(&Signature::constructor(0))?;
        let slot = (self.unit().num_slots - 1) as u8;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.emit_u8_operand(raw::LOAD_LOCAL, slot, 1);
                self.expression()?;
                self.emit_call(&Signature::method("add", 1))?;
                self.emit_simple(raw::POP, -1);
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightBracket, "expected ']' after list literal")
    }

    /// `{a: b, c: d}`: constructs via `Map.new()` and `[_]=(_)`-assigns
    /// each pair, same anonymous-slot trick as `list_literal`.
    fn map_literal(&mut self, _can_assign: bool) -> CompileResult<()> {
        let line = self.prev.line;
        self.load_named_at("Map", line)?;
        self.emit_call(&Signature::constructor(0))?;
        let slot = (self.unit().num_slots - 1) as u8;
        if !self.check(TokenKind::RightBrace) {
            loop {
                self.emit_u8_operand(raw::LOAD_LOCAL, slot, 1);
                self.expression()?;
                self.expect(TokenKind::Colon, "expected ':' between map key and value")?;
                self.expression()?;
                self.emit_call(&Signature::subscript_setter(1))?;
                self.emit_simple(raw::POP, -1);
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightBrace, "expected '}' after map literal")
    }
}

fn field_underscores(n: u8) -> String {
    std::iter::repeat("_").take(n as usize).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::object::ObjModule;
    use ember_core::opcode::Op;

    fn compile(source: &str) -> CompileResult<Obj> {
        let mut heap = Heap::new();
        let module = heap.alloc(HeapObj::Module(ObjModule::new(Some("<test>".into()))));
        let mut method_names = SymbolTable::new();
        Compiler::compile_module("<test>", source, module, &mut heap, &mut method_names)
    }

    fn fn_ops(obj: &Obj) -> Vec<Op> {
        let HeapObj::Fn(f) = &*obj.borrow() else { panic!("not a function") };
        let mut ops = Vec::new();
        let mut ip = 0;
        while ip < f.code.len() {
            let (op, next) = ember_core::opcode::decode(&f.code, ip, &f.constants);
            ops.push(op);
            ip = next;
        }
        ops
    }

    #[test]
    fn compiles_arithmetic_expression_to_method_calls() {
        let result = compile("var x = 1 + 2 * 3").expect("valid script should compile");
        let ops = fn_ops(&result);
        // two LoadConstant+Call pairs for `*` then `+`, then StoreModuleVar.
        let call_count = ops.iter().filter(|op| matches!(op, Op::Call { .. })).count();
        assert_eq!(call_count, 2);
        assert!(ops.iter().any(|op| matches!(op, Op::StoreModuleVar(_))));
    }

    #[test]
    fn top_level_script_always_returns_null() {
        let result = compile("var x = 1").unwrap();
        let ops = fn_ops(&result);
        let last_two = &ops[ops.len() - 2..];
        assert!(matches!(last_two[0], Op::PushNull));
        assert!(matches!(last_two[1], Op::Return));
    }

    #[test]
    fn bare_super_call_without_dot_is_a_compile_error() {
        let err = compile(
            r#"
            class Animal {
                new(name) { this.name = name }
            }
            class Dog is Animal {
                new(name) { super(name) }
            }
            "#,
        )
        .unwrap_err();
        assert!(err.message.contains("expected '.' after 'super'"), "unexpected message: {}", err.message);
    }

    #[test]
    fn this_outside_a_method_resolves_as_an_undefined_module_variable() {
        // There's no `this`-specific grammar rule rejecting this at parse
        // time: `this` outside a method falls back to `load_named`'s normal
        // module-variable forward-reference path, so the error surfaces
        // later, from `finalize_module`, as an undefined variable.
        let err = compile("var x = this").unwrap_err();
        assert!(err.message.contains("used but never defined"), "unexpected message: {}", err.message);
    }

    #[test]
    fn class_inside_a_function_is_a_compile_error() {
        let err = compile(
            r#"
            fun f() {
                class Nested { }
            }
            "#,
        )
        .unwrap_err();
        assert!(err.message.contains("cannot be declared inside a function"));
    }

    #[test]
    fn list_literal_desugars_to_new_and_repeated_add_calls() {
        let result = compile("var xs = [1, 2, 3]").expect("valid script should compile");
        let ops = fn_ops(&result);
        let call_count = ops.iter().filter(|op| matches!(op, Op::Call { .. })).count();
        // List.new() plus three add(_) calls.
        assert_eq!(call_count, 4);
    }

    #[test]
    fn unterminated_string_is_a_compile_error() {
        let err = compile("var s = \"oops").unwrap_err();
        assert!(!err.message.is_empty());
    }
}

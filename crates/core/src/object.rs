//! Heap objects and the allocator that owns them.
//!
//! Every heap object in the base spec carries a header with a kind tag, a
//! GC "reachable" mark, a class pointer, and linkage into a VM-global
//! intrusive list. Rust gives us a safer way to get the same externally
//! observable contract ("every heap object is on the list exactly once
//! until freed", §3): objects are reference-counted (`Rc<RefCell<HeapObj>>`)
//! and the allocator additionally records a `Weak` handle to each one in
//! `Heap::all_objects`, which is the Rust analogue of the C `next` pointer
//! chain. Liveness is reference-counting rather than a VM-driven sweep for
//! acyclic data; `ember-vm`'s `gc` module walks `all_objects` (using the
//! `marked` flag here) to additionally reclaim object graphs that contain
//! cycles (classes holding methods that close over instances of
//! themselves, etc.) — see `DESIGN.md` for the open-question resolution.

use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Shared handle to a heap object. Plays the role of the base spec's
/// "owning reference to a heap object header".
pub type Obj = Rc<RefCell<HeapObj>>;

/// A resolved upvalue method slot, stored per-class and indexed by the
/// interned method symbol (see `crate::symbol::SymbolTable` and
/// `crate::signature::Signature`).
///
/// `Primitive` methods have no payload here: the actual function pointer
/// lives in `ember-vm`'s `Vm::natives` table, keyed by `(class identity,
/// symbol)`, because a native function needs `&mut Vm` and `ember-core`
/// must not depend on `ember-vm`. This mirrors the base spec's dispatch
/// rule ("Dispatch by method kind") without letting the object model know
/// about the VM.
#[derive(Clone)]
pub enum Method {
    /// Implemented in Rust; looked up externally by (class, symbol).
    Primitive,
    /// `fn.call(...)` trampoline: invoke the closure stored in `args[0]`.
    FnCall,
    /// A user-defined method body.
    Block(Obj),
}

/// A UTF-8 string. Immutable; hash cached at construction.
pub struct ObjString {
    pub value: String,
    pub hash: u64,
}

impl ObjString {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let hash = fnv1a(value.as_bytes());
        ObjString { value, hash }
    }
}

/// FNV-1a, as specified for `String`'s cached hash (§3).
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// A growable value array. Negative indices (resolved by callers) wrap.
pub struct ObjList {
    pub elements: Vec<Value>,
}

impl ObjList {
    pub fn new() -> Self {
        ObjList { elements: Vec::new() }
    }
}

impl Default for ObjList {
    fn default() -> Self {
        Self::new()
    }
}

/// Map slot state, distinguishing a free slot from a tombstone so probing
/// can tell "never used" apart from "used, then deleted" (§3).
#[derive(Clone)]
pub enum MapSlot {
    /// Never occupied.
    Free,
    /// Occupied.
    Entry(Value, Value),
    /// Previously occupied, now deleted; probing must continue past it.
    Tombstone,
}

/// Open-addressed hash table, 80% max load factor, minimum capacity 64,
/// capacity grows by 4x on resize and halves (floor 64) when sparse.
pub struct ObjMap {
    slots: Vec<MapSlot>,
    count: usize,
}

pub const MAP_MIN_CAPACITY: usize = 64;
const MAP_LOAD_FACTOR: f64 = 0.8;
const MAP_GROWTH_FACTOR: usize = 4;

impl ObjMap {
    pub fn new() -> Self {
        ObjMap {
            slots: vec![MapSlot::Free; MAP_MIN_CAPACITY],
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn probe(slots: &[MapSlot], hash: u64, key: &Value) -> usize {
        let cap = slots.len();
        let mut index = (hash as usize) % cap;
        let mut first_tombstone: Option<usize> = None;
        loop {
            match &slots[index] {
                MapSlot::Free => return first_tombstone.unwrap_or(index),
                MapSlot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                MapSlot::Entry(k, _) if k == key => return index,
                MapSlot::Entry(..) => {}
            }
            index = (index + 1) % cap;
        }
    }

    fn find_occupied(&self, hash: u64, key: &Value) -> Option<usize> {
        let cap = self.slots.len();
        let mut index = (hash as usize) % cap;
        for _ in 0..cap {
            match &self.slots[index] {
                MapSlot::Free => return None,
                MapSlot::Entry(k, _) if k == key => return Some(index),
                _ => {}
            }
            index = (index + 1) % cap;
        }
        None
    }

    pub fn get(&self, hash: u64, key: &Value) -> Option<&Value> {
        self.find_occupied(hash, key).map(|i| match &self.slots[i] {
            MapSlot::Entry(_, v) => v,
            _ => unreachable!(),
        })
    }

    pub fn contains(&self, hash: u64, key: &Value) -> bool {
        self.find_occupied(hash, key).is_some()
    }

    pub fn insert(&mut self, hash: u64, key: Value, value: Value) {
        if (self.count + 1) as f64 > self.slots.len() as f64 * MAP_LOAD_FACTOR {
            self.grow();
        }
        let index = Self::probe(&self.slots, hash, &key);
        let was_new = !matches!(self.slots[index], MapSlot::Entry(..));
        self.slots[index] = MapSlot::Entry(key, value);
        if was_new {
            self.count += 1;
        }
    }

    pub fn remove(&mut self, hash: u64, key: &Value) -> Option<Value> {
        let index = self.find_occupied(hash, key)?;
        let old = std::mem::replace(&mut self.slots[index], MapSlot::Tombstone);
        self.count -= 1;
        self.maybe_shrink();
        match old {
            MapSlot::Entry(_, v) => Some(v),
            _ => unreachable!(),
        }
    }

    pub fn clear(&mut self) {
        self.slots = vec![MapSlot::Free; MAP_MIN_CAPACITY];
        self.count = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.slots.iter().filter_map(|s| match s {
            MapSlot::Entry(k, v) => Some((k, v)),
            _ => None,
        })
    }

    fn grow(&mut self) {
        let new_cap = self.slots.len() * MAP_GROWTH_FACTOR;
        self.rehash(new_cap);
    }

    fn maybe_shrink(&mut self) {
        let cap = self.slots.len();
        if cap > MAP_MIN_CAPACITY && (self.count as f64) < (cap as f64 / 4.0) * MAP_LOAD_FACTOR {
            let new_cap = (cap / 2).max(MAP_MIN_CAPACITY);
            self.rehash(new_cap);
        }
    }

    fn rehash(&mut self, new_cap: usize) {
        let old = std::mem::replace(&mut self.slots, vec![MapSlot::Free; new_cap]);
        self.count = 0;
        for slot in old {
            if let MapSlot::Entry(k, v) = slot {
                let hash = crate::value::value_hash(&k).unwrap_or(0);
                let index = Self::probe(&self.slots, hash, &k);
                self.slots[index] = MapSlot::Entry(k, v);
                self.count += 1;
            }
        }
    }
}

impl Default for ObjMap {
    fn default() -> Self {
        Self::new()
    }
}

/// `from..to`. Direction (ascending/descending) is derived at use from the
/// relative magnitude of `from`/`to`, not stored.
pub struct ObjRange {
    pub from: f64,
    pub to: f64,
    /// `true` for `a..b` (inclusive of `to`), matching the single range
    /// operator the lexer/parser surface (`..`); kept as a field so a
    /// future exclusive-range operator has somewhere to live without an
    /// object-model change.
    pub inclusive: bool,
}

/// A compiled function: its instruction stream, constant pool, owning
/// module, and the bookkeeping the VM needs to size a new frame.
pub struct ObjFn {
    pub code: Vec<u8>,
    pub constants: Vec<Value>,
    pub module: Obj,
    pub arity: u8,
    pub upvalue_count: u8,
    pub max_slots: usize,
    /// Debug name ("name(_,_)" or "<script>"), used only for diagnostics.
    pub debug_name: String,
    /// Line number for each byte of `code`, parallel array, used for
    /// runtime error locations. `0` where not meaningful (operand bytes).
    pub lines: Vec<u32>,
    /// Constant-pool indices holding a `super` dispatch's superclass slot,
    /// compiled as `Value::Null` placeholders because the superclass
    /// object doesn't exist yet at compile time (it's built by the
    /// enclosing class declaration's own bytecode at module-execution
    /// time). `ember-vm`'s `CREATE_CLASS` handler patches every method
    /// reachable from a new class through these slots once the real
    /// superclass `Obj` is known.
    pub super_const_slots: Vec<u16>,
}

/// A function paired with its resolved upvalue array.
pub struct ObjClosure {
    pub function: Obj,
    pub upvalues: Vec<Obj>,
}

/// Either a live view into a fiber's stack slot, or an owned value once the
/// frame that created it has returned. Transition is one-way.
pub enum UpvalueState {
    Open { fiber: Obj, slot: usize },
    Closed(Value),
}

pub struct ObjUpvalue {
    pub state: UpvalueState,
}

/// A class. Every class owns a metaclass (itself a `Class` heap object with
/// `is_metaclass = true`) whose `methods` table holds the class's static
/// methods; `Class.methods` holds the instance methods.
pub struct ObjClass {
    pub name: String,
    pub superclass: Option<Obj>,
    /// The class whose methods answer `SomeClass.staticMethod()`. `None`
    /// only transiently while bootstrapping the very first class.
    pub metaclass: Option<Obj>,
    pub is_metaclass: bool,
    /// Total instance field count, including inherited fields.
    pub num_fields: usize,
    pub methods: Vec<Option<Method>>,
}

impl ObjClass {
    pub fn method(&self, symbol: usize) -> Option<&Method> {
        self.methods.get(symbol).and_then(|m| m.as_ref())
    }

    pub fn set_method(&mut self, symbol: usize, method: Method) {
        if self.methods.len() <= symbol {
            self.methods.resize(symbol + 1, None);
        }
        self.methods[symbol] = Some(method);
    }
}

/// A class instance: its class pointer plus one value per field.
pub struct ObjInstance {
    pub class: Obj,
    pub fields: Vec<Value>,
}

/// A module: an optional name plus parallel name/value arrays for its
/// top-level variables.
pub struct ObjModule {
    pub name: Option<String>,
    pub variable_names: Vec<String>,
    pub variable_values: Vec<Value>,
}

impl ObjModule {
    pub fn new(name: Option<String>) -> Self {
        ObjModule {
            name,
            variable_names: Vec::new(),
            variable_values: Vec::new(),
        }
    }

    pub fn find_variable(&self, name: &str) -> Option<usize> {
        self.variable_names.iter().position(|n| n == name)
    }

    pub fn declare_variable(&mut self, name: &str, value: Value) -> usize {
        self.variable_names.push(name.to_string());
        self.variable_values.push(value);
        self.variable_names.len() - 1
    }
}

/// One call-stack activation record: instruction pointer, owning closure,
/// and the base offset into the owning fiber's value stack.
pub struct CallFrame {
    pub ip: usize,
    pub closure: Obj,
    pub stack_start: usize,
}

/// Fiber (cooperatively scheduled execution context) state.
pub struct ObjFiber {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// Open upvalues, ordered by `slot` **descending** (§4.9).
    pub open_upvalues: Vec<Obj>,
    pub caller: Option<Obj>,
    pub error: Option<Value>,
    pub state: FiberState,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FiberState {
    /// Never been started.
    New,
    /// Currently running or suspended mid-call, resumable.
    Running,
    /// Finished normally or aborted; `call`ing it again is an error.
    Done,
}

impl ObjFiber {
    pub fn new() -> Self {
        ObjFiber {
            stack: Vec::new(),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            caller: None,
            error: None,
            state: FiberState::New,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == FiberState::Done
    }
}

impl Default for ObjFiber {
    fn default() -> Self {
        Self::new()
    }
}

/// The tagged union of every heap-object kind (§3 "Heap object variants").
pub enum HeapObj {
    Str(ObjString),
    List(ObjList),
    Map(ObjMap),
    Range(ObjRange),
    Fn(ObjFn),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    Module(ObjModule),
    Fiber(ObjFiber),
}

impl std::fmt::Debug for HeapObj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeapObj::Str(s) => write!(f, "<string {:?}>", s.value),
            HeapObj::List(_) => write!(f, "<list>"),
            HeapObj::Map(_) => write!(f, "<map>"),
            HeapObj::Range(r) => write!(f, "<range {}..{}>", r.from, r.to),
            HeapObj::Fn(func) => write!(f, "<fn {}>", func.debug_name),
            HeapObj::Closure(_) => write!(f, "<closure>"),
            HeapObj::Upvalue(_) => write!(f, "<upvalue>"),
            HeapObj::Class(c) => write!(f, "<class {}>", c.name),
            HeapObj::Instance(_) => write!(f, "<instance>"),
            HeapObj::Module(m) => write!(f, "<module {:?}>", m.name),
            HeapObj::Fiber(_) => write!(f, "<fiber>"),
        }
    }
}

/// GC bookkeeping shared by every heap object: a mark bit used by
/// `ember-vm`'s cycle-collecting sweep.
pub struct GcHeader {
    pub marked: Cell<bool>,
}

impl Default for GcHeader {
    fn default() -> Self {
        GcHeader { marked: Cell::new(false) }
    }
}

/// The allocator: creates heap objects and links each one into the
/// VM-global `all_objects` list, the Rust analogue of the base spec's
/// intrusive singly-linked `next` chain (§3 "Lifecycle").
pub struct Heap {
    all_objects: VecDeque<Weak<RefCell<HeapObj>>>,
    /// Parallel GC headers, one per live allocation, indexed the same as
    /// `all_objects` so the sweep in `ember-vm::gc` can mark without the
    /// mark bit living inside `HeapObj` itself (every variant would need
    /// one otherwise).
    headers: RefCell<VecDeque<GcHeader>>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            all_objects: VecDeque::new(),
            headers: RefCell::new(VecDeque::new()),
        }
    }

    /// Allocate a heap object, linking it at the head of `all_objects`
    /// (head-insertion order, as specified).
    pub fn alloc(&mut self, obj: HeapObj) -> Obj {
        let rc = Rc::new(RefCell::new(obj));
        self.all_objects.push_front(Rc::downgrade(&rc));
        self.headers.borrow_mut().push_front(GcHeader::default());
        rc
    }

    /// Drop dead `Weak` entries (objects already freed by Rust's own
    /// reference counting). Called opportunistically by the GC sweep.
    pub fn compact(&mut self) {
        let mut headers = self.headers.borrow_mut();
        let mut i = 0;
        while i < self.all_objects.len() {
            if self.all_objects[i].upgrade().is_none() {
                self.all_objects.remove(i);
                headers.remove(i);
            } else {
                i += 1;
            }
        }
    }

    pub fn live_objects(&self) -> impl Iterator<Item = Obj> + '_ {
        self.all_objects.iter().filter_map(|w| w.upgrade())
    }

    pub fn live_count(&self) -> usize {
        self.all_objects.iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Live objects paired with the index their `GcHeader` lives at, for a
    /// mark-and-sweep pass over reference-counted cycles (`ember-vm::gc`).
    pub fn live_objects_indexed(&self) -> impl Iterator<Item = (usize, Obj)> + '_ {
        self.all_objects.iter().enumerate().filter_map(|(i, w)| w.upgrade().map(|o| (i, o)))
    }

    /// Reset every header's mark bit, ahead of a new mark phase.
    pub fn clear_marks(&self) {
        for h in self.headers.borrow().iter() {
            h.marked.set(false);
        }
    }

    pub fn mark(&self, index: usize) {
        if let Some(h) = self.headers.borrow().get(index) {
            h.marked.set(true);
        }
    }

    pub fn is_marked(&self, index: usize) -> bool {
        self.headers.borrow().get(index).is_some_and(|h| h.marked.get())
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::value_hash;

    fn s(v: &str) -> Value {
        let mut heap = Heap::new();
        Value::Object(heap.alloc(HeapObj::Str(ObjString::new(v))))
    }

    #[test]
    fn map_starts_at_minimum_capacity() {
        let m = ObjMap::new();
        assert_eq!(m.capacity(), MAP_MIN_CAPACITY);
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn map_load_factor_never_exceeds_80_percent() {
        let mut m = ObjMap::new();
        for i in 0..200 {
            let key = Value::Number(i as f64);
            let hash = value_hash(&key).unwrap();
            m.insert(hash, key, Value::Number(i as f64));
            assert!((m.len() as f64) <= m.capacity() as f64 * 0.8 + 1.0);
        }
    }

    #[test]
    fn map_grows_by_four_and_shrinks_no_lower_than_minimum() {
        let mut m = ObjMap::new();
        for i in 0..60 {
            let key = Value::Number(i as f64);
            let hash = value_hash(&key).unwrap();
            m.insert(hash, key, Value::Null);
        }
        assert!(m.capacity() >= MAP_MIN_CAPACITY * MAP_GROWTH_FACTOR);
        for i in 0..55 {
            let key = Value::Number(i as f64);
            let hash = value_hash(&key).unwrap();
            m.remove(hash, &key);
        }
        assert!(m.capacity() >= MAP_MIN_CAPACITY);
    }

    #[test]
    fn tombstone_does_not_break_subsequent_lookups() {
        let mut m = ObjMap::new();
        let a = Value::Number(1.0);
        let b = Value::Number(65.0); // likely collides with `a` mod 64
        m.insert(value_hash(&a).unwrap(), a.clone(), Value::Number(100.0));
        m.insert(value_hash(&b).unwrap(), b.clone(), Value::Number(200.0));
        m.remove(value_hash(&a).unwrap(), &a);
        assert_eq!(m.get(value_hash(&b).unwrap(), &b), Some(&Value::Number(200.0)));
    }

    #[test]
    fn string_equality_is_structural() {
        let a = s("hi");
        let b = s("hi");
        assert_eq!(a, b);
    }

    #[test]
    fn instance_equality_is_identity() {
        let mut heap = Heap::new();
        let class = heap.alloc(HeapObj::Class(ObjClass {
            name: "C".into(),
            superclass: None,
            metaclass: None,
            is_metaclass: false,
            num_fields: 0,
            methods: Vec::new(),
        }));
        let a = Value::Object(heap.alloc(HeapObj::Instance(ObjInstance {
            class: class.clone(),
            fields: Vec::new(),
        })));
        let b = Value::Object(heap.alloc(HeapObj::Instance(ObjInstance {
            class,
            fields: Vec::new(),
        })));
        assert_ne!(a, b);
    }
}

//! Bootstraps the builtin class graph and the core module (§4.7, §6
//! `new_vm`), including the bundled prelude script.
//!
//! Class creation happens in two passes, not one, because `Object`'s own
//! native methods can't be bound until a `Vm` (and its `method_names` /
//! native-dispatch table) exists, but the class *graph* — every builtin's
//! superclass and metaclass links — has to exist before `Vm::new` can
//! finish constructing itself. `bootstrap_classes` builds the graph with
//! every method table empty; `finalize_inheritance`, called once natives
//! are bound, copies `Object`'s (and `Class`'s) methods down to every
//! other builtin the way `CREATE_CLASS` does for user classes.

use crate::error::VmResult;
use crate::vm::{new_subclass, with_class, with_class_mut, CoreClasses, Vm};
use ember_core::object::{Heap, HeapObj, ObjClass};
use ember_core::Value;

const PRELUDE_SOURCE: &str = include_str!("../scripts/prelude.ember");

pub(crate) fn bootstrap_classes(heap: &mut Heap) -> CoreClasses {
    let object = heap.alloc(HeapObj::Class(ObjClass {
        name: "Object".to_string(),
        superclass: None,
        metaclass: None,
        is_metaclass: false,
        num_fields: 0,
        methods: Vec::new(),
    }));
    let class = heap.alloc(HeapObj::Class(ObjClass {
        name: "Class".to_string(),
        superclass: Some(object.clone()),
        metaclass: None,
        is_metaclass: false,
        num_fields: 0,
        methods: Vec::new(),
    }));
    let object_metaclass = heap.alloc(HeapObj::Class(ObjClass {
        name: "Object metaclass".to_string(),
        superclass: Some(class.clone()),
        metaclass: Some(class.clone()),
        is_metaclass: true,
        num_fields: 0,
        methods: Vec::new(),
    }));
    with_class_mut(&class, |c| c.metaclass = Some(class.clone()));
    with_class_mut(&object, |c| c.metaclass = Some(object_metaclass.clone()));

    let builtin = |heap: &mut Heap, name: &str| new_subclass(heap, &class, name.to_string(), object.clone(), 0);
    let bool_ = builtin(heap, "Bool");
    let null = builtin(heap, "Null");
    let num = builtin(heap, "Num");
    let string = builtin(heap, "String");
    let list = builtin(heap, "List");
    let map = builtin(heap, "Map");
    let range = builtin(heap, "Range");
    let fn_ = builtin(heap, "Fn");
    let thread = builtin(heap, "Thread");
    let system = builtin(heap, "System");

    CoreClasses { object, class, bool_, null, num, string, list, map, range, fn_, thread, system }
}

/// Propagates `Object`'s and `Class`'s natives (bound by `natives::install`
/// just before this runs) down to every other builtin class, mirroring
/// what `CREATE_CLASS` does for user classes at module-run time.
pub(crate) fn finalize_inheritance(vm: &mut Vm) {
    let object_methods = with_class(&vm.classes.object.clone(), |c| c.methods.clone());
    with_class_mut(&vm.classes.class.clone(), |c| {
        for (i, m) in object_methods.iter().enumerate() {
            if c.methods.len() <= i {
                c.methods.resize(i + 1, None);
            }
            if c.methods[i].is_none() {
                c.methods[i] = m.clone();
            }
        }
    });
    let object_metaclass = with_class(&vm.classes.object.clone(), |c| c.metaclass.clone().unwrap());
    let class_methods = with_class(&vm.classes.class.clone(), |c| c.methods.clone());
    with_class_mut(&object_metaclass, |c| c.methods = class_methods.clone());

    let object_methods = with_class(&vm.classes.object.clone(), |c| c.methods.clone());
    for target in [
        &vm.classes.bool_,
        &vm.classes.null,
        &vm.classes.num,
        &vm.classes.string,
        &vm.classes.list,
        &vm.classes.map,
        &vm.classes.range,
        &vm.classes.fn_,
        &vm.classes.thread,
        &vm.classes.system,
    ] {
        let target = target.clone();
        let existing = with_class(&target, |c| c.methods.clone());
        with_class_mut(&target, |c| c.methods = merge_inherited(object_methods.clone(), existing));
        let metaclass = with_class(&target, |c| c.metaclass.clone().unwrap());
        let existing_static = with_class(&metaclass, |c| c.methods.clone());
        with_class_mut(&metaclass, |c| c.methods = merge_inherited(class_methods.clone(), existing_static));
    }
}

/// `inherited` methods fill gaps; anything already bound in `own` (a
/// class's own natives, registered before this runs) wins.
fn merge_inherited(inherited: Vec<Option<ember_core::object::Method>>, mut own: Vec<Option<ember_core::object::Method>>) -> Vec<Option<ember_core::object::Method>> {
    if own.len() < inherited.len() {
        own.resize(inherited.len(), None);
    }
    for (i, m) in inherited.into_iter().enumerate() {
        if own[i].is_none() {
            own[i] = m;
        }
    }
    own
}

pub(crate) fn declare_core_variables(vm: &mut Vm) {
    let entries = [
        ("Object", vm.classes.object.clone()),
        ("Class", vm.classes.class.clone()),
        ("Bool", vm.classes.bool_.clone()),
        ("Null", vm.classes.null.clone()),
        ("Num", vm.classes.num.clone()),
        ("String", vm.classes.string.clone()),
        ("List", vm.classes.list.clone()),
        ("Map", vm.classes.map.clone()),
        ("Range", vm.classes.range.clone()),
        ("Fn", vm.classes.fn_.clone()),
        ("Thread", vm.classes.thread.clone()),
        ("System", vm.classes.system.clone()),
    ];
    crate::vm::with_module_mut(&vm.core_module.clone(), |m| {
        for (name, class) in entries {
            m.declare_variable(name, Value::Object(class));
        }
    });
}

pub(crate) fn run_prelude(vm: &mut Vm) -> VmResult<()> {
    finalize_inheritance(vm);
    vm.run_module("core/prelude", PRELUDE_SOURCE, vm.core_module.clone())?;
    Ok(())
}

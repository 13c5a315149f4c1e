//! End-to-end tests running whole scripts through `Vm::new`/`execute_module`
//! (§8), mirroring `navicore-cem3/crates/runtime/tests/test_closures.rs`'s
//! pattern of exercising the runtime surface directly rather than only
//! through the CLI. Scripts communicate results back to Rust via
//! module-level `var`s, read back through `ember_vm::Vm`'s public
//! `modules` map and `ember_core`'s public `ObjModule`/`HeapObj` fields.

use ember_core::object::HeapObj;
use ember_core::Value;
use ember_vm::Vm;

fn run(file: &str, source: &str) -> Vm {
    let mut vm = Vm::new().expect("prelude must bootstrap cleanly");
    vm.execute_module(file, source).unwrap_or_else(|e| panic!("script failed: {e}"));
    vm
}

fn module_var(vm: &Vm, file: &str, name: &str) -> Value {
    let module = vm.modules.get(file).expect("module was registered by execute_module");
    let module = module.borrow();
    let HeapObj::Module(m) = &*module else { panic!("not a module") };
    let index = m.find_variable(name).unwrap_or_else(|| panic!("no module variable '{name}'"));
    m.variable_values[index].clone()
}

fn as_number(v: &Value) -> f64 {
    v.as_number().unwrap_or_else(|| panic!("expected a number, got {v:?}"))
}

fn as_string(v: &Value) -> String {
    let obj = v.as_object().unwrap_or_else(|| panic!("expected a string, got {v:?}"));
    let HeapObj::Str(s) = &*obj.borrow() else { panic!("not a string") };
    s.value.clone()
}

#[test]
fn arithmetic_and_comparison() {
    let src = r#"
        var a = 2 + 3 * 4
        var b = (2 + 3) * 4
        var c = 10 % 3
        var d = a > b
        var e = 7 / 2
    "#;
    let vm = run("arith.ember", src);
    assert_eq!(as_number(&module_var(&vm, "arith.ember", "a")), 14.0);
    assert_eq!(as_number(&module_var(&vm, "arith.ember", "b")), 20.0);
    assert_eq!(as_number(&module_var(&vm, "arith.ember", "c")), 1.0);
    assert!(!module_var(&vm, "arith.ember", "d").is_truthy());
    assert_eq!(as_number(&module_var(&vm, "arith.ember", "e")), 3.5);
}

#[test]
fn closure_captures_and_mutates_upvalue() {
    // Each call to `counter()` builds a fresh closure over its own `n`;
    // two independent counters must not share state (§4.5 upvalue capture).
    let src = r#"
        fun counter() {
            var n = 0
            return Fn.new {
                n = n + 1
                return n
            }
        }

        var c1 = counter()
        var c2 = counter()
        var first = c1.call()
        var second = c1.call()
        var other = c2.call()
        var third = c1.call()
    "#;
    let vm = run("closures.ember", src);
    assert_eq!(as_number(&module_var(&vm, "closures.ember", "first")), 1.0);
    assert_eq!(as_number(&module_var(&vm, "closures.ember", "second")), 2.0);
    assert_eq!(as_number(&module_var(&vm, "closures.ember", "other")), 1.0);
    assert_eq!(as_number(&module_var(&vm, "closures.ember", "third")), 3.0);
}

#[test]
fn inheritance_and_super_dispatch() {
    let src = r#"
        class Animal {
            new(name) {
                this.name = name
            }
            speak() {
                return this.name + " makes a sound"
            }
        }

        class Dog is Animal {
            new(name) {
                super.new(name)
            }
            speak() {
                return super.speak() + " (barks)"
            }
        }

        var a = Animal.new("Generic")
        var d = Dog.new("Rex")
        var animalSpeech = a.speak()
        var dogSpeech = d.speak()
        var dogIsAnimal = d is Animal
    "#;
    let vm = run("inherit.ember", src);
    assert_eq!(as_string(&module_var(&vm, "inherit.ember", "animalSpeech")), "Generic makes a sound");
    assert_eq!(as_string(&module_var(&vm, "inherit.ember", "dogSpeech")), "Rex makes a sound (barks)");
    assert!(module_var(&vm, "inherit.ember", "dogIsAnimal").is_truthy());
}

#[test]
fn fiber_yield_and_resume_round_trip() {
    // The fiber suspends mid-body on `Thread.yield(_)`, handing a value
    // back to its caller; the caller's second `call(_)` resumes it with a
    // new value rather than restarting it (§5 concurrency model).
    let src = r#"
        var t = Thread.new {
            var received = Thread.yield(11)
            return received + 1
        }

        var a = t.call()
        var b = t.call(100)
        var done = t.isDone
    "#;
    let vm = run("fiber.ember", src);
    assert_eq!(as_number(&module_var(&vm, "fiber.ember", "a")), 11.0);
    assert_eq!(as_number(&module_var(&vm, "fiber.ember", "b")), 101.0);
    assert!(module_var(&vm, "fiber.ember", "done").is_truthy());
}

#[test]
fn string_interpolation() {
    let src = r#"
        var x = 1 + 2
        var y = 3 * 4
        var message = "x=%(x) y=%(y)"
    "#;
    let vm = run("interp.ember", src);
    assert_eq!(as_string(&module_var(&vm, "interp.ember", "message")), "x=3 y=12");
}

#[test]
fn map_insert_lookup_and_remove_round_trip() {
    let src = r#"
        var m = {"a": 1, "b": 2}
        m["c"] = 3
        var before = m.count
        var hasA = m.containsKey("a")
        var removed = m.remove("b")
        var after = m.count
        var hasB = m.containsKey("b")
        var total = m["a"] + m["c"]
    "#;
    let vm = run("map.ember", src);
    assert_eq!(as_number(&module_var(&vm, "map.ember", "before")), 3.0);
    assert!(module_var(&vm, "map.ember", "hasA").is_truthy());
    assert_eq!(as_number(&module_var(&vm, "map.ember", "removed")), 2.0);
    assert_eq!(as_number(&module_var(&vm, "map.ember", "after")), 2.0);
    assert!(!module_var(&vm, "map.ember", "hasB").is_truthy());
    assert_eq!(as_number(&module_var(&vm, "map.ember", "total")), 4.0);
}

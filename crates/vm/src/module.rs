//! The module registry and `import` machinery (§4.11).
//!
//! Imports run synchronously: `importModule` compiles and executes the
//! target module to completion before returning, rather than switching
//! the VM onto a separate module fiber that the importer later resumes.
//! The base spec models an import as a fiber switch because its compiler
//! can suspend mid-module on a forward dependency; ours never suspends a
//! module body once it starts running, so the observable result — the
//! module is fully initialized by the time `import` returns — is the same
//! either way, without needing a resumable continuation here.

use crate::vm::{with_module, Vm};
use ember_core::object::HeapObj;
use ember_core::Value;
use std::fs;

fn resolve_path(vm: &Vm, name: &str) -> Option<std::path::PathBuf> {
    for dir in &vm.search_paths {
        let mut candidate = dir.join(name);
        if candidate.extension().is_none() {
            candidate.set_extension("ember");
        }
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

pub(crate) fn import_module(vm: &mut Vm, name: &str) -> Result<(), String> {
    if vm.modules.contains_key(name) {
        return Ok(());
    }
    tracing::debug!(name, "importing module");
    let path = resolve_path(vm, name).ok_or_else(|| format!("could not find module '{name}'"))?;
    let source = fs::read_to_string(&path).map_err(|e| format!("could not read module '{name}': {e}"))?;
    let module = vm.heap.alloc(HeapObj::Module(ember_core::object::ObjModule::new(Some(name.to_string()))));
    vm.copy_core_variables_into(&module);
    vm.modules.insert(name.to_string(), module.clone());
    vm.run_module(name, &source, module).map_err(|e| e.to_string())?;
    Ok(())
}

pub(crate) fn get_module_variable(vm: &mut Vm, module_name: &str, var_name: &str) -> Result<Value, String> {
    let module = vm
        .modules
        .get(module_name)
        .cloned()
        .ok_or_else(|| format!("module '{module_name}' is not loaded"))?;
    with_module(&module, |m| m.find_variable(var_name).map(|i| m.variable_values[i].clone()))
        .ok_or_else(|| format!("module '{module_name}' has no variable named '{var_name}'"))
}

//! Module-variable naming conventions the compiler needs beyond what
//! `ember-core::signature` already covers (§4.2).

/// `"Fn " + name`: the module-variable naming convention a bare
/// `name(args)` call at module scope resolves through (§4.2 rule 1).
pub fn fn_by_name(name: &str) -> String {
    format!("Fn {name}")
}

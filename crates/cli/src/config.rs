//! Optional `Ember.toml`, mirroring `seqc::config::CompilerConfig`'s role of
//! letting embedders extend the compiler without forking it (§[FULL-1]).
//! Everything here is driver policy, not language semantics: the module
//! *system* (§4.11) behaves identically regardless of what's in this file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Directories searched for `import`ed modules, in order. Relative
    /// paths are resolved against the directory containing `Ember.toml`.
    pub search_paths: Vec<PathBuf>,
    /// Installs a `tracing_subscriber` at startup even without `-v`/`RUST_LOG`.
    pub tracing: bool,
}

impl Config {
    /// Looks for `Ember.toml` next to `entry` and in the current directory,
    /// returning the defaults if neither exists.
    pub fn load(entry: &Path) -> Result<Self, String> {
        let candidates = [entry.parent().map(|dir| dir.join("Ember.toml")), Some(PathBuf::from("Ember.toml"))];
        for candidate in candidates.into_iter().flatten() {
            if candidate.is_file() {
                let text = std::fs::read_to_string(&candidate)
                    .map_err(|e| format!("could not read {}: {e}", candidate.display()))?;
                let mut config: Config =
                    toml::from_str(&text).map_err(|e| format!("could not parse {}: {e}", candidate.display()))?;
                let base = candidate.parent().unwrap_or_else(|| Path::new("."));
                for path in &mut config.search_paths {
                    if path.is_relative() {
                        *path = base.join(&path);
                    }
                }
                return Ok(config);
            }
        }
        Ok(Config::default())
    }
}

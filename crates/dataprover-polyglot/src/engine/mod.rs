//! Guest interpreters.
//!
//! One [`GuestEngine`] per language. An engine owns an interpreter instance
//! that is not thread-safe, so engines are created and driven on the
//! worker thread of their [`ExecutionContext`](crate::context::ExecutionContext)
//! and never cross threads.

#[cfg(feature = "javascript")]
mod javascript;
#[cfg(feature = "python")]
mod python;

use std::sync::Arc;

use dataprover_codec::HostValue;

use crate::capabilities::Capabilities;
use crate::error::{PolyglotError, Result};
use crate::manifest::ScriptLanguage;

/// Entry points a provider script may define.
pub mod entry {
    pub const INITIALIZE: &str = "initialize";
    pub const FETCH_DATA: &str = "fetchData";
    pub const SERIALIZE_KEY: &str = "serializeKey";
    pub const SERIALIZE_VALUE: &str = "serializeValue";
    pub const VALIDATE: &str = "validate";
    pub const GET_CONFIG_SCHEMA: &str = "getConfigSchema";
    pub const GET_CONNECTION_CONFIG_SCHEMA: &str = "getConnectionConfigSchema";
    pub const TEST_CONFIGURATION: &str = "testConfiguration";
    pub const RECONFIGURE: &str = "reconfigure";
    pub const SERIALIZE_KEY_FROM_INPUT: &str = "serializeKeyFromInput";
    pub const CLOSE: &str = "close";

    /// Every name the loader captures from a script.
    pub const ALL: &[&str] = &[
        INITIALIZE,
        FETCH_DATA,
        SERIALIZE_KEY,
        SERIALIZE_VALUE,
        VALIDATE,
        GET_CONFIG_SCHEMA,
        GET_CONNECTION_CONFIG_SCHEMA,
        TEST_CONFIGURATION,
        RECONFIGURE,
        SERIALIZE_KEY_FROM_INPUT,
        CLOSE,
    ];

    /// Entry points without a default.
    pub const REQUIRED: &[&str] = &[FETCH_DATA, SERIALIZE_KEY, SERIALIZE_VALUE];
}

/// An isolated interpreter instance with the capability set bound.
pub trait GuestEngine {
    /// Evaluate the provider script, replacing nothing: engines are loaded
    /// once and discarded on reload.
    fn load(&mut self, source: &str, file_name: &str) -> Result<()>;

    /// Whether the loaded script defines `name` as a function.
    fn has_entry_point(&self, name: &str) -> bool;

    /// Call an entry point. Asynchronous results are awaited before
    /// returning.
    fn call(&mut self, name: &str, args: Vec<HostValue>) -> Result<HostValue>;

    /// Release the interpreter. Further calls fail.
    fn close(&mut self);
}

/// Create an engine for `language` with `capabilities` bound into it.
pub fn create_engine(
    language: ScriptLanguage,
    capabilities: Arc<Capabilities>,
) -> Result<Box<dyn GuestEngine>> {
    match language {
        #[cfg(feature = "javascript")]
        ScriptLanguage::JavaScript => Ok(Box::new(javascript::JsEngine::new(capabilities)?)),
        #[cfg(feature = "python")]
        ScriptLanguage::Python => Ok(Box::new(python::PyEngine::new(capabilities)?)),
        #[allow(unreachable_patterns)]
        other => Err(PolyglotError::ScriptLoad {
            provider: capabilities.provider().to_owned(),
            reason: format!("{other} support is not compiled in"),
        }),
    }
}

/// Map an error raised by guest code during `entry_point`.
///
/// A capability failure that propagated out of the guest uncaught keeps
/// its typed error.
pub(crate) fn guest_failure(
    capabilities: &Capabilities,
    entry_point: &str,
    message: String,
) -> PolyglotError {
    if let Some(err) = capabilities.take_failure(&message) {
        return err;
    }
    PolyglotError::Script {
        provider: capabilities.provider().to_owned(),
        entry_point: entry_point.to_owned(),
        reason: message,
    }
}

pub(crate) fn missing(capabilities: &Capabilities, entry_point: &str) -> PolyglotError {
    PolyglotError::EntryPointMissing {
        provider: capabilities.provider().to_owned(),
        entry_point: entry_point.to_owned(),
    }
}

/// JSON description of the capability objects, for the guest preludes.
pub(crate) fn capability_table() -> String {
    let table: Vec<serde_json::Value> = crate::capabilities::CAPABILITIES
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name,
                "bindings": c.bindings().collect::<Vec<_>>(),
                "methods": c.methods,
            })
        })
        .collect();
    serde_json::Value::Array(table).to_string()
}

/// Depth at which value conversion gives up, guarding against cycles.
pub(crate) const MAX_DEPTH: usize = 128;

pub(crate) fn too_deep() -> PolyglotError {
    PolyglotError::UnsupportedValueType(format!(
        "value nested deeper than {MAX_DEPTH} levels (cyclic structure?)"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_entry_points_are_captured() {
        for name in entry::REQUIRED {
            assert!(entry::ALL.contains(name));
        }
    }

    #[test]
    fn capability_table_lists_aliases() {
        let table: serde_json::Value =
            serde_json::from_str(&capability_table()).expect("table must be JSON");
        let codec = table
            .as_array()
            .and_then(|t| t.iter().find(|c| c["name"] == "codec"))
            .expect("codec entry");
        assert_eq!(codec["bindings"], serde_json::json!(["codec", "cbor"]));
    }
}

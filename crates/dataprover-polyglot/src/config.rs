//! Sandbox configuration.
//!
//! [`SandboxConfig`] declares what a provider script is expected to do. The
//! HTTP capability enforces `allow_network`. Without `allow_io` the Python
//! engine strips `open` and file, process and FFI imports from the script's
//! builtins; QuickJS has no file access of its own. `max_statements` is
//! recorded and logged only.

use serde::{Deserialize, Serialize};

/// Declared permissions and limits for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxConfig {
    /// Whether guest code may use its own language-level file access.
    ///
    /// Default: **false**. The `sandboxedFile` capability is unaffected.
    /// Module-level restriction only: a module the script is allowed to
    /// import still has its own full builtins.
    #[serde(rename = "allowIO", alias = "allowIo")]
    pub allow_io: bool,

    /// Whether the `httpClient` capability may be used.
    ///
    /// Default: **true**.
    pub allow_network: bool,

    /// Statement budget per call, as declared intent.
    ///
    /// Default: **10 000 000**.
    pub max_statements: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allow_io: false,
            allow_network: true,
            max_statements: 10_000_000,
        }
    }
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allow_io(mut self, allow: bool) -> Self {
        self.allow_io = allow;
        self
    }

    pub fn with_allow_network(mut self, allow: bool) -> Self {
        self.allow_network = allow;
        self
    }

    pub fn with_max_statements(mut self, statements: u64) -> Self {
        self.max_statements = statements;
        self
    }
}

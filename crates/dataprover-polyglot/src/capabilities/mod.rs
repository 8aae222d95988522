//! Host capabilities exposed to provider scripts.
//!
//! Every capability is implemented once over [`HostValue`] and reached from
//! guest code through a single native dispatch function; each engine builds
//! the guest-side objects from [`CAPABILITIES`]. Calls are synchronous from
//! the guest's point of view. Capabilities backed by async clients block on
//! the tokio runtime the context was created from.
//!
//! | Object | Alias |
//! |---|---|
//! | `log` | |
//! | `hex` | |
//! | `codec` | `cbor` |
//! | `chainAddress` | `cardano` |
//! | `relationalQuery` | `db` |
//! | `httpClient` | `http` |
//! | `sandboxedFile` | `file` |
//! | `plutusBuilder` | `plutus` |

mod chain;
mod codec;
mod file;
mod hex;
mod http;
mod log;
mod plutus;
mod relational;

use std::path::Path;
use std::sync::Mutex;

use dataprover_codec::HostValue;
use tokio::runtime::Handle;

use crate::config::SandboxConfig;
use crate::error::{PolyglotError, Result};

pub use file::{CsvOptions, SandboxedFile};
pub use http::HttpClient;
pub use relational::RelationalQuery;

/// A capability object and the methods it exposes.
#[derive(Debug, Clone, Copy)]
pub struct CapabilitySpec {
    pub name: &'static str,
    pub alias: Option<&'static str>,
    pub methods: &'static [&'static str],
}

impl CapabilitySpec {
    /// Names the object is bound under in guest code.
    pub fn bindings(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.name).chain(self.alias)
    }
}

/// Every capability bound into an execution context.
pub const CAPABILITIES: &[CapabilitySpec] = &[
    CapabilitySpec {
        name: "log",
        alias: None,
        methods: &["debug", "info", "warn", "error"],
    },
    CapabilitySpec {
        name: "hex",
        alias: None,
        methods: &["decode", "encode", "isValidHex"],
    },
    CapabilitySpec {
        name: "codec",
        alias: Some("cbor"),
        methods: &["encode", "encodeConstr", "encodeList", "encodeMap"],
    },
    CapabilitySpec {
        name: "chainAddress",
        alias: Some("cardano"),
        methods: &[
            "stakeAddressToCredentialHash",
            "stakeAddressToCredentialHashHex",
            "poolIdToKeyHash",
            "poolIdToKeyHashHex",
            "addressToBytes",
            "addressToHex",
            "paymentCredentialHash",
            "paymentCredentialHashHex",
            "bytesToBech32",
            "bech32ToBytes",
        ],
    },
    CapabilitySpec {
        name: "relationalQuery",
        alias: Some("db"),
        methods: &[
            "createPool",
            "query",
            "queryScalar",
            "execute",
            "closePool",
            "testConnection",
        ],
    },
    CapabilitySpec {
        name: "httpClient",
        alias: Some("http"),
        methods: &["get", "post", "put", "delete"],
    },
    CapabilitySpec {
        name: "sandboxedFile",
        alias: Some("file"),
        methods: &["readText", "readJson", "readCsv", "readLines", "readBytes", "exists"],
    },
    CapabilitySpec {
        name: "plutusBuilder",
        alias: Some("plutus"),
        methods: &["constr", "list", "bigInt", "bytes"],
    },
];

/// Look up a capability by name or alias.
pub fn spec(object: &str) -> Option<&'static CapabilitySpec> {
    CAPABILITIES
        .iter()
        .find(|c| c.name == object || c.alias == Some(object))
}

// ---------------------------------------------------------------------------
// Capability set
// ---------------------------------------------------------------------------

/// The capability set of one execution context.
pub struct Capabilities {
    provider: String,
    sandbox: SandboxConfig,
    runtime: Option<Handle>,
    file: SandboxedFile,
    http: HttpClient,
    relational: RelationalQuery,
    last_failure: Mutex<Option<PolyglotError>>,
}

impl Capabilities {
    /// Build the capability set for a provider rooted at `provider_dir`.
    ///
    /// Captures the current tokio runtime, if any, for the HTTP and
    /// relational capabilities.
    pub fn new(provider: &str, provider_dir: &Path, sandbox: SandboxConfig) -> Result<Self> {
        Ok(Self {
            provider: provider.to_owned(),
            file: SandboxedFile::new(provider_dir)?,
            http: HttpClient::new(sandbox.allow_network)?,
            relational: RelationalQuery::new(),
            sandbox,
            runtime: Handle::try_current().ok(),
            last_failure: Mutex::new(None),
        })
    }

    /// Use an explicit runtime handle for async-backed capabilities.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn sandbox(&self) -> &SandboxConfig {
        &self.sandbox
    }

    /// Dispatch a capability call.
    ///
    /// Arguments to `codec`, `chainAddress`, `relationalQuery`, `hex` and
    /// `plutusBuilder` get byte-like detection first; other capabilities see
    /// the values unchanged.
    pub fn invoke(&self, object: &str, method: &str, args: Vec<HostValue>) -> Result<HostValue> {
        let spec = spec(object).ok_or_else(|| {
            PolyglotError::capability(object, format!("unknown capability `{object}`"))
        })?;
        if !spec.methods.contains(&method) {
            return Err(PolyglotError::capability(
                spec.name,
                format!("unknown method `{method}`"),
            ));
        }

        let byte_like = matches!(
            spec.name,
            "codec" | "chainAddress" | "relationalQuery" | "hex" | "plutusBuilder"
        );
        let values = if byte_like {
            args.into_iter().map(HostValue::detect_byte_like).collect()
        } else {
            args
        };
        let args = Args::new(spec.name, method, values);

        tracing::trace!(provider = %self.provider, capability = spec.name, method, "capability call");

        match spec.name {
            "log" => log::call(&self.provider, method, &args),
            "hex" => hex::call(method, &args),
            "codec" => codec::call(method, &args),
            "chainAddress" => chain::call(method, &args),
            "plutusBuilder" => plutus::call(method, &args),
            "sandboxedFile" => self.file.call(method, &args),
            "httpClient" => self.http.call(self.runtime()?, method, &args),
            "relationalQuery" => self.relational.call(self.runtime()?, method, &args),
            other => Err(PolyglotError::capability(other, "not implemented")),
        }
    }

    /// Dispatch a call coming from guest code.
    ///
    /// On failure the typed error is kept so the entry point that made the
    /// call can report it, and the message is returned for the guest
    /// exception.
    pub fn invoke_from_guest(
        &self,
        object: &str,
        method: &str,
        args: Vec<HostValue>,
    ) -> std::result::Result<HostValue, String> {
        self.invoke(object, method, args).map_err(|err| {
            let message = err.to_string();
            if let Ok(mut slot) = self.last_failure.lock() {
                *slot = Some(err);
            }
            message
        })
    }

    /// Forget any failure recorded by a previous call.
    pub fn clear_failure(&self) {
        if let Ok(mut slot) = self.last_failure.lock() {
            *slot = None;
        }
    }

    /// The recorded capability failure, if the guest error that ended an
    /// entry point is that failure propagating.
    pub fn take_failure(&self, guest_message: &str) -> Option<PolyglotError> {
        let mut slot = self.last_failure.lock().ok()?;
        match slot.take() {
            Some(err) if guest_message.contains(&err.to_string()) => Some(err),
            _ => None,
        }
    }

    /// Release pooled connections.
    pub fn close(&self) {
        if let Some(handle) = &self.runtime {
            self.relational.close_all(handle);
        }
    }

    fn runtime(&self) -> Result<&Handle> {
        self.runtime.as_ref().ok_or_else(|| {
            PolyglotError::capability("runtime", "no async runtime available for this capability")
        })
    }
}

// ---------------------------------------------------------------------------
// Argument access
// ---------------------------------------------------------------------------

/// Positional arguments of one capability call.
pub(crate) struct Args {
    capability: &'static str,
    method: String,
    values: Vec<HostValue>,
}

impl Args {
    pub(crate) fn new(capability: &'static str, method: &str, values: Vec<HostValue>) -> Self {
        Self {
            capability,
            method: method.to_owned(),
            values,
        }
    }

    /// Argument `i`, treating null as absent.
    pub(crate) fn get(&self, i: usize) -> Option<&HostValue> {
        self.values.get(i).filter(|v| !v.is_null())
    }

    pub(crate) fn value(&self, i: usize) -> Result<&HostValue> {
        self.get(i).ok_or_else(|| self.error(format!("missing argument {}", i + 1)))
    }

    pub(crate) fn text(&self, i: usize) -> Result<&str> {
        match self.value(i)? {
            HostValue::Text(s) => Ok(s),
            other => Err(self.error(format!(
                "argument {} must be a string, got {}",
                i + 1,
                other.type_name()
            ))),
        }
    }

    /// Bytes, or an array of integers.
    pub(crate) fn bytes(&self, i: usize) -> Result<Vec<u8>> {
        let value = self.value(i)?;
        value.to_byte_vec().ok_or_else(|| {
            self.error(format!(
                "argument {} must be bytes, got {}",
                i + 1,
                value.type_name()
            ))
        })
    }

    pub(crate) fn int(&self, i: usize) -> Result<i128> {
        match self.value(i)?.to_canonical()? {
            dataprover_codec::Canonical::Int(n) => Ok(n),
            _ => Err(self.error(format!("argument {} must be a number", i + 1))),
        }
    }

    pub(crate) fn list(&self, i: usize) -> Result<&[HostValue]> {
        match self.value(i)? {
            HostValue::List(items) => Ok(items),
            other => Err(self.error(format!(
                "argument {} must be an array, got {}",
                i + 1,
                other.type_name()
            ))),
        }
    }

    pub(crate) fn error(&self, reason: impl std::fmt::Display) -> PolyglotError {
        PolyglotError::capability(self.capability, format!("{}: {reason}", self.method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(dir: &Path) -> Capabilities {
        Capabilities::new("test", dir, SandboxConfig::default()).expect("capabilities must build")
    }

    #[test]
    fn aliases_resolve_to_same_spec() {
        assert_eq!(spec("cbor").map(|s| s.name), Some("codec"));
        assert_eq!(spec("cardano").map(|s| s.name), Some("chainAddress"));
        assert_eq!(spec("db").map(|s| s.name), Some("relationalQuery"));
        assert!(spec("os").is_none());
    }

    #[test]
    fn bindings_include_alias() {
        let names: Vec<_> = CAPABILITIES.iter().flat_map(CapabilitySpec::bindings).collect();
        assert!(names.contains(&"plutusBuilder"));
        assert!(names.contains(&"plutus"));
        assert_eq!(names.iter().filter(|n| **n == "log").count(), 1);
    }

    #[test]
    fn unknown_method_is_a_capability_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = caps(dir.path()).invoke("hex", "rot13", vec![]).unwrap_err();
        assert!(matches!(err, PolyglotError::Capability { .. }));
    }

    #[test]
    fn codec_args_get_byte_like_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let byte_like = HostValue::from(serde_json::json!({"0": 170, "1": 187, "length": 2}));
        let out = caps(dir.path())
            .invoke("codec", "encode", vec![byte_like])
            .expect("encode must succeed");
        assert_eq!(out, HostValue::Bytes(vec![0x42, 0xAA, 0xBB]));
    }

    #[test]
    fn guest_failures_are_recorded_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let caps = caps(dir.path());
        let message = caps
            .invoke_from_guest("sandboxedFile", "readText", vec!["../../etc/passwd".into()])
            .unwrap_err();
        let guest_message = format!("Error: {message}");
        assert!(matches!(
            caps.take_failure(&guest_message),
            Some(PolyglotError::SecurityViolation(_))
        ));
        assert!(caps.take_failure(&guest_message).is_none());
    }

    #[test]
    fn unrelated_guest_errors_do_not_claim_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let caps = caps(dir.path());
        let _ = caps.invoke_from_guest("hex", "decode", vec!["zz".into()]);
        assert!(caps.take_failure("TypeError: x is undefined").is_none());
    }

    #[test]
    fn http_without_runtime_fails_cleanly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = caps(dir.path())
            .invoke("http", "get", vec!["http://localhost:1".into()])
            .unwrap_err();
        assert!(err.to_string().contains("no async runtime"));
    }
}

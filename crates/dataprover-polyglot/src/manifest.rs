//! Provider manifests.
//!
//! Every provider directory holds a `manifest.json` and one script file
//! whose name follows from the declared language.

use std::path::{Path, PathBuf};

use dataprover_codec::HostValue;
use dataprover_provider::{ProviderConfig, ProviderMetadata};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;
use crate::error::{PolyglotError, Result};

/// File name of the manifest inside a provider directory.
pub const MANIFEST_FILE: &str = "manifest.json";

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Guest language of a provider script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScriptLanguage {
    #[default]
    JavaScript,
    Python,
}

impl ScriptLanguage {
    /// Conventional script file name.
    pub fn default_file(self) -> &'static str {
        match self {
            Self::JavaScript => "provider.js",
            Self::Python => "provider.py",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::Python => "python",
        }
    }

    /// Parse a language name; anything unrecognized is treated as
    /// JavaScript.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Self::Python,
            "javascript" | "js" => Self::JavaScript,
            other => {
                tracing::warn!(language = %other, "unknown script language, assuming javascript");
                Self::JavaScript
            }
        }
    }

    /// Language whose conventional file name is `file_name`.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        [Self::JavaScript, Self::Python]
            .into_iter()
            .find(|l| l.default_file() == file_name)
    }
}

impl From<String> for ScriptLanguage {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<ScriptLanguage> for String {
    fn from(l: ScriptLanguage) -> Self {
        l.as_str().to_owned()
    }
}

impl std::fmt::Display for ScriptLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Recurring ingestion declared by a provider.
///
/// When both `cron` and `interval` are set, `cron` wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub cron: Option<String>,
    /// `<number><unit>` with unit `m`, `h` or `d`.
    pub interval: Option<String>,
    pub description: Option<String>,
    /// Target identifier template, e.g. `pool-stats-{epoch}`.
    #[serde(alias = "targetMerkle")]
    pub target_identifier: Option<String>,
    #[serde(alias = "autoCreateMerkle")]
    pub auto_create_target: bool,
    pub default_config: IndexMap<String, serde_json::Value>,
}

impl ScheduleConfig {
    /// Default configuration as provider config values.
    pub fn default_config(&self) -> ProviderConfig {
        self.default_config
            .iter()
            .map(|(k, v)| (k.clone(), HostValue::from(v.clone())))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

fn default_version() -> String {
    "1.0.0".to_owned()
}

/// Parsed `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub language: ScriptLanguage,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl ProviderManifest {
    /// Parse manifest JSON. `path` is only used in error messages.
    pub fn parse(json: &str, path: &Path) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json).map_err(|e| PolyglotError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if manifest.name.trim().is_empty() {
            return Err(PolyglotError::Manifest {
                path: path.to_path_buf(),
                reason: "`name` must not be empty".into(),
            });
        }
        Ok(manifest)
    }

    /// Read `manifest.json` from a provider directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let json = std::fs::read_to_string(&path).map_err(|e| PolyglotError::Manifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Self::parse(&json, &path)
    }

    /// Script path inside `dir` for the declared language.
    pub fn script_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.language.default_file())
    }

    /// The schedule, when present and enabled.
    pub fn active_schedule(&self) -> Option<&ScheduleConfig> {
        self.schedule.as_ref().filter(|s| s.enabled)
    }

    pub fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
            language: self.language.to_string(),
            data_source: self.data_source.clone(),
            tags: self.tags.clone(),
            scheduled: self.active_schedule().is_some(),
        }
    }
}

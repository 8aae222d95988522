//! Runtime configuration loaded from `dataprover.toml`.
//!
//! ```toml
//! [runtime]
//! plugins_dir = "plugins"
//! hot_reload = true
//! log_level = "info"
//!
//! [providers.pool-stats]
//! endpoint = "https://example.org"
//! limit = 50
//! ```
//!
//! A missing file means defaults. Each `[providers.<name>]` table becomes
//! the static configuration layer of that provider.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dataprover_codec::{HostValue, Record};
use dataprover_provider::{ConfigResolver, ProviderConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub providers: BTreeMap<String, toml::Table>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub plugins_dir: PathBuf,
    pub hot_reload: bool,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
            hot_reload: true,
            log_level: "info".to_owned(),
        }
    }
}

impl AppConfig {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Static configuration for every provider named in the file.
    pub fn provider_configs(&self) -> impl Iterator<Item = (&str, ProviderConfig)> {
        self.providers
            .iter()
            .map(|(name, table)| (name.as_str(), table_to_record(table)))
    }

    /// Build the resolver: file tables first, then
    /// `DATAPROVER_PROVIDER_<NAME>_<KEY>` variables for `names`.
    pub fn resolver<I, K, V>(&self, names: &[String], vars: I) -> ConfigResolver
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut all: Vec<String> = names.to_vec();
        for name in self.providers.keys() {
            if !all.contains(name) {
                all.push(name.clone());
            }
        }

        let resolver = self
            .provider_configs()
            .fold(ConfigResolver::new(), |resolver, (name, config)| {
                resolver.with_static(name, config)
            });
        resolver.with_env(&all, vars)
    }
}

fn table_to_record(table: &toml::Table) -> Record {
    table
        .iter()
        .map(|(k, v)| (k.clone(), to_host(v)))
        .collect()
}

fn to_host(value: &toml::Value) -> HostValue {
    match value {
        toml::Value::String(s) => HostValue::Text(s.clone()),
        toml::Value::Integer(n) => HostValue::Int(i128::from(*n)),
        toml::Value::Float(f) => HostValue::Float(*f),
        toml::Value::Boolean(b) => HostValue::Bool(*b),
        toml::Value::Datetime(d) => HostValue::Text(d.to_string()),
        toml::Value::Array(items) => HostValue::List(items.iter().map(to_host).collect()),
        toml::Value::Table(t) => HostValue::Map(table_to_record(t)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = AppConfig::parse("").expect("parse must succeed");
        assert_eq!(config.runtime.plugins_dir, PathBuf::from("plugins"));
        assert!(config.runtime.hot_reload);
        assert_eq!(config.runtime.log_level, "info");
        assert!(config.providers.is_empty());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::load(&dir.path().join("absent.toml")).expect("load must succeed");
        assert!(config.runtime.hot_reload);
    }

    #[test]
    fn provider_tables_become_host_values() {
        let config = AppConfig::parse(
            r#"
            [runtime]
            plugins_dir = "/srv/providers"
            hot_reload = false

            [providers.pool-stats]
            endpoint = "https://example.org"
            limit = 50
            ratio = 0.5
            pools = ["a", "b"]
            "#,
        )
        .expect("parse must succeed");

        assert_eq!(config.runtime.plugins_dir, PathBuf::from("/srv/providers"));
        assert!(!config.runtime.hot_reload);

        let (name, record) = config.provider_configs().next().expect("one provider");
        assert_eq!(name, "pool-stats");
        assert_eq!(record.get("endpoint"), Some(&HostValue::from("https://example.org")));
        assert_eq!(record.get("limit"), Some(&HostValue::Int(50)));
        assert_eq!(record.get("ratio"), Some(&HostValue::Float(0.5)));
        assert_eq!(
            record.get("pools"),
            Some(&HostValue::List(vec![HostValue::from("a"), HostValue::from("b")]))
        );
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(AppConfig::parse("[runtime\nplugins_dir = 1").is_err());
    }

    #[tokio::test]
    async fn env_overrides_file_values() {
        let config = AppConfig::parse(
            r#"
            [providers.stake]
            network = "preprod"
            limit = 10
            "#,
        )
        .expect("parse must succeed");

        let resolver = config.resolver(
            &["stake".to_owned()],
            [("DATAPROVER_PROVIDER_STAKE_NETWORK", "mainnet")],
        );
        let resolved = resolver
            .resolve("stake", &ProviderConfig::new())
            .await
            .expect("resolve must succeed");
        assert_eq!(resolved.get("network"), Some(&HostValue::from("mainnet")));
        assert_eq!(resolved.get("limit"), Some(&HostValue::Int(10)));
    }
}

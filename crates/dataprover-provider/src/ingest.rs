//! Ingestion of provider records into trie storage.
//!
//! The trie engine itself lives outside this workspace; it is reached only
//! through [`TrieStore`] and [`TargetManager`]. [`IngestionService`] drives
//! one run: fetch, validate, serialize, put.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ProviderError, Result};
use crate::traits::DataProvider;
use crate::types::ProviderConfig;

// ---------------------------------------------------------------------------
// External collaborators
// ---------------------------------------------------------------------------

/// Key/value storage with proofs, addressed by target identifier.
#[async_trait]
pub trait TrieStore: Send + Sync {
    /// Insert or replace an entry.
    async fn put(&self, target: &str, key: &[u8], value: &[u8]) -> Result<()>;

    /// Proof for `key` in wire format, if the key is present.
    async fn get_proof_wire(&self, target: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Creation and lookup of ingestion targets.
#[async_trait]
pub trait TargetManager: Send + Sync {
    async fn target_exists(&self, identifier: &str) -> Result<bool>;

    /// Create a target with the given trie scheme.
    async fn create_target(&self, identifier: &str, scheme: &str) -> Result<()>;

    /// Create the target unless it exists. Returns `true` when created.
    async fn ensure_target(&self, identifier: &str, scheme: &str) -> Result<bool> {
        if self.target_exists(identifier).await? {
            return Ok(false);
        }
        self.create_target(identifier, scheme).await?;
        Ok(true)
    }
}

/// Runs ingestion for one provider into one target.
#[async_trait]
pub trait Ingestor: Send + Sync {
    async fn ingest(
        &self,
        provider: Arc<dyn DataProvider>,
        target: &str,
        config: &ProviderConfig,
    ) -> Result<IngestionReport>;
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Summary of one ingestion run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub provider: String,
    pub target: String,
    pub fetched: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestionReport {
    /// `true` when every fetched record was either ingested or skipped as
    /// invalid.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// [`Ingestor`] that writes records into a [`TrieStore`].
pub struct IngestionService {
    store: Arc<dyn TrieStore>,
}

impl IngestionService {
    pub fn new(store: Arc<dyn TrieStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Ingestor for IngestionService {
    async fn ingest(
        &self,
        provider: Arc<dyn DataProvider>,
        target: &str,
        config: &ProviderConfig,
    ) -> Result<IngestionReport> {
        let started_at = Utc::now();
        let name = provider.name().to_owned();
        tracing::info!(provider = %name, target = %target, "ingestion started");

        let records = provider.fetch_data(config).await?;
        let mut report = IngestionReport {
            provider: name.clone(),
            target: target.to_owned(),
            fetched: records.len(),
            ingested: 0,
            skipped: 0,
            errors: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        for (index, record) in records.iter().enumerate() {
            match provider.validate(record).await {
                Ok(v) if !v.valid => {
                    tracing::debug!(provider = %name, index, errors = ?v.errors, "record skipped");
                    report.skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    report.errors.push(format!("record {index}: validate: {e}"));
                    continue;
                }
            }

            let entry = async {
                let key = provider.serialize_key(record).await?;
                let value = provider.serialize_value(record).await?;
                self.store.put(target, &key, &value).await
            };
            match entry.await {
                Ok(()) => report.ingested += 1,
                Err(e) => {
                    tracing::warn!(provider = %name, index, error = %e, "record failed");
                    report.errors.push(format!("record {index}: {e}"));
                }
            }
        }

        report.finished_at = Utc::now();
        tracing::info!(
            provider = %name,
            target = %target,
            fetched = report.fetched,
            ingested = report.ingested,
            skipped = report.skipped,
            failed = report.errors.len(),
            "ingestion finished"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-process trie stand-in for the CLI and tests.
///
/// Entries are kept per target in key order. It has no proofs:
/// `get_proof_wire` returns the stored value itself.
#[derive(Debug, Default)]
pub struct MemoryTrieStore {
    targets: RwLock<HashMap<String, (String, BTreeMap<Vec<u8>, Vec<u8>>)>>,
}

impl MemoryTrieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries stored in `target`.
    pub fn len(&self, target: &str) -> usize {
        self.targets
            .read()
            .map(|t| t.get(target).map_or(0, |(_, entries)| entries.len()))
            .unwrap_or(0)
    }

    /// Stored value for `key` in `target`.
    pub fn get(&self, target: &str, key: &[u8]) -> Option<Vec<u8>> {
        let targets = self.targets.read().ok()?;
        targets.get(target)?.1.get(key).cloned()
    }

    /// Scheme the target was created with.
    pub fn scheme(&self, target: &str) -> Option<String> {
        let targets = self.targets.read().ok()?;
        targets.get(target).map(|(scheme, _)| scheme.clone())
    }
}

fn poisoned() -> ProviderError {
    ProviderError::Internal("trie store lock poisoned".into())
}

#[async_trait]
impl TrieStore for MemoryTrieStore {
    async fn put(&self, target: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let mut targets = self.targets.write().map_err(|_| poisoned())?;
        let (_, entries) = targets.get_mut(target).ok_or_else(|| ProviderError::Ingestion {
            target: target.to_owned(),
            reason: "target does not exist".into(),
        })?;
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn get_proof_wire(&self, target: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let targets = self.targets.read().map_err(|_| poisoned())?;
        Ok(targets
            .get(target)
            .and_then(|(_, entries)| entries.get(key).cloned()))
    }
}

#[async_trait]
impl TargetManager for MemoryTrieStore {
    async fn target_exists(&self, identifier: &str) -> Result<bool> {
        let targets = self.targets.read().map_err(|_| poisoned())?;
        Ok(targets.contains_key(identifier))
    }

    async fn create_target(&self, identifier: &str, scheme: &str) -> Result<()> {
        let mut targets = self.targets.write().map_err(|_| poisoned())?;
        targets
            .entry(identifier.to_owned())
            .or_insert_with(|| (scheme.to_owned(), BTreeMap::new()));
        tracing::info!(target_id = %identifier, scheme = %scheme, "ingestion target created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dataprover_codec::{HostValue, Record};

    use super::*;
    use crate::types::ValidationResult;

    struct Amounts;

    fn record(amount: i64) -> Record {
        let mut r = Record::new();
        r.insert("amount".into(), HostValue::from(amount));
        r
    }

    #[async_trait]
    impl DataProvider for Amounts {
        fn name(&self) -> &str {
            "amounts"
        }
        fn description(&self) -> &str {
            "amounts"
        }
        async fn initialize(&self, _config: &ProviderConfig) -> Result<()> {
            Ok(())
        }
        async fn fetch_data(&self, _config: &ProviderConfig) -> Result<Vec<Record>> {
            Ok(vec![record(1), record(-1), record(2), record(13)])
        }
        async fn serialize_key(&self, record: &Record) -> Result<Vec<u8>> {
            let amount = record["amount"].as_i64().unwrap_or_default();
            if amount == 13 {
                return Err(ProviderError::Internal("unlucky".into()));
            }
            Ok(vec![amount as u8])
        }
        async fn serialize_value(&self, _record: &Record) -> Result<Vec<u8>> {
            Ok(vec![0xff])
        }
        async fn validate(&self, record: &Record) -> Result<ValidationResult> {
            if record["amount"].as_i64().unwrap_or_default() < 0 {
                return Ok(ValidationResult::invalid(vec!["negative".into()]));
            }
            Ok(ValidationResult::ok())
        }
    }

    #[tokio::test]
    async fn ingestion_skips_invalid_and_collects_errors() {
        let store = Arc::new(MemoryTrieStore::new());
        assert!(store.ensure_target("t1", "mpf").await.expect("create"));
        assert!(!store.ensure_target("t1", "mpf").await.expect("exists"));

        let service = IngestionService::new(store.clone());
        let report = service
            .ingest(Arc::new(Amounts), "t1", &ProviderConfig::new())
            .await
            .expect("ingestion must succeed");

        assert_eq!(report.fetched, 4);
        assert_eq!(report.ingested, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(!report.is_clean());
        assert_eq!(store.len("t1"), 2);
        assert_eq!(store.get("t1", &[2]), Some(vec![0xff]));
        assert_eq!(store.scheme("t1").as_deref(), Some("mpf"));
    }

    #[tokio::test]
    async fn put_into_missing_target_fails() {
        let store = MemoryTrieStore::new();
        assert!(matches!(
            store.put("missing", b"k", b"v").await,
            Err(ProviderError::Ingestion { .. })
        ));
        assert_eq!(store.get_proof_wire("missing", b"k").await.expect("read"), None);
    }
}

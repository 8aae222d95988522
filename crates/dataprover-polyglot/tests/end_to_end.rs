//! End-to-end tests for JavaScript providers.
//!
//! A provider directory is written to a temp dir, loaded through the plugin
//! loader, and driven through the provider contract and an ingestion run.

#![cfg(feature = "javascript")]

use std::path::Path;
use std::sync::Arc;

use dataprover_codec::address::bech32_encode;
use dataprover_codec::{HostValue, Record};
use dataprover_polyglot::{PluginLoader, PolyglotError, PolyglotProvider};
use dataprover_provider::{
    ConfigResolver, DataProvider, IngestionService, Ingestor, MemoryTrieStore, ProviderConfig,
    ProviderError, ProviderRegistry, ProviderStatus, TargetManager,
};

const POOL_ID: &str = "0f292fcaa02b8b2f9b3c8f9fd8e0bb21abedb692a6d5058df3ef2735";

const STAKE_PROVIDER: &str = r#"
async function fetchData(config) {
    log.info("fetching stake for " + config.address);
    return [{ address: config.address, amount: 5, poolId: config.poolId }];
}

function serializeKey(record) {
    return cardano.stakeAddressToCredentialHash(record.address);
}

function serializeValue(record) {
    const poolIdBytes = hex.decode(record.poolId);
    return plutus.constr(0, [record.amount, poolIdBytes]);
}

function validate(record) {
    return { valid: record.amount > 0, errors: record.amount > 0 ? [] : ["no stake"] };
}
"#;

fn stake_address(hash: u8) -> String {
    let mut payload = vec![0xe0];
    payload.extend_from_slice(&[hash; 28]);
    bech32_encode("stake_test", &payload).expect("encoding must succeed")
}

fn write_provider(dir: &Path, manifest: &str, script: &str) {
    std::fs::create_dir_all(dir).expect("create provider dir");
    std::fs::write(dir.join("manifest.json"), manifest).expect("write manifest");
    std::fs::write(dir.join("provider.js"), script).expect("write script");
}

fn config(address: &str) -> ProviderConfig {
    let mut config = ProviderConfig::new();
    config.insert("address".into(), HostValue::from(address));
    config.insert("poolId".into(), HostValue::from(POOL_ID));
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stake_provider_end_to_end() {
    let root = tempfile::tempdir().expect("tempdir");
    write_provider(
        &root.path().join("stake"),
        r#"{"name": "stake", "language": "javascript", "description": "stake per address"}"#,
        STAKE_PROVIDER,
    );

    let registry = ProviderRegistry::new();
    let loader = PluginLoader::new(root.path().to_path_buf(), registry.clone(), ConfigResolver::new());
    let summary = loader.load_all().await.expect("load pass must succeed");
    assert_eq!(summary.loaded.len(), 1);
    assert_eq!(summary.loaded[0].status, ProviderStatus::Available);

    let provider = registry.get("stake").expect("provider registered");
    assert_eq!(provider.metadata().language, "javascript");

    let address = stake_address(0x5a);
    let records = provider
        .fetch_data(&config(&address))
        .await
        .expect("fetch must succeed");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.get("address"), Some(&HostValue::from(address.as_str())));
    assert_eq!(record.get("amount"), Some(&HostValue::Int(5)));

    let key = provider.serialize_key(record).await.expect("key must serialize");
    assert_eq!(key, vec![0x5a; 28]);

    let value = provider.serialize_value(record).await.expect("value must serialize");
    // Tag 121 (constructor 0), then a two-element array: 5, 28-byte string.
    assert_eq!(&value[..5], &[0xd8, 0x79, 0x82, 0x05, 0x58]);
    assert_eq!(value[5], 28);
    assert_eq!(value[6..], dataprover_codec::hex::decode(POOL_ID).expect("hex")[..]);

    let store = Arc::new(MemoryTrieStore::new());
    store.create_target("stake-test", "mpf").await.expect("create target");
    let report = IngestionService::new(store.clone())
        .ingest(provider.clone(), "stake-test", &config(&address))
        .await
        .expect("ingestion must succeed");
    assert!(report.is_clean());
    assert_eq!(report.ingested, 1);
    assert_eq!(store.get("stake-test", &key), Some(value));

    provider.close().await;
}

#[tokio::test]
async fn missing_serialize_key_from_input_is_unsupported() {
    let root = tempfile::tempdir().expect("tempdir");
    let dir = root.path().join("stake");
    write_provider(&dir, r#"{"name": "stake"}"#, STAKE_PROVIDER);

    let provider = PolyglotProvider::open(&dir).await.expect("open must succeed");
    provider
        .initialize(&ProviderConfig::new())
        .await
        .expect("initialize must succeed");

    assert!(matches!(
        provider.serialize_key_from_input("stake_test1...").await,
        Err(ProviderError::Unsupported { .. })
    ));
    let records = provider
        .fetch_data(&config(&stake_address(1)))
        .await
        .expect("fetch still works");
    assert_eq!(
        provider.serialize_key(&records[0]).await.expect("key still works"),
        vec![1; 28]
    );
}

#[tokio::test]
async fn failed_reload_keeps_working_version() {
    let root = tempfile::tempdir().expect("tempdir");
    let dir = root.path().join("stake");
    write_provider(&dir, r#"{"name": "stake"}"#, STAKE_PROVIDER);

    let provider = PolyglotProvider::open(&dir).await.expect("open must succeed");
    provider
        .initialize(&ProviderConfig::new())
        .await
        .expect("initialize must succeed");

    std::fs::write(dir.join("provider.js"), "function serializeKey(record) {").expect("break script");
    assert!(matches!(
        provider.reload().await,
        Err(PolyglotError::ScriptLoad { .. })
    ));

    assert_eq!(provider.status().await, ProviderStatus::Available);
    let mut record = Record::new();
    record.insert("address".into(), HostValue::from(stake_address(7)));
    assert_eq!(
        provider.serialize_key(&record).await.expect("old version still callable"),
        vec![7; 28]
    );
}

#[tokio::test]
async fn path_escape_is_a_security_violation() {
    let root = tempfile::tempdir().expect("tempdir");
    let dir = root.path().join("escape");
    write_provider(
        &dir,
        r#"{"name": "escape"}"#,
        r#"
        function fetchData() { return [{ text: file.readText("../../etc/passwd") }]; }
        function serializeKey() { return []; }
        function serializeValue() { return []; }
        "#,
    );

    let provider = PolyglotProvider::open(&dir).await.expect("open must succeed");
    provider
        .initialize(&ProviderConfig::new())
        .await
        .expect("initialize must succeed");
    assert!(matches!(
        provider.fetch_data(&ProviderConfig::new()).await,
        Err(ProviderError::SecurityViolation(_))
    ));
}

#[tokio::test]
async fn sandboxed_file_reads_provider_data() {
    let root = tempfile::tempdir().expect("tempdir");
    let dir = root.path().join("csv");
    write_provider(
        &dir,
        r#"{"name": "csv"}"#,
        r#"
        function fetchData() { return file.readCsv("data/pools.csv"); }
        function serializeKey(r) { return codec.encode(r.pool); }
        function serializeValue(r) { return codec.encode(parseInt(r.stake, 10)); }
        "#,
    );
    std::fs::create_dir_all(dir.join("data")).expect("mkdir");
    std::fs::write(dir.join("data/pools.csv"), "pool,stake\na,10\nb,20\n").expect("write csv");

    let provider = PolyglotProvider::open(&dir).await.expect("open must succeed");
    provider
        .initialize(&ProviderConfig::new())
        .await
        .expect("initialize must succeed");
    let records = provider
        .fetch_data(&ProviderConfig::new())
        .await
        .expect("fetch must succeed");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].get("pool"), Some(&HostValue::from("b")));
    assert_eq!(
        provider.serialize_value(&records[1]).await.expect("value"),
        vec![0x14]
    );
}

//! Recurring ingestion for providers that declare a schedule.
//!
//! [`ProviderScheduler`] keeps one job per provider. A background loop
//! checks the jobs every tick and, for each one that is due, resolves the
//! target identifier, optionally creates the target, and runs an ingestion.
//! Cron expressions go through the `cron` crate; the usual five-field form
//! is normalized by prepending a `0` seconds field. Intervals are
//! `<number><unit>` with unit `m`, `h` or `d` and fire at a fixed rate,
//! starting immediately.
//!
//! A failed firing is recorded on the job and logged; the job stays
//! scheduled.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dataprover_provider::{
    IngestionReport, Ingestor, ProviderConfig, ProviderRegistry, TargetManager,
};
use regex::Regex;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{PolyglotError, Result};
use crate::manifest::{ProviderManifest, ScheduleConfig};

/// Trie scheme used for auto-created targets.
pub const TARGET_SCHEME: &str = "mpf";

/// Template used when a schedule declares no target identifier.
pub const DEFAULT_TARGET_TEMPLATE: &str = "{provider}-{date}";

/// Shelley hard fork on mainnet: epoch 208, approximately this Unix time.
const SHELLEY_START_EPOCH: i64 = 208;
const SHELLEY_START_SECS: i64 = 1_596_000_000;
const EPOCH_DAYS: i64 = 5;

static INTERVAL: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^(\d+)(m|h|d)$").ok());

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Cadence {
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

impl Cadence {
    /// Cadence of a schedule; `cron` takes precedence over `interval`.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        if let Some(expr) = config.cron.as_deref().filter(|c| !c.trim().is_empty()) {
            return Ok(Self::Cron(Box::new(parse_cron(expr)?)));
        }
        if let Some(interval) = config.interval.as_deref().filter(|i| !i.trim().is_empty()) {
            return Ok(Self::Every(parse_interval(interval)?));
        }
        Err(PolyglotError::Schedule(
            "schedule declares neither `cron` nor `interval`".into(),
        ))
    }

    /// First firing for a job scheduled at `now`.
    fn first_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&now).next(),
            Self::Every(_) => Some(now),
        }
    }

    /// Next firing after one at `after`.
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&after).next(),
            Self::Every(period) => chrono::Duration::from_std(*period)
                .ok()
                .and_then(|d| after.checked_add_signed(d)),
        }
    }
}

/// Normalize a five-field cron expression to the six-field form the `cron`
/// crate expects.
fn normalize_cron_expr(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(&normalize_cron_expr(expr))
        .map_err(|e| PolyglotError::Schedule(format!("invalid cron expression `{expr}`: {e}")))
}

/// Parse `<number><unit>` with unit `m`, `h` or `d`.
pub fn parse_interval(token: &str) -> Result<Duration> {
    let lower = token.trim().to_ascii_lowercase();
    let invalid = || PolyglotError::Schedule(format!("invalid interval `{token}`"));
    let caps = INTERVAL
        .as_ref()
        .and_then(|re| re.captures(&lower))
        .ok_or_else(invalid)?;
    let value: u64 = caps[1].parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    let unit_secs = match &caps[2] {
        "m" => 60,
        "h" => 60 * 60,
        _ => 24 * 60 * 60,
    };
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

// ---------------------------------------------------------------------------
// Target identifiers
// ---------------------------------------------------------------------------

/// Approximate mainnet epoch number at `now`.
pub fn approximate_epoch(now: DateTime<Utc>) -> i64 {
    let days = (now.timestamp() - SHELLEY_START_SECS) / (24 * 60 * 60);
    SHELLEY_START_EPOCH + days / EPOCH_DAYS
}

/// Substitute `{provider}`, `{date}`, `{datetime}`, `{timestamp}` and
/// `{epoch}` in `template`. An empty template becomes
/// [`DEFAULT_TARGET_TEMPLATE`].
pub fn resolve_target(template: &str, provider: &str, now: DateTime<Utc>) -> String {
    let template = if template.trim().is_empty() {
        DEFAULT_TARGET_TEMPLATE
    } else {
        template
    };
    template
        .replace("{provider}", provider)
        .replace("{datetime}", &now.format("%Y-%m-%dT%H:%M:%S").to_string())
        .replace("{date}", &now.format("%Y-%m-%d").to_string())
        .replace("{timestamp}", &now.timestamp().to_string())
        .replace("{epoch}", &approximate_epoch(now).to_string())
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A provider's recurring ingestion.
#[derive(Debug, Clone)]
struct ScheduledJob {
    config: ScheduleConfig,
    cadence: Cadence,
    enabled: bool,
    in_flight: bool,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    last_result: Option<IngestionReport>,
    last_error: Option<String>,
}

/// Snapshot of one provider's schedule.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    pub provider: String,
    pub enabled: bool,
    pub cron: Option<String>,
    pub interval: Option<String>,
    pub description: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_result: Option<IngestionReport>,
    pub last_error: Option<String>,
}

type Jobs = Arc<RwLock<BTreeMap<String, ScheduledJob>>>;

/// Collaborators a firing needs.
#[derive(Clone)]
struct Executor {
    registry: ProviderRegistry,
    ingestor: Arc<dyn Ingestor>,
    targets: Arc<dyn TargetManager>,
}

impl Executor {
    async fn run(
        &self,
        provider: &str,
        schedule: &ScheduleConfig,
        target: Option<&str>,
        config: Option<ProviderConfig>,
    ) -> Result<IngestionReport> {
        let data_provider = self.registry.get(provider)?;
        let target = match target {
            Some(t) => t.to_owned(),
            None => resolve_target(
                schedule.target_identifier.as_deref().unwrap_or_default(),
                provider,
                Utc::now(),
            ),
        };

        if schedule.auto_create_target {
            match self.targets.ensure_target(&target, TARGET_SCHEME).await {
                Ok(true) => info!(provider = %provider, target = %target, "auto-created ingestion target"),
                Ok(false) => {}
                Err(e) => warn!(provider = %provider, target = %target, error = %e, "failed to auto-create target"),
            }
        }

        let config = config.unwrap_or_else(|| schedule.default_config());
        Ok(self.ingestor.ingest(data_provider, &target, &config).await?)
    }
}

// ---------------------------------------------------------------------------
// ProviderScheduler
// ---------------------------------------------------------------------------

/// Background scheduler running provider ingestions.
pub struct ProviderScheduler {
    executor: Executor,
    jobs: Jobs,
    tick: Duration,
    running: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ProviderScheduler {
    pub fn new(
        registry: ProviderRegistry,
        ingestor: Arc<dyn Ingestor>,
        targets: Arc<dyn TargetManager>,
    ) -> Self {
        Self {
            executor: Executor {
                registry,
                ingestor,
                targets,
            },
            jobs: Arc::new(RwLock::new(BTreeMap::new())),
            tick: Duration::from_secs(1),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Change how often due jobs are checked. Default: one second.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Schedule every registered provider whose manifest has an enabled
    /// schedule. Returns how many were scheduled.
    pub async fn schedule_all<'a>(
        &self,
        manifests: impl IntoIterator<Item = &'a ProviderManifest>,
    ) -> usize {
        let mut scheduled = 0;
        for manifest in manifests {
            let Some(schedule) = manifest.active_schedule() else {
                continue;
            };
            if !self.executor.registry.contains(&manifest.name) {
                warn!(provider = %manifest.name, "scheduled provider is not registered, skipping");
                continue;
            }
            match self.schedule(&manifest.name, schedule.clone()).await {
                Ok(()) => scheduled += 1,
                Err(e) => warn!(provider = %manifest.name, error = %e, "failed to schedule provider"),
            }
        }
        info!(count = scheduled, "providers scheduled");
        scheduled
    }

    /// Schedule `provider`, replacing any existing schedule.
    pub async fn schedule(&self, provider: &str, config: ScheduleConfig) -> Result<()> {
        let cadence = Cadence::from_config(&config)?;
        let next_run = cadence.first_run(Utc::now());
        info!(
            provider = %provider,
            cron = ?config.cron,
            interval = ?config.interval,
            description = ?config.description,
            "provider scheduled"
        );
        let job = ScheduledJob {
            config,
            cadence,
            enabled: true,
            in_flight: false,
            last_run: None,
            next_run,
            last_result: None,
            last_error: None,
        };
        self.jobs.write().await.insert(provider.to_owned(), job);
        Ok(())
    }

    /// Remove `provider`'s schedule. Returns whether one existed.
    pub async fn cancel(&self, provider: &str) -> bool {
        let removed = self.jobs.write().await.remove(provider).is_some();
        if removed {
            info!(provider = %provider, "schedule cancelled");
        }
        removed
    }

    /// Resume a disabled schedule from now, skipping missed firings.
    pub async fn enable(&self, provider: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(provider).ok_or_else(|| not_scheduled(provider))?;
        job.enabled = true;
        job.next_run = job.cadence.first_run(Utc::now());
        debug!(provider = %provider, "schedule enabled");
        Ok(())
    }

    /// Stop a schedule from firing until it is enabled again.
    pub async fn disable(&self, provider: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(provider).ok_or_else(|| not_scheduled(provider))?;
        job.enabled = false;
        debug!(provider = %provider, "schedule disabled");
        Ok(())
    }

    /// Run an ingestion now, outside the schedule.
    ///
    /// Uses the provider's schedule settings when it has one. `target`
    /// overrides the resolved target identifier and `config` the schedule's
    /// default config.
    pub async fn trigger(
        &self,
        provider: &str,
        target: Option<&str>,
        config: Option<ProviderConfig>,
    ) -> Result<IngestionReport> {
        let schedule = self
            .jobs
            .read()
            .await
            .get(provider)
            .map(|j| j.config.clone())
            .unwrap_or_default();
        info!(provider = %provider, "manual ingestion triggered");
        let result = self.executor.run(provider, &schedule, target, config).await;
        if let Some(job) = self.jobs.write().await.get_mut(provider) {
            record(job, Utc::now(), &result);
        }
        result
    }

    /// Snapshot of every schedule, ordered by provider name.
    pub async fn statuses(&self) -> Vec<ScheduleStatus> {
        self.jobs
            .read()
            .await
            .iter()
            .map(|(provider, job)| ScheduleStatus {
                provider: provider.clone(),
                enabled: job.enabled,
                cron: job.config.cron.clone(),
                interval: job.config.interval.clone(),
                description: job.config.description.clone(),
                last_run: job.last_run,
                next_run: job.next_run,
                last_result: job.last_result.clone(),
                last_error: job.last_error.clone(),
            })
            .collect()
    }

    /// Start the background loop.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PolyglotError::Schedule("scheduler is already running".into()));
        }
        let running = Arc::clone(&self.running);
        let jobs = Arc::clone(&self.jobs);
        let executor = self.executor.clone();
        let tick = self.tick;

        self.handle = Some(tokio::spawn(async move {
            info!("provider scheduler started");
            while running.load(Ordering::SeqCst) {
                fire_due(&jobs, &executor).await;
                tokio::time::sleep(tick).await;
            }
            info!("provider scheduler stopped");
        }));
        Ok(())
    }

    /// Stop the background loop and wait for it to finish. Firings already
    /// in progress run to completion on their own.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("stop called but scheduler is not running");
            return;
        }
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            error!(error = %e, "scheduler task panicked during shutdown");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn not_scheduled(provider: &str) -> PolyglotError {
    PolyglotError::Schedule(format!("provider `{provider}` has no schedule"))
}

fn record(job: &mut ScheduledJob, at: DateTime<Utc>, result: &Result<IngestionReport>) {
    job.last_run = Some(at);
    match result {
        Ok(report) => {
            job.last_result = Some(report.clone());
            job.last_error = None;
        }
        Err(e) => job.last_error = Some(e.to_string()),
    }
}

/// Spawn a firing for every enabled job that is due and not still running.
async fn fire_due(jobs: &Jobs, executor: &Executor) {
    let now = Utc::now();
    let mut due = Vec::new();
    {
        let mut jobs = jobs.write().await;
        for (provider, job) in jobs.iter_mut() {
            if !job.enabled || job.in_flight || !job.next_run.is_some_and(|next| next <= now) {
                continue;
            }
            job.in_flight = true;
            job.next_run = job.cadence.next_after(now);
            due.push((provider.clone(), job.config.clone()));
        }
    }

    for (provider, config) in due {
        let jobs = Arc::clone(jobs);
        let executor = executor.clone();
        tokio::spawn(async move {
            debug!(provider = %provider, "scheduled ingestion fired");
            // Run in its own task so a panicking provider still clears
            // `in_flight` below.
            let run = {
                let provider = provider.clone();
                tokio::spawn(async move { executor.run(&provider, &config, None, None).await })
            };
            let result = match run.await {
                Ok(result) => result,
                Err(e) => Err(PolyglotError::Schedule(format!("ingestion task failed: {e}"))),
            };
            match &result {
                Ok(report) => info!(
                    provider = %provider,
                    target = %report.target,
                    ingested = report.ingested,
                    "scheduled ingestion completed"
                ),
                Err(e) => warn!(provider = %provider, error = %e, "scheduled ingestion failed"),
            }
            if let Some(job) = jobs.write().await.get_mut(&provider) {
                job.in_flight = false;
                record(job, now, &result);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;
    use dataprover_codec::{HostValue, Record};
    use dataprover_provider::{DataProvider, IngestionService, MemoryTrieStore};

    use super::*;

    struct Counter;

    #[async_trait]
    impl DataProvider for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        fn description(&self) -> &str {
            "counts"
        }
        async fn initialize(&self, _config: &ProviderConfig) -> dataprover_provider::Result<()> {
            Ok(())
        }
        async fn fetch_data(
            &self,
            config: &ProviderConfig,
        ) -> dataprover_provider::Result<Vec<Record>> {
            let n = config.get("n").and_then(HostValue::as_i64).unwrap_or(1);
            Ok((0..n)
                .map(|i| Record::from([("i".to_owned(), HostValue::from(i))]))
                .collect())
        }
        async fn serialize_key(&self, record: &Record) -> dataprover_provider::Result<Vec<u8>> {
            Ok(vec![record.get("i").and_then(HostValue::as_i64).unwrap_or(0) as u8])
        }
        async fn serialize_value(&self, _record: &Record) -> dataprover_provider::Result<Vec<u8>> {
            Ok(vec![0xff])
        }
    }

    struct Exploding(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl DataProvider for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }
        fn description(&self) -> &str {
            "panics on fetch"
        }
        async fn initialize(&self, _config: &ProviderConfig) -> dataprover_provider::Result<()> {
            Ok(())
        }
        async fn fetch_data(
            &self,
            _config: &ProviderConfig,
        ) -> dataprover_provider::Result<Vec<Record>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("provider blew up");
        }
        async fn serialize_key(&self, _record: &Record) -> dataprover_provider::Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn serialize_value(&self, _record: &Record) -> dataprover_provider::Result<Vec<u8>> {
            Ok(vec![])
        }
    }

    fn scheduler() -> (Arc<MemoryTrieStore>, ProviderScheduler) {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(Counter));
        let store = Arc::new(MemoryTrieStore::new());
        let scheduler = ProviderScheduler::new(
            registry,
            Arc::new(IngestionService::new(store.clone())),
            store.clone(),
        );
        (store, scheduler)
    }

    fn every_second(target: &str) -> ScheduleConfig {
        ScheduleConfig {
            enabled: true,
            cron: Some("* * * * * *".into()),
            target_identifier: Some(target.into()),
            auto_create_target: true,
            ..ScheduleConfig::default()
        }
    }

    #[test]
    fn five_field_cron_is_normalized() {
        assert_eq!(normalize_cron_expr("30 9 * * 1-5"), "0 30 9 * * 1-5");
        assert_eq!(normalize_cron_expr("0 30 9 * * 1-5"), "0 30 9 * * 1-5");
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn intervals() {
        assert_eq!(parse_interval("30m").expect("30m"), Duration::from_secs(1800));
        assert_eq!(parse_interval("6H").expect("6h"), Duration::from_secs(6 * 3600));
        assert_eq!(parse_interval("1d").expect("1d"), Duration::from_secs(86_400));
        for bad in ["5s", "h", "10", "1.5h", "0m", "m30"] {
            assert!(parse_interval(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn cron_wins_over_interval() {
        let config = ScheduleConfig {
            cron: Some("0 0 * * *".into()),
            interval: Some("1h".into()),
            ..ScheduleConfig::default()
        };
        assert!(matches!(Cadence::from_config(&config), Ok(Cadence::Cron(_))));
        assert!(Cadence::from_config(&ScheduleConfig::default()).is_err());
    }

    #[test]
    fn target_placeholders() {
        let now = Utc
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("valid timestamp");
        assert_eq!(
            resolve_target("stats-{date}-{epoch}", "p", now),
            format!("stats-2024-03-09-{}", approximate_epoch(now))
        );
        assert_eq!(resolve_target("{datetime}", "p", now), "2024-03-09T14:05:07");
        assert_eq!(resolve_target("t{timestamp}", "p", now), format!("t{}", now.timestamp()));
        assert_eq!(resolve_target("", "pool-stats", now), "pool-stats-2024-03-09");
    }

    #[test]
    fn epoch_approximation() {
        let start = Utc.timestamp_opt(SHELLEY_START_SECS, 0).single().expect("valid");
        assert_eq!(approximate_epoch(start), 208);
        assert_eq!(approximate_epoch(start + chrono::Duration::days(5)), 209);
        assert_eq!(approximate_epoch(start + chrono::Duration::days(9)), 209);
    }

    #[tokio::test]
    async fn manual_trigger_ingests_with_override_config() {
        let (store, scheduler) = scheduler();
        let mut target_config = every_second("manual");
        target_config.cron = Some("0 0 1 1 *".into());
        scheduler.schedule("counter", target_config).await.expect("schedule");

        let mut config = ProviderConfig::new();
        config.insert("n".into(), HostValue::from(3));
        let report = scheduler
            .trigger("counter", None, Some(config))
            .await
            .expect("trigger must succeed");
        assert_eq!(report.target, "manual");
        assert_eq!(report.ingested, 3);
        assert_eq!(store.len("manual"), 3);
        assert_eq!(store.scheme("manual").as_deref(), Some(TARGET_SCHEME));

        let status = &scheduler.statuses().await[0];
        assert!(status.last_run.is_some());
        assert_eq!(status.last_result.as_ref().map(|r| r.ingested), Some(3));
    }

    #[tokio::test]
    async fn trigger_unknown_provider_fails() {
        let (_store, scheduler) = scheduler();
        assert!(scheduler.trigger("missing", Some("t"), None).await.is_err());
    }

    #[tokio::test]
    async fn enable_disable_cancel() {
        let (_store, scheduler) = scheduler();
        scheduler.schedule("counter", every_second("x")).await.expect("schedule");
        scheduler.disable("counter").await.expect("disable");
        assert!(!scheduler.statuses().await[0].enabled);
        scheduler.enable("counter").await.expect("enable");
        assert!(scheduler.statuses().await[0].enabled);
        assert!(scheduler.cancel("counter").await);
        assert!(!scheduler.cancel("counter").await);
        assert!(scheduler.enable("counter").await.is_err());
    }

    #[tokio::test]
    async fn schedule_all_skips_unregistered_and_inactive() {
        let (_store, scheduler) = scheduler();
        let active = ProviderManifest::parse(
            r#"{"name": "counter", "schedule": {"enabled": true, "interval": "1h"}}"#,
            std::path::Path::new("m.json"),
        )
        .expect("manifest");
        let unregistered = ProviderManifest::parse(
            r#"{"name": "ghost", "schedule": {"enabled": true, "interval": "1h"}}"#,
            std::path::Path::new("m.json"),
        )
        .expect("manifest");
        let inactive = ProviderManifest::parse(
            r#"{"name": "counter", "schedule": {"interval": "1h"}}"#,
            std::path::Path::new("m.json"),
        )
        .expect("manifest");
        assert_eq!(scheduler.schedule_all([&active, &unregistered, &inactive]).await, 1);
    }

    #[tokio::test]
    async fn background_loop_fires_and_keeps_schedule() {
        let (store, scheduler) = scheduler();
        let mut scheduler = scheduler.with_tick(Duration::from_millis(50));
        scheduler.schedule("counter", every_second("looped")).await.expect("schedule");
        scheduler.start().expect("start");
        assert!(scheduler.start().is_err());

        let mut fired = false;
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if store.len("looped") > 0 {
                fired = true;
                break;
            }
        }
        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert!(fired, "scheduled ingestion never ran");
        assert!(scheduler.statuses().await[0].next_run.is_some());
    }

    #[tokio::test]
    async fn panicking_firing_is_recorded_and_rescheduled() {
        let registry = ProviderRegistry::new();
        let provider = Arc::new(Exploding(std::sync::atomic::AtomicUsize::new(0)));
        registry.register(provider.clone());
        let store = Arc::new(MemoryTrieStore::new());
        let mut scheduler = ProviderScheduler::new(
            registry,
            Arc::new(IngestionService::new(store.clone())),
            store,
        )
        .with_tick(Duration::from_millis(50));
        scheduler.schedule("exploding", every_second("boom")).await.expect("schedule");
        scheduler.start().expect("start");

        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if provider.0.load(Ordering::SeqCst) >= 2 {
                break;
            }
        }
        scheduler.stop().await;
        assert!(
            provider.0.load(Ordering::SeqCst) >= 2,
            "job stopped firing after a panic"
        );
        let status = &scheduler.statuses().await[0];
        assert!(status.last_error.as_deref().is_some_and(|e| e.contains("ingestion task failed")));
    }
}

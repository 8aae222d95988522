//! Hot reload of provider scripts.
//!
//! [`ReloadWatcher`] watches the directory of every provider it is given.
//! When a provider's script file is created or modified it waits for a short
//! debounce window, so an editor's multi-step write settles, then reloads the
//! provider. A failed reload is logged and the previous script stays live.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dataprover_provider::DataProvider;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::adapter::PolyglotProvider;
use crate::error::{PolyglotError, Result};

/// Quiet period between the last file event and the reload.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

impl From<notify::Error> for PolyglotError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

/// Background watcher that reloads providers whose script changed.
///
/// Dropping the watcher stops it.
pub struct ReloadWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    watched: usize,
}

impl std::fmt::Debug for ReloadWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadWatcher")
            .field("watched", &self.watched)
            .finish_non_exhaustive()
    }
}

impl ReloadWatcher {
    /// Start watching `providers`. Must be called from within a tokio
    /// runtime.
    pub fn start(providers: impl IntoIterator<Item = Arc<PolyglotProvider>>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "file watcher error"),
        })?;

        let mut scripts: HashMap<PathBuf, Arc<PolyglotProvider>> = HashMap::new();
        for provider in providers {
            let dir = provider
                .directory()
                .canonicalize()
                .unwrap_or_else(|_| provider.directory().to_path_buf());
            let Some(file_name) = provider.script_path().file_name() else {
                continue;
            };
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            tracing::debug!(provider = %provider.name(), path = %dir.display(), "watching provider directory");
            scripts.insert(dir.join(file_name), provider);
        }

        let watched = scripts.len();
        tracing::info!(providers = watched, "hot reload watcher started");
        let task = tokio::spawn(watch_loop(rx, scripts));
        Ok(Self {
            _watcher: watcher,
            task,
            watched,
        })
    }

    /// Number of providers being watched.
    pub fn watched(&self) -> usize {
        self.watched
    }

    /// Stop watching. Equivalent to dropping the watcher.
    pub fn stop(self) {}
}

impl Drop for ReloadWatcher {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!("hot reload watcher stopped");
    }
}

fn matching<'a>(
    scripts: &'a HashMap<PathBuf, Arc<PolyglotProvider>>,
    path: &Path,
) -> Option<&'a Arc<PolyglotProvider>> {
    scripts.get(path).or_else(|| {
        // Event paths may not be canonical (e.g. a symlinked temp dir).
        let canonical = path.canonicalize().ok()?;
        scripts.get(&canonical)
    })
}

async fn watch_loop(
    mut events: mpsc::UnboundedReceiver<PathBuf>,
    scripts: HashMap<PathBuf, Arc<PolyglotProvider>>,
) {
    while let Some(path) = events.recv().await {
        let Some(first) = matching(&scripts, &path) else {
            continue;
        };
        let mut pending = BTreeSet::from([first.name().to_owned()]);

        // Debounce: keep collecting until the files have been quiet for
        // one window.
        loop {
            match tokio::time::timeout(DEBOUNCE, events.recv()).await {
                Ok(Some(path)) => {
                    if let Some(provider) = matching(&scripts, &path) {
                        pending.insert(provider.name().to_owned());
                    }
                }
                Ok(None) => return,
                Err(_) => break,
            }
        }

        for provider in scripts.values().filter(|p| pending.contains(p.name())) {
            tracing::info!(provider = %provider.name(), "script changed, reloading");
            if let Err(err) = provider.reload().await {
                tracing::warn!(provider = %provider.name(), error = %err, "hot reload failed");
            }
        }
    }
}

#[cfg(all(test, feature = "javascript"))]
mod tests {
    use dataprover_provider::ProviderConfig;

    use super::*;

    fn script(key: i64) -> String {
        format!(
            "function fetchData() {{ return [{{}}]; }}\n\
             function serializeKey(r) {{ return codec.encode({key}); }}\n\
             function serializeValue(r) {{ return codec.encode(0); }}\n"
        )
    }

    async fn key_of(provider: &PolyglotProvider) -> Vec<u8> {
        provider
            .serialize_key(&Default::default())
            .await
            .expect("serialize must succeed")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reloads_changed_script_and_survives_broken_edit() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("manifest.json"), r#"{"name": "watched"}"#).expect("manifest");
        std::fs::write(dir.path().join("provider.js"), script(1)).expect("script");

        let provider = Arc::new(PolyglotProvider::open(dir.path()).await.expect("open"));
        provider
            .initialize(&ProviderConfig::new())
            .await
            .expect("initialize must succeed");
        let watcher = ReloadWatcher::start([provider.clone()]).expect("watcher must start");
        assert_eq!(watcher.watched(), 1);

        std::fs::write(dir.path().join("provider.js"), script(2)).expect("rewrite");
        let mut reloaded = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if key_of(&provider).await == vec![0x02] {
                reloaded = true;
                break;
            }
        }
        assert!(reloaded, "provider was not reloaded after the script changed");

        std::fs::write(dir.path().join("provider.js"), "function (").expect("break script");
        tokio::time::sleep(DEBOUNCE * 10).await;
        assert_eq!(key_of(&provider).await, vec![0x02]);

        watcher.stop();
    }
}

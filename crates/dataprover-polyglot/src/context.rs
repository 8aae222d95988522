//! Execution contexts.
//!
//! An [`ExecutionContext`] owns one guest interpreter for one provider.
//! Interpreters are not thread-safe, so each generation of a context runs
//! on a dedicated worker thread that owns the engine and its capability
//! set; the async side talks to it through a command channel and awaits
//! replies on oneshot channels.
//!
//! State machine: `Unloaded -> Loaded -> Initialized`, with `Reloading` a
//! transient state that returns to where it came from and `Failed`
//! reachable from any state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use dataprover_codec::HostValue;
use dataprover_provider::ProviderConfig;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::capabilities::Capabilities;
use crate::config::SandboxConfig;
use crate::engine::{GuestEngine, create_engine, entry};
use crate::error::{PolyglotError, Result};
use crate::manifest::ScriptLanguage;

/// Lifecycle state of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Unloaded,
    Loaded,
    Initialized,
    Reloading,
    Failed,
    Closed,
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Initialized => "initialized",
            Self::Reloading => "reloading",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

enum Command {
    Load {
        source: String,
        file_name: String,
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
    Call {
        name: String,
        args: Vec<HostValue>,
        reply: oneshot::Sender<Result<HostValue>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

fn run_worker(
    mut engine: Box<dyn GuestEngine>,
    capabilities: Arc<Capabilities>,
    commands: mpsc::Receiver<Command>,
) {
    while let Ok(command) = commands.recv() {
        match command {
            Command::Load {
                source,
                file_name,
                reply,
            } => {
                let result = engine.load(&source, &file_name).map(|()| {
                    entry::ALL
                        .iter()
                        .filter(|name| engine.has_entry_point(name))
                        .map(|name| (*name).to_owned())
                        .collect()
                });
                let _ = reply.send(result);
            }
            Command::Call { name, args, reply } => {
                let _ = reply.send(engine.call(&name, args));
            }
            Command::Close { reply } => {
                engine.close();
                capabilities.close();
                let _ = reply.send(());
                return;
            }
        }
    }
    // Every sender dropped without an explicit close.
    engine.close();
    capabilities.close();
}

/// One interpreter instance and the thread that drives it.
struct Generation {
    commands: mpsc::Sender<Command>,
    entry_points: Vec<String>,
}

impl Generation {
    async fn spawn(
        provider: &str,
        language: ScriptLanguage,
        provider_dir: &Path,
        sandbox: &SandboxConfig,
        runtime: Option<Handle>,
    ) -> Result<Self> {
        let (commands, receiver) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        let name = provider.to_owned();
        let dir = provider_dir.to_path_buf();
        let sandbox = sandbox.clone();
        thread::Builder::new()
            .name(format!("provider-{provider}"))
            .spawn(move || {
                let capabilities = match Capabilities::new(&name, &dir, sandbox) {
                    Ok(caps) => match runtime {
                        Some(handle) => caps.with_runtime(handle),
                        None => caps,
                    },
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let capabilities = Arc::new(capabilities);
                match create_engine(language, Arc::clone(&capabilities)) {
                    Ok(engine) => {
                        let _ = ready_tx.send(Ok(()));
                        run_worker(engine, capabilities, receiver);
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })?;

        ready_rx
            .await
            .map_err(|_| PolyglotError::ContextClosed(provider.to_owned()))??;
        Ok(Self {
            commands,
            entry_points: Vec::new(),
        })
    }

    async fn request<T>(
        &self,
        provider: &str,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| PolyglotError::ContextClosed(provider.to_owned()))?;
        response
            .await
            .map_err(|_| PolyglotError::ContextClosed(provider.to_owned()))
    }

    async fn load(&mut self, provider: &str, source: String, file_name: String) -> Result<()> {
        self.entry_points = self
            .request(provider, |reply| Command::Load {
                source,
                file_name,
                reply,
            })
            .await??;
        Ok(())
    }

    async fn call(&self, provider: &str, name: &str, args: Vec<HostValue>) -> Result<HostValue> {
        self.request(provider, |reply| Command::Call {
            name: name.to_owned(),
            args,
            reply,
        })
        .await?
    }

    async fn close(&self, provider: &str) {
        // A worker that already exited has nothing left to release.
        let _ = self.request(provider, |reply| Command::Close { reply }).await;
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// An isolated guest environment for one provider.
pub struct ExecutionContext {
    provider: String,
    language: ScriptLanguage,
    provider_dir: PathBuf,
    script_path: PathBuf,
    sandbox: SandboxConfig,
    runtime: Option<Handle>,
    state: ContextState,
    generation: Option<Generation>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("provider", &self.provider)
            .field("language", &self.language)
            .field("script_path", &self.script_path)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Start an interpreter for `provider` with its capability set bound.
    ///
    /// The script at `script_path` is not evaluated until [`load`](Self::load).
    /// Async-backed capabilities use the runtime this is called from.
    pub async fn create(
        provider: &str,
        language: ScriptLanguage,
        script_path: &Path,
        sandbox: SandboxConfig,
    ) -> Result<Self> {
        let provider_dir = script_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let runtime = Handle::try_current().ok();
        let generation =
            Generation::spawn(provider, language, &provider_dir, &sandbox, runtime.clone()).await?;
        Ok(Self {
            provider: provider.to_owned(),
            language,
            provider_dir,
            script_path: script_path.to_path_buf(),
            sandbox,
            runtime,
            state: ContextState::Unloaded,
            generation: Some(generation),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn language(&self) -> ScriptLanguage {
        self.language
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Evaluate the script. Moves to `Loaded`, or `Failed` on error.
    pub async fn load(&mut self) -> Result<()> {
        let result = self.load_inner().await;
        self.state = match &result {
            Ok(()) => ContextState::Loaded,
            Err(_) => ContextState::Failed,
        };
        if result.is_ok() {
            tracing::info!(
                provider = %self.provider,
                language = %self.language,
                path = %self.script_path.display(),
                "script loaded"
            );
        }
        result
    }

    async fn load_inner(&mut self) -> Result<()> {
        let (source, file_name) = read_script(&self.provider, &self.script_path).await?;
        let generation = self
            .generation
            .as_mut()
            .ok_or_else(|| PolyglotError::ContextClosed(self.provider.clone()))?;
        generation.load(&self.provider, source, file_name).await
    }

    /// Whether the loaded script defines `name`.
    pub fn has_entry_point(&self, name: &str) -> bool {
        self.generation
            .as_ref()
            .is_some_and(|g| g.entry_points.iter().any(|e| e == name))
    }

    /// Entry points the loaded script defines.
    pub fn entry_points(&self) -> &[String] {
        self.generation
            .as_ref()
            .map(|g| g.entry_points.as_slice())
            .unwrap_or_default()
    }

    /// Call an entry point.
    ///
    /// Missing required entry points fail with `EntryPointMissing`; the
    /// defaults for optional ones are applied by the adapter.
    pub async fn call(&self, name: &str, args: Vec<HostValue>) -> Result<HostValue> {
        let generation = self.generation()?;
        if !self.has_entry_point(name) {
            return Err(PolyglotError::EntryPointMissing {
                provider: self.provider.clone(),
                entry_point: name.to_owned(),
            });
        }
        tracing::debug!(provider = %self.provider, entry_point = name, "calling entry point");
        generation.call(&self.provider, name, args).await
    }

    /// Run `initialize(config)` when the script defines it, and move to
    /// `Initialized`.
    pub async fn initialize(&mut self, config: &ProviderConfig) -> Result<()> {
        if self.has_entry_point(entry::INITIALIZE) {
            let arg = HostValue::Map(config.clone());
            if let Err(err) = self.call(entry::INITIALIZE, vec![arg]).await {
                self.state = ContextState::Failed;
                return Err(err);
            }
        }
        self.state = ContextState::Initialized;
        Ok(())
    }

    /// Replace the interpreter with a fresh one running the current script.
    ///
    /// With `initialize`, the new generation is also initialized with that
    /// config before it replaces the old one. Any failure leaves the
    /// previous generation in place and its state unchanged.
    pub async fn reload(&mut self, initialize: Option<&ProviderConfig>) -> Result<()> {
        let previous = self.state;
        self.state = ContextState::Reloading;
        match self.build_generation(initialize).await {
            Ok(generation) => {
                if let Some(old) = self.generation.replace(generation) {
                    old.close(&self.provider).await;
                }
                self.state = if initialize.is_some() {
                    ContextState::Initialized
                } else {
                    ContextState::Loaded
                };
                tracing::info!(provider = %self.provider, "script reloaded");
                Ok(())
            }
            Err(err) => {
                self.state = previous;
                tracing::warn!(
                    provider = %self.provider,
                    error = %err,
                    "reload failed, keeping previous script"
                );
                Err(err)
            }
        }
    }

    async fn build_generation(&self, initialize: Option<&ProviderConfig>) -> Result<Generation> {
        let (source, file_name) = read_script(&self.provider, &self.script_path).await?;
        let mut generation = Generation::spawn(
            &self.provider,
            self.language,
            &self.provider_dir,
            &self.sandbox,
            self.runtime.clone(),
        )
        .await?;

        let staged = async {
            generation.load(&self.provider, source, file_name).await?;
            for required in entry::REQUIRED {
                if !generation.entry_points.iter().any(|e| e == required) {
                    return Err(PolyglotError::EntryPointMissing {
                        provider: self.provider.clone(),
                        entry_point: (*required).to_owned(),
                    });
                }
            }
            if let Some(config) = initialize {
                if generation.entry_points.iter().any(|e| e == entry::INITIALIZE) {
                    generation
                        .call(&self.provider, entry::INITIALIZE, vec![HostValue::Map(config.clone())])
                        .await?;
                }
            }
            Ok(())
        }
        .await;

        match staged {
            Ok(()) => Ok(generation),
            Err(err) => {
                generation.close(&self.provider).await;
                Err(err)
            }
        }
    }

    /// Release the interpreter and every resource its capabilities hold.
    /// Idempotent.
    pub async fn close(&mut self) {
        if let Some(generation) = self.generation.take() {
            if generation.entry_points.iter().any(|e| e == entry::CLOSE) {
                let _ = generation.call(&self.provider, entry::CLOSE, vec![]).await;
            }
            generation.close(&self.provider).await;
            tracing::debug!(provider = %self.provider, "execution context closed");
        }
        self.state = ContextState::Closed;
    }

    fn generation(&self) -> Result<&Generation> {
        self.generation
            .as_ref()
            .ok_or_else(|| PolyglotError::ContextClosed(self.provider.clone()))
    }
}

async fn read_script(provider: &str, path: &Path) -> Result<(String, String)> {
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PolyglotError::ScriptLoad {
            provider: provider.to_owned(),
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((source, file_name))
}

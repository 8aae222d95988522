//! Script-backed data providers.
//!
//! Providers written in JavaScript or Python run inside isolated
//! interpreters and reach the host only through a fixed capability set.
//!
//! - **[`manifest`]** -- `manifest.json` parsing, [`ScriptLanguage`] and
//!   [`ScheduleConfig`].
//! - **[`config`]** -- [`SandboxConfig`] permissions.
//! - **[`capabilities`]** -- the host objects bound into every guest.
//! - **[`engine`]** -- the [`GuestEngine`](engine::GuestEngine) trait and its
//!   QuickJS and CPython implementations.
//! - **[`context`]** -- [`ExecutionContext`], one interpreter on its own
//!   worker thread.
//! - **[`adapter`]** -- [`PolyglotProvider`], the
//!   [`DataProvider`](dataprover_provider::DataProvider) implementation.
//! - **[`loader`]** -- [`PluginLoader`] discovery and initialization.
//! - **[`watcher`]** -- [`ReloadWatcher`] hot reload.
//! - **[`scheduler`]** -- [`ProviderScheduler`] recurring ingestion.

pub mod adapter;
pub mod capabilities;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod scheduler;
pub mod watcher;

pub use adapter::PolyglotProvider;
pub use capabilities::Capabilities;
pub use config::SandboxConfig;
pub use context::{ContextState, ExecutionContext};
pub use error::{PolyglotError, Result};
pub use loader::{LoadSummary, LoadedProvider, PluginLoader};
pub use manifest::{MANIFEST_FILE, ProviderManifest, ScheduleConfig, ScriptLanguage};
pub use scheduler::{ProviderScheduler, ScheduleStatus};
pub use watcher::ReloadWatcher;

//! Thin `tracing-subscriber` init helper, trimmed down from the teacher's
//! `tvix_tracing::TracingBuilder` (which layers OTLP/journald/Tempo
//! exporters on top of the same `EnvFilter` base). This crate only ever
//! needs the base layer: an embedder decides what to do with spans by
//! installing its own subscriber, so `init` is opt-in and safe to call at
//! most once per process.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a process-global `fmt` subscriber reading `RUST_LOG` (default
/// `info`). Returns an error if a global subscriber is already set, the
/// same contract `tracing::subscriber::set_global_default` exposes.
pub fn init() -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
}

use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::TelemetryConfig;

/// Guard that must be held for the lifetime of the process when logging to a
/// file (the non-blocking writer flushes on drop).
pub struct TelemetryGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// SPEC_FULL.md §C: honors `TelemetryConfig` instead of a hardcoded filter
/// and format. WARN/ERROR always reach the subscriber; the "logging enabled"
/// toggle (spec.md §6) only gates INFO-level PBC cycle logging at the call
/// site, not this subscriber setup.
pub fn init_tracing(cfg: &TelemetryConfig) -> TelemetryGuard {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{},hyper=warn,reqwest=warn,tower_http=info", cfg.log_level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    let file_guard = match &cfg.log_file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "pbc.log".into());
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            if cfg.log_json {
                registry.with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking)).init();
            } else {
                registry.with(tracing_subscriber::fmt::layer().with_writer(non_blocking)).init();
            }
            Some(guard)
        }
        None => {
            if cfg.log_json {
                registry.with(tracing_subscriber::fmt::layer().json()).init();
            } else {
                registry.with(tracing_subscriber::fmt::layer()).init();
            }
            None
        }
    };

    TelemetryGuard { _file_guard: file_guard }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! { _ = ctrl_c => {}, _ = terminate => {}, }
    info!("shutdown signal received");
}

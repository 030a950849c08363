use std::io;
/// Structured logging for uor-collection
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::LogLevel;

/// Initialize structured logging with optional JSON output.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(json_output: bool, level: LogLevel) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("uor_collection={}", level.as_str())));

    let registry = Registry::default().with(env_filter);

    if json_output {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    }

    Ok(())
}

#[macro_export]
macro_rules! log_fetch {
    ($desc:expr) => {
        tracing::debug!(
            digest = %$desc.digest,
            media_type = %$desc.media_type,
            size_bytes = $desc.size,
            "Fetching manifest"
        );
    };
}

#[macro_export]
macro_rules! log_integrity_fail {
    ($expected:expr, $actual:expr, $size:expr) => {
        tracing::error!(
            expected = %$expected,
            actual = %$actual,
            size_bytes = $size,
            "Content digest mismatch"
        );
    };
}

#[macro_export]
macro_rules! log_load_complete {
    ($collection:expr, $stats:expr) => {
        tracing::info!(
            collection = %$collection,
            manifests = $stats.manifests_fetched,
            nodes_added = $stats.nodes_added,
            duration_ms = $stats.elapsed_ms,
            "Collection loaded"
        );
    };
}

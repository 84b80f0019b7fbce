// SPDX-License-Identifier: GPL-3.0-only
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber with configuration
///
/// `RUST_LOG` takes precedence over `log_level`. `log_format` is either
/// `"pretty"` (human readable, ANSI colored) or `"json"` (one object per line).
pub fn setup_logging(log_level: &str, log_format: &str) -> anyhow::Result<()> {
    let filter = build_filter(log_level);

    let registry = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?;
    }

    Ok(())
}

fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

use anyhow::{Context, Result};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Environment;

/// Seconds since the Unix epoch, used for production log lines.
fn unix_timer() -> ChronoUtc {
    ChronoUtc::new("%s".to_string())
}

fn filter_for(environment: Environment) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| environment.default_filter().into())
}

/// Install the process-wide subscriber.
///
/// `dev` logs human-readable lines with RFC 3339 UTC timestamps and keeps only
/// errors; `prod` logs JSON with Unix timestamps at info. `RUST_LOG` overrides
/// the level in both cases. Nothing is logged here; the caller decides what
/// the first line is.
pub fn init(environment: Environment) -> Result<()> {
    let registry = tracing_subscriber::registry().with(filter_for(environment));

    match environment {
        Environment::Dev => registry
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
        Environment::Prod => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_timer(unix_timer()),
            )
            .try_init(),
    }
    .context("Failed to install tracing subscriber")
}

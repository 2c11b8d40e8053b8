//! Tracing initialisation
//!
//! `RUST_LOG` always wins. Without it the filter is built from the configured
//! level, scoped to the movement crates so dependency noise stays at `warn`.

use crate::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose events follow the configured level
const OWN_TARGETS: &[&str] = &["mvmt_common", "mvmt_ingest"];

/// Build the filter directive string for a level, e.g. `warn,mvmt_ingest=debug`
pub fn filter_directives(level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(OWN_TARGETS.iter().map(|t| format!("{}={}", t, level)));
    directives.join(",")
}

/// Install the global tracing subscriber (stderr, human-readable)
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(level))
            .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", level, e)))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| Error::Internal(format!("Tracing already initialised: {}", e)))
}

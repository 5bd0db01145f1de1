//! Diagnostic tracing for the pipeline.
//!
//! User-facing progress goes through [`crate::events`]; this is for
//! developers and reads `RUST_LOG` (default `warn`), writing to stderr.
//!
//! ```bash
//! RUST_LOG=triage=debug triage --run "review ./src for injection bugs"
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

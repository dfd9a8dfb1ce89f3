//! Diagnostics on stderr, filtered by `RUST_LOG` (default `warn`).
//!
//! ```bash
//! RUST_LOG=gitdojo_session=debug gitdojo play first-commit
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

//! Tracing initialization: an `EnvFilter` seeded from configuration but
//! overridable by `RUST_LOG`, and idempotent `try_init` so tests that
//! initialize tracing more than once don't panic.

use crate::config::SystemSettings;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(system: &SystemSettings) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&system.log_level));

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .or_else(|e| {
            if e.to_string().contains("a global default trace dispatcher has already been set") {
                Ok(())
            } else {
                Err(format!("failed to initialize tracing: {e}"))
            }
        })
}

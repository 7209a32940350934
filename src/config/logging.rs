use super::LogLevel;
use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Installs the global tracing subscriber. Hosts embedding the engine call
/// this once at startup; repeat calls (and an already-installed subscriber)
/// are no-ops. `RUST_LOG` overrides the configured level.
pub fn setup_logging(level: LogLevel) {
    INIT.call_once(|| {
        let level = tracing::Level::from(level);
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{level},hyper=warn,reqwest=warn")));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).compact());

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_logging_is_idempotent() {
        setup_logging(LogLevel::Info);
        setup_logging(LogLevel::Debug);
    }
}

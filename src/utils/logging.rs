//! Logging setup
//!
//! Console logging through `tracing`. `RUST_LOG` overrides the configured level.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Setup logging with the specified level
///
/// Calling it more than once keeps the first subscriber.
pub fn setup_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .with(filter)
        .try_init()
        .ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_setup_is_harmless() {
        assert!(setup_logging("warn").is_ok());
        assert!(setup_logging("debug").is_ok());
    }
}

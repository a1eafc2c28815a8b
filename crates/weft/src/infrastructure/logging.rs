//! Logging setup
//!
//! The engine logs through `tracing`. Installing a subscriber is left to
//! the binary or test that drives it; [`init_logging`] is the default one.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const ENV_LOG: &str = "WEFT_LOG";

static INIT: Once = Once::new();

/// Install a fmt subscriber filtered by `WEFT_LOG` (default `warn`).
///
/// Safe to call many times; only the first call has an effect, and a
/// subscriber installed elsewhere is left alone.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging();
        init_logging();
        tracing::debug!("logging initialized twice without panicking");
    }
}

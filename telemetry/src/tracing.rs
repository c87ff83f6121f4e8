//! Tracing initialization for binaries and tests.
//!
//! All executables in this workspace initialize logging through this module so
//! that filtering and formatting stay consistent. The `RUST_LOG` environment
//! variable controls the filter, defaulting to `info`.

use std::io::Error;
use std::sync::Once;

use config::Environment;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Default directive applied when `RUST_LOG` is unset.
const DEFAULT_FILTER_DIRECTIVE: &str = "info";

static TEST_TRACING: Once = Once::new();

/// Initializes the global tracing subscriber for a long-running service.
///
/// In the dev environment output is human-oriented (pretty, with targets); in
/// prod it is compact single-line output suited to log collectors. Events
/// emitted through the `log` crate are bridged into tracing by the
/// subscriber.
///
/// Must be called at most once per process, before any spans are created.
pub fn init_tracing(service_name: &str) -> Result<(), Error> {
    let environment = Environment::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER_DIRECTIVE));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(environment.is_dev());

    let result = if environment.is_dev() {
        builder.pretty().try_init()
    } else {
        builder.compact().try_init()
    };
    result.map_err(Error::other)?;

    ::tracing::info!(service_name, %environment, "tracing initialized");

    Ok(())
}

/// Initializes tracing for tests.
///
/// Safe to call from every test; only the first call installs the subscriber.
/// Output is captured per-test by the libtest harness.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER_DIRECTIVE));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

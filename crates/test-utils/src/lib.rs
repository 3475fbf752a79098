pub mod builders;
pub mod fake_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use etldag::logging::LOG_ENV;

/// Engine logs at debug, everything else (tokio, test deps) at warn.
pub const TEST_LOG_DIRECTIVES: &str = "warn,etldag=debug";

static INIT: Once = Once::new();

/// Install a test-captured subscriber once per test binary.
///
/// Output is shown for failing tests only. `ETLDAG_LOG` overrides the
/// default directives, e.g. `ETLDAG_LOG=etldag::events=trace`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = std::env::var(LOG_ENV)
            .ok()
            .and_then(|raw| EnvFilter::try_new(raw).ok())
            .unwrap_or_else(|| EnvFilter::new(TEST_LOG_DIRECTIVES));

        // Another harness may already own the global subscriber.
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `fut`, panicking if it takes longer than `limit`.
///
/// Under `start_paused` time the limit is virtual, so multi-hour retry
/// schedules finish instantly while a hung run still fails the test.
pub async fn within<F, T>(limit: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(value) => value,
        Err(_) => panic!("run did not finish within {limit:?} of tokio time"),
    }
}

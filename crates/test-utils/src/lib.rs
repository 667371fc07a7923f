pub mod builders;
pub mod scripted_step;

use std::sync::{Arc, Once};
use std::time::Duration;

use dutrun::config::EngineOptions;
use dutrun::engine::Orchestrator;
use dutrun::registry::PluginRegistry;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Engine options tuned for tests: short step timeout, quick status polls.
pub fn test_options() -> EngineOptions {
    EngineOptions {
        default_step_timeout: Duration::from_secs(2),
        max_parallel_targets: 8,
        status_poll_interval: Duration::from_millis(20),
        buffer_capacity: 64,
    }
}

/// Orchestrator over `registry` with [`test_options`].
pub fn orchestrator(registry: PluginRegistry) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(Arc::new(registry), test_options()))
}

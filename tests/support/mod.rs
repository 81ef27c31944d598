// ABOUTME: Test support utilities.
// ABOUTME: Provides the scripted fake transport and tracing setup for integration tests.

use herd::types::{AuthMethod, Target};
use std::sync::Once;

// Each test binary only uses some of these items, so allow dead_code.
#[allow(dead_code)]
pub mod fake;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("herd=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A password-authenticated target on port 22.
#[allow(dead_code)]
pub fn target(host: &str) -> Target {
    Target::new(host, "root").auth(AuthMethod::password("secret"))
}

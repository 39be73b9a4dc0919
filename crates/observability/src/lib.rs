//! Tracing/logging setup shared by the forum crates.

/// Initialize process-wide JSON logging.
///
/// `RUST_LOG` wins over `default_filter`. Safe to call multiple times;
/// subsequent calls become no-ops.
pub fn init(default_filter: &str) {
    subscriber::init(default_filter);
}

/// Initialize human-readable logging captured by the test harness.
pub fn init_for_tests() {
    subscriber::init_for_tests();
}

/// Subscriber construction (filters, formatting).
pub mod subscriber;

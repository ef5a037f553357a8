// Logging initialization
//
// The teacher's `main.rs` calls `tracing_subscriber::fmt::init()` directly;
// here we upgrade that one call into a small helper so both `subspace host`
// and `subspace cyber` get identical formatting plus `RUST_LOG` support,
// and cyber processes tag every span with their own name.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. Safe to call once per process;
/// a second call is a no-op (the underlying `set_global_default` error is
/// swallowed, matching how multiple `#[tokio::test]`s in one binary behave).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Like [`init_tracing`] but stamps every event with a `cyber` field,
/// used by `subspace cyber` so multi-cyber log aggregation can filter by
/// process.
pub fn init_tracing_for_cyber(cyber_name: &str) {
    init_tracing();
    tracing::info!(cyber = cyber_name, "tracing initialized for cyber process");
}

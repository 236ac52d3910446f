use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a `tracing_subscriber` env-filter subscriber once per process; safe to call from
/// every test that wants log output (`RUST_LOG=debug cargo test -- --nocapture`).
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ =
            tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
    });
}

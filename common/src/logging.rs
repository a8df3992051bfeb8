/// Initialise the global `tracing` subscriber.
///
/// Grounded on `control-plane/agents/core/src/server.rs::init_tracing`: an
/// `EnvFilter` taken from `RUST_LOG` when set, falling back to `info`.
pub fn init_tracing() {
    if let Ok(filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }
}

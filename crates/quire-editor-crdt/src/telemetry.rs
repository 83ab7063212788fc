//! Logging setup.

/// Default filter: our crates at debug, the CRDT internals quieter.
pub const DEFAULT_FILTER: &str = "debug,loro_internal=warn,loro=info";

/// Install the global tracing subscriber and, in the browser, the panic
/// hook. Safe to call more than once; later calls are ignored.
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
pub fn init_logging() {
    use tracing::Level;
    use tracing::subscriber::set_global_default;
    use tracing_subscriber::Registry;
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;

    console_error_panic_hook::set_once();

    let console_level = if cfg!(debug_assertions) {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let wasm_layer = tracing_wasm::WASMLayer::new(
        tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(console_level)
            .build(),
    );

    let reg = Registry::default()
        .with(EnvFilter::new(DEFAULT_FILTER))
        .with(wasm_layer);

    let _ = set_global_default(reg);
}

/// Install the global tracing subscriber, honoring `RUST_LOG`. Safe to
/// call more than once; later calls are ignored.
#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .try_init();
}

// Utility functions for hotplug-passthru

/// Logging setup
pub mod logging {
    use tracing_subscriber::EnvFilter;

    /// Filter used when RUST_LOG is unset
    pub const DEFAULT_FILTER: &str = "info,hotplug_passthru=debug";

    /// Sends tracing output to stderr, filtered by RUST_LOG
    ///
    /// Calling this more than once keeps the first subscriber.
    pub fn init() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

pub mod agent_engine;
pub mod browser;
pub mod config;
pub mod errors;
pub mod llm;
pub mod session;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

/// Installs the `tracing` subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

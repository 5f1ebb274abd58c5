//! Logging setup for CLI commands

/// Console logging, INFO by default, overridable with RUST_LOG
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .init();
}

//! assetflow CLI Library
//!
//! Everything the `assetflow` binary runs after argument parsing: the
//! commands, the watcher, the live reload server and the backend proxy.
//!
//! # Modules
//!
//! - [`cmd`] - Command implementations (build and dev flavours)
//! - [`watch`] - Debounced per-rule rebuild state machines
//! - [`server`] - Static development server with live reload
//! - [`proxy`] - Live reload in front of an external backend
//!
//! # Example
//!
//! ```no_run
//! use assetflow::{Command, Config, cmd};
//!
//! # async fn demo() -> color_eyre::eyre::Result<()> {
//! let config = Config::load_with_env("assetflow.toml".as_ref())?;
//! cmd::build::run(&config, Command::Build).await?;
//! # Ok(())
//! # }
//! ```

pub mod cmd;
pub mod proxy;
pub mod server;
pub mod watch;

pub use assetflow_core::Config;
pub use assetflow_pipeline::{Command, Plan, ReloadKind, ServingMode};

/// Initialize tracing with the specified verbosity level.
///
/// # Arguments
///
/// * `verbose` - Verbosity level (0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE)
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

//! assetflow CLI
//!
//! Front-end asset pipeline: styles, scripts, images and templates, served
//! with live reload or built for production.
//!
//! This is the binary entry point. The library functionality is in `lib.rs`.

use assetflow::{Command, cmd};
use clap::Parser;
use color_eyre::eyre::Result;

/// Command-line interface for assetflow.
#[derive(Parser)]
#[command(
    name = "assetflow",
    version,
    about = "Front-end asset pipeline with live reload"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "assetflow.toml")]
    config: std::path::PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides shared by the serving commands.
#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
    /// Open browser automatically
    #[arg(long)]
    open: bool,
}

/// Available CLI commands.
#[derive(clap::Subcommand)]
enum Commands {
    /// Build styles and scripts, serve them with live reload
    Dev(ServeArgs),
    /// Like `dev`, but in front of a backend server
    DevProxy(ServeArgs),
    /// Production build of styles, scripts and images
    Build,
    /// Render the static site, serve it with live reload
    StaticDev(ServeArgs),
    /// Production build of the static site
    StaticBuild,
}

impl Commands {
    fn split(self) -> (Command, ServeArgs) {
        match self {
            Self::Dev(args) => (Command::Dev, args),
            Self::DevProxy(args) => (Command::DevProxy, args),
            Self::Build => (Command::Build, ServeArgs::default()),
            Self::StaticDev(args) => (Command::StaticDev, args),
            Self::StaticBuild => (Command::StaticBuild, ServeArgs::default()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    assetflow::init_tracing(cli.verbose);

    let (command, serve) = cli.command.split();
    let mut config = cmd::load_config(&cli.config)?;
    if let Some(port) = serve.port {
        config.server.port = port;
    }
    config.server.open |= serve.open;

    cmd::run(&config, command).await
}

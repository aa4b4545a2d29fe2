//! ghh CLI - launch the mother-ship and manage its wings.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon
//! ghh launch
//!
//! # Run a wing from a config file
//! ghh start hook.json --port 4000
//! ghh start hook.json --name staging --port 4001 --cwd ./staging
//!
//! # Inspect the fleet
//! ghh ls
//! ghh info staging
//! ghh logs staging -n 50
//!
//! # Shut everything down
//! ghh land
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use ghh::config::{GhhConfig, GhhPaths};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "ghh")]
#[command(about = "ghh - GitHub webhook listeners, supervised", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the mother-ship in the background
    Launch,

    /// Stop every wing and shut the mother-ship down
    Land,

    /// Show whether the mother-ship is running
    Status,

    /// Remove connection data left by a mother-ship that is gone
    Clean,

    /// Start a wing
    Start {
        /// Wing config file
        config: PathBuf,

        /// Wing name (derived from the config file name if omitted)
        #[arg(short, long)]
        name: Option<String>,

        /// Port the wing listens on
        #[arg(short, long)]
        port: u16,

        /// Working directory of the wing (defaults to the current one)
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// Stop a running wing
    Stop {
        name: String,
    },

    /// Restart a wing, optionally on another port
    Restart {
        name: String,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Forget a stopped wing
    Remove {
        name: String,
    },

    /// List registered wings
    Ls,

    /// Show a wing's registry entry
    Info {
        name: String,
    },

    /// Print and follow a wing's log
    Logs {
        name: String,

        /// Number of lines printed before following
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },

    /// Run the mother-ship in the foreground (internal use only)
    #[command(hide = true)]
    #[command(name = "internal-mother-ship")]
    InternalMotherShip,

    /// Run a wing in the foreground (internal use only)
    #[command(hide = true)]
    #[command(name = "internal-wing")]
    InternalWing,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // The wing needs no home directory; its environment carries everything.
    if matches!(cli.command, Commands::InternalWing) {
        init_logging(cli.verbose);
        return ghh::commands::run_wing().await;
    }

    let paths = GhhPaths::resolve()?;
    let config = GhhConfig::load(&paths)?;

    if matches!(cli.command, Commands::InternalMotherShip) {
        paths.ensure()?;
        let _guard = init_daemon_logging(&paths, &config, cli.verbose);
        return ghh::commands::run_mother_ship(paths, config).await;
    }

    init_logging(cli.verbose);

    use ghh::commands::*;

    match cli.command {
        Commands::Launch => launch(&paths).await?,
        Commands::Land => land(&paths, &config).await?,
        Commands::Status => status(&paths, &config).await?,
        Commands::Clean => clean(&paths, &config).await?,
        Commands::Start {
            config: config_file,
            name,
            port,
            cwd,
        } => start(&paths, &config, config_file, name, port, cwd).await?,
        Commands::Stop { name } => stop(&paths, &config, name).await?,
        Commands::Restart { name, port } => restart(&paths, &config, name, port).await?,
        Commands::Remove { name } => remove(&paths, &config, name).await?,
        Commands::Ls => list(&paths, &config).await?,
        Commands::Info { name } => info(&paths, &config, name).await?,
        Commands::Logs { name, lines } => logs(&paths, &config, name, lines).await?,
        Commands::InternalMotherShip | Commands::InternalWing => unreachable!("handled above"),
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("ghh=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ghh=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// File logging for the detached daemon. Keep the guard alive until exit so
/// buffered lines are flushed.
fn init_daemon_logging(
    paths: &GhhPaths,
    config: &GhhConfig,
    verbose: bool,
) -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { "debug" } else { config.logs.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ghh={level},event_stream={level},tower_http={level},warn")));

    let appender = tracing_appender::rolling::never(paths.logs_dir(), "mother-ship.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();

    guard
}

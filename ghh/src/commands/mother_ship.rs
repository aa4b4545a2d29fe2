//! Mother-ship lifecycle: launching, landing, status and the daemon itself.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::process::Stdio;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::output;
use crate::api::{self, AppState, TokenValidator};
use crate::client::{generate_token, Descriptor, MotherShipClient};
use crate::config::{GhhConfig, GhhPaths};
use crate::control::{self, ControlChannel};
use crate::fleet::Fleet;
use crate::registry::Registry;
use crate::supervisor::{Supervisor, WingProgram};
use crate::wing::runner;

/// Client for the launched mother-ship, or an error when there is none.
pub(crate) fn connect(paths: &GhhPaths, config: &GhhConfig) -> Result<MotherShipClient> {
    let descriptor = Descriptor::read(&paths.descriptor())?.context("Mother-ship is not launched")?;
    Ok(MotherShipClient::new(&config.mother_ship.host, &descriptor))
}

/// Start the daemon in the background and record how to reach it.
pub async fn launch(paths: &GhhPaths) -> Result<()> {
    output::banner("Initiating the launch sequence");

    if Descriptor::read(&paths.descriptor())?.is_some() {
        anyhow::bail!("Mother-ship is already launched");
    }
    paths.ensure()?;

    let exe = std::env::current_exe().context("Failed to get executable path")?;
    let out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.daemon_output())
        .with_context(|| format!("Failed to open {}", paths.daemon_output().display()))?;

    let mut command = Command::new(&exe);
    command
        .arg("internal-mother-ship")
        .current_dir(paths.home())
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::from(out.try_clone()?))
        .stderr(Stdio::from(out));

    let channel = ControlChannel::new().context("Failed to create control channel")?;
    channel.attach(&mut command);

    let mut child = command.spawn().context("Failed to spawn mother-ship process")?;
    drop(command);
    let receiver = channel.into_receiver()?;

    let descriptor: Descriptor = control::await_handshake(receiver, &mut child)
        .await
        .with_context(|| format!("Mother-ship failed to launch, see {}", paths.daemon_output().display()))?;
    descriptor.write(&paths.descriptor())?;

    info!(pid = descriptor.pid, port = descriptor.port, "Mother-ship launched");
    output::success("Mother-ship launched");
    println!("  Port: {}", descriptor.port);
    println!("   PID: {}", descriptor.pid);
    Ok(())
}

/// Stop every wing, shut the daemon down and forget it.
pub async fn land(paths: &GhhPaths, config: &GhhConfig) -> Result<()> {
    output::banner("Landing the mother-ship");

    let client = connect(paths, config)?;
    client.land().await?;
    Descriptor::remove(&paths.descriptor())?;

    output::success("Done");
    Ok(())
}

pub async fn status(paths: &GhhPaths, config: &GhhConfig) -> Result<()> {
    output::info("Retrieving mother-ship status...");

    let Some(descriptor) = Descriptor::read(&paths.descriptor())? else {
        output::warn("Mother-ship is OFFLINE");
        return Ok(());
    };

    let client = MotherShipClient::new(&config.mother_ship.host, &descriptor);
    match client.ping().await {
        Ok(()) => {
            output::success("Mother-ship is ONLINE");
            println!("  Port: {}", descriptor.port);
            println!("   PID: {}", descriptor.pid);
        }
        Err(err) => {
            output::error(format!("Mother-ship is launched but does not answer: {err}"));
            output::info("Run `ghh clean` to remove the stale connection data");
        }
    }
    Ok(())
}

/// Remove the descriptor of a daemon that no longer answers.
pub async fn clean(paths: &GhhPaths, config: &GhhConfig) -> Result<()> {
    output::banner("Cleaning everything up");

    let Some(descriptor) = Descriptor::read(&paths.descriptor())? else {
        output::success("Everything is already clean");
        return Ok(());
    };

    let client = MotherShipClient::new(&config.mother_ship.host, &descriptor);
    if client.ping().await.is_ok() {
        anyhow::bail!("Cannot delete data file because mother-ship is launched");
    }

    Descriptor::remove(&paths.descriptor())?;
    output::success("Mother-ship is not active, data file deleted");
    Ok(())
}

/// Body of the `internal-mother-ship` process.
///
/// Listens on the control plane, reports the descriptor to the launching
/// client and serves until landed or terminated.
pub async fn run_mother_ship(paths: GhhPaths, config: GhhConfig) -> Result<()> {
    paths.ensure()?;

    let registry = Arc::new(Registry::open(paths.registry()).context("Failed to open registry")?);
    let supervisor = Supervisor::new(WingProgram::current_exe().context("Failed to get executable path")?);
    let fleet = Arc::new(Fleet::new(supervisor, registry, paths.wing_logs_dir()));
    let _crashes = fleet.watch_exits();

    let host = config.mother_ship.host.as_str();
    let listener = TcpListener::bind((host, config.mother_ship.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, config.mother_ship.port))?;
    let addr = listener.local_addr()?;

    let token = generate_token();
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let fleet = Arc::clone(&fleet);
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = runner::terminated() => {
                    if let Err(err) = fleet.land().await {
                        error!(error = %err, "Landing on termination failed");
                    }
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        }
    });

    let app = api::build_router(
        AppState {
            fleet,
            shutdown: shutdown.clone(),
        },
        TokenValidator::new(token.clone()),
    );

    control::report(&Descriptor {
        port: addr.port(),
        pid: std::process::id(),
        auth_token: token,
    })
    .context("Failed to report to the launching client")?;

    api::serve(listener, app, shutdown).await
}

/// Body of the `internal-wing` process.
pub async fn run_wing() -> Result<()> {
    runner::run().await
}

//! Wing commands, all answered by the mother-ship except `logs`.

use anyhow::{Context, Result};
use event_stream::EventStream;
use reqwest::Method;
use serde::Serialize;
use std::path::PathBuf;

use super::mother_ship::connect;
use super::output;
use crate::api::routes::{NameBody, RestartBody};
use crate::api::ProgressLine;
use crate::client::{tail, MotherShipClient};
use crate::config::{GhhConfig, GhhPaths};
use crate::error::Error;
use crate::fleet::StartRequest;

/// Send a progress request and print its lines as they arrive.
async fn run_with_progress<B: Serialize + ?Sized>(
    client: &MotherShipClient,
    method: Method,
    path: &str,
    body: &B,
) -> Result<()> {
    let progress: EventStream<ProgressLine, Error> = EventStream::new();
    output::print_progress(&progress);
    let done = progress.settled();

    client.stream_into(method, path, body, progress).await;
    done.await?;

    output::success("Done");
    Ok(())
}

pub async fn start(
    paths: &GhhPaths,
    config: &GhhConfig,
    config_file: PathBuf,
    name: Option<String>,
    port: u16,
    cwd: Option<PathBuf>,
) -> Result<()> {
    let client = connect(paths, config)?;

    // The daemon runs elsewhere, so relative paths are resolved here.
    let config_file = std::fs::canonicalize(&config_file)
        .with_context(|| format!("Config file {} not found", config_file.display()))?;
    let cwd = match cwd {
        Some(dir) => std::fs::canonicalize(&dir).with_context(|| format!("Directory {} not found", dir.display()))?,
        None => std::env::current_dir()?,
    };

    let request = StartRequest {
        name,
        port,
        cwd,
        config: config_file,
    };
    run_with_progress(&client, Method::POST, "/wing/start", &request).await
}

pub async fn stop(paths: &GhhPaths, config: &GhhConfig, name: String) -> Result<()> {
    let client = connect(paths, config)?;
    run_with_progress(&client, Method::PUT, "/wing/stop", &NameBody { name }).await
}

pub async fn restart(paths: &GhhPaths, config: &GhhConfig, name: String, port: Option<u16>) -> Result<()> {
    let client = connect(paths, config)?;
    run_with_progress(&client, Method::PUT, "/wing/restart", &RestartBody { name, port }).await
}

pub async fn remove(paths: &GhhPaths, config: &GhhConfig, name: String) -> Result<()> {
    let client = connect(paths, config)?;
    run_with_progress(&client, Method::DELETE, "/wing/delete", &NameBody { name }).await
}

pub async fn list(paths: &GhhPaths, config: &GhhConfig) -> Result<()> {
    let client = connect(paths, config)?;
    let entries = client.list().await?;
    output::print_entries_table(&entries);
    Ok(())
}

pub async fn info(paths: &GhhPaths, config: &GhhConfig, name: String) -> Result<()> {
    let client = connect(paths, config)?;
    let entry = client.info(&name).await?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

/// Print the last lines of a wing's log, then follow it until Ctrl-C or
/// until the file goes away.
pub async fn logs(paths: &GhhPaths, config: &GhhConfig, name: String, lines: Option<usize>) -> Result<()> {
    let client = connect(paths, config)?;
    let entry = client.info(&name).await?;
    let path = entry.log_file_path;

    let last = tail::tail(&path, lines.unwrap_or(config.logs.tail_lines))
        .await
        .with_context(|| format!("Cannot read log of wing \"{name}\""))?;
    for line in &last.lines {
        println!("{line}");
    }

    let changes: EventStream<(), Error> = EventStream::new();
    let follow = tail::follow_changes(&path, last.last_index, &changes);
    follow.subscribe_value(|line: &String| println!("{line}"));
    let done = follow.settled();
    let _watcher = tail::watch(&path, config.poll_interval(), changes.clone())?;

    tokio::select! {
        outcome = done => outcome?,
        _ = tokio::signal::ctrl_c() => changes.end(),
    }
    Ok(())
}

//! Tailing and following a wing's log file.
//!
//! The file is read directly from disk; the mother-ship is not involved.

use crate::error::{Error, Result};
use event_stream::source::drive_lines;
use event_stream::EventStream;
use notify::{Config, EventKind, PollWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// The last lines of a file and the index of the final one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tail {
    pub lines: Vec<String>,
    pub last_index: usize,
}

pub async fn count_lines(path: &Path) -> Result<usize> {
    let lines: EventStream<String, Error> = EventStream::new();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    lines.subscribe_value(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    let done = lines.settled();

    drive_lines(tokio::fs::File::open(path).await?, lines).await;
    done.await?;
    Ok(count.load(Ordering::Relaxed))
}

/// The last `n` lines of `path`.
///
/// Fails with [`Error::EmptyLog`] when the file has no lines.
pub async fn tail(path: &Path, n: usize) -> Result<Tail> {
    let total = count_lines(path).await?;

    let lines: EventStream<String, Error> = EventStream::new();
    let next_index = AtomicUsize::new(0);
    let kept = lines
        .map(move |line: &String| (next_index.fetch_add(1, Ordering::Relaxed), line.clone()))
        .filter(move |(index, _)| *index >= total.saturating_sub(n))
        .accumulate();

    drive_lines(tokio::fs::File::open(path).await?, lines).await;
    let kept = kept.await?;

    let last_index = kept
        .last()
        .map(|(index, _)| *index)
        .ok_or_else(|| Error::EmptyLog(path.to_path_buf()))?;

    Ok(Tail {
        lines: kept.into_iter().map(|(_, line)| line).collect(),
        last_index,
    })
}

/// Lines appended after `last_index`, re-read on every value of `changes`.
///
/// Ends when `changes` ends and fails when it fails.
pub fn follow_changes(path: impl Into<PathBuf>, last_index: usize, changes: &EventStream<(), Error>) -> EventStream<String, Error> {
    let path = path.into();
    let out = EventStream::new();
    let cursor = Arc::new(Mutex::new(last_index));

    let sink = out.clone();
    changes.subscribe_value(move |_| {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => return sink.fail(err.into()),
        };

        let fresh: Vec<String> = {
            let mut cursor = cursor.lock();
            let fresh: Vec<(usize, &str)> = content.lines().enumerate().filter(|(index, _)| *index > *cursor).collect();
            if let Some((index, _)) = fresh.last() {
                *cursor = *index;
            }
            fresh.into_iter().map(|(_, line)| line.to_string()).collect()
        };

        trace!(count = fresh.len(), "Log change");
        for line in fresh {
            sink.emit(line);
        }
    });

    let on_end = out.clone();
    changes.subscribe_end(move || on_end.end());
    let on_error = out.clone();
    changes.subscribe_error(move |err| on_error.fail(err.clone()));

    out
}

/// Poll `path` for changes, feeding `changes`.
///
/// Modifications emit a value. Removal of the file or a watcher error fails
/// the stream. Dropping the returned watcher stops polling.
pub fn watch(path: &Path, interval: Duration, changes: EventStream<(), Error>) -> Result<PollWatcher> {
    let config = Config::default().with_poll_interval(interval).with_compare_contents(true);

    let watched = path.to_path_buf();
    let mut watcher = PollWatcher::new(
        move |event: notify::Result<notify::Event>| match event {
            Ok(event) => match event.kind {
                EventKind::Modify(_) | EventKind::Create(_) => changes.emit(()),
                EventKind::Remove(_) => {
                    debug!("Log file removed");
                    changes.fail(Error::Io(format!("{} was removed", watched.display())));
                }
                _ => {}
            },
            Err(err) => changes.fail(err.into()),
        },
        config,
    )?;

    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

//! Log tailing and following against real files.

use event_stream::EventStream;
use ghh::client::tail::{follow_changes, tail, watch};
use ghh::Error;
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn append(path: &Path, lines: impl IntoIterator<Item = String>) {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

fn collect(stream: &EventStream<String, Error>) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    stream.subscribe_value(move |line: &String| sink.lock().push(line.clone()));
    seen
}

#[tokio::test]
async fn test_tail_returns_last_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("api.log");
    append(&path, (0..100).map(|i| format!("line {i}")));

    let last = tail(&path, 20).await.unwrap();

    let expected: Vec<String> = (80..100).map(|i| format!("line {i}")).collect();
    assert_eq!(last.lines, expected);
    assert_eq!(last.last_index, 99);
}

#[tokio::test]
async fn test_appended_lines_are_delivered_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("api.log");
    append(&path, (0..100).map(|i| format!("line {i}")));
    let last = tail(&path, 20).await.unwrap();

    let changes: EventStream<(), Error> = EventStream::new();
    let follow = follow_changes(&path, last.last_index, &changes);
    let seen = collect(&follow);

    append(&path, ["new 1", "new 2", "new 3"].map(String::from));
    changes.emit(());
    changes.emit(());

    assert_eq!(*seen.lock(), vec!["new 1", "new 2", "new 3"]);

    append(&path, ["new 4".to_string()]);
    changes.emit(());
    assert_eq!(seen.lock().len(), 4);

    changes.end();
    assert!(!follow.is_open());
}

#[tokio::test]
async fn test_follow_fails_when_file_disappears() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("api.log");
    append(&path, ["only".to_string()]);

    let changes: EventStream<(), Error> = EventStream::new();
    let follow = follow_changes(&path, 0, &changes);
    let done = follow.settled();

    std::fs::remove_file(&path).unwrap();
    changes.emit(());

    assert!(matches!(done.await, Err(Error::Io(_))));
}

#[tokio::test]
async fn test_watch_notices_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("api.log");
    append(&path, ["first".to_string()]);

    let changes: EventStream<(), Error> = EventStream::new();
    let follow = follow_changes(&path, 0, &changes);
    let next = follow.first();
    let _watcher = watch(&path, Duration::from_millis(50), changes.clone()).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    append(&path, ["second".to_string()]);

    let line = tokio::time::timeout(Duration::from_secs(5), next).await.unwrap();
    assert_eq!(line, Ok(Some("second".to_string())));
    changes.end();
}

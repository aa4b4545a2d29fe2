//! Drivers that feed a caller-created stream.
//!
//! Streams are hot, so the caller creates the stream, attaches its
//! subscribers and only then runs (or spawns) the driver.

use crate::stream::EventStream;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Emit every line read from `reader`, then end. A read error fails the
/// stream.
///
/// Stops reading as soon as `sink` is settled by someone else.
pub async fn drive_lines<R, E>(reader: R, sink: EventStream<String, E>)
where
    R: AsyncRead + Unpin,
    E: From<io::Error> + Clone + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while sink.is_open() {
        match lines.next_line().await {
            Ok(Some(line)) => sink.emit(line),
            Ok(None) => {
                sink.end();
                return;
            }
            Err(error) => {
                tracing::debug!(%error, "line source failed");
                sink.fail(E::from(error));
                return;
            }
        }
    }
}

/// Emit the output of `future` and end, or fail with its error.
pub async fn drive_future<F, T, E>(future: F, sink: EventStream<T, E>)
where
    F: Future<Output = Result<T, E>>,
    T: Send + 'static,
    E: Clone + Send + 'static,
{
    match future.await {
        Ok(value) => {
            sink.emit(value);
            sink.end();
        }
        Err(error) => sink.fail(error),
    }
}

/// Forward every item of `source` into `sink`. The first `Err` fails the
/// stream; exhaustion ends it.
pub async fn drive_stream<S, T, E>(source: S, sink: EventStream<T, E>)
where
    S: Stream<Item = Result<T, E>>,
    T: Send + 'static,
    E: Clone + Send + 'static,
{
    futures::pin_mut!(source);
    while sink.is_open() {
        match source.next().await {
            Some(Ok(value)) => sink.emit(value),
            Some(Err(error)) => {
                sink.fail(error);
                return;
            }
            None => {
                sink.end();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct ReadError(String);

    impl From<io::Error> for ReadError {
        fn from(error: io::Error) -> Self {
            ReadError(error.to_string())
        }
    }

    #[tokio::test]
    async fn test_drive_lines_emits_each_line_then_ends() {
        let sink: EventStream<String, ReadError> = EventStream::new();
        let all = sink.accumulate();

        drive_lines(&b"alpha\nbeta\ngamma"[..], sink.clone()).await;

        assert_eq!(
            all.await,
            Ok(vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()])
        );
    }

    #[tokio::test]
    async fn test_drive_future_failure_fails_stream() {
        let sink: EventStream<u32, ReadError> = EventStream::new();
        let outcome = sink.settled();

        drive_future(async { Err(ReadError("nope".into())) }, sink).await;

        assert_eq!(outcome.await, Err(ReadError("nope".into())));
    }

    #[tokio::test]
    async fn test_drive_stream_forwards_items() {
        let sink: EventStream<u32, ReadError> = EventStream::new();
        let all = sink.accumulate();
        let source = futures::stream::iter(vec![Ok(1), Ok(2)]);

        drive_stream(source, sink).await;

        assert_eq!(all.await, Ok(vec![1, 2]));
    }
}

//! Chunked progress bodies.
//!
//! Each progress step becomes one `{"type":"info","message":...}` line. When
//! the operation fails the body carries one `error` line and is then
//! aborted, so the client sees a failed transfer rather than a clean end.

use crate::error::Error;
use crate::supervisor::Progress;
use axum::{
    body::{Body, Bytes},
    http::header,
    response::{IntoResponse, Response},
};
use event_stream::EventStream;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use tracing::{debug, warn};

pub const NDJSON: &str = "application/x-ndjson";

/// One line of a progress body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressLine {
    Info { message: String },
    Error { message: String },
}

impl ProgressLine {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Info { message } | Self::Error { message } => message,
        }
    }

    /// JSON followed by a newline.
    pub fn encode(&self) -> Bytes {
        let mut line = serde_json::to_vec(self).unwrap_or_else(|_| br#"{"type":"error","message":"unencodable"}"#.to_vec());
        line.push(b'\n');
        Bytes::from(line)
    }
}

/// Run `operation` in the background and stream its progress as the
/// response body.
///
/// The body subscribes before the operation starts, so no step is lost.
pub fn respond_with_progress<F, Fut, T>(operation: F) -> Response
where
    F: FnOnce(EventStream<Progress, Error>) -> Fut,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Send + 'static,
{
    let progress = EventStream::new();
    let body = progress_body(&progress);
    let task = operation(progress.clone());

    tokio::spawn(async move {
        match task.await {
            Ok(_) => progress.end(),
            Err(err) => {
                warn!(error = %err, "Operation failed");
                progress.fail(err);
            }
        }
    });

    ([(header::CONTENT_TYPE, NDJSON)], body).into_response()
}

fn progress_body(progress: &EventStream<Progress, Error>) -> Body {
    let lines = progress.into_stream().flat_map(|item| match item {
        Ok(step) => {
            let line = ProgressLine::info(step.to_string()).encode();
            stream::once(async move { Ok::<_, io::Error>(line) }).boxed()
        }
        Err(err) => {
            let message = err.to_string();
            let line = ProgressLine::error(message.clone()).encode();
            stream::once(async move { Ok::<_, io::Error>(line) })
                .chain(stream::once(async move {
                    // Give the connection a chance to flush the error line
                    // before the body is torn down.
                    tokio::task::yield_now().await;
                    debug!("Aborting progress body");
                    Err(io::Error::other(message))
                }))
                .boxed()
        }
    });
    Body::from_stream(lines)
}

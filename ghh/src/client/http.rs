//! HTTP client for the mother-ship control plane.

use super::descriptor::Descriptor;
use crate::api::progress::ProgressLine;
use crate::error::{Error, Result};
use crate::registry::RegistryEntry;
use event_stream::EventStream;
use futures::StreamExt;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MotherShipClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl MotherShipClient {
    pub fn new(host: &str, descriptor: &Descriptor) -> Self {
        Self {
            base_url: format!("http://{}:{}", host, descriptor.port),
            token: descriptor.auth_token.clone(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        builder.send().await.map_err(|e| Error::connectivity(e.to_string()))
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self.send(self.request(Method::GET, "/ping")).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::connectivity(format!("ping answered {}", response.status())))
        }
    }

    /// Stop every wing and shut the mother-ship down.
    pub async fn land(&self) -> Result<()> {
        let response = self.send(self.request(Method::POST, "/land")).await?;
        expect_success(response).await.map(|_| ())
    }

    pub async fn list(&self) -> Result<Vec<RegistryEntry>> {
        let response = self.send(self.request(Method::GET, "/list")).await?;
        decode(expect_success(response).await?).await
    }

    pub async fn info(&self, name: &str) -> Result<RegistryEntry> {
        let response = self
            .send(self.request(Method::GET, "/wing/info").query(&[("name", name)]))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(name.to_string()));
        }
        decode(expect_success(response).await?).await
    }

    /// Send `body` to a progress route and feed the decoded lines into `sink`.
    ///
    /// The sink ends when the body ends cleanly. If the transfer breaks off,
    /// the sink fails with the last `error` line the server sent, or with a
    /// connectivity error when there was none.
    pub async fn stream_into<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        sink: EventStream<ProgressLine, Error>,
    ) {
        let response = match self.send(self.request(method, path).json(body)).await {
            Ok(response) => response,
            Err(err) => return sink.fail(err),
        };
        let response = match expect_success(response).await {
            Ok(response) => response,
            Err(err) => return sink.fail(err),
        };

        let mut chunks = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut last_error: Option<String> = None;

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    debug!(%err, "Progress body broke off");
                    return sink.fail(match last_error {
                        Some(message) => Error::Remote(message),
                        None => Error::connectivity(err.to_string()),
                    });
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                if let Err(err) = deliver(&line, &sink, &mut last_error) {
                    return sink.fail(err);
                }
            }
        }

        if let Err(err) = deliver(&buffer, &sink, &mut last_error) {
            return sink.fail(err);
        }
        sink.end();
    }
}

fn deliver(raw: &[u8], sink: &EventStream<ProgressLine, Error>, last_error: &mut Option<String>) -> Result<()> {
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return Ok(());
    }
    let line: ProgressLine = serde_json::from_slice(trimmed)
        .map_err(|e| Error::decode(format!("{e}: {}", String::from_utf8_lossy(trimmed))))?;
    if let ProgressLine::Error { message } = &line {
        *last_error = Some(message.clone());
    }
    sink.emit(line);
    Ok(())
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(text);
    Err(Error::Remote(format!("{status}: {message}")))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let bytes = response.bytes().await.map_err(|e| Error::connectivity(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

//! HTTP(S) transport for remote appliance archives.

use std::io;

use async_trait::async_trait;
use futures::TryStreamExt;
use ova_import_core::config::TransportConfig;
use ova_import_core::error::{ImportError, Result};
use reqwest::StatusCode;
use tokio_util::io::{StreamReader, SyncIoBridge};

use super::source::{ByteStream, RemoteFetch};

/// Streams remote archives over HTTP(S) with `reqwest`.
///
/// The body is never buffered: the response stream is bridged into a
/// blocking reader bound to the current tokio runtime.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ImportError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteFetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<(ByteStream, u64)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImportError::Transport(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ImportError::not_found("remote archive", url));
        }
        if !status.is_success() {
            return Err(ImportError::Transport(format!("GET {} returned {}", url, status)));
        }

        let length = response.content_length().ok_or_else(|| {
            ImportError::Transport(format!("GET {} returned no Content-Length", url))
        })?;

        tracing::debug!(url = %url, length, "Streaming remote archive");

        let stream = Box::pin(
            response
                .bytes_stream()
                .map_err(|e| io::Error::new(io::ErrorKind::ConnectionAborted, e)),
        );
        let reader = SyncIoBridge::new(StreamReader::new(stream));

        Ok((Box::new(reader), length))
    }
}

//! HTTP plumbing shared by the registry clients.

use crate::error::{Error, Result};
use crate::registry::ProgressFn;
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

const USER_AGENT: &str = concat!("modelfetch/", env!("CARGO_PKG_VERSION"));

/// Client for search and metadata calls: every request is capped.
pub fn api_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

/// Client for file transfers: connection setup is capped, the body is only
/// bounded by an idle timeout between reads.
pub fn download_client(connect_timeout: Duration, idle_timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .read_timeout(idle_timeout)
        .build()
        .map_err(|e| Error::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

/// Turns a non-2xx response into `Error::HttpStatus`.
pub async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    if let Ok(body) = response.text().await {
        if !body.is_empty() {
            tracing::debug!("HTTP {} from {}: {}", status, url, body);
        }
    }

    Err(Error::HttpStatus {
        status: status.as_u16(),
        url,
    })
}

/// Decodes a JSON body. A payload that does not match the expected shape
/// is reported against the registry, not as a transport failure.
pub async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().to_string();
    response
        .json()
        .await
        .map_err(|e| Error::RegistryError(format!("Unexpected response from {}: {}", url, e)))
}

/// Sends `request` and appends the body to `staging`.
///
/// When `resume_offset` is non-zero the request asks for the remainder
/// only. A server that ignores the range and replies 200 has the first
/// `resume_offset` bytes of its body discarded, so the staging file only
/// ever grows.
pub async fn download(
    request: RequestBuilder,
    staging: &Path,
    resume_offset: u64,
    on_progress: &ProgressFn<'_>,
) -> Result<()> {
    let request = if resume_offset > 0 {
        request.header(RANGE, format!("bytes={}-", resume_offset))
    } else {
        request
    };

    let response = request.send().await?;
    let status = response.status();

    if resume_offset > 0 && status == StatusCode::RANGE_NOT_SATISFIABLE {
        tracing::info!(
            "Server has nothing past byte {}, treating {:?} as complete",
            resume_offset,
            staging
        );
        on_progress(resume_offset, resume_offset);
        return Ok(());
    }

    let response = check_status(response).await?;
    let remaining = response.content_length();

    let (mut skip, declared_total) = if status == StatusCode::PARTIAL_CONTENT {
        (0, remaining.map(|len| resume_offset + len))
    } else {
        if resume_offset > 0 {
            tracing::warn!(
                "Range request ignored for {:?}, skipping {} bytes already on disk",
                staging,
                resume_offset
            );
        }
        (resume_offset, remaining)
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(staging)
        .await?;

    let mut written = resume_offset;
    let total = declared_total.unwrap_or(0);
    let mut stream = response.bytes_stream();

    let copied = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let mut data = &chunk[..];

            if skip > 0 {
                let n = skip.min(data.len() as u64) as usize;
                data = &data[n..];
                skip -= n as u64;
            }
            if data.is_empty() {
                continue;
            }

            file.write_all(data).await?;
            written += data.len() as u64;
            on_progress(written, total);
        }
        Ok::<(), Error>(())
    }
    .await;

    // Keep whatever arrived so the next attempt can resume from it
    let flushed = file.flush().await;
    copied?;
    flushed?;

    if skip > 0 {
        return Err(Error::DownloadFailed(format!(
            "Body ended before reaching resume offset {}",
            resume_offset
        )));
    }
    if let Some(expected) = declared_total {
        if written < expected {
            return Err(Error::DownloadFailed(format!(
                "Connection closed after {} of {} bytes",
                written, expected
            )));
        }
    }

    Ok(())
}

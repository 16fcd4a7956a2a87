//! Bounded downloads into memory.

use bytes::{Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use url::Url;

use crate::egress::client::{EgressClient, EgressRequest, FetchResponse};
use crate::egress::error::EgressError;

/// Per-download overrides; `None` falls back to the client's configuration.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub max_bytes: Option<u64>,
    /// Accepted content-type prefixes. An empty list accepts anything.
    pub allowed_content_types: Option<Vec<String>>,
    pub request: EgressRequest,
}

impl DownloadOptions {
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn allow_content_types<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_content_types = Some(prefixes.into_iter().map(Into::into).collect());
        self
    }

    pub fn request(mut self, request: EgressRequest) -> Self {
        self.request = request;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Download {
    pub buffer: Bytes,
    pub content_type: Option<String>,
    pub final_url: Url,
}

/// Media type without parameters, lowercased.
fn media_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

fn content_type_allowed(content_type: Option<&str>, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match content_type {
        Some(ct) => allowed
            .iter()
            .any(|prefix| ct.starts_with(&prefix.to_ascii_lowercase())),
        None => false,
    }
}

impl EgressClient {
    /// Fetch `url` into memory, enforcing a byte ceiling and a content-type allow-list.
    ///
    /// The ceiling is checked against `Content-Length` up front and against the
    /// streamed byte count as chunks arrive; the body is never buffered past it.
    pub async fn download_to_buffer(
        &self,
        url: &str,
        options: DownloadOptions,
    ) -> Result<Download, EgressError> {
        let (default_max, default_types) = self.download_defaults();
        let limit = options.max_bytes.unwrap_or(default_max);
        let allowed = options
            .allowed_content_types
            .unwrap_or_else(|| default_types.to_vec());

        self.execute(url, options.request, move |fetched, _| {
            read_body(fetched, limit, allowed)
        })
        .await
    }
}

async fn read_body(
    fetched: FetchResponse,
    limit: u64,
    allowed: Vec<String>,
) -> Result<Download, EgressError> {
    let FetchResponse {
        mut response,
        final_url,
    } = fetched;

    let status = response.status();
    if !status.is_success() {
        return Err(EgressError::Status {
            status: status.as_u16(),
            url: final_url.to_string(),
        });
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(media_type)
        .filter(|ct| !ct.is_empty());
    if !content_type_allowed(content_type.as_deref(), &allowed) {
        warn!(url = %final_url, content_type = ?content_type, "Download content type rejected");
        return Err(EgressError::UnsupportedContentType(content_type));
    }

    if let Some(declared) = response.content_length() {
        if declared > limit {
            warn!(url = %final_url, declared, limit, "Download exceeds size limit");
            return Err(EgressError::ResponseTooLarge {
                size: declared,
                limit,
            });
        }
    }

    let initial = response.content_length().unwrap_or(0).min(limit) as usize;
    let mut buffer = BytesMut::with_capacity(initial);
    while let Some(chunk) = response.chunk().await? {
        let size = buffer.len() as u64 + chunk.len() as u64;
        if size > limit {
            warn!(url = %final_url, received = size, limit, "Download stream exceeded size limit");
            return Err(EgressError::ResponseTooLarge { size, limit });
        }
        buffer.extend_from_slice(&chunk);
    }

    debug!(url = %final_url, bytes = buffer.len(), content_type = ?content_type, "Download complete");
    Ok(Download {
        buffer: buffer.freeze(),
        content_type,
        final_url,
    })
}

//! REST implementation of [`RemoteStore`].
//!
//! Routes, relative to the configured endpoint:
//!
//! ```text
//! PUT /v1/drafts/{id}                             parent record
//! GET /v1/drafts/{id}                             parent record (404 = none)
//! PUT /v1/drafts/{id}/chunks/{version}/{index}    one chunk
//! GET /v1/drafts/{id}/chunks/{version}            all chunks of a version
//! ```

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use super::remote::{RemoteChunk, RemoteDocument, RemoteError, RemoteStore};
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::models::DocumentId;
use crate::util::normalize_text_option;

#[derive(Clone)]
pub struct HttpRemoteStore {
    base: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base", &self.base.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let base = normalize_endpoint(endpoint.into())?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            base,
            token: None,
            client,
        })
    }

    /// Send `token` as a bearer credential on every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = normalize_text_option(Some(token.into()));
        self
    }

    fn url(&self, segments: &[&str]) -> std::result::Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Fatal("endpoint cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn put_json<T: serde::Serialize + Sync>(
        &self,
        url: Url,
        body: &T,
    ) -> std::result::Result<(), RemoteError> {
        let response = self
            .authorize(self.client.put(url))
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;

        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upsert_document(
        &self,
        document: &RemoteDocument,
    ) -> std::result::Result<(), RemoteError> {
        let url = self.url(&["v1", "drafts", document.document_id.as_str()])?;
        self.put_json(url, document).await
    }

    async fn append_chunk(
        &self,
        document_id: &DocumentId,
        chunk: &RemoteChunk,
    ) -> std::result::Result<(), RemoteError> {
        let index = chunk.index.to_string();
        let url = self.url(&[
            "v1",
            "drafts",
            document_id.as_str(),
            "chunks",
            chunk.version.as_str(),
            &index,
        ])?;
        self.put_json(url, chunk).await
    }

    async fn fetch_document(
        &self,
        document_id: &DocumentId,
    ) -> std::result::Result<Option<RemoteDocument>, RemoteError> {
        let url = self.url(&["v1", "drafts", document_id.as_str()])?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        response.json().await.map(Some).map_err(classify_transport)
    }

    async fn fetch_chunks(
        &self,
        document_id: &DocumentId,
        version: &ContentHash,
    ) -> std::result::Result<Vec<RemoteChunk>, RemoteError> {
        let url = self.url(&[
            "v1",
            "drafts",
            document_id.as_str(),
            "chunks",
            version.as_str(),
        ])?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        response.json().await.map_err(classify_transport)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

/// Server-side and throttling statuses are retried; other rejections are not.
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Fatal(message)
    }
}

fn classify_transport(error: reqwest::Error) -> RemoteError {
    if error.is_decode() || error.is_builder() {
        RemoteError::Fatal(error.to_string())
    } else {
        RemoteError::Transient(error.to_string())
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Trim an error body to at most 180 characters.
fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

fn normalize_endpoint(raw: String) -> Result<Url> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("remote endpoint must not be empty".to_string()))?;
    if !is_http_url(&endpoint) {
        return Err(Error::Config(
            "remote endpoint must include http:// or https://".to_string(),
        ));
    }
    Url::parse(endpoint.trim_end_matches('/'))
        .map_err(|error| Error::Config(format!("invalid remote endpoint: {error}")))
}

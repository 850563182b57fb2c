//! HTTP client for the execution backend.
//!
//! Every endpoint is plain JSON request/response. Transport failures are
//! classified into [`ClientError`] variants so the notebook layer can tell an
//! unreachable backend apart from a timeout or a malformed reply.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::{
    ErrorBody, ExecuteRequest, ExecuteResponse, FileListing, InstallRequest, InstallResponse,
    ResetResponse, SaveFileRequest, SaveFileResponse, StatusResponse,
};
use crate::{default_base_url, ExecutionBackend};

/// Error type for backend calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid backend URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Backend unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Backend returned error: {0}")]
    Backend(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl ClientError {
    /// True when the backend could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Unreachable { .. })
    }

    /// HTTP status code, if the failure came with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_connect() {
            ClientError::Unreachable {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Request(err.to_string())
        }
    }
}

/// Client for the execution backend.
#[derive(Debug, Clone)]
pub struct KernelClient {
    base_url: Url,
    http: reqwest::Client,
}

impl KernelClient {
    /// Create a client rooted at `base_url` (e.g. `http://localhost:5000/api`).
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ClientError::Request(e.to_string()))?;
        Self::with_http_client(base_url, http)
    }

    /// Create a client that shares an existing `reqwest::Client`.
    pub fn with_http_client(base_url: &str, http: reqwest::Client) -> Result<Self, ClientError> {
        // Url::join drops the last segment unless the base ends with '/'
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|e| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { base_url, http })
    }

    /// Client for [`default_base_url`].
    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(&default_base_url())
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ClientError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                reason: e.to_string(),
            })
    }

    /// Check the backend is alive.
    pub async fn status(&self) -> Result<StatusResponse, ClientError> {
        let url = self.endpoint("status")?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, url.as_str()))?;
        read_checked(response).await
    }

    /// Check if the backend answers at all.
    pub async fn ping(&self) -> bool {
        self.status().await.map(|s| s.success).unwrap_or(false)
    }

    /// Reset the backend's execution namespace (kernel restart).
    pub async fn reset(&self) -> Result<ResetResponse, ClientError> {
        let url = self.endpoint("reset")?;
        let response = self
            .http
            .post(url.clone())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, url.as_str()))?;
        read_checked(response).await
    }

    /// Run code for a cell.
    ///
    /// The backend answers failures with a JSON body even on 4xx/5xx, so the
    /// body is decoded regardless of status and the status only matters when
    /// the body is unreadable.
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse, ClientError> {
        debug!("[kernel-client] execute cell={}", request.cell_id);
        let url = self.endpoint("execute")?;
        let response = self.post(&url, request).await?;
        read_lenient(response).await
    }

    /// Install missing packages, then re-run the same code.
    ///
    /// Unlike [`execute`](Self::execute), a non-2xx status is always an error.
    /// No timeout is applied here; callers bound the whole call.
    pub async fn install_and_retry(
        &self,
        request: &InstallRequest,
    ) -> Result<InstallResponse, ClientError> {
        debug!(
            "[kernel-client] install-and-retry cell={} packages={}",
            request.cell_id,
            request.packages.len()
        );
        let url = self.endpoint("install-and-retry")?;
        let response = self.post(&url, request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(http_error(status));
        }
        decode(response).await
    }

    /// List the backend's working directory.
    pub async fn list_files(&self) -> Result<FileListing, ClientError> {
        let url = self.endpoint("files")?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, url.as_str()))?;
        let listing: FileListing = read_checked(response).await?;
        into_backend_result(listing.success, listing.error.clone()).map(|_| listing)
    }

    /// List a folder relative to the backend's working directory.
    pub async fn list_folder(&self, path: &str) -> Result<FileListing, ClientError> {
        let url = self.endpoint("files/folder")?;
        let response = self
            .http
            .get(url.clone())
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, url.as_str()))?;
        let listing: FileListing = read_checked(response).await?;
        into_backend_result(listing.success, listing.error.clone()).map(|_| listing)
    }

    /// Fetch a file's raw text.
    pub async fn file_content(&self, path: &str) -> Result<String, ClientError> {
        let url = self.endpoint("files/content")?;
        let response = self
            .http
            .get(url.clone())
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, url.as_str()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::from_reqwest(e, url.as_str()))?;
        if status.is_success() {
            return Ok(body);
        }
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody { error: Some(message) }) => Err(ClientError::Backend(message)),
            _ => Err(http_error(status)),
        }
    }

    /// Write a file on the backend. `.ipynb` files without a directory land in
    /// the backend's `notebooks/` folder; the returned response says where.
    pub async fn save_file(
        &self,
        filename: &str,
        content: &str,
    ) -> Result<SaveFileResponse, ClientError> {
        let url = self.endpoint("files/save")?;
        let request = SaveFileRequest {
            filename: filename.to_string(),
            content: content.to_string(),
        };
        let response = self.post(&url, &request).await?;
        let saved: SaveFileResponse = read_lenient(response).await?;
        into_backend_result(saved.success, saved.error.clone()).map(|_| saved)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &T,
    ) -> Result<reqwest::Response, ClientError> {
        self.http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(e, url.as_str()))
    }
}

#[async_trait]
impl ExecutionBackend for KernelClient {
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse, ClientError> {
        KernelClient::execute(self, request).await
    }

    async fn install_and_retry(
        &self,
        request: &InstallRequest,
    ) -> Result<InstallResponse, ClientError> {
        KernelClient::install_and_retry(self, request).await
    }

    async fn reset(&self) -> Result<(), ClientError> {
        let response = KernelClient::reset(self).await?;
        into_backend_result(response.success, response.message)
    }
}

fn http_error(status: StatusCode) -> ClientError {
    ClientError::Http {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
    }
}

fn into_backend_result(success: bool, error: Option<String>) -> Result<(), ClientError> {
    if success {
        Ok(())
    } else {
        Err(ClientError::Backend(
            error.unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let url = response.url().to_string();
    let body = response
        .text()
        .await
        .map_err(|e| ClientError::from_reqwest(e, &url))?;
    serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Decode the body; on failure, prefer the HTTP status as the explanation.
async fn read_lenient<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    match decode(response).await {
        Ok(value) => Ok(value),
        Err(ClientError::Decode(reason)) if !status.is_success() => {
            warn!("[kernel-client] undecodable {} body: {}", status, reason);
            Err(http_error(status))
        }
        Err(e) => Err(e),
    }
}

/// Decode the body of a 2xx response; map error statuses to the backend's
/// message when one is present.
async fn read_checked<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return decode(response).await;
    }
    match decode::<ErrorBody>(response).await {
        Ok(ErrorBody { error: Some(message) }) => Err(ClientError::Backend(message)),
        _ => Err(http_error(status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = KernelClient::new("http://localhost:5000/api").unwrap();
        assert_eq!(
            client.endpoint("execute").unwrap().as_str(),
            "http://localhost:5000/api/execute"
        );
        assert_eq!(
            client.endpoint("/files/content").unwrap().as_str(),
            "http://localhost:5000/api/files/content"
        );
    }

    #[test]
    fn test_trailing_slash_normalized() {
        let client = KernelClient::new("http://localhost:5000/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:5000/api/");
        assert_eq!(
            client.endpoint("status").unwrap().as_str(),
            "http://localhost:5000/api/status"
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = KernelClient::new("not a url").unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }

    #[test]
    fn test_error_helpers() {
        let http = http_error(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(http.status(), Some(500));
        assert_eq!(http.to_string(), "HTTP 500: Internal Server Error");
        assert!(!http.is_unreachable());

        let unreachable = ClientError::Unreachable {
            url: "http://x".into(),
            reason: "refused".into(),
        };
        assert!(unreachable.is_unreachable());
        assert_eq!(unreachable.status(), None);
    }

    #[test]
    fn test_into_backend_result() {
        assert!(into_backend_result(true, None).is_ok());
        let err = into_backend_result(false, Some("nope".into())).unwrap_err();
        assert_eq!(err.to_string(), "Backend returned error: nope");
        let err = into_backend_result(false, None).unwrap_err();
        assert_eq!(err.to_string(), "Backend returned error: Unknown error");
    }
}

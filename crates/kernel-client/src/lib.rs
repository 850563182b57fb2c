//! kernel-client - HTTP client for the jupyter-web execution backend.
//!
//! The backend runs notebook code on behalf of the browser client and exposes
//! a small JSON API (`/execute`, `/install-and-retry`, `/files/*`, `/reset`,
//! `/status`). This crate owns the wire types and a [`KernelClient`] that
//! speaks them, plus the [`ExecutionBackend`] seam the notebook's execution
//! dispatcher is written against.

use async_trait::async_trait;

pub mod client;
pub mod protocol;

pub use client::{ClientError, KernelClient};
pub use protocol::{
    ExecuteRequest, ExecuteResponse, FileEntry, FileKind, FileListing, InstallRequest,
    InstallResponse, InstallationResult, MissingPackage, SaveFileResponse, StatusResponse,
};

/// Base URL used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Environment variable that overrides [`DEFAULT_BASE_URL`].
pub const BACKEND_URL_ENV: &str = "JUPYTER_WEB_BACKEND";

/// Resolve the backend base URL.
///
/// Returns `$JUPYTER_WEB_BACKEND` when set and non-empty, otherwise
/// [`DEFAULT_BASE_URL`].
pub fn default_base_url() -> String {
    std::env::var(BACKEND_URL_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// The remote side of cell execution.
///
/// [`KernelClient`] is the real implementation; tests substitute scripted
/// backends.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run `request.code` and report the outcome.
    async fn execute(&self, request: &ExecuteRequest) -> Result<ExecuteResponse, ClientError>;

    /// Install `request.packages`, then re-run `request.code`.
    async fn install_and_retry(
        &self,
        request: &InstallRequest,
    ) -> Result<InstallResponse, ClientError>;

    /// Reset the execution namespace.
    async fn reset(&self) -> Result<(), ClientError>;
}

//! JSON wire types for the execution backend's HTTP API.
//!
//! The backend is loose about optional fields: absent keys, `null`, and empty
//! strings all show up for "nothing here". Every optional collection is
//! deserialized with [`null_as_default`] so callers only ever see empty vectors.

use serde::{Deserialize, Deserializer, Serialize};

/// Treat a JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Drop empty strings so `"error": ""` reads as no error.
fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}

/// `POST /execute` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub cell_id: String,
}

/// A dependency the backend could not import while running a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPackage {
    /// Name the code referenced (e.g. `pd`).
    pub variable: String,
    /// Package that provides it (e.g. `pandas`).
    pub package: String,
    /// Human-readable install command, shown to the user before confirming.
    pub install_command: String,
}

/// `POST /execute` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: String,
    /// Wall time in seconds.
    #[serde(default)]
    pub execution_time: Option<f64>,
    /// Image payloads as data URLs, in the order the code produced them.
    #[serde(default, deserialize_with = "null_as_default")]
    pub plots: Vec<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub missing_packages: Vec<MissingPackage>,
}

/// `POST /install-and-retry` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub packages: Vec<MissingPackage>,
    pub code: String,
    pub cell_id: String,
}

/// Per-package result of an install attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationResult {
    pub package: String,
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// `POST /install-and-retry` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallResponse {
    pub success: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub output: String,
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub installation_results: Vec<InstallationResult>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub plots: Vec<String>,
}

/// Entry kind in a remote directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::File => write!(f, "file"),
            FileKind::Directory => write!(f, "directory"),
        }
    }
}

/// One row of `GET /files` or `GET /files/folder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub path: String,
    /// Only present for files.
    #[serde(default)]
    pub size: Option<u64>,
}

/// `GET /files` and `GET /files/folder` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileListing {
    pub success: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub error: Option<String>,
}

/// `POST /files/save` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveFileRequest {
    pub filename: String,
    pub content: String,
}

/// `POST /files/save` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveFileResponse {
    pub success: bool,
    #[serde(default, deserialize_with = "non_empty_string")]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Where the backend actually wrote the file.
    #[serde(default)]
    pub path: Option<String>,
}

/// `GET /status` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub python_version: Option<String>,
}

/// `POST /reset` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Generic failure body the backend returns alongside 4xx/5xx statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default, deserialize_with = "non_empty_string")]
    pub error: Option<String>,
}

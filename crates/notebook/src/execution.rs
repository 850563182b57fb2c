//! Execution dispatch: remote requests for code cells and how their replies
//! become cell outputs.
//!
//! Each request runs as an independent task that owns only a copy of
//! `(cell_id, code, token)` and yields a typed [`Completion`]. The
//! [`Session`](crate::session::Session) applies completions back onto the
//! document from its own task, so cells are never touched concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kernel_client::{
    ClientError, ExecuteRequest, ExecuteResponse, ExecutionBackend, InstallRequest,
    InstallResponse, MissingPackage,
};

use crate::cell::CellId;
use crate::output::{format_execution_time, CellOutput};

/// Shown when a successful run printed nothing and reported no timing.
pub const EXECUTED_PLACEHOLDER: &str = "[Code executed successfully]";

/// Shown when the backend reports failure without a message.
pub const UNKNOWN_ERROR: &str = "Unknown error occurred";

/// Upper bound on a single install-and-retry request.
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(180);

/// Delay between consecutive dispatches in run-all.
pub const DEFAULT_RUN_ALL_STAGGER: Duration = Duration::from_millis(100);

const BACKEND_NOT_RUNNING: &str = "Failed to execute code. Backend server not running. \
Please start the Python server:\n\ncd to your project directory and run:\npython backend_server.py";

/// Per-cell request generations.
///
/// Every dispatch for a cell takes a new token from one monotonically
/// increasing counter; only a reply carrying the cell's latest token may
/// write the cell's output.
#[derive(Debug, Default)]
pub struct RequestTokens {
    next: u64,
    latest: HashMap<CellId, u64>,
}

impl RequestTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, cell_id: CellId) -> u64 {
        self.next += 1;
        self.latest.insert(cell_id, self.next);
        self.next
    }

    pub fn is_current(&self, cell_id: CellId, token: u64) -> bool {
        self.latest.get(&cell_id) == Some(&token)
    }

    pub fn forget(&mut self, cell_id: CellId) {
        self.latest.remove(&cell_id);
    }

    /// Invalidate every outstanding request. The counter keeps going so old
    /// tokens can never match again.
    pub fn clear(&mut self) {
        self.latest.clear();
    }
}

/// Why an install-and-retry request produced no response.
#[derive(Debug, thiserror::Error)]
pub enum InstallFailure {
    #[error("Installation timed out (3 minutes). The package might be too large or there may be network issues.")]
    TimedOut,

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Raw reply of a finished request.
#[derive(Debug)]
pub enum ExecutionReply {
    Execute(Result<ExecuteResponse, ClientError>),
    Install(Result<InstallResponse, InstallFailure>),
}

/// A finished request, tagged with the cell and token it was issued for.
#[derive(Debug)]
pub struct Completion {
    pub cell_id: CellId,
    pub token: u64,
    /// The code that was sent, kept for a follow-up install-and-retry.
    pub code: String,
    pub reply: ExecutionReply,
}

/// An install the user has been asked to confirm.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInstall {
    pub cell_id: CellId,
    pub code: String,
    pub packages: Vec<MissingPackage>,
}

/// What a reply means for its cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Output(CellOutput),
    /// Missing imports; no output is written until the user decides.
    NeedsInstall(Vec<MissingPackage>),
}

/// Success text: trimmed output, then the timing annotation after a blank
/// line. Falls back to [`EXECUTED_PLACEHOLDER`] when both are empty.
pub fn success_text(output: &str, execution_time: Option<f64>) -> String {
    let mut text = output.trim().to_string();
    if let Some(seconds) = execution_time.filter(|s| *s > 0.0) {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(&format_execution_time(seconds));
    }
    if text.trim().is_empty() {
        text = EXECUTED_PLACEHOLDER.to_string();
    }
    text
}

fn success_output(text: String, plots: &[String]) -> CellOutput {
    if plots.is_empty() {
        CellOutput::success(text)
    } else {
        CellOutput::with_plots(text, plots)
    }
}

/// Message for an execute request that never produced a usable response.
pub fn execute_failure_message(error: &ClientError) -> String {
    if error.is_unreachable() {
        BACKEND_NOT_RUNNING.to_string()
    } else {
        format!("Failed to execute code. Error: {error}")
    }
}

/// Message for an install request that never produced a usable response.
pub fn install_failure_message(failure: &InstallFailure) -> String {
    let detail = match failure {
        InstallFailure::TimedOut => failure.to_string(),
        InstallFailure::Client(e) if e.is_unreachable() => {
            "Cannot connect to backend server. Please ensure the Python server is running."
                .to_string()
        }
        InstallFailure::Client(e) => match e.status() {
            Some(500) => {
                "Server error during installation. Check server logs for details.".to_string()
            }
            Some(400) => "Invalid installation request. Please try again.".to_string(),
            _ => e.to_string(),
        },
    };
    format!("Installation failed: {detail}")
}

pub fn resolve_execute(result: Result<ExecuteResponse, ClientError>) -> Resolution {
    match result {
        Ok(response) if response.success => Resolution::Output(success_output(
            success_text(&response.output, response.execution_time),
            &response.plots,
        )),
        Ok(response) if !response.missing_packages.is_empty() => {
            Resolution::NeedsInstall(response.missing_packages)
        }
        Ok(response) => Resolution::Output(CellOutput::error(
            response.error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
        )),
        Err(e) => Resolution::Output(CellOutput::error(execute_failure_message(&e))),
    }
}

pub fn resolve_install(result: Result<InstallResponse, InstallFailure>) -> CellOutput {
    let response = match result {
        Ok(response) => response,
        Err(failure) => return CellOutput::error(install_failure_message(&failure)),
    };

    if response.success {
        let installed = response
            .installation_results
            .iter()
            .map(|r| format!("✓ {}: {}", r.package, r.message))
            .collect::<Vec<_>>()
            .join("\n");
        let output = response.output.trim();
        let mut text = match (installed.is_empty(), output.is_empty()) {
            (false, false) => format!("{installed}\n\n{output}"),
            (true, _) => output.to_string(),
            (false, true) => installed,
        };
        if let Some(seconds) = response.execution_time.filter(|s| *s > 0.0) {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&format_execution_time(seconds));
        }
        if text.is_empty() {
            text = EXECUTED_PLACEHOLDER.to_string();
        }
        return success_output(text, &response.plots);
    }

    let mut text = String::new();
    if !response.installation_results.is_empty() {
        let results = response
            .installation_results
            .iter()
            .map(|r| {
                let mark = if r.success { '✓' } else { '✗' };
                format!("{mark} {}: {}", r.package, r.message)
            })
            .collect::<Vec<_>>()
            .join("\n");
        text.push_str(&format!("Installation Results:\n{results}\n\n"));
    }
    text.push_str(response.error.as_deref().unwrap_or("Installation failed"));
    CellOutput::error(text)
}

pub(crate) async fn dispatch_execute(
    backend: Arc<dyn ExecutionBackend>,
    cell_id: CellId,
    token: u64,
    code: String,
) -> Completion {
    log::debug!("[execution] execute cell {cell_id} (token {token})");
    let request = ExecuteRequest {
        code: code.clone(),
        cell_id: cell_id.to_string(),
    };
    let result = backend.execute(&request).await;
    if let Err(ref e) = result {
        log::warn!("[execution] execute cell {cell_id} failed: {e}");
    }
    Completion {
        cell_id,
        token,
        code,
        reply: ExecutionReply::Execute(result),
    }
}

pub(crate) async fn dispatch_install(
    backend: Arc<dyn ExecutionBackend>,
    install: PendingInstall,
    token: u64,
    timeout: Duration,
) -> Completion {
    let PendingInstall {
        cell_id,
        code,
        packages,
    } = install;
    log::info!(
        "[execution] installing {} for cell {cell_id}",
        packages
            .iter()
            .map(|p| p.package.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let request = InstallRequest {
        packages,
        code: code.clone(),
        cell_id: cell_id.to_string(),
    };
    let result = match tokio::time::timeout(timeout, backend.install_and_retry(&request)).await {
        Ok(result) => result.map_err(InstallFailure::from),
        Err(_) => {
            log::warn!("[execution] install for cell {cell_id} timed out after {timeout:?}");
            Err(InstallFailure::TimedOut)
        }
    };
    Completion {
        cell_id,
        token,
        code,
        reply: ExecutionReply::Install(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_client::InstallationResult;

    fn pkg(name: &str) -> MissingPackage {
        MissingPackage {
            variable: name.to_string(),
            package: name.to_string(),
            install_command: format!("pip install {name}"),
        }
    }

    #[test]
    fn test_tokens_are_monotonic_and_latest_wins() {
        let mut tokens = RequestTokens::new();
        let a = CellId::new();
        let b = CellId::new();
        let first = tokens.issue(a);
        let other = tokens.issue(b);
        let second = tokens.issue(a);
        assert!(first < other && other < second);
        assert!(!tokens.is_current(a, first));
        assert!(tokens.is_current(a, second));
        assert!(tokens.is_current(b, other));

        tokens.clear();
        assert!(!tokens.is_current(a, second));
        assert!(tokens.issue(a) > second);
    }

    #[test]
    fn test_success_text() {
        assert_eq!(success_text("1\n", Some(0.01)), "1\n\n[Executed in 10.0ms]");
        assert_eq!(success_text("", Some(0.002)), "[Executed in 2.0ms]");
        assert_eq!(success_text("  \n", None), EXECUTED_PLACEHOLDER);
        assert_eq!(success_text("x", None), "x");
    }

    #[test]
    fn test_resolve_success_with_plots() {
        let resolution = resolve_execute(Ok(ExecuteResponse {
            success: true,
            output: "done".into(),
            plots: vec!["data:image/png;base64,AAAA".into()],
            ..Default::default()
        }));
        let Resolution::Output(output) = resolution else {
            panic!("expected output");
        };
        assert_eq!(output.blocks.len(), 2);
        assert_eq!(output.images().count(), 1);
    }

    #[test]
    fn test_resolve_missing_packages_is_not_an_error() {
        let resolution = resolve_execute(Ok(ExecuteResponse {
            success: false,
            error: Some("No module named 'pandas'".into()),
            missing_packages: vec![pkg("pandas")],
            ..Default::default()
        }));
        assert_eq!(resolution, Resolution::NeedsInstall(vec![pkg("pandas")]));
    }

    #[test]
    fn test_resolve_explicit_error() {
        let resolution = resolve_execute(Ok(ExecuteResponse {
            success: false,
            error: Some("NameError: x".into()),
            ..Default::default()
        }));
        assert_eq!(resolution, Resolution::Output(CellOutput::error("NameError: x")));

        let resolution = resolve_execute(Ok(ExecuteResponse::default()));
        assert_eq!(resolution, Resolution::Output(CellOutput::error(UNKNOWN_ERROR)));
    }

    #[test]
    fn test_resolve_transport_errors() {
        let Resolution::Output(output) = resolve_execute(Err(ClientError::Unreachable {
            url: "http://localhost:5000/api/execute".into(),
            reason: "connection refused".into(),
        })) else {
            panic!("expected output");
        };
        assert!(output.is_error());
        assert!(output.plain_text().contains("Backend server not running"));

        let Resolution::Output(output) =
            resolve_execute(Err(ClientError::Decode("expected value".into())))
        else {
            panic!("expected output");
        };
        assert!(output.plain_text().starts_with("Failed to execute code. Error: "));
        assert!(!output.plain_text().contains("Backend server not running"));
    }

    #[test]
    fn test_install_success_text() {
        let output = resolve_install(Ok(InstallResponse {
            success: true,
            output: "ok\n".into(),
            execution_time: Some(1.5),
            installation_results: vec![InstallationResult {
                package: "pandas".into(),
                success: true,
                message: "Successfully installed pandas".into(),
            }],
            ..Default::default()
        }));
        assert!(!output.is_error());
        assert_eq!(
            output.plain_text(),
            "✓ pandas: Successfully installed pandas\n\nok\n\n[Executed in 1500.0ms]"
        );
    }

    #[test]
    fn test_install_partial_failure() {
        let output = resolve_install(Ok(InstallResponse {
            success: false,
            installation_results: vec![
                InstallationResult {
                    package: "numpy".into(),
                    success: true,
                    message: "ok".into(),
                },
                InstallationResult {
                    package: "nope".into(),
                    success: false,
                    message: "not found".into(),
                },
            ],
            error: Some("Failed to install some packages".into()),
            ..Default::default()
        }));
        assert!(output.is_error());
        assert_eq!(
            output.plain_text(),
            "Installation Results:\n✓ numpy: ok\n✗ nope: not found\n\nFailed to install some packages"
        );

        let output = resolve_install(Ok(InstallResponse::default()));
        assert_eq!(output.plain_text(), "Installation failed");
    }

    #[test]
    fn test_install_failure_messages_are_distinct() {
        let timeout = install_failure_message(&InstallFailure::TimedOut);
        assert!(timeout.starts_with("Installation failed: Installation timed out (3 minutes)"));

        let network = install_failure_message(&InstallFailure::Client(ClientError::Unreachable {
            url: "u".into(),
            reason: "refused".into(),
        }));
        assert!(network.contains("Cannot connect to backend server"));
        assert_ne!(timeout, network);

        let server = install_failure_message(&InstallFailure::Client(ClientError::Http {
            status: 500,
            reason: "Internal Server Error".into(),
        }));
        assert!(server.contains("Server error during installation"));

        let bad = install_failure_message(&InstallFailure::Client(ClientError::Http {
            status: 400,
            reason: "Bad Request".into(),
        }));
        assert!(bad.contains("Invalid installation request"));

        let other = install_failure_message(&InstallFailure::Client(ClientError::Http {
            status: 503,
            reason: "Service Unavailable".into(),
        }));
        assert_eq!(other, "Installation failed: HTTP 503: Service Unavailable");
    }
}

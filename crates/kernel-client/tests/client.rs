//! HTTP-level tests for `KernelClient` against a mock backend.

use kernel_client::{
    ClientError, ExecuteRequest, FileKind, InstallRequest, KernelClient, MissingPackage,
};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> KernelClient {
    KernelClient::new(&format!("{}/api", server.uri())).unwrap()
}

#[tokio::test]
async fn test_execute_posts_code_and_cell_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/execute"))
        .and(body_json(json!({"code": "print(1)", "cell_id": "cell-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "output": "1\n",
            "execution_time": 0.01,
            "error": "",
            "missing_packages": null,
            "plots": [],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let resp = client
        .execute(&ExecuteRequest {
            code: "print(1)".into(),
            cell_id: "cell-1".into(),
        })
        .await
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.output, "1\n");
    assert_eq!(resp.execution_time, Some(0.01));
}

#[tokio::test]
async fn test_execute_reads_error_body_on_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/execute"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "success": false,
            "error": "Server error: boom",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let resp = client
        .execute(&ExecuteRequest {
            code: "x".into(),
            cell_id: "c".into(),
        })
        .await
        .unwrap();

    assert!(!resp.success);
    assert_eq!(resp.error.as_deref(), Some("Server error: boom"));
}

#[tokio::test]
async fn test_execute_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .execute(&ExecuteRequest {
            code: "x".into(),
            cell_id: "c".into(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Decode(_)), "got {err:?}");
}

#[tokio::test]
async fn test_execute_unreadable_error_status_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/execute"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .execute(&ExecuteRequest {
            code: "x".into(),
            cell_id: "c".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn test_install_and_retry_http_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/install-and-retry"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "error": "Missing packages or code",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .install_and_retry(&InstallRequest {
            packages: vec![],
            code: "x".into(),
            cell_id: "c".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
}

#[tokio::test]
async fn test_install_and_retry_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/install-and-retry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "output": "ok",
            "execution_time": 1.5,
            "installation_results": [
                {"package": "pandas", "success": true, "message": "Successfully installed pandas"}
            ],
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let resp = client
        .install_and_retry(&InstallRequest {
            packages: vec![MissingPackage {
                variable: "pd".into(),
                package: "pandas".into(),
                install_command: "pip install pandas".into(),
            }],
            code: "import pandas".into(),
            cell_id: "c".into(),
        })
        .await
        .unwrap();

    assert!(resp.success);
    assert_eq!(resp.installation_results.len(), 1);
    assert!(resp.installation_results[0].success);
}

#[tokio::test]
async fn test_list_folder_sends_path_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files/folder"))
        .and(query_param("path", "data dir/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "folder": "data dir",
            "files": [{"name": "x.csv", "type": "file", "path": "data dir/x.csv", "size": 3}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let listing = client.list_folder("data dir/").await.unwrap();

    assert_eq!(listing.folder.as_deref(), Some("data dir"));
    assert_eq!(listing.files[0].kind, FileKind::File);
}

#[tokio::test]
async fn test_file_content_returns_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files/content"))
        .and(query_param("path", "notes.py"))
        .respond_with(ResponseTemplate::new(200).set_body_string("print('hi')\n"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert_eq!(client.file_content("notes.py").await.unwrap(), "print('hi')\n");
}

#[tokio::test]
async fn test_file_content_not_found_uses_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files/content"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "success": false,
            "error": "File not found",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.file_content("missing.py").await.unwrap_err();
    assert!(matches!(err, ClientError::Backend(ref m) if m == "File not found"));
}

#[tokio::test]
async fn test_save_file_failure_is_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/files/save"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "error": "Invalid filename - directory traversal not allowed",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client.save_file("../x.ipynb", "{}").await.unwrap_err();
    assert!(matches!(err, ClientError::Backend(_)));
}

#[tokio::test]
async fn test_save_file_success_reports_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/files/save"))
        .and(body_json(json!({"filename": "a.ipynb", "content": "{}"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "File saved as notebooks/a.ipynb",
            "path": "notebooks/a.ipynb",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let saved = client.save_file("a.ipynb", "{}").await.unwrap();
    assert_eq!(saved.path.as_deref(), Some("notebooks/a.ipynb"));
}

#[tokio::test]
async fn test_status_and_ping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "status": "running",
            "python_version": "3.12.1",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    assert!(client.ping().await);
    let status = client.status().await.unwrap();
    assert_eq!(status.status.as_deref(), Some("running"));
}

#[tokio::test]
async fn test_unreachable_backend() {
    // Nothing listens on the discard port.
    let client = KernelClient::new("http://127.0.0.1:9/api").unwrap();
    let err = client
        .execute(&ExecuteRequest {
            code: "x".into(),
            cell_id: "c".into(),
        })
        .await
        .unwrap_err();

    assert!(err.is_unreachable(), "got {err:?}");
    assert!(!client.ping().await);
}

// crates/survey-sync-remote/tests/http_form_server.rs
// ============================================================================
// Module: HTTP Form Server Tests
// Description: Route shape, status classification, and body limits.
// ============================================================================

//! ## Overview
//! Runs [`HttpFormServer`] against a scripted local `tiny_http` server.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::net::TcpListener;
use std::thread;

use survey_sync_config::ServerConfig;
use survey_sync_core::DeviceId;
use survey_sync_core::FormId;
use survey_sync_core::FormServer;
use survey_sync_core::NetworkError;
use survey_sync_core::NotifyAction;
use survey_sync_core::ResourceId;
use survey_sync_remote::HttpFormServer;
use tiny_http::Response;
use tiny_http::Server;

// ============================================================================
// SECTION: Test Helpers
// ============================================================================

/// Request observed by the scripted server.
#[derive(Debug)]
struct Recorded {
    /// HTTP method.
    method: String,
    /// Path and query.
    url: String,
    /// Request body.
    body: String,
}

/// Serves the scripted responses in order, then returns what it received.
fn serve(responses: Vec<(u16, String)>) -> (String, thread::JoinHandle<Vec<Recorded>>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let handle = thread::spawn(move || {
        let mut recorded = Vec::new();
        for (status, body) in responses {
            let mut request = server.recv().unwrap();
            let mut request_body = String::new();
            request.as_reader().read_to_string(&mut request_body).unwrap();
            recorded.push(Recorded {
                method: request.method().to_string(),
                url: request.url().to_string(),
                body: request_body,
            });
            let response = Response::from_string(body).with_status_code(status);
            request.respond(response).unwrap();
        }
        recorded
    });
    (format!("http://{addr}/api/v1"), handle)
}

fn client(base_url: &str, max_response_bytes: usize) -> HttpFormServer {
    HttpFormServer::new(&ServerConfig {
        base_url: base_url.to_string(),
        timeout_ms: 5_000,
        max_response_bytes,
        allow_http: true,
    })
    .unwrap()
}

fn device() -> DeviceId {
    DeviceId::new("device-7")
}

// ============================================================================
// SECTION: Routes
// ============================================================================

#[test]
fn form_header_is_fetched_for_the_device() {
    let header = r#"{"id":"f 1","surveyGroupId":"sg","name":"Wells","version":"2.5"}"#;
    let (base, handle) = serve(vec![(200, header.to_string())]);

    let fetched = client(&base, 1024).fetch_form_header(&FormId::new("f 1"), &device()).unwrap();

    let recorded = handle.join().unwrap();
    assert_eq!(recorded[0].method, "GET");
    assert_eq!(recorded[0].url, "/api/v1/forms/f%201/header?deviceId=device-7");
    assert_eq!(fetched.id, FormId::new("f 1"));
    assert_eq!(fetched.version.as_str(), "2.5");
    assert_eq!(fetched.language, "en");
}

#[test]
fn assigned_headers_and_archives_use_their_routes() {
    let headers = r#"[{"id":"a","surveyGroupId":"sg","version":"1"}]"#;
    let (base, handle) = serve(vec![
        (200, headers.to_string()),
        (200, "form-zip".to_string()),
        (200, "resource-zip".to_string()),
    ]);
    let server = client(&base, 1024);

    let listed = server.fetch_form_headers(&device()).unwrap();
    let form = server.download_form_archive(&FormId::new("a")).unwrap();
    let resource = server.download_resource_archive(&ResourceId::new("cascade-1")).unwrap();

    let recorded = handle.join().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(form, b"form-zip");
    assert_eq!(resource, b"resource-zip");
    let urls: Vec<_> = recorded.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec![
        "/api/v1/forms?deviceId=device-7",
        "/api/v1/forms/a/archive",
        "/api/v1/resources/cascade-1/archive",
    ]);
}

#[test]
fn notification_posts_a_json_body() {
    let (base, handle) = serve(vec![(200, String::new())]);

    client(&base, 1024)
        .notify_file_available(NotifyAction::Image, &FormId::new("f1"), "p.jpg", &device())
        .unwrap();

    let recorded = handle.join().unwrap();
    assert_eq!(recorded[0].method, "POST");
    assert_eq!(recorded[0].url, "/api/v1/notifications");
    let body: serde_json::Value = serde_json::from_str(&recorded[0].body).unwrap();
    assert_eq!(body["action"], "image");
    assert_eq!(body["formId"], "f1");
    assert_eq!(body["filename"], "p.jpg");
    assert_eq!(body["deviceId"], "device-7");
}

#[test]
fn pending_files_lists_every_form_id() {
    let reply = r#"{"missingFiles":["p.jpg"],"deletedForms":["f2"]}"#;
    let (base, handle) = serve(vec![(200, reply.to_string())]);

    let pending = client(&base, 1024)
        .fetch_pending_files(&[FormId::new("f1"), FormId::new("f2")], &device())
        .unwrap();

    let recorded = handle.join().unwrap();
    assert_eq!(recorded[0].url, "/api/v1/devicenotification?deviceId=device-7&formId=f1&formId=f2");
    assert_eq!(pending.missing_files, vec!["p.jpg".to_string()]);
    assert_eq!(pending.deleted_forms, vec![FormId::new("f2")]);
}

// ============================================================================
// SECTION: Failure Classification
// ============================================================================

#[test]
fn statuses_map_onto_network_errors() {
    let (base, handle) = serve(vec![
        (403, "no assignment".to_string()),
        (404, "gone".to_string()),
        (503, "busy".to_string()),
        (400, "bad".to_string()),
        (302, String::new()),
    ]);
    let server = client(&base, 1024);
    let form = FormId::new("f1");

    let forbidden = server.download_form_archive(&form).unwrap_err();
    let missing = server.download_form_archive(&form).unwrap_err();
    let busy = server.download_form_archive(&form).unwrap_err();
    let bad = server.download_form_archive(&form).unwrap_err();
    let redirect = server.download_form_archive(&form).unwrap_err();
    handle.join().unwrap();

    assert_eq!(forbidden, NetworkError::AssignmentRequired("no assignment".to_string()));
    assert!(matches!(missing, NetworkError::NotFound(_)));
    assert!(busy.is_transient());
    assert_eq!(bad, NetworkError::Rejected {
        status: 400,
        message: "bad".to_string(),
    });
    assert!(matches!(redirect, NetworkError::Rejected { status: 302, .. }));
}

#[test]
fn oversized_and_malformed_bodies_are_invalid() {
    let (base, handle) = serve(vec![(200, "x".repeat(64)), (200, "{not json".to_string())]);
    let server = client(&base, 16);

    let oversized = server.download_form_archive(&FormId::new("f1")).unwrap_err();
    let malformed = server.fetch_form_headers(&device()).unwrap_err();
    handle.join().unwrap();

    assert!(matches!(oversized, NetworkError::Invalid(_)));
    assert!(matches!(malformed, NetworkError::Invalid(_)));
}

#[test]
fn refused_connections_are_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"), 1024)
        .download_form_archive(&FormId::new("f1"))
        .unwrap_err();

    assert!(err.is_transient());
}

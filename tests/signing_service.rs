//! Drives the reqwest transport against a loopback HTTP server.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use swarm_bootstrap::access_policy::AccessPolicy;
use swarm_bootstrap::error::{exit_code, BootstrapError, TransportErrorKind};
use swarm_bootstrap::failure::{FailurePolicy, OperatingMode};
use swarm_bootstrap::http_client::{
    HttpClient, HttpRequest, ReqwestTransport, RetryPolicy, Transport,
};
use swarm_bootstrap::workspace::Workspace;

const SERVICE_ERROR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CGHUB_error>
  <usermsg>Invalid token</usermsg>
  <effect>The certificate was not signed</effect>
  <remediation>Download a new credential</remediation>
</CGHUB_error>"#;

struct Recorded {
    head: String,
    body: Vec<u8>,
}

/// Serve one canned response per accepted connection and report each request.
fn serve(responses: Vec<(u16, &'static str, String)>) -> (String, Receiver<Recorded>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for (status, reason, body) in responses {
            let (stream, _) = match listener.accept() {
                Ok(conn) => conn,
                Err(_) => return,
            };
            let recorded = read_request(&stream);
            let mut stream = stream;
            let reply = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            stream.write_all(reply.as_bytes()).unwrap();
            stream.flush().unwrap();
            let _ = tx.send(recorded);
        }
    });

    (format!("http://{}", addr), rx)
}

fn read_request(stream: &TcpStream) -> Recorded {
    let mut reader = BufReader::new(stream);
    let mut head = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
            break;
        }
        head.push_str(&line);
    }

    let lower = head.to_ascii_lowercase();
    let content_length = lower
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .map(|v| v.trim().parse::<usize>().unwrap());

    let mut body = Vec::new();
    if let Some(len) = content_length {
        body.resize(len, 0);
        reader.read_exact(&mut body).unwrap();
    } else if lower.contains("transfer-encoding: chunked") {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line).unwrap();
            let size = usize::from_str_radix(size_line.trim(), 16).unwrap();
            let mut chunk = vec![0; size + 2];
            reader.read_exact(&mut chunk).unwrap();
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..size]);
        }
    }
    Recorded { head, body }
}

fn client(parent: &tempfile::TempDir, mode: OperatingMode) -> HttpClient {
    let workspace = Arc::new(Workspace::create_in(parent.path()).unwrap());
    let transport = Arc::new(ReqwestTransport::new(true).unwrap());
    HttpClient::new(
        transport,
        workspace,
        AccessPolicy::unrestricted(),
        FailurePolicy::new(mode),
    )
}

#[test]
fn test_get_returns_body() {
    let parent = tempfile::tempdir().unwrap();
    let (base, requests) = serve(vec![(200, "OK", "token-value\n".to_string())]);
    let http = client(&parent, OperatingMode::Server);

    let body = http.get(&format!("{}/credential", base), "Fetching credential").unwrap();
    assert_eq!(body, b"token-value\n");

    let recorded = requests.recv().unwrap();
    assert!(recorded.head.starts_with("GET /credential HTTP/1.1"));
}

#[test]
fn test_multipart_post_writes_target() {
    let parent = tempfile::tempdir().unwrap();
    let (base, requests) = serve(vec![(200, "OK", "-----BEGIN CERTIFICATE-----\n".to_string())]);
    let http = client(&parent, OperatingMode::Server);
    let target = http.workspace().cert_path("item-1").unwrap();

    let request = HttpRequest::multipart(format!("{}/csr_sign", base))
        .text_field("token", "secret")
        .text_field("cert_req", "-----BEGIN CERTIFICATE REQUEST-----")
        .text_field("info_hash", "00ff");
    let exchange = http
        .perform(&request, RetryPolicy::single(), Some(&target), "Signing")
        .unwrap();
    assert_eq!(exchange.attempt.attempts, 1);
    assert_eq!(exchange.attempt.last_status, Some(200));
    assert_eq!(
        std::fs::read_to_string(&target).unwrap(),
        "-----BEGIN CERTIFICATE-----\n"
    );

    let recorded = requests.recv().unwrap();
    assert!(recorded.head.starts_with("POST /csr_sign HTTP/1.1"));
    assert!(recorded
        .head
        .to_ascii_lowercase()
        .contains("content-type: multipart/form-data"));
    let body = String::from_utf8_lossy(&recorded.body);
    for name in ["token", "cert_req", "info_hash"] {
        assert!(body.contains(&format!("name=\"{}\"", name)));
    }
}

#[test]
fn test_service_error_document() {
    let parent = tempfile::tempdir().unwrap();
    let (base, _requests) = serve(vec![(403, "Forbidden", SERVICE_ERROR.to_string())]);
    let http = client(&parent, OperatingMode::Server);
    let target = http.workspace().cert_path("item-2").unwrap();

    let request = HttpRequest::multipart(format!("{}/csr_sign", base)).text_field("token", "bad");
    let err = http
        .perform(&request, RetryPolicy::single(), Some(&target), "Signing")
        .unwrap_err();

    match &err {
        BootstrapError::Service { report, retryable } => {
            assert_eq!(report.user_message, "Invalid token");
            assert_eq!(report.remediation, "Download a new credential");
            assert!(!retryable);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.exit_code(), exit_code::HTTP);
}

#[test]
fn test_plain_error_status() {
    let parent = tempfile::tempdir().unwrap();
    let (base, _requests) = serve(vec![(404, "Not Found", "no such page".to_string())]);
    let http = client(&parent, OperatingMode::Server);

    let err = http.get(&format!("{}/missing", base), "Fetching credential").unwrap_err();
    match err {
        BootstrapError::HttpStatus { status, reason, .. } => {
            assert_eq!(status, 404);
            assert_eq!(reason, "Not Found");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_refused_connection_is_not_retried() {
    let parent = tempfile::tempdir().unwrap();
    // Bind then drop to get a port with nothing listening.
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let http = client(&parent, OperatingMode::Server);

    let err = http
        .perform(
            &HttpRequest::get(format!("http://{}/", addr)),
            RetryPolicy::csr_signing(),
            None,
            "Signing",
        )
        .unwrap_err();
    match err {
        BootstrapError::Transport { kind, attempts, .. } => {
            assert_eq!(kind, TransportErrorKind::Connect);
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_refused_multipart_post_is_a_connect_failure() {
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let transport = ReqwestTransport::new(true).unwrap();
    let request = HttpRequest::multipart(format!("http://{}/csr_sign", addr))
        .text_field("token", "secret")
        .text_field("cert_req", "-----BEGIN CERTIFICATE REQUEST-----\n".repeat(64))
        .text_field("info_hash", "00ff");

    // The body is streamed, so the failure can race the connect error; repeat to catch it.
    for _ in 0..25 {
        let mut trace = Vec::new();
        let err = transport.execute(&request, &mut trace).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Connect, "{}", err.message);
    }
}

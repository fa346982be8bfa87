//! Outbound HTTP(S) transactions
//!
//! [`HttpClient::perform`] is the only path by which the bootstrap layer touches the network.
//! Every call is checked against the client's [`AccessPolicy`] before anything is sent.
//! One call runs one logical transaction: it retries transient transport failures under a
//! [`RetryPolicy`], optionally stores the response body in a target file, and classifies the
//! result as success, transport failure, structured service error or generic HTTP failure.
//!
//! Wire details (request line, status line, response headers, transport errors) are written
//! to a per-call scratch file in the workspace. The file is read back, surfaced at debug
//! level and deleted when the call returns, whatever the outcome.
//!
//! The network itself sits behind the [`Transport`] trait. [`ReqwestTransport`] is the real
//! implementation; tests substitute scripted transports.

use std::error::Error as StdError;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::access_policy::AccessPolicy;
use crate::error::{BootstrapError, TransportErrorKind};
use crate::error_response::{
    classify_error_body, classify_error_file, is_in_progress, Termination,
};
use crate::failure::FailurePolicy;
use crate::workspace::Workspace;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(20);
pub const MAX_REDIRECTS: usize = 15;

#[derive(Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Sent as a GET.
    Empty,
    /// Sent as a multipart/form-data POST.
    Form(Vec<(String, String)>),
}

#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: RequestBody::Empty,
        }
    }

    pub fn multipart(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: RequestBody::Form(Vec::new()),
        }
    }

    /// Append a text field, turning the request into a multipart POST.
    pub fn text_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let field = (name.into(), value.into());
        match &mut self.body {
            RequestBody::Form(fields) => fields.push(field),
            RequestBody::Empty => self.body = RequestBody::Form(vec![field]),
        }
        self
    }

    /// Value of a form field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(fields) => fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str()),
            RequestBody::Empty => None,
        }
    }

    pub fn method(&self) -> &'static str {
        match self.body {
            RequestBody::Empty => "GET",
            RequestBody::Form(_) => "POST",
        }
    }
}

// Field values may carry credentials; only names and sizes are printed.
impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("HttpRequest");
        out.field("method", &self.method()).field("url", &self.url);
        if let RequestBody::Form(fields) = &self.body {
            let summary: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{} ({} bytes)", name, value.len()))
                .collect();
            out.field("fields", &summary);
        }
        out.finish()
    }
}

/// Raw outcome of one exchange that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Status line and header block, kept apart from the body.
    pub headers: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Performs a single HTTP exchange. Implementations must not retry.
pub trait Transport: Send + Sync {
    /// Execute `request`, writing wire-level diagnostics to `trace`.
    fn execute(
        &self,
        request: &HttpRequest,
        trace: &mut dyn Write,
    ) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build the client. `verify_tls = false` disables peer and host name verification and is
    /// meant for test deployments only.
    pub fn new(verify_tls: bool) -> Result<Self, BootstrapError> {
        if !verify_tls {
            warn!("TLS peer verification is disabled for web-service calls");
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TOTAL_TIMEOUT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(!verify_tls)
            .danger_accept_invalid_hostnames(!verify_tls)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(BootstrapError::HttpClientInit)?;
        Ok(Self { client })
    }

    fn prepare(&self, request: &HttpRequest) -> RequestBuilder {
        match &request.body {
            RequestBody::Empty => self.client.get(&request.url),
            RequestBody::Form(fields) => {
                let form = fields.iter().fold(Form::new(), |form, (name, value)| {
                    form.text(name.clone(), value.clone())
                });
                self.client.post(&request.url).multipart(form)
            }
        }
    }
}

impl Transport for ReqwestTransport {
    fn execute(
        &self,
        request: &HttpRequest,
        trace: &mut dyn Write,
    ) -> Result<TransportResponse, TransportError> {
        let _ = writeln!(trace, "> {} {}", request.method(), request.url);
        if let RequestBody::Form(fields) = &request.body {
            for (name, value) in fields {
                let _ = writeln!(trace, "> form-data {} ({} bytes)", name, value.len());
            }
        }

        let response = self.prepare(request).send().map_err(|e| {
            let err = classify_reqwest_error(&e, Phase::Send);
            let _ = writeln!(trace, "* {}", err);
            err
        })?;

        let status = response.status();
        let mut headers = format!("{:?} {}\r\n", response.version(), status);
        for (name, value) in response.headers() {
            headers.push_str(name.as_str());
            headers.push_str(": ");
            headers.push_str(value.to_str().unwrap_or("<non-ascii>"));
            headers.push_str("\r\n");
        }
        for line in headers.lines() {
            let _ = writeln!(trace, "< {}", line);
        }

        let body = response.bytes().map_err(|e| {
            let err = classify_reqwest_error(&e, Phase::Receive);
            let _ = writeln!(trace, "* {}", err);
            err
        })?;
        let _ = writeln!(trace, "* received {} body bytes", body.len());

        Ok(TransportResponse {
            status: status.as_u16(),
            headers,
            body: body.to_vec(),
        })
    }
}

/// Whether a response had started to arrive when the error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Send,
    Receive,
}

fn classify_reqwest_error(err: &reqwest::Error, phase: Phase) -> TransportError {
    // A streamed multipart body can fail with "receiver is gone" before the connect error
    // surfaces, so a body failure with no response yet is a connection failure.
    let connection_failed = err.is_connect()
        || (phase == Phase::Send && (err.is_body() || has_io_error(err, is_connection_failure)));

    let kind = if err.is_timeout() || has_io_error(err, |kind| kind == io::ErrorKind::TimedOut) {
        TransportErrorKind::Timeout
    } else if connection_failed {
        if is_tls_failure(err) {
            TransportErrorKind::TlsConnect
        } else {
            TransportErrorKind::Connect
        }
    } else if err.is_redirect() {
        TransportErrorKind::Redirect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else if err.is_request() || err.is_builder() {
        TransportErrorKind::Request
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, error_chain(err))
}

fn is_connection_failure(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
    )
}

fn has_io_error(err: &(dyn StdError + 'static), matches: impl Fn(io::ErrorKind) -> bool) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches(io_err.kind()) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn is_tls_failure(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<openssl::ssl::Error>().is_some()
            || e.downcast_ref::<openssl::error::ErrorStack>().is_some()
        {
            return true;
        }
        let text = e.to_string().to_ascii_lowercase();
        if ["tls", "ssl", "handshake", "certificate"]
            .iter()
            .any(|word| text.contains(word))
        {
            return true;
        }
        current = e.source();
    }
    false
}

/// Canonical reason phrase for an HTTP status code.
pub fn reason_phrase(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown HTTP status")
}

/// How often a transaction is attempted when the transport fails transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// One attempt, no retry.
    pub const fn single() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Five attempts two seconds apart, used for CSR signing.
    pub const fn csr_signing() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single()
    }
}

/// Progress of one logical transaction across its attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionAttempt {
    pub url: String,
    pub attempts: u32,
    pub last_transport: Option<TransportErrorKind>,
    pub last_status: Option<u16>,
}

impl TransactionAttempt {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            attempts: 0,
            last_transport: None,
            last_status: None,
        }
    }
}

/// A completed transaction with HTTP status 200.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    pub attempt: TransactionAttempt,
    pub headers: String,
    pub body: Vec<u8>,
}

/// Per-call diagnostics file, drained to the log and removed on drop.
struct DiagnosticCapture {
    file: Option<NamedTempFile>,
    sink: io::Sink,
}

impl DiagnosticCapture {
    fn open(workspace: &Workspace) -> Self {
        let file = match workspace.scratch_file() {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(error = %e, "Failed to create HTTP diagnostic file");
                None
            }
        };
        Self {
            file,
            sink: io::sink(),
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self.file.as_mut() {
            Some(file) => file as &mut dyn Write,
            None => &mut self.sink,
        }
    }
}

impl Drop for DiagnosticCapture {
    fn drop(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        match std::fs::read_to_string(file.path()) {
            Ok(text) if !text.is_empty() => {
                debug!("HTTP client diagnostic information:\n{}", text.trim_end())
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to read HTTP diagnostic file"),
        }
        if let Err(e) = file.close() {
            warn!(error = %e, "Failed to delete HTTP diagnostic file");
        }
    }
}

/// Reentrant transaction client. Clones share the transport, the workspace and the
/// allow-list.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    workspace: Arc<Workspace>,
    access: AccessPolicy,
    failure: FailurePolicy,
}

impl HttpClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        workspace: Arc<Workspace>,
        access: AccessPolicy,
        failure: FailurePolicy,
    ) -> Self {
        Self {
            transport,
            workspace,
            access,
            failure,
        }
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn access_policy(&self) -> &AccessPolicy {
        &self.access
    }

    /// Run one transaction.
    ///
    /// The URL is checked against the allow-list first; a violation is returned without
    /// touching the transport or `target`. Transient transport failures (TLS negotiation, timeout) are retried up to
    /// `retry.max_attempts` in total with `retry.delay` between attempts. Any response is
    /// written to `target` when given. A non-200 status is classified from the body: a
    /// structured service error becomes [`BootstrapError::Service`], anything else
    /// [`BootstrapError::HttpStatus`]. `context` prefixes failure messages.
    pub fn perform(
        &self,
        request: &HttpRequest,
        retry: RetryPolicy,
        target: Option<&Path>,
        context: &str,
    ) -> Result<HttpExchange, BootstrapError> {
        self.access.check(&request.url)?;

        let max_attempts = retry.max_attempts.max(1);
        let mut capture = DiagnosticCapture::open(&self.workspace);
        let mut attempt = TransactionAttempt::new(&request.url);

        let outcome = loop {
            attempt.attempts += 1;
            match self.transport.execute(request, capture.writer()) {
                Err(e) if e.kind.is_transient() && attempt.attempts < max_attempts => {
                    attempt.last_transport = Some(e.kind);
                    debug!(url = %request.url, attempt = attempt.attempts, error = %e, "Transient transport failure");
                    std::thread::sleep(retry.delay);
                    info!("Retrying {} (attempt {} of {})", request.url, attempt.attempts + 1, max_attempts);
                }
                other => break other,
            }
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                attempt.last_transport = Some(e.kind);
                if let Some(target) = target.filter(|t| is_in_progress(t) && t.exists()) {
                    if let Err(err) = std::fs::remove_file(target) {
                        warn!(path = %target.display(), error = %err, "Failed to remove partial download");
                    }
                }
                return Err(BootstrapError::Transport {
                    context: context.to_string(),
                    url: request.url.clone(),
                    kind: e.kind,
                    message: e.message,
                    attempts: attempt.attempts,
                });
            }
        };

        attempt.last_status = Some(response.status);
        debug!("Headers received from the client:  '{}'", response.headers.trim_end());

        if let Some(target) = target {
            std::fs::write(target, &response.body).map_err(|e| {
                BootstrapError::io(format!("Failure writing {}", target.display()), e)
            })?;
        }

        if response.status == 200 {
            return Ok(HttpExchange {
                attempt,
                headers: response.headers,
                body: response.body,
            });
        }

        let retries_remaining = max_attempts.saturating_sub(attempt.attempts);
        let classification = match target {
            Some(target) => classify_error_file(
                target,
                retries_remaining,
                Termination::Suppress,
                &self.failure,
            ),
            None => classify_error_body(
                &response.body,
                retries_remaining,
                Termination::Suppress,
                &self.failure,
            ),
        };

        Err(classification
            .into_error()
            .unwrap_or_else(|| BootstrapError::HttpStatus {
                context: context.to_string(),
                url: request.url.clone(),
                status: response.status,
                reason: reason_phrase(response.status).to_string(),
            }))
    }

    /// Single-attempt GET returning the body.
    pub fn get(&self, url: &str, context: &str) -> Result<Vec<u8>, BootstrapError> {
        self.perform(&HttpRequest::get(url), RetryPolicy::single(), None, context)
            .map(|exchange| exchange.body)
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("workspace", &self.workspace.path())
            .field("access", &self.access)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

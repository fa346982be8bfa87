//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Name, X509Req, X509};

use crate::error::TransportErrorKind;
use crate::http_client::{HttpRequest, Transport, TransportError, TransportResponse};

type Handler =
    Box<dyn Fn(&HttpRequest, usize) -> Result<TransportResponse, TransportError> + Send + Sync>;

/// Transport answering from a fixed script or a handler, counting calls.
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    handler: Option<Handler>,
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            handler: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answer every request with `handler(request, zero_based_call_index)`.
    pub(crate) fn with_handler<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest, usize) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            handler: Some(Box::new(handler)),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        request: &HttpRequest,
        trace: &mut dyn Write,
    ) -> Result<TransportResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        writeln!(trace, "* scripted call {} to {}", call, request.url).unwrap();

        if let Some(handler) = &self.handler {
            return handler(request, call);
        }
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(TransportError::new(
                TransportErrorKind::Other,
                "script exhausted",
            ))
        })
    }
}

pub(crate) fn respond(
    status: u16,
    body: impl Into<Vec<u8>>,
) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status,
        headers: format!("HTTP/1.1 {}\r\n", status),
        body: body.into(),
    })
}

pub(crate) fn transport_failure(
    kind: TransportErrorKind,
) -> Result<TransportResponse, TransportError> {
    Err(TransportError::new(kind, format!("simulated {}", kind)))
}

/// Minimal signing authority: a self-signed CA that issues certificates for CSRs.
pub(crate) struct TestAuthority {
    key: PKey<Private>,
    cert: X509,
}

impl TestAuthority {
    pub(crate) fn new() -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_text("CN", "Test Signing Authority").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial().to_asn1_integer().unwrap()).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Self {
            key,
            cert: builder.build(),
        }
    }

    /// Issue a one-day certificate for a PEM CSR.
    pub(crate) fn sign(&self, csr_pem: &str) -> String {
        let request = X509Req::from_pem(csr_pem.as_bytes()).unwrap();
        let public_key = request.public_key().unwrap();
        assert!(request.verify(&public_key).unwrap(), "CSR self-signature");

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_serial_number(&serial().to_asn1_integer().unwrap()).unwrap();
        builder.set_subject_name(request.subject_name()).unwrap();
        builder.set_issuer_name(self.cert.subject_name()).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
        builder.set_pubkey(&public_key).unwrap();
        builder.sign(&self.key, MessageDigest::sha256()).unwrap();

        String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
    }

    /// Handler signing the `cert_req` field of each request.
    pub(crate) fn responder(
        self: Arc<Self>,
    ) -> impl Fn(&HttpRequest, usize) -> Result<TransportResponse, TransportError> + Send + Sync
    {
        move |request: &HttpRequest, _: usize| match request.field("cert_req") {
            Some(csr) => respond(200, self.sign(csr)),
            None => respond(400, "missing cert_req"),
        }
    }
}

fn serial() -> BigNum {
    let mut serial = BigNum::new().unwrap();
    serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();
    serial
}

//! Structured error documents returned by the web services
//!
//! A failed WSI call answers with a small XML document:
//!
//! ```xml
//! <CGHUB_error>
//!   <usermsg>...</usermsg>
//!   <effect>...</effect>
//!   <remediation>...</remediation>
//! </CGHUB_error>
//! ```
//!
//! [`parse_error_document`] turns such a body into a [`ServiceErrorReport`]. Anything else
//! (empty body, HTML error page, truncated XML, a missing or blank field) is a
//! [`MalformedErrorDocument`]. [`classify_error_file`] wraps the parse with the handling the
//! transaction client needs: logging, terminating or not, and moving an unparseable
//! in-progress download out of the way.

use std::fmt;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::BootstrapError;
use crate::failure::FailurePolicy;

/// Root element of a service error document.
pub const ERROR_ROOT: &str = "CGHUB_error";
/// Suffix of a download that has not completed yet.
pub const IN_PROGRESS_SUFFIX: &str = ".partial";
/// Suffix an unparseable in-progress download is renamed to.
pub const ERROR_SUFFIX: &str = ".error";

/// User-facing explanation of a service-side failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceErrorReport {
    pub user_message: String,
    pub effect: String,
    pub remediation: String,
}

impl fmt::Display for ServiceErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  {}  {}", self.user_message, self.effect, self.remediation)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedErrorDocument {
    #[error("not well-formed XML: {0}")]
    Xml(String),
    #[error("unexpected root element <{0}>")]
    UnexpectedRoot(String),
    #[error("missing or empty <{0}>")]
    MissingField(&'static str),
    #[error("document is empty")]
    Empty,
    #[error("document is not UTF-8")]
    NotUtf8,
}

#[derive(Debug, Deserialize)]
struct ErrorDocument {
    usermsg: Option<String>,
    effect: Option<String>,
    remediation: Option<String>,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, MalformedErrorDocument> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(MalformedErrorDocument::MissingField(name))
}

fn check_root(text: &str) -> Result<(), MalformedErrorDocument> {
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                let name = element.name();
                return if name.as_ref() == ERROR_ROOT.as_bytes() {
                    Ok(())
                } else {
                    Err(MalformedErrorDocument::UnexpectedRoot(
                        String::from_utf8_lossy(name.as_ref()).into_owned(),
                    ))
                };
            }
            Ok(Event::Eof) => return Err(MalformedErrorDocument::Empty),
            Ok(_) => continue,
            Err(e) => return Err(MalformedErrorDocument::Xml(e.to_string())),
        }
    }
}

/// Extract the three report fields from an error document body.
pub fn parse_error_document(body: &[u8]) -> Result<ServiceErrorReport, MalformedErrorDocument> {
    let text = std::str::from_utf8(body).map_err(|_| MalformedErrorDocument::NotUtf8)?;
    if text.trim().is_empty() {
        return Err(MalformedErrorDocument::Empty);
    }
    check_root(text)?;

    let document: ErrorDocument =
        quick_xml::de::from_str(text).map_err(|e| MalformedErrorDocument::Xml(e.to_string()))?;

    Ok(ServiceErrorReport {
        user_message: required(document.usermsg, "usermsg")?,
        effect: required(document.effect, "effect")?,
        remediation: required(document.remediation, "remediation")?,
    })
}

/// Outcome of inspecting a non-200 response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClassification {
    /// The service explained the failure and the caller still has attempts left.
    RetryRecoverable(ServiceErrorReport),
    /// The service explained the failure and no attempts remain.
    Fatal(ServiceErrorReport),
    /// No structured explanation was available. `preserved` names the renamed
    /// `.error` artifact when the body was an in-progress download.
    ParseFailure { preserved: Option<PathBuf> },
}

impl ErrorClassification {
    /// Convert into the error to surface, or `None` when only a generic failure applies.
    pub fn into_error(self) -> Option<BootstrapError> {
        match self {
            ErrorClassification::RetryRecoverable(report) => Some(BootstrapError::Service {
                report,
                retryable: true,
            }),
            ErrorClassification::Fatal(report) => Some(BootstrapError::Service {
                report,
                retryable: false,
            }),
            ErrorClassification::ParseFailure { .. } => None,
        }
    }
}

/// Whether a fatal service error may end the process from within the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Allow,
    Suppress,
}

pub fn is_in_progress(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|p| p.ends_with(IN_PROGRESS_SUFFIX))
}

fn error_artifact_path(path: &Path) -> Option<PathBuf> {
    let text = path.to_str()?;
    let stem = text.strip_suffix(IN_PROGRESS_SUFFIX)?;
    Some(PathBuf::from(format!("{}{}", stem, ERROR_SUFFIX)))
}

/// Classify the error document stored at `path`.
///
/// A readable report with `retries_remaining > 0` is logged as a warning and returned as
/// [`ErrorClassification::RetryRecoverable`]. With no retries left it is fatal: with
/// [`Termination::Allow`] the process exits through `policy`, otherwise it is returned. An
/// in-progress download is removed once its report has been extracted.
///
/// When no report can be extracted, an in-progress download is renamed to its `.error`
/// artifact and its contents are written to the log for inspection.
pub fn classify_error_file(
    path: &Path,
    retries_remaining: u32,
    termination: Termination,
    policy: &FailurePolicy,
) -> ErrorClassification {
    let parsed = std::fs::read(path)
        .map_err(|e| MalformedErrorDocument::Xml(format!("unreadable: {}", e)))
        .and_then(|body| parse_error_document(&body));

    match parsed {
        Ok(report) => {
            if is_in_progress(path) {
                if let Err(e) = std::fs::remove_file(path) {
                    debug!(path = %path.display(), error = %e, "Failed to remove error download");
                }
            }
            classify_report(report, retries_remaining, termination, policy)
        }
        Err(reason) => {
            debug!(path = %path.display(), %reason, "No structured error in response");
            ErrorClassification::ParseFailure {
                preserved: preserve_unparsed(path),
            }
        }
    }
}

/// [`classify_error_file`] for a body held in memory. Nothing is renamed on parse failure.
pub fn classify_error_body(
    body: &[u8],
    retries_remaining: u32,
    termination: Termination,
    policy: &FailurePolicy,
) -> ErrorClassification {
    match parse_error_document(body) {
        Ok(report) => classify_report(report, retries_remaining, termination, policy),
        Err(reason) => {
            debug!(%reason, "No structured error in response");
            ErrorClassification::ParseFailure { preserved: None }
        }
    }
}

fn classify_report(
    report: ServiceErrorReport,
    retries_remaining: u32,
    termination: Termination,
    policy: &FailurePolicy,
) -> ErrorClassification {
    if retries_remaining > 0 {
        warn!("{}", report);
        return ErrorClassification::RetryRecoverable(report);
    }
    if termination == Termination::Allow {
        policy.fatal(BootstrapError::Service {
            report,
            retryable: false,
        });
    }
    ErrorClassification::Fatal(report)
}

fn preserve_unparsed(path: &Path) -> Option<PathBuf> {
    let target = error_artifact_path(path)?;
    if let Err(e) = std::fs::rename(path, &target) {
        warn!(
            from = %path.display(),
            to = %target.display(),
            error = %e,
            "Unable to rename unparseable error download"
        );
        return None;
    }

    warn!(
        "error processing failure with file:  {}, review the contents of the file.",
        target.display()
    );
    if let Ok(contents) = std::fs::read(&target) {
        for line in String::from_utf8_lossy(&contents).lines() {
            warn!("{}", line);
        }
    }
    Some(target)
}

use std::fmt;

use thiserror::Error;

use crate::models::ProfileField;

/// A single schema violation, addressed by a JSON pointer into the wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// JSON pointer of the offending value (`""` for the document root).
    pub path: String,
    pub reason: String,
}

impl FieldIssue {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Issue attached to the whole document rather than one field.
    pub fn root(reason: impl Into<String>) -> Self {
        Self::new("", reason)
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "<root>: {}", self.reason)
        } else {
            write!(f, "{}: {}", self.path, self.reason)
        }
    }
}

/// Coarse classification of a [`PipelineError`], convenient for matching in UI code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidRequestShape,
    ProfileIncomplete,
    BackendUnavailable,
    InvalidResponseShape,
    Store,
    Config,
    Internal,
}

/// Errors returned by the flow pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request failed local validation and was never sent.
    #[error("Invalid request for flow '{flow}': {}", format_issues(.issues))]
    InvalidRequestShape {
        flow: &'static str,
        issues: Vec<FieldIssue>,
    },

    /// Age, height or weight is missing or not positive. Never sent.
    #[error("Profile incomplete: missing or non-positive {}", format_fields(.missing))]
    ProfileIncomplete { missing: Vec<ProfileField> },

    /// Transport-level failure: timeout, unreachable backend or non-2xx status.
    #[error("Backend unavailable: {message}")]
    BackendUnavailable {
        message: String,
        status: Option<u16>,
        retry_after_secs: Option<u64>,
    },

    /// The backend replied but the reply violates the flow's output contract.
    #[error("Invalid model response for flow '{flow}': {}", format_issues(.issues))]
    InvalidResponseShape {
        flow: &'static str,
        issues: Vec<FieldIssue>,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema generation failed: {0}")]
    Schema(String),
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_fields(fields: &[ProfileField]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl PipelineError {
    /// Build a `BackendUnavailable` error from a non-success HTTP reply.
    ///
    /// For 429 replies the body is searched for a retry delay hint.
    pub fn backend_status(status: u16, body: &str) -> Self {
        let retry_after_secs = if status == 429 {
            parse_retry_delay_from_error(body)
        } else {
            None
        };
        Self::BackendUnavailable {
            message: format!(
                "backend returned status {status}: {}",
                truncate_for_display(body, 300)
            ),
            status: Some(status),
            retry_after_secs,
        }
    }

    /// Build a `BackendUnavailable` error for a failure with no HTTP status.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
            status: None,
            retry_after_secs: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequestShape { .. } => ErrorKind::InvalidRequestShape,
            Self::ProfileIncomplete { .. } => ErrorKind::ProfileIncomplete,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::InvalidResponseShape { .. } => ErrorKind::InvalidResponseShape,
            Self::Store(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Store,
            Self::Config(_) => ErrorKind::Config,
            Self::Schema(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only transport failures are; a shape violation is not retried unless the
    /// caller decides to resend.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Per-field reasons for the two shape failures, empty otherwise.
    pub fn field_issues(&self) -> &[FieldIssue] {
        match self {
            Self::InvalidRequestShape { issues, .. } | Self::InvalidResponseShape { issues, .. } => {
                issues
            }
            _ => &[],
        }
    }

    /// Get suggested retry delay in seconds, if the backend supplied one.
    pub fn retry_delay(&self) -> Option<u64> {
        match self {
            Self::BackendUnavailable {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Parse retry delay from a Gemini API error response body.
fn parse_retry_delay_from_error(description: &str) -> Option<u64> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(description) {
        let details = json
            .get("error")
            .and_then(|e| e.get("details"))
            .and_then(|d| d.as_array());
        if let Some(details) = details {
            for detail in details {
                if detail.get("@type").and_then(|t| t.as_str())
                    == Some("type.googleapis.com/google.rpc.RetryInfo")
                {
                    if let Some(delay) = detail.get("retryDelay").and_then(|d| d.as_str()) {
                        return parse_duration_string(delay);
                    }
                }
            }
        }
    }

    // Plain-text bodies: "Please retry in 57s.", "retry in 488.04ms"
    let lower = description.to_lowercase();
    let start = lower.find("retry in ")? + "retry in ".len();
    let remainder = &lower[start..];
    let end = remainder
        .find(|c: char| !c.is_numeric() && c != '.' && c != 'm' && c != 's')
        .unwrap_or(remainder.len());
    parse_duration_string(remainder[..end].trim_end_matches('.'))
}

/// Parse duration strings like "44s", "44.5s", "500ms" into whole seconds.
fn parse_duration_string(s: &str) -> Option<u64> {
    let s = s.trim();

    if let Some(ms_part) = s.strip_suffix("ms") {
        let ms = ms_part.parse::<f64>().ok()?;
        if ms <= 0.0 {
            return Some(0);
        }
        // sub-second hints round up to one second
        return Some(((ms / 1000.0).ceil() as u64).max(1));
    }

    let secs = s.strip_suffix('s')?.parse::<f64>().ok()?;
    Some(secs.ceil() as u64)
}

pub(crate) fn truncate_for_display(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}... [truncated, {} total chars]",
        &text[..cut],
        text.len()
    )
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for attaching store context to I/O and JSON errors.
pub trait ResultExt<T> {
    fn with_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<PipelineError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let base_err = e.into();
            PipelineError::Store(format!("{}: {}", context.into(), base_err))
        })
    }
}

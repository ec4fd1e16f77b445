use std::{fmt, path::Path};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Serialize, Serializer};
use tokio::fs;
use tracing::debug;

use crate::error::{FieldIssue, PipelineError, Result};

/// JSON pointer of the photo field in the identification request.
pub const PHOTO_FIELD: &str = "/photoDataUri";

/// A photo embedded as `data:<mimetype>;base64,<payload>`.
#[derive(Clone, PartialEq, Eq)]
pub struct PhotoDataUri {
    uri: String,
    mime_end: usize,
    payload_start: usize,
}

impl PhotoDataUri {
    /// Parse and check a data URI, including that its payload decodes.
    pub fn parse(uri: impl Into<String>) -> std::result::Result<Self, FieldIssue> {
        let uri = uri.into();
        let (mime_end, payload_start) =
            check_data_uri(&uri).map_err(|reason| FieldIssue::new(PHOTO_FIELD, reason))?;
        Ok(Self {
            uri,
            mime_end,
            payload_start,
        })
    }

    /// Encode raw image bytes with an explicit MIME type.
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> std::result::Result<Self, FieldIssue> {
        Self::parse(format!("data:{mime_type};base64,{}", BASE64.encode(bytes)))
    }

    /// Read a photo from disk, guessing its MIME type from the extension.
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let bytes = fs::read(path_ref).await?;
        let mime = mime_guess::from_path(path_ref)
            .first_or_octet_stream()
            .to_string();
        debug!(path = %path_ref.display(), mime = %mime, bytes = bytes.len(), "Loaded photo");

        Self::from_bytes(&bytes, &mime).map_err(|issue| PipelineError::InvalidRequestShape {
            flow: crate::flows::identify::FLOW_NAME,
            issues: vec![issue],
        })
    }

    pub fn mime_type(&self) -> &str {
        &self.uri["data:".len()..self.mime_end]
    }

    /// The base64 payload, still encoded.
    pub fn payload(&self) -> &str {
        &self.uri[self.payload_start..]
    }

    pub fn decode(&self) -> Vec<u8> {
        // checked in `parse`
        BASE64.decode(self.payload()).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.uri
    }

    pub fn into_string(self) -> String {
        self.uri
    }
}

/// Check the `data:<type>/<subtype>;base64,<payload>` layout.
///
/// Returns the end of the MIME type and the start of the payload.
pub(crate) fn check_data_uri(uri: &str) -> std::result::Result<(usize, usize), String> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| "must start with 'data:'".to_string())?;
    let marker = rest
        .find(";base64,")
        .ok_or_else(|| "must contain ';base64,' after the MIME type".to_string())?;

    let mime = &rest[..marker];
    let valid_token = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-'))
    };
    match mime.split_once('/') {
        Some((kind, subtype)) if valid_token(kind) && valid_token(subtype) => {}
        _ => return Err(format!("'{mime}' is not a valid MIME type")),
    }

    let payload_start = "data:".len() + marker + ";base64,".len();
    let payload = &uri[payload_start..];
    if payload.is_empty() {
        return Err("payload is empty".to_string());
    }
    BASE64
        .decode(payload)
        .map_err(|e| format!("payload is not valid base64: {e}"))?;

    Ok(("data:".len() + marker, payload_start))
}

impl fmt::Debug for PhotoDataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoDataUri")
            .field("mime_type", &self.mime_type())
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

impl fmt::Display for PhotoDataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl Serialize for PhotoDataUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.uri)
    }
}

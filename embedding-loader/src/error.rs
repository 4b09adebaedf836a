use thiserror::Error;

use crate::pipeline::RunSummary;

/// Longest slice of a malformed line that ends up in logs.
const RAW_PREVIEW_LEN: usize = 200;

/// Errors raised while turning an object's chunk stream into records.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord {
        line: usize,
        raw: String,
        reason: String,
    },
    #[error("failed to read object stream: {0}")]
    Read(#[from] std::io::Error),
}

impl DecodeError {
    /// The offending line, cut down to something that fits in a log line.
    pub fn raw_preview(&self) -> Option<&str> {
        match self {
            DecodeError::MalformedRecord { raw, .. } => {
                let mut end = raw.len().min(RAW_PREVIEW_LEN);
                while !raw.is_char_boundary(end) {
                    end -= 1;
                }
                Some(&raw[..end])
            }
            DecodeError::Read(_) => None,
        }
    }
}

/// Errors related to listing and opening objects in a collection.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to list objects under {location}: {source}")]
    List {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("failed to open object {key}: {source}")]
    Open {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by an upload sink for a whole request.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("request to search service failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("search service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("search service returned {status} with an unreadable body: {reason}")]
    UnreadableResponse { status: u16, reason: String },
    #[error("failed to serialize documents: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write documents to {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid sink configuration: {0}")]
    Config(String),
}

impl UploadError {
    /// Whether resending the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Transport(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            UploadError::Status { status, .. } => is_retryable_status(*status),
            // mergeOrUpload is idempotent
            UploadError::UnreadableResponse { .. } => true,
            UploadError::Serialize(_) | UploadError::Io { .. } | UploadError::Config(_) => false,
        }
    }
}

/// HTTP statuses worth retrying for a whole request.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// A combined record whose vectors do not have the required length. Not a hard error: the
/// record is dropped and counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field} has {actual} dimensions, expected {expected}")]
pub struct DimensionMismatch {
    pub field: &'static str,
    pub expected: usize,
    pub actual: usize,
}

/// Failures that abort a whole run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("citation collection is unreachable: {0}")]
    CitationSourceUnavailable(#[source] SourceError),
    #[error("data collection is unreachable: {0}")]
    DataSourceUnavailable(#[source] SourceError),
    #[error("upload sink is unavailable after {failed_batches} failed batches, last error: {last_error}")]
    SinkUnavailable {
        failed_batches: usize,
        last_error: String,
        /// What the run got done before giving up.
        summary: Box<RunSummary>,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_preview_respects_char_boundaries() {
        let raw = "é".repeat(RAW_PREVIEW_LEN);
        let err = DecodeError::MalformedRecord {
            line: 3,
            raw,
            reason: "expected value".to_string(),
        };

        let preview = err.raw_preview().unwrap();
        assert!(preview.len() <= RAW_PREVIEW_LEN);
        assert!(preview.chars().all(|c| c == 'é'));
        assert_eq!(
            err.to_string(),
            "malformed record at line 3: expected value"
        );
    }

    #[test]
    fn test_status_retryability() {
        assert!(UploadError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(UploadError::Status {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!UploadError::Status {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!UploadError::Config("missing".to_string()).is_retryable());
    }
}

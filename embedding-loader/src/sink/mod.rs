use async_trait::async_trait;

use crate::{error::UploadError, record::CombinedRecord};

pub mod file;
pub mod search;

/// A document the sink did not persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub id: String,
    pub reason: String,
    /// Whether sending the document again could succeed.
    pub retryable: bool,
}

/// Result of a batch the sink accepted. Documents that aren't listed in `failures` were persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub failures: Vec<DocumentFailure>,
}

impl UploadReport {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Destination of combined records. An `Err` means the whole batch was rejected; partial
/// failures are reported per document in the `UploadReport`.
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn upload(&self, batch: &[CombinedRecord]) -> Result<UploadReport, UploadError>;
}

pub struct NoOpSink;

#[async_trait]
impl UploadSink for NoOpSink {
    async fn upload(&self, _batch: &[CombinedRecord]) -> Result<UploadReport, UploadError> {
        Ok(UploadReport::success())
    }
}

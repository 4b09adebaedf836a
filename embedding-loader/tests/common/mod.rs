//! Shared fixtures for the load pipeline tests.
#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use embedding_loader::{
    backoff::BackoffPolicy,
    error::UploadError,
    record::CombinedRecord,
    sink::{UploadReport, UploadSink},
    upload::Uploader,
};
use serde_json::json;

/// Keeps every batch it receives and fails the first `fail_first` calls with a 503.
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<CombinedRecord>>>,
    calls: AtomicUsize,
    fail_first: usize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            ..Default::default()
        })
    }

    pub fn batches(&self) -> Vec<Vec<CombinedRecord>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.batches()
            .into_iter()
            .flatten()
            .map(|record| record.id)
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadSink for RecordingSink {
    async fn upload(&self, batch: &[CombinedRecord]) -> Result<UploadReport, UploadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(UploadError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(UploadReport::success())
    }
}

pub fn uploader(sink: Arc<RecordingSink>, max_attempts: u32) -> Uploader {
    Uploader::new(sink, BackoffPolicy::immediate(), max_attempts)
}

pub fn vector(dim: usize, value: f64) -> Vec<f64> {
    vec![value; dim]
}

pub fn data_line(id: &str, filename: &str, dim: usize) -> String {
    let line = json!({
        "id": id,
        "filename": filename,
        "text": format!("text of {id}"),
        "embedding": vector(dim, 0.1),
    });
    format!("{line}\n")
}

pub fn citation_line(filename: &str, name: &str, dim: usize) -> String {
    let line = json!({
        "filename": filename,
        "DocumentName": name,
        "DocumentURL": format!("https://docs.example.com/{name}"),
        "embedding": vector(dim, 0.2),
    });
    format!("{line}\n")
}

/// `count` data lines for `filename`, with ids `{prefix}_{n}`.
pub fn data_object(prefix: &str, filename: &str, count: usize, dim: usize) -> String {
    (0..count)
        .map(|n| data_line(&format!("{prefix}_{n}"), filename, dim))
        .collect()
}

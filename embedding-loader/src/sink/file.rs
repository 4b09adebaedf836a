use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, sync::Mutex};
use tracing::info;

use super::{UploadReport, UploadSink};
use crate::{error::UploadError, record::CombinedRecord};

/// Appends combined records to a local file as JSON lines.
pub struct FileSink {
    pub path: String,
    write_lock: Mutex<()>,
}

impl FileSink {
    pub async fn new(path: String, cleanup: bool) -> Result<Self, UploadError> {
        info!("Creating file sink at {}", path);
        if cleanup {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(UploadError::Io { path, source: e });
                }
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    fn io_error(&self, source: std::io::Error) -> UploadError {
        UploadError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl UploadSink for FileSink {
    async fn upload(&self, batch: &[CombinedRecord]) -> Result<UploadReport, UploadError> {
        let mut data = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut data, record)?;
            data.push(b'\n');
        }

        // Batches from concurrent objects must not interleave
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&data).await.map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        Ok(UploadReport::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str) -> CombinedRecord {
        CombinedRecord {
            id: id.to_string(),
            text: "text".to_string(),
            data_embedding: vec![1.0, 2.0],
            document_name: "Doc".to_string(),
            document_url: "http://doc".to_string(),
            citation_embedding: vec![3.0, 4.0],
        }
    }

    #[tokio::test]
    async fn test_appends_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.jsonl");
        std::fs::write(&path, "stale\n").unwrap();

        let sink = FileSink::new(path.to_str().unwrap().to_string(), true)
            .await
            .unwrap();
        let report = sink.upload(&[record("a"), record("b")]).await.unwrap();
        assert!(report.is_success());
        sink.upload(&[record("c")]).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let ids: Vec<String> = written
            .lines()
            .map(|l| serde_json::from_str::<CombinedRecord>(l).unwrap().id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_cleanup_of_missing_file_is_fine() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("never-written.jsonl");
        let res = FileSink::new(path.to_str().unwrap().to_string(), true).await;
        assert!(res.is_ok());
    }
}

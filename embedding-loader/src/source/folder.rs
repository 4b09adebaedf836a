use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::warn;

use super::{ChunkStream, ObjectSource};
use crate::error::SourceError;

/// A local directory tree treated as a collection. Keys are `/`-separated paths relative to the
/// root, listed in sorted order.
pub struct FolderSource {
    pub path: PathBuf,
    chunk_size: usize,
}

impl FolderSource {
    pub async fn new(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, SourceError> {
        let location = path.as_ref().display().to_string();
        let path = tokio::fs::canonicalize(path.as_ref())
            .await
            .map_err(|source| SourceError::List { location, source })?;
        Ok(Self {
            path,
            chunk_size: chunk_size.max(1),
        })
    }

    // Keys never escape the root
    fn resolve(&self, key: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(key);
        let is_plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !is_plain {
            return Err(SourceError::NotFound(key.to_string()));
        }
        Ok(self.path.join(relative))
    }

    fn list_error(&self, source: std::io::Error) -> SourceError {
        SourceError::List {
            location: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ObjectSource for FolderSource {
    async fn keys(&self) -> Result<Vec<String>, SourceError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| self.list_error(e))?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| self.list_error(e))? {
                let file_type = entry.file_type().await.map_err(|e| self.list_error(e))?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let Ok(relative) = path.strip_prefix(&self.path) else {
                        continue;
                    };
                    // Keys must round-trip through `open`
                    let Some(parts) = relative
                        .components()
                        .map(|c| c.as_os_str().to_str())
                        .collect::<Option<Vec<_>>>()
                    else {
                        warn!(path = ?path, "Skipping object with a non UTF-8 name");
                        continue;
                    };
                    keys.push(parts.join("/"));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn open(&self, key: &str) -> Result<ChunkStream, SourceError> {
        let path = self.resolve(key)?;
        let file = tokio::fs::File::open(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound(key.to_string())
            } else {
                SourceError::Open {
                    key: key.to_string(),
                    source,
                }
            }
        })?;
        Ok(ReaderStream::with_capacity(file, self.chunk_size).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    async fn setup_test_folder() -> (TempDir, FolderSource) {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("b.jsonl"), b"hello world").unwrap();
        fs::write(temp_dir.path().join("a.json"), b"another file").unwrap();
        fs::create_dir(temp_dir.path().join("nested")).unwrap();
        fs::write(temp_dir.path().join("nested").join("c.jsonl"), b"deep").unwrap();

        let source = FolderSource::new(temp_dir.path(), 4).await.unwrap();

        (temp_dir, source)
    }

    #[tokio::test]
    async fn test_keys_are_sorted_and_recursive() {
        let (_temp_dir, source) = setup_test_folder().await;
        let keys = source.keys().await.unwrap();
        assert_eq!(keys, vec!["a.json", "b.jsonl", "nested/c.jsonl"]);

        let keys = source.keys_with_suffix(".jsonl").await.unwrap();
        assert_eq!(keys, vec!["b.jsonl", "nested/c.jsonl"]);
    }

    #[tokio::test]
    async fn test_open_streams_in_chunks() {
        let (_temp_dir, source) = setup_test_folder().await;
        let chunks: Vec<_> = source.open("b.jsonl").await.unwrap().collect().await;

        assert!(chunks.len() >= 3);
        let joined: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(joined, b"hello world");
    }

    #[tokio::test]
    async fn test_invalid_keys() {
        let (_temp_dir, source) = setup_test_folder().await;
        assert!(matches!(
            source.open("missing.jsonl").await,
            Err(SourceError::NotFound(_))
        ));
        assert!(matches!(
            source.open("../b.jsonl").await,
            Err(SourceError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_names_are_skipped() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let (temp_dir, source) = setup_test_folder().await;
        let name = OsStr::from_bytes(b"bad\xff.jsonl");
        if fs::write(temp_dir.path().join(name), b"{}").is_err() {
            // Some filesystems refuse names that are not UTF-8
            return;
        }

        let keys = source.keys().await.unwrap();
        assert_eq!(keys, vec!["a.json", "b.jsonl", "nested/c.jsonl"]);
        for key in &keys {
            assert!(source.open(key).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_missing_root() {
        let res = FolderSource::new("/definitely/not/a/real/path", 4).await;
        assert!(matches!(res, Err(SourceError::List { .. })));
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use super::{ChunkStream, ObjectSource};
use crate::error::SourceError;

/// Objects held in memory, listed in insertion order and streamed in fixed-size chunks.
pub struct MemorySource {
    objects: Vec<(String, Bytes)>,
    chunk_size: usize,
}

impl MemorySource {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            objects: Vec::new(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn with_object(mut self, key: impl Into<String>, content: impl Into<Bytes>) -> Self {
        self.insert(key, content);
        self
    }

    /// Adds an object, replacing the content of an existing key in place.
    pub fn insert(&mut self, key: impl Into<String>, content: impl Into<Bytes>) {
        let key = key.into();
        let content = content.into();
        match self.objects.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = content,
            None => self.objects.push((key, content)),
        }
    }
}

#[async_trait]
impl ObjectSource for MemorySource {
    async fn keys(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.objects.iter().map(|(k, _)| k.clone()).collect())
    }

    async fn open(&self, key: &str) -> Result<ChunkStream, SourceError> {
        let content = self
            .objects
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, c)| c.clone())
            .ok_or_else(|| SourceError::NotFound(key.to_string()))?;

        let mut chunks = Vec::with_capacity(content.len() / self.chunk_size + 1);
        let mut offset = 0;
        while offset < content.len() {
            let end = (offset + self.chunk_size).min(content.len());
            chunks.push(Ok(content.slice(offset..end)));
            offset = end;
        }

        Ok(futures::stream::iter(chunks).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunks_reassemble_to_content() {
        let source = MemorySource::new(4).with_object("a.jsonl", "0123456789");
        let chunks: Vec<_> = source.open("a.jsonl").await.unwrap().collect().await;

        assert_eq!(chunks.len(), 3);
        let joined: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(joined, b"0123456789");
    }

    #[tokio::test]
    async fn test_listing_order_and_suffix_filter() {
        let mut source = MemorySource::new(16)
            .with_object("b.jsonl", "")
            .with_object("a.txt", "")
            .with_object("a.jsonl", "");
        source.insert("b.jsonl", "{}");

        assert_eq!(
            source.keys().await.unwrap(),
            vec!["b.jsonl", "a.txt", "a.jsonl"]
        );
        assert_eq!(
            source.keys_with_suffix(".jsonl").await.unwrap(),
            vec!["b.jsonl", "a.jsonl"]
        );
    }

    #[tokio::test]
    async fn test_missing_key() {
        let source = MemorySource::new(16);
        assert!(matches!(
            source.open("nope").await,
            Err(SourceError::NotFound(_))
        ));
    }
}

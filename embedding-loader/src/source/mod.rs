use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::SourceError;

pub mod folder;
pub mod memory;

/// Chunks of one object, in order. Chunk boundaries carry no meaning.
pub type ChunkStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// A read-only collection of named objects, e.g. a blob container.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Object names, in the collection's listing order.
    async fn keys(&self) -> Result<Vec<String>, SourceError>;

    async fn open(&self, key: &str) -> Result<ChunkStream, SourceError>;

    async fn keys_with_suffix(&self, suffix: &str) -> Result<Vec<String>, SourceError> {
        let keys = self.keys().await?;
        Ok(keys.into_iter().filter(|k| k.ends_with(suffix)).collect())
    }
}

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::{
    decode::JsonLines,
    error::SourceError,
    metrics_consts::{CITATION_OBJECTS_CORRUPTED, CITATION_RECORDS_LOADED},
    record::CitationRecord,
    source::ObjectSource,
};

/// Lookup of citation metadata by filename. The in-memory [`CitationIndex`] is the only
/// implementation here, but the join only depends on this trait, so a larger citation corpus can
/// live in an external key-value store.
pub trait CitationLookup: Send + Sync {
    fn lookup(&self, filename: &str) -> Option<&CitationRecord>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CitationIndexStats {
    pub objects_read: usize,
    pub objects_corrupted: usize,
    pub records_read: usize,
    pub duplicate_filenames: usize,
}

/// Every citation record of a collection, keyed by filename. Read-only once built.
#[derive(Debug, Default)]
pub struct CitationIndex {
    entries: HashMap<String, CitationRecord>,
    stats: CitationIndexStats,
}

impl CitationIndex {
    /// Reads every object whose name ends with `suffix`. Only a failure to list the collection is
    /// an error; an object that can't be opened or contains a malformed line is counted as
    /// corrupted, and the records read from it before the bad line are kept.
    pub async fn build(source: &dyn ObjectSource, suffix: &str) -> Result<Self, SourceError> {
        let keys = source.keys_with_suffix(suffix).await?;
        info!("Building citation index from {} objects", keys.len());

        let mut index = Self::default();
        for key in keys {
            index.ingest_object(source, &key).await;
        }

        info!(
            citations = index.len(),
            objects_read = index.stats.objects_read,
            objects_corrupted = index.stats.objects_corrupted,
            duplicate_filenames = index.stats.duplicate_filenames,
            "Citation index built"
        );
        Ok(index)
    }

    async fn ingest_object(&mut self, source: &dyn ObjectSource, key: &str) {
        let chunks = match source.open(key).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(object = %key, error = %e, "Failed to open citation object, skipping it");
                self.mark_corrupted();
                return;
            }
        };

        let mut lines = JsonLines::<CitationRecord>::new(chunks);
        loop {
            match lines.next_record().await {
                Ok(Some(record)) => self.insert(record),
                Ok(None) => {
                    self.stats.objects_read += 1;
                    return;
                }
                Err(e) => {
                    warn!(
                        object = %key,
                        error = %e,
                        raw = e.raw_preview().unwrap_or_default(),
                        "Corrupted citation object, ignoring the rest of it"
                    );
                    self.mark_corrupted();
                    return;
                }
            }
        }
    }

    /// Later records win over earlier ones with the same filename.
    pub fn insert(&mut self, record: CitationRecord) {
        self.stats.records_read += 1;
        metrics::counter!(CITATION_RECORDS_LOADED).increment(1);
        if let Some(previous) = self.entries.insert(record.filename.clone(), record) {
            self.stats.duplicate_filenames += 1;
            debug!(filename = %previous.filename, "Duplicate citation filename, keeping the later record");
        }
    }

    fn mark_corrupted(&mut self) {
        self.stats.objects_corrupted += 1;
        metrics::counter!(CITATION_OBJECTS_CORRUPTED).increment(1);
    }

    pub fn get(&self, filename: &str) -> Option<&CitationRecord> {
        self.entries.get(filename)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CitationIndexStats {
        self.stats
    }
}

impl CitationLookup for CitationIndex {
    fn lookup(&self, filename: &str) -> Option<&CitationRecord> {
        self.get(filename)
    }
}

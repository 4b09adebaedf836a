use std::sync::{
    atomic::{AtomicUsize, Ordering},
    OnceLock,
};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    batch::Batcher,
    citation::{CitationIndex, CitationIndexStats, CitationLookup},
    decode::JsonLines,
    error::RunError,
    metrics_consts::{
        DATA_OBJECTS_CORRUPTED, DATA_OBJECTS_PROCESSED, RECORDS_CONSIDERED, RECORDS_SKIPPED,
    },
    record::{CombinedRecord, RawEmbeddingRecord},
    source::ObjectSource,
    upload::{BatchOutcome, Uploader},
};

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub expected_dim: usize,
    pub citation_suffix: String,
    pub data_suffix: String,
    /// Index records with no citation instead of dropping them on the dimension check.
    pub index_unmatched: bool,
    /// Data objects processed at once. Above 1, every object gets its own batches.
    pub object_concurrency: usize,
    /// Batches in a row that may fail without a single indexed document before the run aborts.
    pub max_consecutive_failed_batches: usize,
    /// Once cancelled, no further data objects are opened. Batches already read are still sent.
    pub shutdown: CancellationToken,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            expected_dim: 1536,
            citation_suffix: ".json".to_string(),
            data_suffix: ".jsonl".to_string(),
            index_unmatched: false,
            object_concurrency: 1,
            max_consecutive_failed_batches: 5,
            shutdown: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub objects_processed: usize,
    pub objects_corrupted: usize,
    pub records_considered: usize,
    pub records_skipped: usize,
    pub records_indexed: usize,
    pub records_failed: usize,
    pub batches_uploaded: usize,
    pub batches_failed: usize,
    pub last_upload_error: Option<String>,
    pub citations: CitationIndexStats,
}

impl RunSummary {
    /// Adds the data-side counters of `other`. Citation stats are per run, not per object.
    pub fn merge(&mut self, other: RunSummary) {
        self.objects_processed += other.objects_processed;
        self.objects_corrupted += other.objects_corrupted;
        self.records_considered += other.records_considered;
        self.records_skipped += other.records_skipped;
        self.records_indexed += other.records_indexed;
        self.records_failed += other.records_failed;
        self.batches_uploaded += other.batches_uploaded;
        self.batches_failed += other.batches_failed;
        if other.last_upload_error.is_some() {
            self.last_upload_error = other.last_upload_error;
        }
    }

    pub fn log(&self) {
        info!(
            objects_processed = self.objects_processed,
            objects_corrupted = self.objects_corrupted,
            records_considered = self.records_considered,
            records_skipped = self.records_skipped,
            records_indexed = self.records_indexed,
            records_failed = self.records_failed,
            batches_uploaded = self.batches_uploaded,
            batches_failed = self.batches_failed,
            citations_read = self.citations.records_read,
            citation_objects_corrupted = self.citations.objects_corrupted,
            duplicate_citation_filenames = self.citations.duplicate_filenames,
            "Load finished"
        );
    }
}

/// Why a run gave up on the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SinkTrip {
    failed_batches: usize,
    last_error: String,
}

/// Tracks batches that failed without indexing anything, across every object being loaded. Once
/// tripped it stays tripped: loaders stop reading, uploads already in flight still complete.
struct SinkHealth {
    consecutive_failures: AtomicUsize,
    limit: usize,
    tripped: OnceLock<SinkTrip>,
}

impl SinkHealth {
    fn new(limit: usize) -> Self {
        Self {
            consecutive_failures: AtomicUsize::new(0),
            limit: limit.max(1),
            tripped: OnceLock::new(),
        }
    }

    fn observe(&self, outcome: &BatchOutcome) {
        if outcome.indexed > 0 || outcome.failed == 0 {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return;
        }

        let failed_batches = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failed_batches >= self.limit {
            let trip = self.tripped.get_or_init(|| SinkTrip {
                failed_batches,
                last_error: outcome.first_failure.clone().unwrap_or_default(),
            });
            error!(
                failed_batches = trip.failed_batches,
                "Sink is unavailable, not reading any further records"
            );
        }
    }

    fn is_tripped(&self) -> bool {
        self.tripped.get().is_some()
    }

    fn trip(&self) -> Option<SinkTrip> {
        self.tripped.get().cloned()
    }
}

/// Streams data objects through the join, the dimension check and the batcher.
struct Loader<'a> {
    lookup: &'a dyn CitationLookup,
    uploader: &'a Uploader,
    options: &'a LoadOptions,
    health: &'a SinkHealth,
    batcher: Batcher<CombinedRecord>,
    summary: RunSummary,
}

impl<'a> Loader<'a> {
    fn new(
        lookup: &'a dyn CitationLookup,
        uploader: &'a Uploader,
        options: &'a LoadOptions,
        health: &'a SinkHealth,
    ) -> Self {
        Self {
            lookup,
            uploader,
            options,
            health,
            batcher: Batcher::new(options.batch_size),
            summary: RunSummary::default(),
        }
    }

    async fn load_object(&mut self, source: &dyn ObjectSource, key: &str) {
        let chunks = match source.open(key).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(object = %key, error = %e, "Failed to open data object, skipping it");
                self.mark_corrupted();
                return;
            }
        };

        debug!(object = %key, "Loading data object");
        let mut lines = JsonLines::<RawEmbeddingRecord>::new(chunks);
        let mut ordinal = 0;
        loop {
            if self.health.is_tripped() {
                debug!(object = %key, records_read = ordinal, "Abandoning data object");
                return;
            }
            match lines.next_record().await {
                Ok(Some(raw)) => {
                    let raw = raw.with_default_id(key, ordinal);
                    ordinal += 1;
                    self.admit(raw).await;
                }
                Ok(None) => {
                    self.summary.objects_processed += 1;
                    metrics::counter!(DATA_OBJECTS_PROCESSED).increment(1);
                    return;
                }
                Err(e) => {
                    warn!(
                        object = %key,
                        error = %e,
                        raw = e.raw_preview().unwrap_or_default(),
                        records_kept = ordinal,
                        "Corrupted data object, moving on to the next one"
                    );
                    self.mark_corrupted();
                    return;
                }
            }
        }
    }

    fn mark_corrupted(&mut self) {
        self.summary.objects_corrupted += 1;
        metrics::counter!(DATA_OBJECTS_CORRUPTED).increment(1);
    }

    async fn admit(&mut self, raw: RawEmbeddingRecord) {
        self.summary.records_considered += 1;
        metrics::counter!(RECORDS_CONSIDERED).increment(1);

        let citation = self.lookup.lookup(&raw.filename);
        let check_citation = citation.is_some() || !self.options.index_unmatched;
        let record = CombinedRecord::join(raw, citation);

        if let Err(mismatch) = record.check_dimensions(self.options.expected_dim, check_citation) {
            debug!(id = %record.id, reason = %mismatch, "Skipping record");
            self.summary.records_skipped += 1;
            metrics::counter!(RECORDS_SKIPPED).increment(1);
            return;
        }

        if let Some(batch) = self.batcher.push(record) {
            self.flush(batch).await;
        }
    }

    async fn flush(&mut self, batch: Vec<CombinedRecord>) {
        let batch_size = batch.len();
        let outcome = self.uploader.deliver(batch).await;

        self.summary.records_indexed += outcome.indexed;
        self.summary.records_failed += outcome.failed;
        if outcome.is_success() {
            self.summary.batches_uploaded += 1;
            debug!(batch_size, "Uploaded batch");
        } else {
            self.summary.batches_failed += 1;
            error!(
                batch_size,
                indexed = outcome.indexed,
                failed = outcome.failed,
                first_failure = outcome.first_failure.as_deref().unwrap_or_default(),
                "Failed to upload batch"
            );
            self.summary.last_upload_error = outcome.first_failure.clone();
        }
        self.health.observe(&outcome);
    }

    /// Sends the partial last batch, unless the sink has already been given up on.
    async fn finish(mut self) -> RunSummary {
        let capacity = self.batcher.capacity();
        let remainder = std::mem::replace(&mut self.batcher, Batcher::new(capacity)).finish();
        if let Some(batch) = remainder {
            if self.health.is_tripped() {
                debug!(
                    documents = batch.len(),
                    "Dropping final batch, sink is unavailable"
                );
            } else {
                self.flush(batch).await;
            }
        }
        self.summary
    }
}

/// Builds the citation index from `citation_source`, then joins and uploads every data object.
pub async fn load(
    citation_source: &dyn ObjectSource,
    data_source: &dyn ObjectSource,
    uploader: &Uploader,
    options: &LoadOptions,
) -> Result<RunSummary, RunError> {
    let index = CitationIndex::build(citation_source, &options.citation_suffix)
        .await
        .map_err(RunError::CitationSourceUnavailable)?;

    let (mut summary, trip) = stream_data(&index, data_source, uploader, options).await?;
    summary.citations = index.stats();
    conclude(summary, trip)
}

/// Joins and uploads every data object against an existing citation lookup.
pub async fn run(
    lookup: &dyn CitationLookup,
    data_source: &dyn ObjectSource,
    uploader: &Uploader,
    options: &LoadOptions,
) -> Result<RunSummary, RunError> {
    let (summary, trip) = stream_data(lookup, data_source, uploader, options).await?;
    conclude(summary, trip)
}

async fn stream_data(
    lookup: &dyn CitationLookup,
    data_source: &dyn ObjectSource,
    uploader: &Uploader,
    options: &LoadOptions,
) -> Result<(RunSummary, Option<SinkTrip>), RunError> {
    let keys = data_source
        .keys_with_suffix(&options.data_suffix)
        .await
        .map_err(RunError::DataSourceUnavailable)?;
    info!(objects = keys.len(), "Streaming data objects");

    let health = SinkHealth::new(options.max_consecutive_failed_batches);

    let summary = if options.object_concurrency <= 1 {
        let mut loader = Loader::new(lookup, uploader, options, &health);
        for key in &keys {
            if options.shutdown.is_cancelled() {
                warn!("Shutdown requested, not opening further data objects");
                break;
            }
            if health.is_tripped() {
                break;
            }
            loader.load_object(data_source, key).await;
        }
        loader.finish().await
    } else {
        // Every started object runs to completion or to its next check of the sink health, so
        // an upload in flight is never dropped halfway.
        let health = &health;
        futures::stream::iter(keys.iter())
            .map(|key| load_one(lookup, data_source, uploader, options, health, key))
            .buffer_unordered(options.object_concurrency)
            .fold(RunSummary::default(), |mut total, summary| async move {
                total.merge(summary);
                total
            })
            .await
    };

    Ok((summary, health.trip()))
}

/// Loads a single object with its own batches.
async fn load_one(
    lookup: &dyn CitationLookup,
    data_source: &dyn ObjectSource,
    uploader: &Uploader,
    options: &LoadOptions,
    health: &SinkHealth,
    key: &str,
) -> RunSummary {
    if options.shutdown.is_cancelled() {
        debug!(object = %key, "Shutdown requested, skipping data object");
        return RunSummary::default();
    }
    if health.is_tripped() {
        debug!(object = %key, "Sink is unavailable, skipping data object");
        return RunSummary::default();
    }
    let mut loader = Loader::new(lookup, uploader, options, health);
    loader.load_object(data_source, key).await;
    loader.finish().await
}

/// Logs the summary, then turns an unusable sink into the run's error. The summary goes along
/// with the error so callers still see what was loaded.
fn conclude(summary: RunSummary, trip: Option<SinkTrip>) -> Result<RunSummary, RunError> {
    summary.log();

    let trip = trip.or_else(|| {
        (summary.batches_failed > 0 && summary.records_indexed == 0).then(|| SinkTrip {
            failed_batches: summary.batches_failed,
            last_error: summary.last_upload_error.clone().unwrap_or_default(),
        })
    });

    match trip {
        Some(SinkTrip {
            failed_batches,
            last_error,
        }) => Err(RunError::SinkUnavailable {
            failed_batches,
            last_error,
            summary: Box::new(summary),
        }),
        None => Ok(summary),
    }
}

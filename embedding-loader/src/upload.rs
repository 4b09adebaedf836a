use std::{collections::HashMap, sync::Arc, time::Instant};

use tracing::{debug, warn};

use crate::{
    backoff::BackoffPolicy,
    metrics_consts::{
        BATCHES_FAILED, BATCHES_UPLOADED, RECORDS_FAILED, RECORDS_INDEXED, UPLOAD_DURATION,
        UPLOAD_RETRIES,
    },
    record::CombinedRecord,
    sink::UploadSink,
};

/// What became of one batch after all delivery attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub indexed: usize,
    pub failed: usize,
    /// The first failure seen, kept for reporting.
    pub first_failure: Option<String>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Delivers batches to a sink, retrying transient failures with exponential backoff.
pub struct Uploader {
    sink: Arc<dyn UploadSink>,
    policy: BackoffPolicy,
    max_attempts: u32,
}

impl Uploader {
    pub fn new(sink: Arc<dyn UploadSink>, policy: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            sink,
            policy,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Sends `batch`, then resends only the documents that failed with a retryable error, until
    /// they all land or attempts run out. Never returns an error: whatever did not make it is
    /// counted in the outcome.
    pub async fn deliver(&self, batch: Vec<CombinedRecord>) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            attempted: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return outcome;
        }

        let start = Instant::now();
        let mut pending = batch;
        let mut attempt = 0;
        loop {
            attempt += 1;
            // Positions in `pending` to send again
            let mut retry = Vec::new();

            match self.sink.upload(&pending).await {
                Ok(report) => {
                    // Each failure entry accounts for one document, so ids repeated within a
                    // batch are matched to distinct positions in order.
                    let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
                    for (position, record) in pending.iter().enumerate().rev() {
                        positions.entry(record.id.as_str()).or_default().push(position);
                    }

                    let mut claimed = 0;
                    for failure in &report.failures {
                        note_failure(&mut outcome, &failure.id, &failure.reason);
                        let Some(position) =
                            positions.get_mut(failure.id.as_str()).and_then(Vec::pop)
                        else {
                            warn!(id = %failure.id, "Sink reported a failure for a document it was not sent");
                            continue;
                        };
                        claimed += 1;
                        if failure.retryable {
                            retry.push(position);
                        } else {
                            outcome.failed += 1;
                        }
                    }
                    outcome.indexed += pending.len() - claimed;
                }
                Err(e) => {
                    let reason = e.to_string();
                    if outcome.first_failure.is_none() {
                        outcome.first_failure = Some(reason.clone());
                    }
                    if e.is_retryable() {
                        retry.extend(0..pending.len());
                    } else {
                        warn!(documents = pending.len(), error = %reason, "Batch rejected by sink");
                        outcome.failed += pending.len();
                    }
                }
            }

            let mut keep = vec![false; pending.len()];
            for position in retry {
                keep[position] = true;
            }
            let mut keep = keep.into_iter();
            pending.retain(|_| keep.next().unwrap_or(false));
            if pending.is_empty() {
                break;
            }

            if attempt >= self.max_attempts {
                warn!(
                    documents = pending.len(),
                    attempts = attempt,
                    "Giving up on documents after exhausting upload attempts"
                );
                outcome.failed += pending.len();
                break;
            }

            let delay = self.policy.next_delay(attempt - 1);
            debug!(
                documents = pending.len(),
                attempt,
                delay_ms = delay.as_millis(),
                "Retrying failed documents"
            );
            metrics::counter!(UPLOAD_RETRIES).increment(1);
            tokio::time::sleep(delay).await;
        }

        metrics::histogram!(UPLOAD_DURATION).record(start.elapsed().as_secs_f64());
        metrics::counter!(RECORDS_INDEXED).increment(outcome.indexed as u64);
        metrics::counter!(RECORDS_FAILED).increment(outcome.failed as u64);
        if outcome.is_success() {
            metrics::counter!(BATCHES_UPLOADED).increment(1);
        } else {
            metrics::counter!(BATCHES_FAILED).increment(1);
        }
        outcome
    }
}

fn note_failure(outcome: &mut BatchOutcome, id: &str, reason: &str) {
    debug!(id, reason, "Document failed to upload");
    if outcome.first_failure.is_none() {
        outcome.first_failure = Some(format!("{id}: {reason}"));
    }
}

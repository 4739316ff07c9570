//! Streaming bulk writer.
//!
//! Consumes a pull iterator of documents (or CDC operations), accumulates
//! configured-size batches and submits them with at most one batch in
//! flight. Backpressure is the pull itself: the input is not advanced while
//! a submission is outstanding. Partial failures are read back from the
//! driver error and accounted into metrics; nothing is ever retried
//! implicitly.

use crate::error::Error;
use crate::value::Value;
use crate::workload::CdcOperation;
use mongodb::bson::Document;
use mongodb::error::ErrorKind;
use mongodb::options::InsertManyOptions;
use mongodb::Collection;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Documents pulled between cooperative yields.
const YIELD_EVERY: u64 = 100;

/// Emitter configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmitterConfig {
    /// Documents per submitted batch.
    pub batch_size: usize,
    /// Ordered server-side execution; stops the pipeline at the first
    /// write error.
    pub ordered: bool,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        EmitterConfig {
            batch_size: 1000,
            ordered: false,
        }
    }
}

/// Metrics of a bulk-insert run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertionMetrics {
    /// Documents pulled from the input.
    pub total_documents: u64,
    /// Documents acknowledged by the server.
    pub inserted_documents: u64,
    /// Documents rejected by the server or unusable as documents.
    pub failed_inserts: u64,
    /// Batches submitted.
    pub batches_submitted: u64,
}

/// Metrics of a bulk-write (CDC) run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteMetrics {
    /// Operations pulled from the input.
    pub total_operations: u64,
    /// Inserts acknowledged by the server.
    pub inserted_documents: u64,
    /// Updates that modified a document.
    pub updated_documents: u64,
    /// Deletes that removed a document.
    pub deleted_documents: u64,
    /// Inserts rejected by the server.
    pub failed_inserts: u64,
    /// Batches submitted.
    pub batches_submitted: u64,
}

/// Batched writer over one collection.
#[derive(Debug)]
pub struct Emitter {
    collection: Collection<Document>,
    config: EmitterConfig,
}

impl Emitter {
    /// A writer over `collection`.
    pub fn new(collection: Collection<Document>, config: EmitterConfig) -> Self {
        Emitter { collection, config }
    }

    /// The configured batch size.
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Drains `documents` into batched inserts.
    ///
    /// On cancellation the current batch is submitted and the metrics so
    /// far are returned. An input error is propagated after the pending
    /// batch is flushed.
    pub async fn bulk_insert(
        &self,
        documents: impl Iterator<Item = Result<Value, Error>>,
        cancel: &AtomicBool,
    ) -> Result<InsertionMetrics, Error> {
        let mut metrics = InsertionMetrics::default();
        let mut batch: Vec<Document> = Vec::with_capacity(self.config.batch_size);
        let mut documents = documents;

        loop {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let Some(next) = documents.next() else { break };
            let value = match next {
                Ok(value) => value,
                Err(input_error) => {
                    self.flush_inserts(&mut batch, &mut metrics).await?;
                    return Err(input_error);
                }
            };
            metrics.total_documents += 1;
            match value.to_document() {
                Some(document) => batch.push(document),
                None => {
                    tracing::debug!("input value is not a document, counting as failed");
                    metrics.failed_inserts += 1;
                }
            }
            if batch.len() >= self.config.batch_size {
                self.flush_inserts(&mut batch, &mut metrics).await?;
            }
            if metrics.total_documents % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        self.flush_inserts(&mut batch, &mut metrics).await?;
        Ok(metrics)
    }

    /// Drains `operations` into batched primitive writes.
    pub async fn bulk_write(
        &self,
        operations: impl Iterator<Item = Result<CdcOperation, Error>>,
        cancel: &AtomicBool,
    ) -> Result<WriteMetrics, Error> {
        let mut metrics = WriteMetrics::default();
        let mut batch: Vec<CdcOperation> = Vec::with_capacity(self.config.batch_size);
        let mut operations = operations;

        loop {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let Some(next) = operations.next() else { break };
            let operation = match next {
                Ok(operation) => operation,
                Err(input_error) => {
                    self.submit_operations(&mut batch, &mut metrics).await?;
                    return Err(input_error);
                }
            };
            metrics.total_operations += 1;
            batch.push(operation);
            if batch.len() >= self.config.batch_size {
                self.submit_operations(&mut batch, &mut metrics).await?;
            }
            if metrics.total_operations % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        self.submit_operations(&mut batch, &mut metrics).await?;
        Ok(metrics)
    }

    async fn flush_inserts(
        &self,
        batch: &mut Vec<Document>,
        metrics: &mut InsertionMetrics,
    ) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        metrics.batches_submitted += 1;
        self.raw_insert(
            std::mem::take(batch),
            &mut metrics.inserted_documents,
            &mut metrics.failed_inserts,
        )
        .await
    }

    /// Maps every operation of one batch onto its driver primitive,
    /// preserving order; consecutive inserts collapse into one submission.
    pub(crate) async fn submit_operations(
        &self,
        batch: &mut Vec<CdcOperation>,
        metrics: &mut WriteMetrics,
    ) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        metrics.batches_submitted += 1;
        let mut inserts: Vec<Document> = Vec::new();

        for operation in batch.drain(..) {
            match operation {
                CdcOperation::Insert(document) => {
                    if let Some(document) = document.to_document() {
                        inserts.push(document);
                    } else {
                        metrics.failed_inserts += 1;
                    }
                }
                CdcOperation::Update { filter, update } => {
                    self.raw_insert(
                        std::mem::take(&mut inserts),
                        &mut metrics.inserted_documents,
                        &mut metrics.failed_inserts,
                    )
                    .await?;
                    let (Some(filter), Some(update)) = (filter.to_document(), update.to_document())
                    else {
                        tracing::debug!("unusable update payload, skipping");
                        continue;
                    };
                    match self.collection.update_one(filter, update).await {
                        Ok(outcome) => metrics.updated_documents += outcome.modified_count,
                        Err(error) if self.config.ordered => {
                            return Err(Error::Driver {
                                action: "update document",
                                source: error,
                            });
                        }
                        Err(error) => {
                            tracing::debug!(error = %error, "update failed, continuing");
                        }
                    }
                }
                CdcOperation::Delete { id } => {
                    self.raw_insert(
                        std::mem::take(&mut inserts),
                        &mut metrics.inserted_documents,
                        &mut metrics.failed_inserts,
                    )
                    .await?;
                    let filter = mongodb::bson::doc! { "_id": id };
                    match self.collection.delete_one(filter).await {
                        Ok(outcome) => metrics.deleted_documents += outcome.deleted_count,
                        Err(error) if self.config.ordered => {
                            return Err(Error::Driver {
                                action: "delete document",
                                source: error,
                            });
                        }
                        Err(error) => {
                            tracing::debug!(error = %error, "delete failed, continuing");
                        }
                    }
                }
            }
        }

        self.raw_insert(
            inserts,
            &mut metrics.inserted_documents,
            &mut metrics.failed_inserts,
        )
        .await
    }

    /// Submits one insert batch, reading partial failures out of the driver
    /// error. Counters are updated even on the fatal (ordered) path.
    async fn raw_insert(
        &self,
        documents: Vec<Document>,
        inserted: &mut u64,
        failed: &mut u64,
    ) -> Result<(), Error> {
        if documents.is_empty() {
            return Ok(());
        }
        let submitted = documents.len() as u64;
        let options = InsertManyOptions::builder()
            .ordered(self.config.ordered)
            .build();
        let result = self
            .collection
            .insert_many(documents)
            .with_options(options)
            .await;

        let error = match result {
            Ok(outcome) => {
                *inserted += outcome.inserted_ids.len() as u64;
                return Ok(());
            }
            Err(error) => error,
        };

        // A write-error payload means the server processed the batch and
        // rejected some of it; anything else is a transport-level failure.
        let partial = match error.kind.as_ref() {
            ErrorKind::InsertMany(insert_error) => {
                let write_errors = insert_error.write_errors.as_deref().unwrap_or_default();
                Some((
                    write_errors.len() as u64,
                    write_errors.first().map_or(submitted, |first| first.index as u64),
                ))
            }
            _ => None,
        };

        match partial {
            Some((failures, _)) if !self.config.ordered => {
                *inserted += submitted - failures;
                *failed += failures;
                tracing::debug!(failures, submitted, "bulk insert partially failed");
                Ok(())
            }
            Some((_, first_failed_index)) => {
                // Ordered: the server stopped at the first error; everything
                // from there on is charged as failed.
                *inserted += first_failed_index;
                *failed += submitted - first_failed_index;
                Err(Error::Driver {
                    action: "ordered bulk insert",
                    source: error,
                })
            }
            None => Err(Error::Driver {
                action: "bulk insert",
                source: error,
            }),
        }
    }
}

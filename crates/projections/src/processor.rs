//! Replays outbox entries into projections.

use std::sync::Arc;

use store::{OutboxQuery, OutboxReader};
use tokio::sync::Mutex;

use crate::Result;
use crate::projection::Projection;

const PAGE_SIZE: usize = 500;

/// Feeds projections from the outbox.
///
/// Inline delivery keeps views current while the process runs; the
/// processor fills them after a restart or rebuilds them from scratch.
/// Only event types that propagate to the outbox can be replayed. Entries
/// are read in position order whether or not they were published.
pub struct ProjectionProcessor<R: OutboxReader> {
    reader: R,
    projections: Vec<Arc<dyn Projection>>,
    /// Next outbox position to read.
    cursor: Mutex<i64>,
}

impl<R: OutboxReader> ProjectionProcessor<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            projections: Vec::new(),
            cursor: Mutex::new(0),
        }
    }

    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Delivers every outbox entry after the cursor to each projection and
    /// returns how many entries were read.
    ///
    /// Moving the cursor past the last entry read is safe because stores
    /// make positions visible in increasing order.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<u64> {
        let mut cursor = self.cursor.lock().await;
        let mut read = 0u64;

        loop {
            let page = self
                .reader
                .query_outbox(OutboxQuery::all().from_position(*cursor).limit(PAGE_SIZE))
                .await?;
            let Some(last) = page.last().map(|e| e.position) else {
                break;
            };

            for entry in &page {
                for projection in &self.projections {
                    projection.handle(&entry.message).await?;
                }
            }
            read += page.len() as u64;
            metrics::counter!("projection_catch_up_entries_total").increment(page.len() as u64);
            *cursor = last + 1;

            if page.len() < PAGE_SIZE {
                break;
            }
        }

        tracing::info!(entries = read, next_position = *cursor, "catch-up complete");
        Ok(read)
    }

    /// Resets every projection and replays the whole outbox.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<u64> {
        for projection in &self.projections {
            projection.reset().await?;
        }
        *self.cursor.lock().await = 0;
        self.run_catch_up().await
    }
}

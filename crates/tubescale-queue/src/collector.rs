//! Stats collector: one pass over every tube per tick.
//!
//! [`Collector::collect`] enumerates tube names and returns a [`StatsPass`]
//! that fetches and decodes each tube's stats only when asked for the next
//! element. Nothing survives between passes: every tick starts over from a
//! fresh `list-tubes`.

use std::vec;

use tracing::{debug, warn};

use crate::client::QueueBackend;
use crate::error::QueueResult;
use crate::stats::TubeStats;

/// Produces per-tube stats from a queue backend.
#[derive(Debug)]
pub struct Collector<Q> {
    backend: Q,
}

impl<Q: QueueBackend> Collector<Q> {
    /// Create a collector over the given backend.
    pub fn new(backend: Q) -> Self {
        Self { backend }
    }

    /// Start a new pass over all tubes.
    ///
    /// Fails only when the tube list itself can't be fetched or decoded.
    pub async fn collect(&self) -> QueueResult<StatsPass<'_, Q>> {
        let tubes = self.backend.list_tubes().await?;
        debug!(count = tubes.len(), "enumerated tubes");
        Ok(StatsPass {
            backend: &self.backend,
            tubes: tubes.into_iter(),
            skipped: 0,
        })
    }
}

/// A single, lazy pass over the tubes returned by one `list-tubes` call.
#[derive(Debug)]
pub struct StatsPass<'a, Q> {
    backend: &'a Q,
    tubes: vec::IntoIter<String>,
    skipped: usize,
}

impl<Q: QueueBackend> StatsPass<'_, Q> {
    /// Fetch stats for the next tube, in enumeration order.
    ///
    /// Tubes whose stats can't be fetched or decoded are logged and skipped.
    /// Returns `None` once every tube has been visited.
    pub async fn next(&mut self) -> Option<TubeStats> {
        for tube in self.tubes.by_ref() {
            let stats = match self.backend.stats_tube(&tube).await {
                Ok(document) => TubeStats::decode(&tube, &document),
                Err(e) => Err(e),
            };

            match stats {
                Ok(stats) => return Some(stats),
                Err(e) => {
                    warn!(tube = %tube, error = %e, "can't read tube stats, skipping");
                    self.skipped += 1;
                }
            }
        }
        None
    }

    /// Tubes not yet visited.
    pub fn remaining(&self) -> usize {
        self.tubes.len()
    }

    /// Tubes skipped so far because of fetch or decode failures.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

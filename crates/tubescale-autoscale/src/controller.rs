//! Controller loop: one collect-and-reconcile pass per tick.
//!
//! Ticks never overlap: a pass runs to completion, then the loop sleeps
//! for the configured interval. A shutdown signal is honored between
//! ticks and while sleeping, never in the middle of a write.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use tubescale_orchestrator::ReplicaSetApi;
use tubescale_queue::{Collector, QueueBackend, QueueResult};

use crate::reconciler::{ReconcileOutcome, Reconciler};

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tubes returned by enumeration.
    pub tubes: usize,
    /// ReplicaSets created from the template.
    pub created: usize,
    /// ReplicaSets whose replica count changed.
    pub updated: usize,
    /// ReplicaSets already at the desired count.
    pub unchanged: usize,
    /// Tubes whose stats couldn't be read.
    pub skipped: usize,
    /// Tubes whose ReplicaSet couldn't be converged.
    pub failed: usize,
}

/// Drives the collector and the reconciler on a fixed interval.
#[derive(Debug)]
pub struct Controller<Q, A> {
    collector: Collector<Q>,
    reconciler: Reconciler<A>,
}

impl<Q: QueueBackend, A: ReplicaSetApi> Controller<Q, A> {
    /// Create a controller from its two halves.
    pub fn new(collector: Collector<Q>, reconciler: Reconciler<A>) -> Self {
        Self {
            collector,
            reconciler,
        }
    }

    /// The reconciler half.
    pub fn reconciler(&self) -> &Reconciler<A> {
        &self.reconciler
    }

    /// Run a single pass over every tube.
    ///
    /// Fails only when the tube list can't be read; every per-tube failure
    /// is logged, counted in the report, and isolated from other tubes.
    pub async fn tick(&self) -> QueueResult<TickReport> {
        let mut pass = self.collector.collect().await?;
        let mut report = TickReport {
            tubes: pass.remaining(),
            ..TickReport::default()
        };

        while let Some(stats) = pass.next().await {
            match self.reconciler.reconcile(&stats.name, &stats).await {
                Ok(ReconcileOutcome::Created { .. }) => report.created += 1,
                Ok(ReconcileOutcome::Updated { .. }) => report.updated += 1,
                Ok(ReconcileOutcome::Unchanged { .. }) => report.unchanged += 1,
                Err(e) => {
                    warn!(
                        tube = %stats.name,
                        error = %e,
                        "reconciliation failed, retrying next tick"
                    );
                    report.failed += 1;
                }
            }
        }

        report.skipped = pass.skipped();
        Ok(report)
    }

    /// Run the controller loop until `shutdown` fires.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "controller started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(report) => info!(
                    tubes = report.tubes,
                    created = report.created,
                    updated = report.updated,
                    unchanged = report.unchanged,
                    skipped = report.skipped,
                    failed = report.failed,
                    "tick complete"
                ),
                Err(e) => error!(error = %e, "can't enumerate tubes, skipping tick"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again; treat it as shutdown.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("controller shutting down");
    }
}

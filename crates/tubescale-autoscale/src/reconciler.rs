//! Replica reconciler: converges one tube's ReplicaSet per call.
//!
//! The reconciler holds no state between calls. Each call reads the
//! ReplicaSet fresh, applies the replica policy to the tube's current
//! backlog, and writes the result back conditioned on the version it
//! read. Losing a race to another writer restarts the read-modify-write
//! under a bounded backoff; every other failure is returned immediately
//! and left for the next tick.

use tracing::{debug, info, warn};

use tubescale_orchestrator::{ReplicaSet, ReplicaSetApi, ReplicaSetTemplate, validate_resource_name};
use tubescale_queue::TubeStats;

use crate::error::ReconcileError;
use crate::policy::desired_replicas;
use crate::retry::{Backoff, retry_when};

/// Prefix joined with the tube name to form the ReplicaSet name.
pub const DEFAULT_NAME_PREFIX: &str = "consumer-";

/// What a successful reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No ReplicaSet existed; one was created from the template.
    Created { replicas: u32 },
    /// The replica count was changed.
    Updated { from: Option<u32>, to: u32 },
    /// The ReplicaSet already declared the desired count; nothing written.
    Unchanged { replicas: u32 },
}

/// Result of the read step.
#[derive(Debug)]
enum Lookup {
    /// The object exists; its resourceVersion conditions the update.
    Found(ReplicaSet),
    /// No object by that name; the write will be a create.
    Absent,
}

/// Converges ReplicaSets to the replica policy.
#[derive(Debug)]
pub struct Reconciler<A> {
    api: A,
    template: ReplicaSetTemplate,
    name_prefix: String,
    backoff: Backoff,
}

impl<A: ReplicaSetApi> Reconciler<A> {
    /// Create a reconciler writing through `api`, materializing new
    /// ReplicaSets from `template`.
    pub fn new(api: A, template: ReplicaSetTemplate) -> Self {
        Self {
            api,
            template,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            backoff: Backoff::default(),
        }
    }

    /// Use a different ReplicaSet name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Use a different conflict-retry schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// The orchestration backend.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// ReplicaSet name for a tube.
    pub fn resource_name(&self, tube: &str) -> String {
        format!("{}{tube}", self.name_prefix)
    }

    /// Converge the ReplicaSet for `tube` to the count its stats call for.
    pub async fn reconcile(
        &self,
        tube: &str,
        stats: &TubeStats,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let name = self.resource_name(tube);
        if !validate_resource_name(&name) {
            return Err(ReconcileError::InvalidName {
                tube: tube.to_string(),
                name,
            });
        }

        let replicas = desired_replicas(stats.ready);
        let name = name.as_str();

        let attempt = move |attempt: u32| async move {
            if attempt > 0 {
                debug!(%tube, attempt, "retrying after conflict");
            }
            let lookup = self.lookup(name).await?;
            self.converge(tube, name, lookup, replicas).await
        };
        let result = retry_when(&self.backoff, ReconcileError::is_conflict, attempt).await;

        match &result {
            Ok(ReconcileOutcome::Unchanged { replicas }) => {
                debug!(%tube, ready = stats.ready, replicas, "replicas already converged");
            }
            Ok(outcome) => {
                info!(
                    %tube,
                    ready = stats.ready,
                    watching = stats.watching,
                    replicas,
                    ?outcome,
                    "set replicas"
                );
            }
            Err(e) if e.is_conflict() => {
                warn!(%tube, steps = self.backoff.steps, "giving up after repeated conflicts");
            }
            Err(_) => {}
        }
        result
    }

    async fn lookup(&self, name: &str) -> Result<Lookup, ReconcileError> {
        match self.api.get(name).await {
            Ok(rs) => Ok(Lookup::Found(rs)),
            Err(e) if e.is_not_found() => Ok(Lookup::Absent),
            Err(source) => Err(ReconcileError::Fetch {
                name: name.to_string(),
                source,
            }),
        }
    }

    async fn converge(
        &self,
        tube: &str,
        name: &str,
        lookup: Lookup,
        replicas: u32,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match lookup {
            Lookup::Found(mut rs) => {
                let from = rs.replicas();
                if from == Some(replicas) {
                    return Ok(ReconcileOutcome::Unchanged { replicas });
                }
                rs.set_replicas(replicas);
                self.api
                    .update(&rs)
                    .await
                    .map_err(|source| ReconcileError::Update {
                        name: name.to_string(),
                        source,
                    })?;
                Ok(ReconcileOutcome::Updated { from, to: replicas })
            }
            Lookup::Absent => {
                let mut rs = self.template.materialize(name, tube);
                rs.set_replicas(replicas);
                self.api
                    .create(&rs)
                    .await
                    .map_err(|source| ReconcileError::Create {
                        name: name.to_string(),
                        source,
                    })?;
                Ok(ReconcileOutcome::Created { replicas })
            }
        }
    }
}

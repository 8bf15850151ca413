//! Reconciliation error types.

use thiserror::Error;
use tubescale_orchestrator::OrchestratorError;

/// Why a tube's ReplicaSet couldn't be converged this tick.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("tube {tube:?} maps to invalid resource name {name:?}")]
    InvalidName { tube: String, name: String },

    #[error("failed to get replicaset {name}: {source}")]
    Fetch {
        name: String,
        #[source]
        source: OrchestratorError,
    },

    #[error("failed to create replicaset {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: OrchestratorError,
    },

    #[error("failed to update replicaset {name}: {source}")]
    Update {
        name: String,
        #[source]
        source: OrchestratorError,
    },
}

impl ReconcileError {
    /// Whether the write lost a concurrent-modification race.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Create { source, .. } | Self::Update { source, .. } => source.is_conflict(),
            Self::InvalidName { .. } | Self::Fetch { .. } => false,
        }
    }
}

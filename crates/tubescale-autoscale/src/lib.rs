//! tubescale-autoscale — queue-depth driven replica reconciliation.
//!
//! Each tick, the [`Controller`] walks every beanstalkd tube, derives a
//! desired worker count from the tube's ready backlog, and converges the
//! tube's ReplicaSet to that count.
//!
//! # Scaling Policy
//!
//! ```text
//! if ready == 0:
//!     replicas = 0                    // scale-to-zero
//! else:
//!     replicas = max(1, ready / 10)   // one worker per ten jobs, at least one
//! ```
//!
//! No state is carried between ticks: the count is recomputed from the
//! current backlog every time, so a failed tick heals on the next one.
//!
//! # Convergence
//!
//! ```text
//! get(consumer-<tube>)
//!   ├── Found(rs)  → set replicas → update (conditioned on resourceVersion)
//!   └── Absent     → template     → create
//! on Conflict / AlreadyExists: back off, start over from get (bounded)
//! ```

pub mod controller;
pub mod error;
pub mod policy;
pub mod reconciler;
pub mod retry;

pub use controller::{Controller, TickReport};
pub use error::ReconcileError;
pub use policy::desired_replicas;
pub use reconciler::{DEFAULT_NAME_PREFIX, ReconcileOutcome, Reconciler};
pub use retry::{Backoff, retry_when};

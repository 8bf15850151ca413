//! Replica policy.

/// Jobs one worker is expected to keep up with.
const JOBS_PER_REPLICA: u64 = 10;

/// Kubernetes stores replica counts as int32.
const MAX_REPLICAS: u32 = i32::MAX as u32;

/// Worker count for a tube with `ready` jobs waiting.
///
/// An empty tube scales to zero. Any backlog gets at least one worker,
/// then one per ten ready jobs (rounded down).
pub fn desired_replicas(ready: u64) -> u32 {
    if ready == 0 {
        return 0;
    }
    let replicas = (ready / JOBS_PER_REPLICA).max(1);
    u32::try_from(replicas).map_or(MAX_REPLICAS, |r| r.min(MAX_REPLICAS))
}

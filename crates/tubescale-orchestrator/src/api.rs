//! The orchestration operations the reconciler depends on.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::OrchestratorResult;
use crate::resource::ReplicaSet;

/// Boxed future alias used by [`ReplicaSetApi`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Get/create/update of ReplicaSets in one namespace.
pub trait ReplicaSetApi: Send + Sync {
    /// Fetch a ReplicaSet by name. Missing objects are
    /// [`OrchestratorError::NotFound`](crate::OrchestratorError::NotFound).
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>>;

    /// Create a new ReplicaSet. The object must carry a name and no
    /// resourceVersion.
    fn create<'a>(&'a self, rs: &'a ReplicaSet) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>>;

    /// Replace an existing ReplicaSet, conditioned on its resourceVersion.
    fn update<'a>(&'a self, rs: &'a ReplicaSet) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>>;
}

impl<T: ReplicaSetApi + ?Sized> ReplicaSetApi for Arc<T> {
    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>> {
        (**self).get(name)
    }

    fn create<'a>(&'a self, rs: &'a ReplicaSet) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>> {
        (**self).create(rs)
    }

    fn update<'a>(&'a self, rs: &'a ReplicaSet) -> BoxFuture<'a, OrchestratorResult<ReplicaSet>> {
        (**self).update(rs)
    }
}

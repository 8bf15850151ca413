//! tubescale-orchestrator — the orchestration side of the autoscaler.
//!
//! Models the slice of a Kubernetes `apps/v1` ReplicaSet the controller
//! reads and writes, materializes new ReplicaSets from a YAML template,
//! and exposes the get/create/update operations behind the
//! [`ReplicaSetApi`] trait.
//!
//! # Backends
//!
//! - [`KubeClient`]: REST calls against the API server over HTTP/1 with
//!   rustls, authenticated with the pod's service-account token.
//! - [`InMemoryReplicaSets`]: process-local store with the same
//!   resourceVersion semantics, used for dry runs and tests.
//!
//! Every write is conditioned on the `metadata.resourceVersion` read
//! alongside the object; a stale version surfaces as
//! [`OrchestratorError::Conflict`].

pub mod api;
pub mod error;
pub mod kube;
pub mod memory;
pub mod resource;
pub mod template;

pub use api::{BoxFuture, ReplicaSetApi};
pub use error::{OrchestratorError, OrchestratorResult};
pub use kube::{KubeClient, KubeConfig};
pub use memory::InMemoryReplicaSets;
pub use resource::{
    Container, EnvVar, ObjectMeta, PodSpec, PodTemplateSpec, ReplicaSet, ReplicaSetSpec,
    validate_resource_name,
};
pub use template::ReplicaSetTemplate;

//! ReplicaSet template for tubes seen for the first time.
//!
//! The template is an ordinary ReplicaSet manifest. Two spots are
//! overwritten per tube: `metadata.name` and the value of the first env
//! entry of the only container, which tells the worker which tube to
//! consume.

use std::path::Path;

use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::resource::ReplicaSet;

const EXPECTED_KIND: &str = "ReplicaSet";
const EXPECTED_API_VERSION: &str = "apps/v1";

/// A validated ReplicaSet skeleton.
#[derive(Debug, Clone)]
pub struct ReplicaSetTemplate {
    base: ReplicaSet,
}

impl ReplicaSetTemplate {
    /// Parse and validate a YAML manifest.
    pub fn from_yaml(document: &str) -> OrchestratorResult<Self> {
        let base: ReplicaSet = serde_yaml::from_str(document)
            .map_err(|e| OrchestratorError::Template(e.to_string()))?;
        Self::new(base)
    }

    /// Read, parse and validate a YAML manifest from disk.
    pub fn from_file(path: &Path) -> OrchestratorResult<Self> {
        let document = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Template(format!("{}: {e}", path.display()))
        })?;
        let template = Self::from_yaml(&document).map_err(|e| match e {
            OrchestratorError::Template(msg) => {
                OrchestratorError::Template(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        debug!(path = %path.display(), "loaded replicaset template");
        Ok(template)
    }

    /// Validate an already-parsed skeleton.
    pub fn new(base: ReplicaSet) -> OrchestratorResult<Self> {
        // Objects are posted to the apps/v1 endpoint, which rejects any other version.
        if !base.api_version.is_empty() && base.api_version != EXPECTED_API_VERSION {
            return Err(OrchestratorError::Template(format!(
                "expected apiVersion {EXPECTED_API_VERSION}, found {}",
                base.api_version
            )));
        }
        if !base.kind.is_empty() && base.kind != EXPECTED_KIND {
            return Err(OrchestratorError::Template(format!(
                "expected kind {EXPECTED_KIND}, found {}",
                base.kind
            )));
        }

        let containers = &base.spec.template.spec.containers;
        if containers.len() != 1 {
            return Err(OrchestratorError::Template(format!(
                "expected exactly one container, found {}",
                containers.len()
            )));
        }
        if containers[0].env.is_empty() {
            return Err(OrchestratorError::Template(
                "container has no env entry to bind the tube to".to_string(),
            ));
        }

        Ok(Self { base })
    }

    /// Build a fresh ReplicaSet called `name` whose workers consume `tube`.
    ///
    /// Server-owned metadata is cleared; the namespace comes from the
    /// client the object is submitted through.
    pub fn materialize(&self, name: &str, tube: &str) -> ReplicaSet {
        let mut rs = self.base.clone();
        rs.metadata.name = Some(name.to_string());
        rs.metadata.namespace = None;
        rs.metadata.resource_version = None;
        rs.extra.remove("status");

        if let Some(env) = rs
            .spec
            .template
            .spec
            .containers
            .first_mut()
            .and_then(|c| c.env.first_mut())
        {
            env.value = Some(tube.to_string());
        }
        rs
    }
}

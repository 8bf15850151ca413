//! ReplicaSet model.
//!
//! Only the fields the controller touches are typed. Everything else is
//! captured in `extra` maps at each level so a read-modify-write cycle
//! sends back exactly what the API server returned, apart from the
//! fields we changed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Longest object name Kubernetes accepts (DNS-1123 subdomain).
const MAX_NAME_LEN: usize = 253;

// ── ReplicaSet ────────────────────────────────────────────────────

/// An `apps/v1` ReplicaSet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ReplicaSetSpec,
    /// `status` and anything else we don't model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Opaque version marker used for conditioned writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub template: PodTemplateSpec,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplateSpec {
    #[serde(default)]
    pub spec: PodSpec,
    /// Template `metadata` (labels) and the rest.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// `valueFrom` and friends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReplicaSet {
    /// Object name, if set.
    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    /// Declared replica count, if set.
    pub fn replicas(&self) -> Option<u32> {
        self.spec.replicas
    }

    /// Set the declared replica count.
    pub fn set_replicas(&mut self, replicas: u32) {
        self.spec.replicas = Some(replicas);
    }

    /// Version marker carried from the last read.
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }

    /// Value of the first env entry of the first container: the tube the
    /// workers consume.
    pub fn tube_binding(&self) -> Option<&str> {
        self.spec
            .template
            .spec
            .containers
            .first()
            .and_then(|c| c.env.first())
            .and_then(|e| e.value.as_deref())
    }
}

/// Check `name` against the DNS-1123 subdomain rules Kubernetes applies
/// to object names.
pub fn validate_resource_name(name: &str) -> bool {
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.starts_with(alnum)
        && name.ends_with(alnum)
        && name
            .chars()
            .all(|c| alnum(c) || c == '-' || c == '.')
}

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::controller::ControllerBody;

/// Fields that are not modelled explicitly but must survive a round trip.
pub type Extra = BTreeMap<String, Value>;

/// Identity of a declarative object. Unique within a manifest and a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    pub fn namespaced(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Object metadata. Server-managed fields are kept so that the concurrency
/// token can travel with the object, but they never take part in comparisons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ObjectMeta {
    /// Drop everything the store assigns on its own.
    pub fn clear_server_fields(&mut self) {
        self.uid = None;
        self.resource_version = None;
        self.generation = None;
        self.creation_timestamp = None;
        self.deletion_timestamp = None;
        self.extra.remove("managedFields");
    }

    /// Carry identity and concurrency token over from a live copy.
    pub fn adopt_server_fields(&mut self, live: &ObjectMeta) {
        self.uid = live.uid.clone();
        self.resource_version = live.resource_version.clone();
        self.generation = live.generation;
        self.creation_timestamp = live.creation_timestamp;
        self.deletion_timestamp = live.deletion_timestamp;
        if let Some(managed) = live.extra.get("managedFields") {
            self.extra.insert("managedFields".to_string(), managed.clone());
        }
    }
}

/// A declarative object from a manifest or the live store.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestObject {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub body: ObjectBody,
}

/// Everything in an object besides `apiVersion`, `kind` and `metadata`.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectBody {
    Deployment(Box<DeploymentBody>),
    Controller(Box<ControllerBody>),
    Generic(Extra),
}

impl ManifestObject {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(
            &self.kind,
            self.metadata.namespace.as_deref(),
            &self.metadata.name,
        )
    }

    pub fn deployment(&self) -> Option<&DeploymentBody> {
        match &self.body {
            ObjectBody::Deployment(d) => Some(d),
            _ => None,
        }
    }

    pub fn deployment_mut(&mut self) -> Option<&mut DeploymentBody> {
        match &mut self.body {
            ObjectBody::Deployment(d) => Some(d),
            _ => None,
        }
    }

    pub fn containers(&self) -> &[Container] {
        self.deployment()
            .map(|d| d.spec.template.spec.containers.as_slice())
            .unwrap_or(&[])
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers().iter().find(|c| c.name == name)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut Container> {
        self.deployment_mut()?
            .spec
            .template
            .spec
            .containers
            .iter_mut()
            .find(|c| c.name == name)
    }

    /// Copy with server-managed metadata and observed status stripped, used
    /// for deep comparison of desired and live state.
    pub fn normalized(&self) -> Self {
        let mut copy = self.clone();
        copy.metadata.clear_server_fields();
        match &mut copy.body {
            ObjectBody::Deployment(d) => {
                d.extra.remove("status");
            }
            ObjectBody::Controller(c) => c.status = None,
            ObjectBody::Generic(fields) => {
                fields.remove("status");
            }
        }
        copy
    }

    pub fn same_desired_state(&self, other: &ManifestObject) -> bool {
        self.normalized() == other.normalized()
    }

    /// Encode into the generic representation used at the serialization boundary.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut fields = match &self.body {
            ObjectBody::Deployment(d) => into_map(serde_json::to_value(d)?),
            ObjectBody::Controller(c) => into_map(serde_json::to_value(c)?),
            ObjectBody::Generic(fields) => fields.clone().into_iter().collect(),
        };
        fields.insert("apiVersion".to_string(), Value::String(self.api_version.clone()));
        fields.insert("kind".to_string(), Value::String(self.kind.clone()));
        fields.insert("metadata".to_string(), serde_json::to_value(&self.metadata)?);
        Ok(Value::Object(fields))
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        let value = self
            .to_value()
            .map_err(<serde_yaml::Error as serde::ser::Error>::custom)?;
        serde_yaml::to_string(&value)
    }
}

fn into_map(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

// ============================================================
// Typed workload view
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentBody {
    #[serde(default)]
    pub spec: DeploymentSpec,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub template: PodTemplateSpec,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodTemplateSpec {
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub metadata: Extra,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Container {
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    /// Set a literal env value, replacing any `valueFrom` source.
    pub fn set_env(&mut self, name: &str, value: &str) {
        match self.env.iter_mut().find(|e| e.name == name) {
            Some(var) => {
                var.value = Some(value.to_string());
                var.extra.remove("valueFrom");
            }
            None => self.env.push(EnvVar {
                name: name.to_string(),
                value: Some(value.to_string()),
                extra: Extra::new(),
            }),
        }
    }
}

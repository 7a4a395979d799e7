//! Registration table of known kinds.
//!
//! The table is built once at startup and shared read-only (`Arc<Scheme>`).
//! It decides, per kind, whether objects are namespaced and which typed body
//! they decode into at the serialization boundary.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Deployment,
    Controller,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindInfo {
    pub scope: Scope,
    pub representation: Representation,
}

#[derive(Debug, Clone)]
pub struct Scheme {
    kinds: HashMap<String, KindInfo>,
}

impl Scheme {
    pub fn builder() -> SchemeBuilder {
        SchemeBuilder {
            kinds: HashMap::new(),
        }
    }

    /// Unregistered kinds are treated as namespaced and kept generic.
    pub fn lookup(&self, kind: &str) -> KindInfo {
        self.kinds.get(kind).copied().unwrap_or(KindInfo {
            scope: Scope::Namespaced,
            representation: Representation::Generic,
        })
    }

    pub fn is_namespaced(&self, kind: &str) -> bool {
        self.lookup(kind).scope == Scope::Namespaced
    }

    /// Decode a generic object into its canonical typed form.
    pub fn decode(&self, value: Value) -> Result<ManifestObject> {
        let Value::Object(mut fields) = value else {
            return Err(Error::template("manifest entry is not a mapping"));
        };

        let kind = take_string(&mut fields, "kind")
            .ok_or_else(|| Error::template("manifest entry has no kind"))?;
        let api_version = take_string(&mut fields, "apiVersion").unwrap_or_default();
        let metadata = fields
            .remove("metadata")
            .ok_or_else(|| Error::template(format!("{} has no metadata", kind)))?;
        let metadata: ObjectMeta =
            serde_json::from_value(metadata).map_err(|e| Error::Conversion {
                kind: kind.clone(),
                name: String::new(),
                message: e.to_string(),
            })?;
        if metadata.name.is_empty() {
            return Err(Error::template(format!("{} has an empty name", kind)));
        }

        let conversion_error = |e: serde_json::Error| Error::Conversion {
            kind: kind.clone(),
            name: metadata.name.clone(),
            message: e.to_string(),
        };
        let rest = Value::Object(fields);
        let body = match self.lookup(&kind).representation {
            Representation::Deployment => {
                ObjectBody::Deployment(Box::new(serde_json::from_value(rest).map_err(conversion_error)?))
            }
            Representation::Controller => {
                ObjectBody::Controller(Box::new(serde_json::from_value(rest).map_err(conversion_error)?))
            }
            Representation::Generic => {
                ObjectBody::Generic(serde_json::from_value(rest).map_err(conversion_error)?)
            }
        };

        Ok(ManifestObject {
            api_version,
            kind,
            metadata,
            body,
        })
    }
}

impl Default for Scheme {
    fn default() -> Self {
        use Representation::*;
        use Scope::*;

        Self::builder()
            .register("Deployment", Namespaced, Deployment)
            .register(KEDA_CONTROLLER_KIND, Namespaced, Controller)
            .register("Service", Namespaced, Generic)
            .register("ServiceAccount", Namespaced, Generic)
            .register("ConfigMap", Namespaced, Generic)
            .register("Secret", Namespaced, Generic)
            .register("Role", Namespaced, Generic)
            .register("RoleBinding", Namespaced, Generic)
            .register("Namespace", Cluster, Generic)
            .register("ClusterRole", Cluster, Generic)
            .register("ClusterRoleBinding", Cluster, Generic)
            .register("CustomResourceDefinition", Cluster, Generic)
            .register("APIService", Cluster, Generic)
            .register("ValidatingWebhookConfiguration", Cluster, Generic)
            .build()
    }
}

pub struct SchemeBuilder {
    kinds: HashMap<String, KindInfo>,
}

impl SchemeBuilder {
    pub fn register(mut self, kind: &str, scope: Scope, representation: Representation) -> Self {
        self.kinds.insert(
            kind.to_string(),
            KindInfo {
                scope,
                representation,
            },
        );
        self
    }

    pub fn build(self) -> Scheme {
        Scheme { kinds: self.kinds }
    }
}

fn take_string(fields: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_deployment_into_typed_body() {
        let scheme = Scheme::default();
        let object = scheme
            .decode(json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "keda-operator", "namespace": "keda"},
                "spec": {"replicas": 1, "template": {"spec": {"containers": [
                    {"name": "keda-operator", "args": ["--zap-log-level=info"], "image": "keda:2"}
                ]}}}
            }))
            .unwrap();

        let container = object.container("keda-operator").unwrap();
        assert_eq!(container.args, vec!["--zap-log-level=info"]);
        assert_eq!(container.extra.get("image"), Some(&json!("keda:2")));
    }

    #[test]
    fn round_trip_is_lossless() {
        let scheme = Scheme::default();
        let value = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "keda-admission-webhooks", "namespace": "keda"},
            "spec": {"ports": [{"port": 443}]}
        });
        let object = scheme.decode(value.clone()).unwrap();
        assert_eq!(object.to_value().unwrap(), value);
    }

    #[test]
    fn controller_round_trip_keeps_unknown_audit_fields() {
        let scheme = Scheme::default();
        let value = json!({
            "apiVersion": "keda.sh/v1alpha1",
            "kind": "KedaController",
            "metadata": {"name": "keda", "namespace": "keda"},
            "spec": {"metricsServer": {"auditConfig": {
                "logFormat": "json",
                "policy": {"omitStages": ["RequestReceived"]}
            }}}
        });
        let object = scheme.decode(value.clone()).unwrap();
        assert_eq!(object.to_value().unwrap(), value);

        let controller = KedaController::try_from(object).unwrap();
        let back = ManifestObject::from(controller).to_value().unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn empty_audit_config_is_not_written() {
        let value = ManifestObject::from(KedaController::new("keda", "keda"))
            .to_value()
            .unwrap();
        assert!(value.pointer("/spec/metricsServer/auditConfig").is_none());
    }

    #[test]
    fn rejects_entries_without_kind_or_name() {
        let scheme = Scheme::default();
        assert!(matches!(
            scheme.decode(json!({"metadata": {"name": "x"}})),
            Err(Error::Template(_))
        ));
        assert!(matches!(
            scheme.decode(json!({"kind": "Service", "metadata": {}})),
            Err(Error::Template(_))
        ));
    }

    #[test]
    fn schema_mismatch_is_a_conversion_error() {
        let scheme = Scheme::default();
        let result = scheme.decode(json!({
            "kind": "Deployment",
            "metadata": {"name": "keda-operator"},
            "spec": {"template": {"spec": {"containers": "not-a-list"}}}
        }));
        assert!(matches!(result, Err(Error::Conversion { .. })));
    }

    #[test]
    fn unregistered_kinds_are_namespaced() {
        let scheme = Scheme::builder().build();
        assert!(scheme.is_namespaced("Widget"));
        assert!(!Scheme::default().is_namespaced("ClusterRole"));
    }
}

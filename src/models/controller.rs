use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::object::{Extra, ManifestObject, ObjectBody, ObjectMeta};

pub const KEDA_CONTROLLER_KIND: &str = "KedaController";
pub const KEDA_CONTROLLER_API_VERSION: &str = "keda.sh/v1alpha1";

/// The configuration resource that drives reconciliation.
///
/// This is the typed view of a `KedaController` object. Converting to and
/// from [`ManifestObject`] is a move of already-typed parts; no serialization
/// happens on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct KedaController {
    pub api_version: String,
    pub metadata: ObjectMeta,
    pub spec: KedaControllerSpec,
    pub status: Option<ReconciliationStatus>,
    /// Top-level fields besides `spec` and `status`.
    pub extra: Extra,
}

impl KedaController {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            api_version: KEDA_CONTROLLER_API_VERSION.to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: KedaControllerSpec::default(),
            status: None,
            extra: Extra::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn component(&self, component: Component) -> ComponentView<'_> {
        match component {
            Component::Operator => ComponentView {
                log_level: &self.spec.operator.log_level,
                log_encoder: &self.spec.operator.log_encoder,
                log_time_encoding: &self.spec.operator.log_time_encoding,
                deployment_annotations: self.spec.operator.deployment_annotations.as_ref(),
            },
            Component::AdmissionWebhooks => ComponentView {
                log_level: &self.spec.admission_webhooks.log_level,
                log_encoder: &self.spec.admission_webhooks.log_encoder,
                log_time_encoding: &self.spec.admission_webhooks.log_time_encoding,
                deployment_annotations: self
                    .spec
                    .admission_webhooks
                    .deployment_annotations
                    .as_ref(),
            },
            Component::MetricsServer => ComponentView {
                log_level: &self.spec.metrics_server.log_level,
                log_encoder: "",
                log_time_encoding: "",
                deployment_annotations: self.spec.metrics_server.deployment_annotations.as_ref(),
            },
        }
    }

    /// The annotation map of a component, created on first use.
    pub fn deployment_annotations_mut(
        &mut self,
        component: Component,
    ) -> &mut BTreeMap<String, String> {
        let slot = match component {
            Component::Operator => &mut self.spec.operator.deployment_annotations,
            Component::AdmissionWebhooks => &mut self.spec.admission_webhooks.deployment_annotations,
            Component::MetricsServer => &mut self.spec.metrics_server.deployment_annotations,
        };
        slot.get_or_insert_with(BTreeMap::new)
    }
}

impl TryFrom<ManifestObject> for KedaController {
    type Error = ManifestObject;

    /// Fails (handing the object back) unless the object carries a controller body.
    fn try_from(object: ManifestObject) -> Result<Self, Self::Error> {
        match object.body {
            ObjectBody::Controller(body) if object.kind == KEDA_CONTROLLER_KIND => {
                let ControllerBody {
                    spec,
                    status,
                    extra,
                } = *body;
                Ok(Self {
                    api_version: object.api_version,
                    metadata: object.metadata,
                    spec,
                    status,
                    extra,
                })
            }
            body => Err(ManifestObject { body, ..object }),
        }
    }
}

impl From<KedaController> for ManifestObject {
    fn from(controller: KedaController) -> Self {
        ManifestObject {
            api_version: controller.api_version,
            kind: KEDA_CONTROLLER_KIND.to_string(),
            metadata: controller.metadata,
            body: ObjectBody::Controller(Box::new(ControllerBody {
                spec: controller.spec,
                status: controller.status,
                extra: controller.extra,
            })),
        }
    }
}

/// Typed body of a `KedaController` object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerBody {
    #[serde(default)]
    pub spec: KedaControllerSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReconciliationStatus>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KedaControllerSpec {
    /// Namespace the KEDA operator watches; empty means all namespaces.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub watch_namespace: String,
    #[serde(default, skip_serializing_if = "ComponentSpec::is_empty")]
    pub operator: ComponentSpec,
    #[serde(default, skip_serializing_if = "ComponentSpec::is_empty")]
    pub admission_webhooks: ComponentSpec,
    #[serde(default, skip_serializing_if = "MetricsServerSpec::is_empty")]
    pub metrics_server: MetricsServerSpec,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Settings shared by the operator and the admission webhooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_level: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_encoder: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_time_encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_annotations: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ComponentSpec {
    pub fn is_empty(&self) -> bool {
        self.log_level.is_empty()
            && self.log_encoder.is_empty()
            && self.log_time_encoding.is_empty()
            && self.deployment_annotations.is_none()
            && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsServerSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_level: String,
    #[serde(default, skip_serializing_if = "AuditConfig::is_empty")]
    pub audit_config: AuditConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_annotations: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl MetricsServerSpec {
    pub fn is_empty(&self) -> bool {
        self.log_level.is_empty()
            && self.audit_config.is_empty()
            && self.deployment_annotations.is_none()
            && self.extra.is_empty()
    }
}

/// Audit logging of the metrics API server. Values are passed through verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_output_volume_claim: String,
    #[serde(default, skip_serializing_if = "AuditLifetime::is_empty")]
    pub lifetime: AuditLifetime,
    #[serde(flatten)]
    pub extra: Extra,
}

impl AuditConfig {
    pub fn is_empty(&self) -> bool {
        self.log_format.is_empty()
            && self.log_output_volume_claim.is_empty()
            && self.lifetime.is_empty()
            && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLifetime {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_age: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_backup: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub max_size: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl AuditLifetime {
    pub fn is_empty(&self) -> bool {
        self.max_age.is_empty()
            && self.max_backup.is_empty()
            && self.max_size.is_empty()
            && self.extra.is_empty()
    }
}

/// Read-only view of one component's settings.
#[derive(Debug, Clone, Copy)]
pub struct ComponentView<'a> {
    pub log_level: &'a str,
    pub log_encoder: &'a str,
    pub log_time_encoding: &'a str,
    pub deployment_annotations: Option<&'a BTreeMap<String, String>>,
}

/// A deployable sub-component rendered from the controller spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Operator,
    AdmissionWebhooks,
    MetricsServer,
}

impl Component {
    pub const ALL: [Self; 3] = [Self::Operator, Self::AdmissionWebhooks, Self::MetricsServer];

    pub fn deployment_name(&self) -> &'static str {
        match self {
            Self::Operator => "keda-operator",
            Self::AdmissionWebhooks => "keda-admission",
            Self::MetricsServer => "keda-metrics-apiserver",
        }
    }

    pub fn container_name(&self) -> &'static str {
        match self {
            Self::Operator => "keda-operator",
            Self::AdmissionWebhooks => "keda-admission-webhooks",
            Self::MetricsServer => "keda-metrics-apiserver",
        }
    }
}

// ============================================================
// Status
// ============================================================

/// Observed outcome of the latest reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationStatus {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReconciliationStatus {
    pub fn converged() -> Self {
        Self {
            phase: Phase::Converged,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            phase: Phase::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        Self {
            phase: Phase::Ignored,
            reason: Some(reason.into()),
        }
    }
}

/// Phase of a reconciliation attempt.
///
/// - `Pending`: Attempt accepted, nothing read yet
/// - `Applying`: Diffing and mutating the live store
/// - `Converged`: Every create, update and delete succeeded
/// - `Failed`: An object operation failed terminally; see the reason
/// - `Ignored`: The resource is out of scope for this controller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Applying,
    Converged,
    Failed,
    Ignored,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Applying => "Applying",
            Self::Converged => "Converged",
            Self::Failed => "Failed",
            Self::Ignored => "Ignored",
        }
    }
}

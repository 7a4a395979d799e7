//! Transform pipeline: rewrites manifest objects from the configuration resource.
//!
//! Both entry points work on a copy of the input and return a complete new
//! model or an error; a partially transformed model never escapes.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::manifest::ManifestModel;
use crate::models::*;
use crate::scheme::Scheme;
use crate::transform::{args, Attribute};

pub const LOG_LEVEL_ARG: &str = "--zap-log-level=";
pub const LOG_ENCODER_ARG: &str = "--zap-encoder=";
pub const TIME_ENCODING_ARG: &str = "--zap-time-encoding=";
pub const VERBOSITY_ARG: &str = "--v=";
pub const AUDIT_LOG_FORMAT_ARG: &str = "--audit-log-format=";
pub const AUDIT_MAX_AGE_ARG: &str = "--audit-log-maxage=";
pub const AUDIT_MAX_BACKUP_ARG: &str = "--audit-log-maxbackup=";
pub const AUDIT_MAX_SIZE_ARG: &str = "--audit-log-maxsize=";
pub const AUDIT_LOG_PATH_ARG: &str = "--audit-log-path=";
pub const AUDIT_LOG_FILE: &str = "/var/audit-policy/log/audit.log";
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "keda-reconciler";
pub const OWNER_LABEL: &str = "keda.sh/owned-by";

#[derive(Debug, Clone)]
pub struct Pipeline {
    scheme: Arc<Scheme>,
}

impl Pipeline {
    pub fn new(scheme: Arc<Scheme>) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Apply one attribute to every `KedaController` object in the manifest.
    pub fn change_attribute(
        &self,
        manifest: &ManifestModel,
        attribute: &str,
        value: &str,
        marker: &str,
    ) -> Result<ManifestModel> {
        let attribute = Attribute::from_name(attribute)?;
        manifest.clone().try_map(|object| {
            if object.kind != KEDA_CONTROLLER_KIND {
                return Ok(object);
            }
            let mut controller = KedaController::try_from(object).map_err(|object| {
                Error::Conversion {
                    kind: object.kind,
                    name: object.metadata.name,
                    message: "object has no controller body".to_string(),
                }
            })?;
            attribute.apply(&mut controller, value, marker);
            Ok(controller.into())
        })
    }

    /// Render the component manifest for `doc`.
    pub fn render(&self, manifest: &ManifestModel, doc: &KedaController) -> Result<ManifestModel> {
        let rendered = manifest
            .clone()
            .try_map(|object| self.render_object(object, doc))?;
        tracing::debug!(
            "Rendered {} objects for {}/{}",
            rendered.len(),
            doc.namespace(),
            doc.name()
        );
        Ok(rendered)
    }

    fn render_object(&self, mut object: ManifestObject, doc: &KedaController) -> Result<ManifestObject> {
        let namespace = doc.namespace();
        if !namespace.is_empty() {
            if self.scheme.is_namespaced(&object.kind) {
                object.metadata.namespace = Some(namespace.to_string());
            }
            if let ObjectBody::Generic(fields) = &mut object.body {
                rewrite_namespace_references(&object.kind, fields, namespace);
            }
        }

        object
            .metadata
            .labels
            .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
        object
            .metadata
            .labels
            .insert(OWNER_LABEL.to_string(), doc.name().to_string());

        if object.kind == "Deployment" {
            let component = Component::ALL
                .into_iter()
                .find(|c| c.deployment_name() == object.metadata.name);
            if let Some(component) = component {
                render_component(&mut object, doc, component)?;
            }
        }

        Ok(object)
    }
}

fn render_component(object: &mut ManifestObject, doc: &KedaController, component: Component) -> Result<()> {
    let container = component.container_name();
    let view = doc.component(component);

    match component {
        Component::Operator | Component::AdmissionWebhooks => {
            args::upsert(object, container, LOG_LEVEL_ARG, LogLevel::normalize(view.log_level).as_str())?;
            args::upsert(
                object,
                container,
                LOG_ENCODER_ARG,
                LogEncoder::normalize(view.log_encoder).as_str(),
            )?;
            args::upsert(
                object,
                container,
                TIME_ENCODING_ARG,
                TimeEncoding::normalize(view.log_time_encoding).as_str(),
            )?;
        }
        Component::MetricsServer => {
            let verbosity = Verbosity::normalize(view.log_level).to_string();
            args::upsert(object, container, VERBOSITY_ARG, &verbosity)?;

            let audit = &doc.spec.metrics_server.audit_config;
            let audit_args = [
                (AUDIT_LOG_FORMAT_ARG, audit.log_format.as_str()),
                (AUDIT_MAX_AGE_ARG, audit.lifetime.max_age.as_str()),
                (AUDIT_MAX_BACKUP_ARG, audit.lifetime.max_backup.as_str()),
                (AUDIT_MAX_SIZE_ARG, audit.lifetime.max_size.as_str()),
            ];
            for (prefix, value) in audit_args {
                if !value.is_empty() {
                    args::upsert(object, container, prefix, value)?;
                }
            }
            if !audit.log_output_volume_claim.is_empty() {
                args::upsert(object, container, AUDIT_LOG_PATH_ARG, AUDIT_LOG_FILE)?;
            }
        }
    }

    if Attribute::WatchNamespace.components().contains(&component) {
        let key = object.key();
        object
            .container_mut(container)
            .ok_or_else(|| Error::ContainerNotFound {
                object: key,
                container: container.to_string(),
            })?
            .set_env(WATCH_NAMESPACE_ENV, &doc.spec.watch_namespace);
    }

    if let Some(annotations) = view.deployment_annotations {
        object.metadata.annotations.extend(
            annotations
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
    Ok(())
}

/// Point namespace references inside cluster-scoped objects at `namespace`.
fn rewrite_namespace_references(kind: &str, fields: &mut Extra, namespace: &str) {
    let ns = Value::String(namespace.to_string());
    match kind {
        "ClusterRoleBinding" | "RoleBinding" => {
            if let Some(Value::Array(subjects)) = fields.get_mut("subjects") {
                for subject in subjects.iter_mut() {
                    if subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount") {
                        if let Some(map) = subject.as_object_mut() {
                            map.insert("namespace".to_string(), ns.clone());
                        }
                    }
                }
            }
        }
        "APIService" => {
            if let Some(service) = fields
                .get_mut("spec")
                .and_then(|spec| spec.get_mut("service"))
                .and_then(Value::as_object_mut)
            {
                service.insert("namespace".to_string(), ns);
            }
        }
        "ValidatingWebhookConfiguration" | "MutatingWebhookConfiguration" => {
            if let Some(Value::Array(webhooks)) = fields.get_mut("webhooks") {
                for webhook in webhooks.iter_mut() {
                    if let Some(service) = webhook
                        .get_mut("clientConfig")
                        .and_then(|config| config.get_mut("service"))
                        .and_then(Value::as_object_mut)
                    {
                        service.insert("namespace".to_string(), ns.clone());
                    }
                }
            }
        }
        _ => {}
    }
}

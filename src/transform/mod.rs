//! Attribute transforms on the configuration resource.
//!
//! Each recognized attribute is one [`Attribute`] variant that knows which
//! field it writes, which components it affects and how its value is
//! normalized. Names are resolved once through [`Attribute::from_name`].

pub mod args;

use crate::error::{Error, Result};
use crate::models::*;

/// Annotation key of the correlation tag stamped by every transform.
pub const CORRELATION_TAG: &str = "testCase";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Namespace,
    WatchNamespace,
    LogLevel,
    AdmissionLogLevel,
    LogEncoder,
    AdmissionLogEncoder,
    LogTimeEncoding,
    AdmissionLogTimeEncoding,
    MetricsLogLevel,
    AuditLogFormat,
    AuditMaxAge,
    AuditMaxBackup,
    AuditLogMaxSize,
    AuditLogOutputVolumeClaim,
}

impl Attribute {
    pub const ALL: [Self; 14] = [
        Self::Namespace,
        Self::WatchNamespace,
        Self::LogLevel,
        Self::AdmissionLogLevel,
        Self::LogEncoder,
        Self::AdmissionLogEncoder,
        Self::LogTimeEncoding,
        Self::AdmissionLogTimeEncoding,
        Self::MetricsLogLevel,
        Self::AuditLogFormat,
        Self::AuditMaxAge,
        Self::AuditMaxBackup,
        Self::AuditLogMaxSize,
        Self::AuditLogOutputVolumeClaim,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::WatchNamespace => "watchNamespace",
            Self::LogLevel => "logLevel",
            Self::AdmissionLogLevel => "logLevel-admission",
            Self::LogEncoder => "logEncoder",
            Self::AdmissionLogEncoder => "logEncoder-admission",
            Self::LogTimeEncoding => "logTimeEncoding",
            Self::AdmissionLogTimeEncoding => "logTimeEncoding-admission",
            Self::MetricsLogLevel => "logLevel-metrics",
            Self::AuditLogFormat => "auditLogFormat",
            Self::AuditMaxAge => "auditMaxAge",
            Self::AuditMaxBackup => "auditMaxBackup",
            Self::AuditLogMaxSize => "auditLogMaxSize",
            Self::AuditLogOutputVolumeClaim => "auditLogOutputVolumeClaim",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| Error::UnknownAttribute(name.to_string()))
    }

    /// Components whose deployments reflect this attribute.
    pub fn components(&self) -> &'static [Component] {
        match self {
            Self::Namespace => &Component::ALL,
            Self::WatchNamespace => &[Component::Operator, Component::MetricsServer],
            Self::LogLevel | Self::LogEncoder | Self::LogTimeEncoding => &[Component::Operator],
            Self::AdmissionLogLevel | Self::AdmissionLogEncoder | Self::AdmissionLogTimeEncoding => {
                &[Component::AdmissionWebhooks]
            }
            Self::MetricsLogLevel
            | Self::AuditLogFormat
            | Self::AuditMaxAge
            | Self::AuditMaxBackup
            | Self::AuditLogMaxSize
            | Self::AuditLogOutputVolumeClaim => &[Component::MetricsServer],
        }
    }

    /// Value as it will be stored. Levels and encodings are coerced to their
    /// defaults; everything else is trusted verbatim.
    pub fn normalize(&self, value: &str) -> String {
        match self {
            Self::LogLevel | Self::AdmissionLogLevel => LogLevel::normalize(value).as_str().to_string(),
            Self::LogEncoder | Self::AdmissionLogEncoder => {
                LogEncoder::normalize(value).as_str().to_string()
            }
            Self::LogTimeEncoding | Self::AdmissionLogTimeEncoding => {
                TimeEncoding::normalize(value).as_str().to_string()
            }
            Self::MetricsLogLevel => Verbosity::normalize(value).to_string(),
            _ => value.to_string(),
        }
    }

    pub fn read<'a>(&self, doc: &'a KedaController) -> &'a str {
        let spec = &doc.spec;
        let audit = &spec.metrics_server.audit_config;
        match self {
            Self::Namespace => doc.namespace(),
            Self::WatchNamespace => &spec.watch_namespace,
            Self::LogLevel => &spec.operator.log_level,
            Self::AdmissionLogLevel => &spec.admission_webhooks.log_level,
            Self::LogEncoder => &spec.operator.log_encoder,
            Self::AdmissionLogEncoder => &spec.admission_webhooks.log_encoder,
            Self::LogTimeEncoding => &spec.operator.log_time_encoding,
            Self::AdmissionLogTimeEncoding => &spec.admission_webhooks.log_time_encoding,
            Self::MetricsLogLevel => &spec.metrics_server.log_level,
            Self::AuditLogFormat => &audit.log_format,
            Self::AuditMaxAge => &audit.lifetime.max_age,
            Self::AuditMaxBackup => &audit.lifetime.max_backup,
            Self::AuditLogMaxSize => &audit.lifetime.max_size,
            Self::AuditLogOutputVolumeClaim => &audit.log_output_volume_claim,
        }
    }

    fn field_mut<'a>(&self, doc: &'a mut KedaController) -> &'a mut String {
        let spec = &mut doc.spec;
        match self {
            Self::Namespace => doc.metadata.namespace.get_or_insert_with(String::new),
            Self::WatchNamespace => &mut spec.watch_namespace,
            Self::LogLevel => &mut spec.operator.log_level,
            Self::AdmissionLogLevel => &mut spec.admission_webhooks.log_level,
            Self::LogEncoder => &mut spec.operator.log_encoder,
            Self::AdmissionLogEncoder => &mut spec.admission_webhooks.log_encoder,
            Self::LogTimeEncoding => &mut spec.operator.log_time_encoding,
            Self::AdmissionLogTimeEncoding => &mut spec.admission_webhooks.log_time_encoding,
            Self::MetricsLogLevel => &mut spec.metrics_server.log_level,
            Self::AuditLogFormat => &mut spec.metrics_server.audit_config.log_format,
            Self::AuditMaxAge => &mut spec.metrics_server.audit_config.lifetime.max_age,
            Self::AuditMaxBackup => &mut spec.metrics_server.audit_config.lifetime.max_backup,
            Self::AuditLogMaxSize => &mut spec.metrics_server.audit_config.lifetime.max_size,
            Self::AuditLogOutputVolumeClaim => {
                &mut spec.metrics_server.audit_config.log_output_volume_claim
            }
        }
    }

    /// Write `value` and stamp `marker` as the correlation tag of every
    /// affected component.
    pub fn apply(&self, doc: &mut KedaController, value: &str, marker: &str) {
        *self.field_mut(doc) = self.normalize(value);
        for component in self.components() {
            doc.deployment_annotations_mut(*component)
                .insert(CORRELATION_TAG.to_string(), marker.to_string());
        }
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve `attribute` by name and apply it. The document is left untouched
/// when the name is not recognized.
pub fn apply(doc: &mut KedaController, attribute: &str, value: &str, marker: &str) -> Result<Attribute> {
    let attribute = Attribute::from_name(attribute)?;
    attribute.apply(doc, value, marker);
    tracing::debug!(
        "Applied attribute {}={:?} to {}/{}",
        attribute,
        value,
        doc.namespace(),
        doc.name()
    );
    Ok(attribute)
}

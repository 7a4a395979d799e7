//! Ordered collection of declarative objects loaded from a template.

mod source;

pub use source::*;

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{ManifestObject, ObjectKey};
use crate::scheme::Scheme;

/// The desired deployable footprint. Order is apply order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestModel {
    objects: Vec<ManifestObject>,
}

impl ManifestModel {
    /// Fails on duplicate identities.
    pub fn new(objects: Vec<ManifestObject>) -> Result<Self> {
        let mut seen = HashSet::new();
        for object in &objects {
            let key = object.key();
            if !seen.insert(key.clone()) {
                return Err(Error::template(format!("duplicate object {}", key)));
            }
        }
        Ok(Self { objects })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(scheme: &Scheme, source: &TemplateSource) -> Result<Self> {
        let content = source.read()?;
        let model = Self::parse(scheme, &content).map_err(|e| match e {
            Error::Template(message) => Error::template(format!("{}: {}", source, message)),
            Error::Conversion {
                kind,
                name,
                message,
            } => Error::template(format!("{}: {} {}: {}", source, kind, name, message)),
            other => other,
        })?;
        tracing::debug!("Loaded {} objects from {}", model.len(), source);
        Ok(model)
    }

    /// Parse a multi-document YAML string. Empty documents are skipped.
    pub fn parse(scheme: &Scheme, content: &str) -> Result<Self> {
        let mut objects = Vec::new();
        for document in serde_yaml::Deserializer::from_str(content) {
            let value = Value::deserialize(document)
                .map_err(|e| Error::template(format!("malformed YAML: {}", e)))?;
            if value.is_null() {
                continue;
            }
            objects.push(scheme.decode(value)?);
        }
        Self::new(objects)
    }

    pub fn select(&self, kind: &str, name: &str) -> Result<&ManifestObject> {
        self.objects
            .iter()
            .find(|o| o.kind == kind && o.metadata.name == name)
            .ok_or_else(|| Error::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&ManifestObject> {
        self.objects.iter().find(|o| &o.key() == key)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestObject> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.objects.iter().map(ManifestObject::key).collect()
    }

    /// Rewrite every object; identities may change, so uniqueness is re-checked.
    pub fn try_map<F>(self, f: F) -> Result<Self>
    where
        F: FnMut(ManifestObject) -> Result<ManifestObject>,
    {
        let objects = self
            .objects
            .into_iter()
            .map(f)
            .collect::<Result<Vec<_>>>()?;
        Self::new(objects)
    }

    /// Serialize as a multi-document YAML stream.
    pub fn to_yaml(&self) -> Result<String> {
        let mut out = String::new();
        for object in &self.objects {
            let yaml = object.to_yaml().map_err(|e| Error::Conversion {
                kind: object.kind.clone(),
                name: object.metadata.name.clone(),
                message: e.to_string(),
            })?;
            out.push_str("---\n");
            out.push_str(&yaml);
        }
        Ok(out)
    }
}

impl IntoIterator for ManifestModel {
    type Item = ManifestObject;
    type IntoIter = std::vec::IntoIter<ManifestObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.into_iter()
    }
}

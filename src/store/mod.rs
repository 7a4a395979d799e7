//! Resource store collaborator.
//!
//! The store owns live objects. Updates carry the concurrency token in
//! `metadata.resourceVersion` and fail with [`StoreError::Conflict`] when it is
//! stale. Objects with finalizers are only marked for deletion; they disappear
//! once an update clears the last finalizer.

mod memory;

pub use memory::*;

use std::collections::BTreeMap;
use std::future::Future;

use crate::error::StoreError;
use crate::models::{ManifestObject, ObjectKey};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait ResourceStore: Send + Sync + 'static {
    fn get(&self, key: &ObjectKey) -> impl Future<Output = StoreResult<ManifestObject>> + Send;

    fn list(
        &self,
        selector: &LabelSelector,
    ) -> impl Future<Output = StoreResult<Vec<ManifestObject>>> + Send;

    fn create(
        &self,
        object: ManifestObject,
    ) -> impl Future<Output = StoreResult<ManifestObject>> + Send;

    fn update(
        &self,
        object: ManifestObject,
    ) -> impl Future<Output = StoreResult<ManifestObject>> + Send;

    fn delete(&self, key: &ObjectKey) -> impl Future<Output = StoreResult<()>> + Send;
}

/// Equality-based label selector; an empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, object: &ManifestObject) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| object.metadata.labels.get(k) == Some(v))
    }
}

/// Store operations, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
}

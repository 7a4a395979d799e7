use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::{LabelSelector, Operation, ResourceStore, StoreResult};
use crate::error::StoreError;
use crate::models::{ManifestObject, ObjectKey};

/// In-process store with versioning, finalizer semantics and fault injection.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, ManifestObject>,
    faults: Vec<Fault>,
    latency: Option<Duration>,
    version: u64,
    calls: HashMap<Operation, u64>,
}

struct Fault {
    operation: Operation,
    kind: Option<String>,
    error: StoreError,
    remaining: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `operation` (optionally only for `kind`).
    pub fn fail_next(&self, operation: Operation, kind: Option<&str>, error: StoreError, times: u32) {
        if let Ok(mut state) = self.lock() {
            state.faults.push(Fault {
                operation,
                kind: kind.map(str::to_string),
                error,
                remaining: times,
            });
        }
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut state) = self.lock() {
            state.latency = latency;
        }
    }

    pub fn calls(&self, operation: Operation) -> u64 {
        self.lock()
            .map(|state| state.calls.get(&operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// All live objects, ordered by key.
    pub fn snapshot(&self) -> Vec<ManifestObject> {
        self.lock()
            .map(|state| state.objects.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock()
            .map(|state| state.objects.contains_key(key))
            .unwrap_or(false)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    async fn pause(&self) {
        let latency = self.lock().ok().and_then(|state| state.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl State {
    fn enter(&mut self, operation: Operation, kind: &str) -> StoreResult<()> {
        *self.calls.entry(operation).or_default() += 1;

        let fault = self.faults.iter_mut().find(|f| {
            f.operation == operation
                && f.remaining > 0
                && f.kind.as_deref().map_or(true, |k| k == kind)
        });
        let result = match fault {
            Some(fault) => {
                fault.remaining -= 1;
                Err(fault.error.clone())
            }
            None => Ok(()),
        };
        self.faults.retain(|f| f.remaining > 0);
        result
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> StoreResult<ManifestObject> {
        self.pause().await;
        let mut state = self.lock()?;
        state.enter(Operation::Get, &key.kind)?;
        state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn list(&self, selector: &LabelSelector) -> StoreResult<Vec<ManifestObject>> {
        self.pause().await;
        let mut state = self.lock()?;
        state.enter(Operation::List, "")?;
        Ok(state
            .objects
            .values()
            .filter(|o| selector.matches(o))
            .cloned()
            .collect())
    }

    async fn create(&self, mut object: ManifestObject) -> StoreResult<ManifestObject> {
        self.pause().await;
        let mut state = self.lock()?;
        let key = object.key();
        state.enter(Operation::Create, &key.kind)?;
        if state.objects.contains_key(&key) {
            return Err(StoreError::Conflict(key));
        }

        object.metadata.uid = Some(Uuid::new_v4().to_string());
        object.metadata.resource_version = Some(state.next_version());
        object.metadata.generation = Some(1);
        object.metadata.creation_timestamp = Some(Utc::now());
        object.metadata.deletion_timestamp = None;

        tracing::trace!("Created {}", key);
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(&self, mut object: ManifestObject) -> StoreResult<ManifestObject> {
        self.pause().await;
        let mut state = self.lock()?;
        let key = object.key();
        state.enter(Operation::Update, &key.kind)?;
        let live = state
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if object.metadata.resource_version.is_some()
            && object.metadata.resource_version != live.metadata.resource_version
        {
            return Err(StoreError::Conflict(key));
        }

        let changed = object.body != live.body;
        let generation = live.metadata.generation.unwrap_or(1);
        object.metadata.uid = live.metadata.uid.clone();
        object.metadata.creation_timestamp = live.metadata.creation_timestamp;
        object.metadata.deletion_timestamp = live.metadata.deletion_timestamp;
        object.metadata.generation = Some(if changed { generation + 1 } else { generation });

        if object.metadata.deletion_timestamp.is_some() && object.metadata.finalizers.is_empty() {
            tracing::trace!("Finalized {}", key);
            state.objects.remove(&key);
            return Ok(object);
        }

        object.metadata.resource_version = Some(state.next_version());
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.pause().await;
        let mut state = self.lock()?;
        state.enter(Operation::Delete, &key.kind)?;
        let version = state.next_version();
        let live = state
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if live.metadata.finalizers.is_empty() {
            state.objects.remove(key);
        } else if live.metadata.deletion_timestamp.is_none() {
            live.metadata.deletion_timestamp = Some(Utc::now());
            live.metadata.resource_version = Some(version);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Extra, ObjectBody, ObjectMeta};

    fn secret(name: &str) -> ManifestObject {
        ManifestObject {
            api_version: "v1".into(),
            kind: "Secret".into(),
            metadata: ObjectMeta {
                name: name.into(),
                namespace: Some("keda".into()),
                ..Default::default()
            },
            body: ObjectBody::Generic(Extra::new()),
        }
    }

    #[tokio::test]
    async fn create_assigns_server_fields() {
        let store = MemoryStore::new();
        let created = store.create(secret("a")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert_eq!(created.metadata.generation, Some(1));

        let err = store.create(secret("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(secret("a")).await.unwrap();
        store.update(created.clone()).await.unwrap();

        let err = store.update(created).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn finalizers_hold_deletion() {
        let store = MemoryStore::new();
        let mut object = secret("a");
        object.metadata.finalizers.push("test".into());
        let key = object.key();
        store.create(object).await.unwrap();

        store.delete(&key).await.unwrap();
        let mut live = store.get(&key).await.unwrap();
        assert!(live.metadata.deletion_timestamp.is_some());

        live.metadata.finalizers.clear();
        store.update(live).await.unwrap();
        assert!(!store.contains(&key));
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next(
            Operation::Get,
            Some("Secret"),
            StoreError::Unavailable("down".into()),
            1,
        );
        let key = ObjectKey::namespaced("Secret", "keda", "a");

        assert!(matches!(store.get(&key).await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.get(&key).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.calls(Operation::Get), 2);
    }
}

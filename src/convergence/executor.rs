//! Convergence executor: runs planned actions against the store.
//!
//! Every store call is bounded by the call timeout. `Unavailable` is retried
//! with the policy's backoff; `Conflict` re-reads the live object so the next
//! write carries a fresh token. The first terminal failure stops execution.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::planner::Action;
use super::retry::RetryPolicy;
use crate::error::{Error, Result, StoreError};
use crate::models::{ManifestObject, ObjectKey};
use crate::store::{ResourceStore, StoreResult};

/// What an execution pass did to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub created: Vec<ObjectKey>,
    pub updated: Vec<ObjectKey>,
    pub deleted: Vec<ObjectKey>,
    pub retries: u32,
}

impl ExecutionReport {
    pub fn changes(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// The action that stopped an execution pass.
#[derive(Debug)]
pub struct ExecutionFailure {
    pub verb: &'static str,
    pub key: ObjectKey,
    pub error: Error,
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to {} {}: {}", self.verb, self.key, self.error)
    }
}

enum Applied {
    Created,
    Updated,
    Deleted,
    Unchanged,
}

pub struct Executor<S> {
    store: Arc<S>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl<S: ResourceStore> Executor<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Executor {
            store,
            retry,
            call_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `actions` in order, recording progress in `report`.
    pub async fn execute(
        &self,
        actions: Vec<Action>,
        report: &mut ExecutionReport,
    ) -> std::result::Result<(), ExecutionFailure> {
        for action in actions {
            let verb = action.verb();
            let key = action.key();
            tracing::debug!("Executing {} {}", verb, key);

            let result = match action {
                Action::Create(object) => self.apply(object, false, &mut report.retries).await,
                Action::Update(object) => self.apply(object, true, &mut report.retries).await,
                Action::Delete(key) => self.remove(&key, &mut report.retries).await,
            };

            match result {
                Ok(Applied::Created) => report.created.push(key),
                Ok(Applied::Updated) => report.updated.push(key),
                Ok(Applied::Deleted) => report.deleted.push(key),
                Ok(Applied::Unchanged) => {}
                Err(error) => {
                    tracing::warn!("Failed to {} {}: {}", verb, key, error);
                    return Err(ExecutionFailure { verb, key, error });
                }
            }
        }
        Ok(())
    }

    /// Run one store call under the call timeout, retrying `Unavailable`.
    pub async fn call<T, F, Fut>(&self, operation: &str, retries: &mut u32, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(self.call_timeout, f())
                .await
                .map_err(|_| Error::Timeout {
                    operation: operation.to_string(),
                    after: self.call_timeout,
                })?;

            match result {
                Ok(value) => return Ok(value),
                Err(StoreError::Unavailable(message)) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        "{} unavailable ({}), retrying in {:?}",
                        operation,
                        message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    *retries += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn apply(&self, mut object: ManifestObject, mut exists: bool, retries: &mut u32) -> Result<Applied> {
        let store = &*self.store;
        let mut conflicts = 0;
        loop {
            let result = if exists {
                let candidate = object.clone();
                self.call("update", retries, move || store.update(candidate.clone()))
                    .await
                    .map(|_| Applied::Updated)
            } else {
                let candidate = object.clone();
                self.call("create", retries, move || store.create(candidate.clone()))
                    .await
                    .map(|_| Applied::Created)
            };

            match result {
                Err(Error::Store(StoreError::Conflict(key) | StoreError::NotFound(key)))
                    if self.retry.should_retry(conflicts) =>
                {
                    tokio::time::sleep(self.retry.delay(conflicts)).await;
                    conflicts += 1;
                    *retries += 1;
                    tracing::debug!("Refreshing {} after a stale write", key);

                    let key = &key;
                    match self.call("get", retries, move || store.get(key)).await {
                        Ok(live) => {
                            if object.same_desired_state(&live) {
                                return Ok(Applied::Unchanged);
                            }
                            object.metadata.adopt_server_fields(&live.metadata);
                            exists = true;
                        }
                        Err(Error::Store(StoreError::NotFound(_))) => {
                            object.metadata.clear_server_fields();
                            exists = false;
                        }
                        Err(e) => return Err(e),
                    }
                }
                other => return other,
            }
        }
    }

    async fn remove(&self, key: &ObjectKey, retries: &mut u32) -> Result<Applied> {
        let store = &*self.store;
        match self.call("delete", retries, move || store.delete(key)).await {
            Ok(()) => Ok(Applied::Deleted),
            Err(Error::Store(StoreError::NotFound(_))) => Ok(Applied::Unchanged),
            Err(e) => Err(e),
        }
    }
}

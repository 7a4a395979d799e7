//! Convergence engine: drives the live store toward a rendered manifest.
//!
//! # Attempt Lifecycle
//!
//! ```text
//! Pending -> Applying -> Converged
//!                     -> Failed
//! ```
//!
//! An attempt observes the live objects it owns, plans the difference with
//! [`planner::plan`] and runs it through the [`Executor`]. Failures are not
//! rolled back; the next attempt replans from whatever the store holds.

pub mod executor;
pub mod planner;
pub mod poll;
pub mod retry;

pub use executor::{ExecutionFailure, ExecutionReport, Executor};
pub use planner::{plan, Action};
pub use retry::{BackoffStrategy, RetryPolicy};

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result, StoreError};
use crate::manifest::ManifestModel;
use crate::models::{KedaController, ManifestObject, ObjectKey, Phase, ReconciliationStatus};
use crate::pipeline::{MANAGED_BY, MANAGED_BY_LABEL, OWNER_LABEL};
use crate::store::{LabelSelector, ResourceStore};

/// Selector for every object rendered on behalf of `owner`.
pub fn owner_selector(owner: &str) -> LabelSelector {
    LabelSelector::new()
        .with(MANAGED_BY_LABEL, MANAGED_BY)
        .with(OWNER_LABEL, owner)
}

// ============================================================
// Attempt state machine
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    phase: Phase,
    reason: Option<String>,
}

impl Attempt {
    pub fn new() -> Self {
        Attempt {
            phase: Phase::Pending,
            reason: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn begin(&mut self) -> Result<()> {
        self.transition(Phase::Applying, None)
    }

    pub fn converge(&mut self) -> Result<()> {
        self.transition(Phase::Converged, None)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(Phase::Failed, Some(reason.into()))
    }

    fn transition(&mut self, to: Phase, reason: Option<String>) -> Result<()> {
        let allowed = matches!(
            (self.phase, to),
            (Phase::Pending, Phase::Applying)
                | (Phase::Applying, Phase::Converged)
                | (Phase::Applying, Phase::Failed)
        );
        if !allowed {
            return Err(Error::InvalidTransition {
                from: self.phase.as_str(),
                to: to.as_str(),
            });
        }
        self.phase = to;
        self.reason = reason;
        Ok(())
    }

    pub fn status(&self) -> ReconciliationStatus {
        ReconciliationStatus {
            phase: self.phase,
            reason: self.reason.clone(),
        }
    }
}

impl Default for Attempt {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one convergence attempt.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: ReconciliationStatus,
    pub report: ExecutionReport,
    /// Set when the failure was transient and a later attempt may succeed.
    pub retryable: bool,
}

impl Outcome {
    pub fn is_converged(&self) -> bool {
        self.status.phase == Phase::Converged
    }
}

// ============================================================
// Engine
// ============================================================

pub struct ConvergenceEngine<S> {
    executor: Executor<S>,
}

impl<S: ResourceStore> ConvergenceEngine<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        ConvergenceEngine {
            executor: Executor::new(store, retry, call_timeout),
        }
    }

    pub fn store(&self) -> &S {
        self.executor.store()
    }

    /// Converge the objects owned by `owner` toward `desired`.
    pub async fn converge(&self, owner: &str, desired: &ManifestModel) -> Outcome {
        let mut attempt = Attempt::new();
        let mut report = ExecutionReport::default();
        let mut retryable = false;

        if let Err(e) = self.run(&mut attempt, owner, desired, &mut report, &mut retryable).await {
            // Only reachable if the state machine itself is misused.
            tracing::error!("Convergence attempt for {} aborted: {}", owner, e);
            return Outcome {
                status: ReconciliationStatus::failed(e.to_string()),
                report,
                retryable: false,
            };
        }

        Outcome {
            status: attempt.status(),
            report,
            retryable,
        }
    }

    async fn run(
        &self,
        attempt: &mut Attempt,
        owner: &str,
        desired: &ManifestModel,
        report: &mut ExecutionReport,
        retryable: &mut bool,
    ) -> Result<()> {
        attempt.begin()?;

        let live = match self.observe(owner, desired, &mut report.retries).await {
            Ok(live) => live,
            Err(e) => {
                *retryable = e.is_retryable();
                return attempt.fail(format!("failed to read live objects: {}", e));
            }
        };

        let actions = plan(desired, &live, &owner_selector(owner));
        tracing::debug!("Planned {} actions for {}", actions.len(), owner);

        match self.executor.execute(actions, report).await {
            Ok(()) => {
                tracing::info!(
                    "Converged {}: {} created, {} updated, {} deleted",
                    owner,
                    report.created.len(),
                    report.updated.len(),
                    report.deleted.len()
                );
                attempt.converge()
            }
            Err(failure) => {
                *retryable = failure.error.is_retryable();
                attempt.fail(failure.to_string())
            }
        }
    }

    /// Owned objects plus any live object that shares a key with a desired one.
    async fn observe(
        &self,
        owner: &str,
        desired: &ManifestModel,
        retries: &mut u32,
    ) -> Result<Vec<ManifestObject>> {
        let store = self.store();
        let selector = owner_selector(owner);
        let selector = &selector;
        let mut live = self
            .executor
            .call("list", retries, move || store.list(selector))
            .await?;

        for key in desired.keys() {
            if live.iter().any(|o| o.key() == key) {
                continue;
            }
            let key = &key;
            match self.executor.call("get", retries, move || store.get(key)).await {
                Ok(object) => live.push(object),
                Err(Error::Store(StoreError::NotFound(_))) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(live)
    }

    /// Read the live configuration resource.
    pub async fn controller(&self, key: &ObjectKey) -> Result<KedaController> {
        let store = self.store();
        let mut retries = 0;
        let object = self
            .executor
            .call("get", &mut retries, move || store.get(key))
            .await?;
        KedaController::try_from(object).map_err(|object| Error::Conversion {
            kind: object.kind,
            name: object.metadata.name,
            message: "object has no controller body".to_string(),
        })
    }

    /// Write back a modified configuration resource, re-reading it on conflict.
    ///
    /// `edit` is applied to the freshest copy before every write. Returns
    /// `Ok(None)` when the resource is gone.
    pub async fn modify<F>(&self, key: &ObjectKey, mut edit: F) -> Result<Option<KedaController>>
    where
        F: FnMut(&mut KedaController) -> bool + Send,
    {
        let store = self.store();
        let policy = self.executor.retry_policy().clone();
        let mut conflicts = 0;
        loop {
            let mut controller = match self.controller(key).await {
                Ok(controller) => controller,
                Err(Error::Store(StoreError::NotFound(_))) => return Ok(None),
                Err(e) => return Err(e),
            };
            if !edit(&mut controller) {
                return Ok(Some(controller));
            }

            let object = ManifestObject::from(controller.clone());
            let mut retries = 0;
            match self
                .executor
                .call("update", &mut retries, move || store.update(object.clone()))
                .await
            {
                Ok(written) => {
                    return Ok(Some(KedaController::try_from(written).unwrap_or(controller)));
                }
                Err(Error::Store(StoreError::Conflict(_))) if policy.should_retry(conflicts) => {
                    tokio::time::sleep(policy.delay(conflicts)).await;
                    conflicts += 1;
                }
                Err(Error::Store(StoreError::NotFound(_))) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Record `status` on the configuration resource.
    pub async fn write_status(&self, key: &ObjectKey, status: ReconciliationStatus) -> Result<()> {
        let phase = status.phase;
        self.modify(key, move |controller| {
            if controller.status.as_ref() == Some(&status) {
                return false;
            }
            controller.status = Some(status.clone());
            true
        })
        .await?;
        tracing::debug!("Recorded phase {} on {}", phase.as_str(), key);
        Ok(())
    }
}

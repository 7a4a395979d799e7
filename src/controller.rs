//! Reconciliation controller for `KedaController` resources.
//!
//! [`Reconciler`] runs one attempt for one resource: scope check, finalizer
//! bookkeeping, render, converge, status. [`Controller`] schedules attempts
//! so that each resource has at most one in flight; triggers that arrive in
//! the meantime collapse into a single follow-up attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::ControllerConfig;
use crate::convergence::{ConvergenceEngine, ExecutionReport};
use crate::error::{Error, Result, StoreError};
use crate::manifest::ManifestModel;
use crate::models::{KedaController, ObjectKey, ReconciliationStatus};
use crate::pipeline::Pipeline;
use crate::scheme::Scheme;
use crate::store::ResourceStore;

pub const FINALIZER: &str = "finalizer.keda.sh";
pub const SKIP_FINALIZATION_ANNOTATION: &str = "keda.sh/skip-finalization";
/// The only resource name the controller acts on.
pub const CONTROLLER_NAME: &str = "keda";

/// Result of one reconciliation attempt.
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    /// Status written to the resource; `None` once the resource is gone.
    pub status: Option<ReconciliationStatus>,
    pub report: ExecutionReport,
    pub retryable: bool,
}

impl Reconciled {
    fn gone(report: ExecutionReport) -> Self {
        Self {
            status: None,
            report,
            retryable: false,
        }
    }
}

// ============================================================
// Reconciler
// ============================================================

pub struct Reconciler<S> {
    config: ControllerConfig,
    pipeline: Pipeline,
    engine: ConvergenceEngine<S>,
}

impl<S: ResourceStore> Reconciler<S> {
    pub fn new(store: Arc<S>, scheme: Arc<Scheme>, config: ControllerConfig) -> Self {
        let engine = ConvergenceEngine::new(store, config.retry.clone(), config.call_timeout);
        Self {
            config,
            pipeline: Pipeline::new(scheme),
            engine,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn engine(&self) -> &ConvergenceEngine<S> {
        &self.engine
    }

    /// Run one attempt for the resource at `key`.
    ///
    /// Errors are returned only when the resource itself cannot be read or
    /// written; everything else ends up in the recorded status.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Reconciled> {
        let controller = match self.engine.controller(key).await {
            Ok(controller) => controller,
            Err(Error::Store(StoreError::NotFound(_))) => return self.cleanup(key).await,
            Err(e) => return Err(self.abort(key, e).await),
        };

        if controller.is_being_deleted() {
            return self.finalize(key, &controller).await;
        }

        if let Some(reason) = self.out_of_scope(controller.namespace(), controller.name()) {
            tracing::info!("Ignoring {}: {}", key, reason);
            return self.record(key, ReconciliationStatus::ignored(reason), Default::default(), false).await;
        }

        let added = self
            .engine
            .modify(key, |c| {
                if c.metadata.finalizers.iter().any(|f| f == FINALIZER) {
                    return false;
                }
                c.metadata.finalizers.push(FINALIZER.to_string());
                true
            })
            .await;
        let controller = match added {
            Ok(Some(controller)) => controller,
            Ok(None) => return Ok(Reconciled::gone(Default::default())),
            Err(e) => return Err(self.abort(key, e).await),
        };

        let rendered = match self.render(&controller) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!("Rendering {} failed: {}", key, e);
                let status = ReconciliationStatus::failed(e.to_string());
                return self.record(key, status, Default::default(), false).await;
            }
        };

        let outcome = self.engine.converge(controller.name(), &rendered).await;
        self.record(key, outcome.status, outcome.report, outcome.retryable).await
    }

    /// Render the component manifest for `controller` without touching the store.
    pub fn render(&self, controller: &KedaController) -> Result<ManifestModel> {
        let manifest = ManifestModel::load(self.pipeline.scheme(), &self.config.template)?;
        self.pipeline.render(&manifest, controller)
    }

    fn out_of_scope(&self, namespace: &str, name: &str) -> Option<String> {
        if namespace != self.config.install_namespace {
            return Some(format!(
                "KedaController must be created in namespace {}",
                self.config.install_namespace
            ));
        }
        if name != CONTROLLER_NAME {
            return Some(format!("KedaController must be named {}", CONTROLLER_NAME));
        }
        None
    }

    /// Remove what a deleted resource owned. Out-of-scope resources never
    /// owned anything, so their keys are left alone.
    async fn cleanup(&self, key: &ObjectKey) -> Result<Reconciled> {
        let namespace = key.namespace.as_deref().unwrap_or_default();
        if let Some(reason) = self.out_of_scope(namespace, &key.name) {
            tracing::debug!("{} is gone and owned nothing: {}", key, reason);
            return Ok(Reconciled::gone(Default::default()));
        }

        tracing::info!("{} is gone, removing what it owned", key);
        let outcome = self.engine.converge(&key.name, &ManifestModel::empty()).await;
        Ok(Reconciled {
            retryable: outcome.retryable,
            ..Reconciled::gone(outcome.report)
        })
    }

    /// Record a retryable error as `Failed` before handing it back.
    /// The write is best effort; the store may still be unreachable.
    async fn abort(&self, key: &ObjectKey, error: Error) -> Error {
        if error.is_retryable() {
            let status = ReconciliationStatus::failed(error.to_string());
            if let Err(e) = self.engine.write_status(key, status).await {
                tracing::warn!("Could not record failure on {}: {}", key, e);
            }
        }
        error
    }

    async fn finalize(&self, key: &ObjectKey, controller: &KedaController) -> Result<Reconciled> {
        if !controller.metadata.finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(Reconciled::gone(Default::default()));
        }

        let skip = controller
            .metadata
            .annotations
            .get(SKIP_FINALIZATION_ANNOTATION)
            .is_some_and(|v| v == "true");

        let mut report = ExecutionReport::default();
        if skip {
            tracing::warn!("Skipping cleanup of objects owned by {}", key);
        } else {
            let outcome = self
                .engine
                .converge(controller.name(), &ManifestModel::empty())
                .await;
            if !outcome.is_converged() {
                return self.record(key, outcome.status, outcome.report, outcome.retryable).await;
            }
            report = outcome.report;
        }

        let removed = self
            .engine
            .modify(key, |c| {
                let before = c.metadata.finalizers.len();
                c.metadata.finalizers.retain(|f| f != FINALIZER);
                c.metadata.finalizers.len() != before
            })
            .await;
        if let Err(e) = removed {
            return Err(self.abort(key, e).await);
        }
        tracing::info!("Finalized {}", key);
        Ok(Reconciled::gone(report))
    }

    async fn record(
        &self,
        key: &ObjectKey,
        status: ReconciliationStatus,
        report: ExecutionReport,
        retryable: bool,
    ) -> Result<Reconciled> {
        self.engine.write_status(key, status.clone()).await?;
        Ok(Reconciled {
            status: Some(status),
            report,
            retryable,
        })
    }
}

// ============================================================
// Controller
// ============================================================

/// How a trigger was handled.
#[derive(Debug)]
pub enum Trigger {
    /// A new attempt loop was spawned for the resource.
    Started(JoinHandle<()>),
    /// An attempt was already in flight; it will run once more when done.
    Coalesced,
}

pub struct Controller<S> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    reconciler: Reconciler<S>,
    slots: Mutex<HashMap<ObjectKey, Slot>>,
    attempts: AtomicU64,
}

struct Slot {
    rerun: bool,
}

impl<S> Clone for Controller<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ResourceStore> Controller<S> {
    pub fn new(reconciler: Reconciler<S>) -> Self {
        Self {
            inner: Arc::new(Inner {
                reconciler,
                slots: Mutex::new(HashMap::new()),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    pub fn reconciler(&self) -> &Reconciler<S> {
        &self.inner.reconciler
    }

    /// Number of attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Request an attempt for `key`.
    pub fn trigger(&self, key: ObjectKey) -> Trigger {
        {
            let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(slot) = slots.get_mut(&key) {
                slot.rerun = true;
                tracing::debug!("Coalesced trigger for {}", key);
                return Trigger::Coalesced;
            }
            slots.insert(key.clone(), Slot { rerun: false });
        }

        let controller = self.clone();
        Trigger::Started(tokio::spawn(async move { controller.drive(key).await }))
    }

    /// Trigger an attempt for every key received until the channel closes,
    /// then wait for the spawned attempts.
    pub async fn run(self, mut events: mpsc::Receiver<ObjectKey>) {
        let mut handles = Vec::new();
        while let Some(key) = events.recv().await {
            if let Trigger::Started(handle) = self.trigger(key) {
                handles.push(handle);
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Reconciliation task failed: {}", e);
            }
        }
    }

    async fn drive(&self, key: ObjectKey) {
        loop {
            let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let span = tracing::info_span!("reconcile", key = %key, attempt);
            let retryable = match self.inner.reconciler.reconcile(&key).instrument(span).await {
                Ok(reconciled) => reconciled.retryable,
                Err(e) => {
                    tracing::error!("Reconciling {} failed: {}", key, e);
                    e.is_retryable()
                }
            };

            if self.take_rerun(&key) {
                continue;
            }

            let requeue_after = self.inner.reconciler.config().requeue_after;
            match requeue_after {
                Some(delay) if retryable => {
                    tracing::info!("Requeueing {} in {:?}", key, delay);
                    tokio::time::sleep(delay).await;
                    if !self.claim(&key) {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// Clear the rerun flag, or release the slot when no rerun is pending.
    fn take_rerun(&self, key: &ObjectKey) -> bool {
        let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(key) {
            Some(slot) if slot.rerun => {
                slot.rerun = false;
                true
            }
            _ => {
                slots.remove(key);
                false
            }
        }
    }

    /// Take the slot for a requeued attempt unless a new loop already owns it.
    fn claim(&self, key: &ObjectKey) -> bool {
        let mut slots = self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(key) {
            Some(slot) => {
                slot.rerun = true;
                false
            }
            None => {
                slots.insert(key.clone(), Slot { rerun: false });
                true
            }
        }
    }
}

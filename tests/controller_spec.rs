//! Reconciliation controller tests.
//!
//! Each test drives the controller against an in-memory store holding one
//! `KedaController` resource, then inspects the live objects.

use std::sync::Arc;
use std::time::Duration;

use keda_reconciler::config::ControllerConfig;
use keda_reconciler::controller::*;
use keda_reconciler::convergence::{owner_selector, poll};
use keda_reconciler::error::StoreError;
use keda_reconciler::manifest::TemplateSource;
use keda_reconciler::models::*;
use keda_reconciler::pipeline::LOG_LEVEL_ARG;
use keda_reconciler::scheme::Scheme;
use keda_reconciler::store::{MemoryStore, Operation, ResourceStore};
use keda_reconciler::transform;

const WAIT: Duration = Duration::from_secs(2);

/// Helper to build a controller over a fresh store.
fn setup_with(config: ControllerConfig) -> (Controller<MemoryStore>, MemoryStore) {
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(Arc::new(store.clone()), Arc::new(Scheme::default()), config);
    (Controller::new(reconciler), store)
}

fn setup() -> (Controller<MemoryStore>, MemoryStore) {
    setup_with(ControllerConfig::for_testing())
}

/// Helper to store a `KedaController` resource.
async fn create_resource(store: &MemoryStore, namespace: &str, name: &str) -> ObjectKey {
    store
        .create(KedaController::new(namespace, name).into())
        .await
        .expect("Failed to create resource")
        .key()
}

async fn resource(store: &MemoryStore, key: &ObjectKey) -> KedaController {
    KedaController::try_from(store.get(key).await.expect("resource exists")).expect("controller body")
}

/// Helper to change one attribute on the live resource.
async fn set_attribute(store: &MemoryStore, key: &ObjectKey, attribute: &str, value: &str, marker: &str) {
    let mut controller = resource(store, key).await;
    transform::apply(&mut controller, attribute, value, marker).expect("known attribute");
    store.update(controller.into()).await.expect("Failed to update resource");
}

async fn reconcile(controller: &Controller<MemoryStore>, key: &ObjectKey) {
    match controller.trigger(key.clone()) {
        Trigger::Started(handle) => handle.await.expect("attempt task"),
        Trigger::Coalesced => panic!("no attempt should be in flight"),
    }
}

fn owned(store: &MemoryStore, owner: &str) -> Vec<ManifestObject> {
    let selector = owner_selector(owner);
    store.snapshot().into_iter().filter(|o| selector.matches(o)).collect()
}

fn operator_deployment() -> ObjectKey {
    ObjectKey::namespaced("Deployment", "keda", "keda-operator")
}

fn admission_deployment() -> ObjectKey {
    ObjectKey::namespaced("Deployment", "keda", "keda-admission")
}

mod log_levels {
    use super::*;

    #[tokio::test]
    async fn empty_level_becomes_info_then_debug_sticks() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;

        set_attribute(&store, &key, "logLevel", "", "case-1").await;
        reconcile(&controller, &key).await;
        poll::await_argument(&store, &operator_deployment(), "keda-operator", LOG_LEVEL_ARG, "info", "case-1", WAIT)
            .await
            .unwrap();

        set_attribute(&store, &key, "logLevel", "debug", "case-2").await;
        reconcile(&controller, &key).await;
        poll::await_argument(&store, &operator_deployment(), "keda-operator", LOG_LEVEL_ARG, "debug", "case-2", WAIT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn admission_level_is_independent() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;

        set_attribute(&store, &key, "logLevel", "debug", "case-3").await;
        set_attribute(&store, &key, "logLevel-admission", "foo", "case-4").await;
        reconcile(&controller, &key).await;

        poll::await_argument(&store, &operator_deployment(), "keda-operator", LOG_LEVEL_ARG, "debug", "case-3", WAIT)
            .await
            .unwrap();
        poll::await_argument(
            &store,
            &admission_deployment(),
            "keda-admission-webhooks",
            LOG_LEVEL_ARG,
            "info",
            "case-4",
            WAIT,
        )
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stale_marker_is_not_accepted() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;
        set_attribute(&store, &key, "logLevel", "info", "case-5").await;
        reconcile(&controller, &key).await;

        let result = poll::await_argument(
            &store,
            &operator_deployment(),
            "keda-operator",
            LOG_LEVEL_ARG,
            "info",
            "case-6",
            Duration::from_millis(200),
        )
        .await;
        assert!(result.is_err());
    }
}

mod status {
    use super::*;

    #[tokio::test]
    async fn converged_resource_records_status_and_finalizer() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;

        reconcile(&controller, &key).await;

        let live = resource(&store, &key).await;
        assert_eq!(live.status, Some(ReconciliationStatus::converged()));
        assert_eq!(live.metadata.finalizers, vec![FINALIZER.to_string()]);
        assert_eq!(owned(&store, "keda").len(), 10);
    }

    #[tokio::test]
    async fn resource_outside_install_namespace_is_ignored() {
        let (controller, store) = setup();
        let key = create_resource(&store, "default", "keda").await;

        reconcile(&controller, &key).await;

        let live = resource(&store, &key).await;
        let status = live.status.unwrap();
        assert_eq!(status.phase, Phase::Ignored);
        assert!(status.reason.unwrap().contains("namespace keda"));
        assert!(live.metadata.finalizers.is_empty());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn resource_with_another_name_is_ignored() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda-2").await;

        reconcile(&controller, &key).await;

        assert_eq!(resource(&store, &key).await.status.unwrap().phase, Phase::Ignored);
        assert!(owned(&store, "keda-2").is_empty());
    }

    #[tokio::test]
    async fn render_failure_records_failed_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig::for_testing()
            .with_template(TemplateSource::File(dir.path().join("missing.yaml")));
        let (controller, store) = setup_with(config);
        let key = create_resource(&store, "keda", "keda").await;

        let reconciled = controller.reconciler().reconcile(&key).await.unwrap();

        assert!(!reconciled.retryable);
        let status = resource(&store, &key).await.status.unwrap();
        assert_eq!(status.phase, Phase::Failed);
        assert!(status.reason.unwrap().contains("missing.yaml"));
        assert!(owned(&store, "keda").is_empty());
    }

    #[tokio::test]
    async fn store_failure_names_the_object() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;
        let target = ObjectKey::new("ClusterRole", None, "keda-operator");
        store.fail_next(
            Operation::Create,
            Some("ClusterRole"),
            StoreError::Forbidden {
                key: target.clone(),
                message: "rbac escalation".to_string(),
            },
            1,
        );

        reconcile(&controller, &key).await;

        let status = resource(&store, &key).await.status.unwrap();
        assert_eq!(status.phase, Phase::Failed);
        assert!(status.reason.unwrap().contains(&target.to_string()));
    }

    #[tokio::test]
    async fn missing_resource_cleans_up_what_it_owned() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;
        reconcile(&controller, &key).await;
        assert!(!owned(&store, "keda").is_empty());

        // Bypass finalization by dropping the finalizer first.
        let mut live = resource(&store, &key).await;
        live.metadata.finalizers.clear();
        store.update(live.into()).await.unwrap();
        store.delete(&key).await.unwrap();

        let reconciled = controller.reconciler().reconcile(&key).await.unwrap();

        assert!(reconciled.status.is_none());
        assert!(owned(&store, "keda").is_empty());
    }

    #[tokio::test]
    async fn deleting_an_ignored_namesake_keeps_the_install() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;
        reconcile(&controller, &key).await;
        let namesake = create_resource(&store, "default", "keda").await;
        reconcile(&controller, &namesake).await;
        assert_eq!(resource(&store, &namesake).await.status.unwrap().phase, Phase::Ignored);

        store.delete(&namesake).await.unwrap();
        assert!(!store.contains(&namesake));
        let reconciled = controller.reconciler().reconcile(&namesake).await.unwrap();

        assert!(reconciled.status.is_none());
        assert_eq!(reconciled.report.changes(), 0);
        assert_eq!(owned(&store, "keda").len(), 10);
        assert!(store.contains(&operator_deployment()));
        assert_eq!(resource(&store, &key).await.status, Some(ReconciliationStatus::converged()));
    }

    #[tokio::test]
    async fn unreachable_store_on_finalizer_write_records_failed() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;
        // One call plus three retries exhausts the policy.
        store.fail_next(
            Operation::Update,
            Some(KEDA_CONTROLLER_KIND),
            StoreError::Unavailable("apiserver restarting".into()),
            4,
        );

        let err = controller.reconciler().reconcile(&key).await.unwrap_err();

        assert!(err.is_retryable());
        let live = resource(&store, &key).await;
        assert!(live.metadata.finalizers.is_empty());
        let status = live.status.unwrap();
        assert_eq!(status.phase, Phase::Failed);
        assert!(status.reason.unwrap().contains("apiserver restarting"));
        assert!(owned(&store, "keda").is_empty());
    }
}

mod finalization {
    use super::*;

    #[tokio::test]
    async fn delete_removes_owned_objects_then_the_resource() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;
        reconcile(&controller, &key).await;

        store.delete(&key).await.unwrap();
        assert!(store.contains(&key), "finalizer keeps the resource");

        reconcile(&controller, &key).await;

        assert!(!store.contains(&key));
        assert!(owned(&store, "keda").is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn skip_annotation_abandons_the_cascade() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;
        reconcile(&controller, &key).await;

        let mut live = resource(&store, &key).await;
        live.metadata
            .annotations
            .insert(SKIP_FINALIZATION_ANNOTATION.to_string(), "true".to_string());
        store.update(live.into()).await.unwrap();
        store.delete(&key).await.unwrap();

        reconcile(&controller, &key).await;

        assert!(!store.contains(&key));
        assert_eq!(owned(&store, "keda").len(), 10);
    }

    #[tokio::test]
    async fn failed_cascade_keeps_the_finalizer() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;
        reconcile(&controller, &key).await;

        store.fail_next(
            Operation::Delete,
            Some("Deployment"),
            StoreError::Forbidden {
                key: admission_deployment(),
                message: "protected".to_string(),
            },
            1,
        );
        store.delete(&key).await.unwrap();
        reconcile(&controller, &key).await;

        let live = resource(&store, &key).await;
        assert!(live.is_being_deleted());
        assert_eq!(live.metadata.finalizers, vec![FINALIZER.to_string()]);
        assert_eq!(live.status.unwrap().phase, Phase::Failed);

        reconcile(&controller, &key).await;
        assert!(!store.contains(&key));
    }
}

mod scheduling {
    use super::*;

    #[tokio::test]
    async fn triggers_during_an_attempt_are_coalesced() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;

        let first = controller.trigger(key.clone());
        let second = controller.trigger(key.clone());
        let third = controller.trigger(key.clone());

        assert!(matches!(second, Trigger::Coalesced));
        assert!(matches!(third, Trigger::Coalesced));
        match first {
            Trigger::Started(handle) => handle.await.unwrap(),
            Trigger::Coalesced => panic!("first trigger must start an attempt"),
        }
        assert_eq!(controller.attempts(), 2);
    }

    #[tokio::test]
    async fn different_resources_run_independently() {
        let (controller, store) = setup();
        let keda = create_resource(&store, "keda", "keda").await;
        let other = create_resource(&store, "default", "keda").await;

        let first = controller.trigger(keda.clone());
        let second = controller.trigger(other.clone());

        for trigger in [first, second] {
            match trigger {
                Trigger::Started(handle) => handle.await.unwrap(),
                Trigger::Coalesced => panic!("distinct resources must not coalesce"),
            }
        }
        assert_eq!(controller.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_is_requeued() {
        let config = ControllerConfig::for_testing().with_requeue_after(Some(Duration::from_secs(5)));
        let (controller, store) = setup_with(config);
        let key = create_resource(&store, "keda", "keda").await;
        store.fail_next(
            Operation::Create,
            Some("ServiceAccount"),
            StoreError::Unavailable("apiserver restarting".to_string()),
            4,
        );

        reconcile(&controller, &key).await;

        assert_eq!(controller.attempts(), 2);
        assert_eq!(
            resource(&store, &key).await.status,
            Some(ReconciliationStatus::converged())
        );
    }

    #[tokio::test]
    async fn run_consumes_events_until_closed() {
        let (controller, store) = setup();
        let key = create_resource(&store, "keda", "keda").await;
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        let runner = tokio::spawn(controller.clone().run(rx));
        tx.send(key.clone()).await.unwrap();
        drop(tx);
        runner.await.unwrap();

        assert!(controller.attempts() >= 1);
        assert_eq!(
            resource(&store, &key).await.status,
            Some(ReconciliationStatus::converged())
        );
    }
}

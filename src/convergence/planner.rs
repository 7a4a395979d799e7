//! Action planner: diffs the rendered manifest against live objects.
//!
//! The planner is stateless. It takes a snapshot of the live objects and the
//! desired model and returns the actions that converge them, without
//! executing anything itself.

use std::collections::HashSet;

use crate::manifest::ManifestModel;
use crate::models::{ManifestObject, ObjectKey};
use crate::store::LabelSelector;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Create(ManifestObject),
    /// Desired object carrying the live concurrency token.
    Update(ManifestObject),
    Delete(ObjectKey),
}

impl Action {
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Create(object) | Self::Update(object) => object.key(),
            Self::Delete(key) => key.clone(),
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
        }
    }
}

/// Compute the actions that move `live` to `desired`.
///
/// # Returns
///
/// Actions in execution order:
/// 1. Creates and updates, in manifest order
/// 2. Deletes of owned objects missing from the manifest, in reverse live order
///
/// Objects whose desired state already matches are left alone. Objects that
/// are not selected by `owned` are never deleted.
pub fn plan(desired: &ManifestModel, live: &[ManifestObject], owned: &LabelSelector) -> Vec<Action> {
    let mut actions = Vec::new();

    for object in desired.iter() {
        let key = object.key();
        match live.iter().find(|l| l.key() == key) {
            None => actions.push(Action::Create(object.clone())),
            Some(current) if !object.same_desired_state(current) => {
                let mut update = object.clone();
                update.metadata.adopt_server_fields(&current.metadata);
                actions.push(Action::Update(update));
            }
            Some(_) => {}
        }
    }

    let wanted: HashSet<ObjectKey> = desired.keys().into_iter().collect();
    for current in live.iter().rev() {
        let key = current.key();
        if owned.matches(current)
            && !wanted.contains(&key)
            && current.metadata.deletion_timestamp.is_none()
        {
            actions.push(Action::Delete(key));
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;

    fn service(namespace: &str, name: &str, owner: Option<&str>) -> ManifestObject {
        let mut metadata = ObjectMeta {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Default::default()
        };
        if let Some(owner) = owner {
            metadata.labels.insert("owner".into(), owner.into());
        }
        ManifestObject {
            api_version: "v1".into(),
            kind: "Service".into(),
            metadata,
            body: ObjectBody::Generic(Extra::new()),
        }
    }

    fn live(mut object: ManifestObject, version: &str) -> ManifestObject {
        object.metadata.resource_version = Some(version.into());
        object.metadata.uid = Some(format!("uid-{}", version));
        object
    }

    fn selector() -> LabelSelector {
        LabelSelector::new().with("owner", "keda")
    }

    #[test]
    fn no_changes_produces_empty() {
        let desired = ManifestModel::new(vec![service("keda", "a", Some("keda"))]).unwrap();
        let current = vec![live(service("keda", "a", Some("keda")), "7")];
        assert!(plan(&desired, &current, &selector()).is_empty());
    }

    #[test]
    fn creates_missing_objects() {
        let desired = ManifestModel::new(vec![service("keda", "a", Some("keda"))]).unwrap();
        let actions = plan(&desired, &[], &selector());
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], Action::Create(o) if o.metadata.name == "a"));
    }

    #[test]
    fn update_carries_live_token() {
        let mut changed = service("keda", "a", Some("keda"));
        changed.metadata.annotations.insert("testCase".into(), "2".into());
        let desired = ManifestModel::new(vec![changed]).unwrap();
        let current = vec![live(service("keda", "a", Some("keda")), "7")];

        let actions = plan(&desired, &current, &selector());
        match &actions[..] {
            [Action::Update(o)] => {
                assert_eq!(o.metadata.resource_version.as_deref(), Some("7"));
                assert_eq!(o.metadata.annotations["testCase"], "2");
            }
            other => panic!("unexpected actions: {:?}", other),
        }
    }

    #[test]
    fn deletes_only_owned_orphans() {
        let desired = ManifestModel::empty();
        let current = vec![
            live(service("keda", "mine", Some("keda")), "1"),
            live(service("keda", "theirs", Some("other")), "2"),
            live(service("keda", "unlabelled", None), "3"),
        ];
        let actions = plan(&desired, &current, &selector());
        assert_eq!(
            actions,
            vec![Action::Delete(ObjectKey::namespaced("Service", "keda", "mine"))]
        );
    }

    #[test]
    fn namespace_move_creates_new_and_deletes_old() {
        let desired = ManifestModel::new(vec![service("default", "a", Some("keda"))]).unwrap();
        let current = vec![live(service("keda", "a", Some("keda")), "1")];
        let actions = plan(&desired, &current, &selector());
        let verbs: Vec<String> = actions
            .iter()
            .map(|a| format!("{}:{}", a.verb(), a.key()))
            .collect();
        assert_eq!(
            verbs,
            vec!["create:Service default/a", "delete:Service keda/a"]
        );
    }

    #[test]
    fn deletes_run_in_reverse_order() {
        let current = vec![
            live(service("keda", "first", Some("keda")), "1"),
            live(service("keda", "second", Some("keda")), "2"),
        ];
        let actions = plan(&ManifestModel::empty(), &current, &selector());
        let names: Vec<String> = actions.iter().map(|a| a.key().name).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn objects_already_being_deleted_are_skipped() {
        let mut terminating = live(service("keda", "a", Some("keda")), "1");
        terminating.metadata.deletion_timestamp = Some(chrono::Utc::now());
        assert!(plan(&ManifestModel::empty(), &[terminating], &selector()).is_empty());
    }
}

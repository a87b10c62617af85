//! In-memory cluster for reconcile scenarios.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Namespace, NamespaceStatus, ObjectReference, Pod, PodStatus, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::error::ErrorResponse;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::build_crd::Build;
use crate::cluster::{Cluster, EventKind};
use crate::reference::NamespacedName;
use crate::workspace_crd::{ComponentSpec, Workspace, WorkspaceSpec};
use crate::{Error, Result, WORKSPACE_FINALIZER};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub object: String,
    pub kind: EventKind,
    pub reason: String,
    pub note: String,
}

#[derive(Default)]
struct State {
    revision: u64,
    workspaces: BTreeMap<NamespacedName, Workspace>,
    builds: BTreeMap<NamespacedName, Build>,
    namespaces: BTreeMap<String, Namespace>,
    services: BTreeMap<NamespacedName, Service>,
    ingresses: BTreeMap<NamespacedName, Ingress>,
    pods: BTreeMap<NamespacedName, Pod>,
    secrets: BTreeMap<NamespacedName, Secret>,
    events: Vec<RecordedEvent>,
    conflicts: u32,
}

impl State {
    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Fills in what the API server would on create.
    fn admit<K: Resource>(&mut self, obj: &mut K) {
        let revision = self.next_revision();
        let meta = obj.meta_mut();
        if meta.name.is_none() {
            let prefix = meta.generate_name.clone().unwrap_or_default();
            meta.name = Some(format!("{prefix}{revision:05}"));
        }
        meta.uid = Some(format!("uid-{revision}"));
        meta.resource_version = Some(revision.to_string());
    }

    fn take_conflict(&mut self) -> bool {
        if self.conflicts > 0 {
            self.conflicts -= 1;
            true
        } else {
            false
        }
    }
}

fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.and_then(|l| l.get(key)).map(String::as_str) == Some(value),
            None => false,
        })
}

fn roundtrip<K: Serialize + DeserializeOwned>(obj: &K) -> K {
    serde_json::from_value(serde_json::to_value(obj).unwrap()).unwrap()
}

/// Workspace named `name` in `default`, admitted with a tag and finalizer.
pub fn workspace_fixture(name: &str, components: Vec<ComponentSpec>) -> Workspace {
    let mut workspace = Workspace::new(
        name,
        WorkspaceSpec {
            host: "example.com".to_string(),
            tag: "wdemo".to_string(),
            components,
            environments: vec![],
        },
    );
    workspace.metadata.namespace = Some("default".to_string());
    workspace.metadata.finalizers = Some(vec![WORKSPACE_FINALIZER.to_string()]);
    workspace
}

/// Cluster API in memory with resourceVersion checks on status writes,
/// generateName, finalizer-blocked deletion and terminating namespaces.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn insert_workspace(&self, mut workspace: Workspace) -> Workspace {
        let mut state = self.state();
        state.admit(&mut workspace);
        state
            .workspaces
            .insert(NamespacedName::of(&workspace), workspace.clone());
        workspace
    }

    pub fn insert_build(&self, mut build: Build) -> Build {
        let mut state = self.state();
        state.admit(&mut build);
        state.builds.insert(NamespacedName::of(&build), build.clone());
        build
    }

    pub fn insert_secret(&self, mut secret: Secret) {
        let mut state = self.state();
        state.admit(&mut secret);
        state.secrets.insert(NamespacedName::of(&secret), secret);
    }

    pub fn workspace(&self, key: &NamespacedName) -> Option<Workspace> {
        self.state().workspaces.get(key).cloned()
    }

    pub fn build(&self, key: &NamespacedName) -> Option<Build> {
        self.state().builds.get(key).cloned()
    }

    pub fn builds(&self) -> Vec<Build> {
        self.state().builds.values().cloned().collect()
    }

    pub fn namespaces(&self) -> Vec<Namespace> {
        self.state().namespaces.values().cloned().collect()
    }

    pub fn ingresses(&self) -> Vec<Ingress> {
        self.state().ingresses.values().cloned().collect()
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.state().pods.values().cloned().collect()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state().events.clone()
    }

    /// Fails the next `count` status writes with a conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.state().conflicts = count;
    }

    /// Changes a build the way another writer would.
    pub fn update_build(&self, key: &NamespacedName, change: impl FnOnce(&mut Build)) {
        let mut state = self.state();
        let revision = state.next_revision();
        if let Some(build) = state.builds.get_mut(key) {
            change(build);
            build.metadata.resource_version = Some(revision.to_string());
        }
    }

    pub fn set_pod_status(&self, key: &NamespacedName, status: PodStatus) {
        let mut state = self.state();
        let revision = state.next_revision();
        if let Some(pod) = state.pods.get_mut(key) {
            pod.status = Some(status);
            pod.metadata.resource_version = Some(revision.to_string());
        }
    }

    /// Requests deletion; the workspace stays until its finalizers are gone.
    pub fn delete_workspace(&self, key: &NamespacedName) {
        let mut state = self.state();
        let revision = state.next_revision();
        if let Some(workspace) = state.workspaces.get_mut(key) {
            workspace.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            workspace.metadata.resource_version = Some(revision.to_string());
        }
    }

    pub fn namespace_is_terminating(&self, name: &str) -> bool {
        self.state()
            .namespaces
            .get(name)
            .map_or(false, |ns| ns.metadata.deletion_timestamp.is_some())
    }

    pub fn finish_namespace_deletion(&self, name: &str) {
        let mut state = self.state();
        state.namespaces.remove(name);
        state.services.retain(|key, _| key.namespace != name);
        state.ingresses.retain(|key, _| key.namespace != name);
        state.pods.retain(|key, _| key.namespace != name);
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn get_workspace(&self, key: &NamespacedName) -> Result<Option<Workspace>> {
        Ok(self.workspace(key))
    }

    async fn replace_workspace_status(&self, workspace: &Workspace) -> Result<Workspace> {
        let mut state = self.state();
        if state.take_conflict() {
            return Err(api_error(409, "Conflict"));
        }
        let key = NamespacedName::of(workspace);
        let revision = state.next_revision();
        let stored = state
            .workspaces
            .get_mut(&key)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if stored.metadata.resource_version != workspace.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }
        stored.status = workspace.status.clone().map(|s| roundtrip(&s));
        stored.metadata.resource_version = Some(revision.to_string());
        Ok(stored.clone())
    }

    async fn patch_workspace(&self, key: &NamespacedName, patch: &Value) -> Result<Workspace> {
        let mut state = self.state();
        let revision = state.next_revision();
        let stored = state
            .workspaces
            .get(key)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))?;

        let expected = &patch["metadata"]["resourceVersion"];
        if !expected.is_null() && expected.as_str() != stored.metadata.resource_version.as_deref() {
            return Err(api_error(409, "Conflict"));
        }

        let mut document = serde_json::to_value(&stored)?;
        json_patch::merge(&mut document, patch);
        let mut patched: Workspace = serde_json::from_value(document)?;
        patched.metadata.resource_version = Some(revision.to_string());

        let released = patched
            .metadata
            .finalizers
            .as_ref()
            .map_or(true, |f| f.is_empty());
        if patched.metadata.deletion_timestamp.is_some() && released {
            state.workspaces.remove(key);
        } else {
            state.workspaces.insert(key.clone(), patched.clone());
        }
        Ok(patched)
    }

    async fn get_build(&self, key: &NamespacedName) -> Result<Option<Build>> {
        Ok(self.build(key))
    }

    async fn list_builds(&self, namespace: &str, selector: &str) -> Result<Vec<Build>> {
        Ok(self
            .state()
            .builds
            .values()
            .filter(|b| b.metadata.namespace.as_deref() == Some(namespace))
            .filter(|b| matches_selector(b.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn create_build(&self, build: &Build) -> Result<Build> {
        Ok(self.insert_build(build.clone()))
    }

    async fn replace_build_status(&self, build: &Build) -> Result<Build> {
        let mut state = self.state();
        if state.take_conflict() {
            return Err(api_error(409, "Conflict"));
        }
        let key = NamespacedName::of(build);
        let revision = state.next_revision();
        let stored = state
            .builds
            .get_mut(&key)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if stored.metadata.resource_version != build.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }
        stored.status = build.status.clone().map(|s| roundtrip(&s));
        stored.metadata.resource_version = Some(revision.to_string());
        Ok(stored.clone())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        Ok(self.state().namespaces.get(name).cloned())
    }

    async fn list_namespaces(&self, selector: &str) -> Result<Vec<Namespace>> {
        Ok(self
            .state()
            .namespaces
            .values()
            .filter(|ns| matches_selector(ns.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let mut state = self.state();
        let mut namespace = namespace.clone();
        state.admit(&mut namespace);
        namespace.status = Some(NamespaceStatus {
            phase: Some("Active".to_string()),
            ..Default::default()
        });
        let name = namespace.metadata.name.clone().unwrap_or_default();
        if state.namespaces.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.namespaces.insert(name, namespace.clone());
        Ok(namespace)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        let namespace = state
            .namespaces
            .get_mut(name)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        namespace.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        namespace.status = Some(NamespaceStatus {
            phase: Some("Terminating".to_string()),
            ..Default::default()
        });
        Ok(())
    }

    async fn get_service(&self, key: &NamespacedName) -> Result<Option<Service>> {
        Ok(self.state().services.get(key).cloned())
    }

    async fn ensure_service(&self, service: &Service) -> Result<Service> {
        let mut state = self.state();
        let key = NamespacedName::of(service);
        if let Some(existing) = state.services.get(&key) {
            return Ok(existing.clone());
        }
        let mut service = service.clone();
        state.admit(&mut service);
        state.services.insert(key, service.clone());
        Ok(service)
    }

    async fn ensure_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        let mut state = self.state();
        let key = NamespacedName::of(ingress);
        if let Some(existing) = state.ingresses.get(&key) {
            return Ok(existing.clone());
        }
        let mut ingress = ingress.clone();
        state.admit(&mut ingress);
        state.ingresses.insert(key, ingress.clone());
        Ok(ingress)
    }

    async fn get_pod(&self, key: &NamespacedName) -> Result<Option<Pod>> {
        Ok(self.state().pods.get(key).cloned())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        Ok(self
            .state()
            .pods
            .values()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| matches_selector(p.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.state();
        let mut pod = pod.clone();
        state.admit(&mut pod);
        let key = NamespacedName::of(&pod);
        if state.pods.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.pods.insert(key, pod.clone());
        Ok(pod)
    }

    async fn ensure_pod(&self, pod: &Pod) -> Result<Pod> {
        let key = NamespacedName::of(pod);
        let existing = self.state().pods.get(&key).cloned();
        match existing {
            Some(existing) => Ok(existing),
            None => self.create_pod(pod).await,
        }
    }

    async fn delete_pod(&self, key: &NamespacedName) -> Result<bool> {
        Ok(self.state().pods.remove(key).is_some())
    }

    async fn get_secret(&self, key: &NamespacedName) -> Result<Option<Secret>> {
        Ok(self.state().secrets.get(key).cloned())
    }

    async fn publish_event(
        &self,
        regarding: &ObjectReference,
        kind: EventKind,
        reason: &str,
        note: &str,
    ) -> Result<()> {
        self.state().events.push(RecordedEvent {
            object: regarding.name.clone().unwrap_or_default(),
            kind,
            reason: reason.to_string(),
            note: note.to_string(),
        });
        Ok(())
    }
}

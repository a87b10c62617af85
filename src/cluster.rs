use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use k8s_openapi::api::core::v1::{Namespace, ObjectReference, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::build_crd::{Build, BuildStatus};
use crate::reference::NamespacedName;
use crate::workspace_crd::{Workspace, WorkspaceStatus};
use crate::{Error, Result};

/// Attempts at a status write before a conflict is handed back to the caller.
pub const MAX_CONFLICT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// The slice of the cluster API the controllers and the worker rely on.
///
/// `ensure_*` calls create the object and adopt the existing one when it is
/// already there.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn get_workspace(&self, key: &NamespacedName) -> Result<Option<Workspace>>;
    async fn replace_workspace_status(&self, workspace: &Workspace) -> Result<Workspace>;
    async fn patch_workspace(&self, key: &NamespacedName, patch: &Value) -> Result<Workspace>;

    async fn get_build(&self, key: &NamespacedName) -> Result<Option<Build>>;
    async fn list_builds(&self, namespace: &str, selector: &str) -> Result<Vec<Build>>;
    async fn create_build(&self, build: &Build) -> Result<Build>;
    async fn replace_build_status(&self, build: &Build) -> Result<Build>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>>;
    async fn list_namespaces(&self, selector: &str) -> Result<Vec<Namespace>>;
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn get_service(&self, key: &NamespacedName) -> Result<Option<Service>>;
    async fn ensure_service(&self, service: &Service) -> Result<Service>;
    async fn ensure_ingress(&self, ingress: &Ingress) -> Result<Ingress>;

    async fn get_pod(&self, key: &NamespacedName) -> Result<Option<Pod>>;
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;
    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;
    async fn ensure_pod(&self, pod: &Pod) -> Result<Pod>;
    /// Returns false when the pod was already gone.
    async fn delete_pod(&self, key: &NamespacedName) -> Result<bool>;

    async fn get_secret(&self, key: &NamespacedName) -> Result<Option<Secret>>;

    async fn publish_event(
        &self,
        regarding: &ObjectReference,
        kind: EventKind,
        reason: &str,
        note: &str,
    ) -> Result<()>;
}

/// `Cluster` backed by the API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    reporter: Reporter,
}

impl KubeCluster {
    pub fn new(client: Client, controller: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespace_of<K: Resource>(obj: &K) -> Result<String> {
        obj.meta().namespace.clone().ok_or_else(|| {
            Error::UserInputError(format!(
                "{} must have a namespace",
                obj.meta().name.clone().unwrap_or_default()
            ))
        })
    }
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

/// Creates `obj`, or returns the object already stored under its name.
async fn create_or_adopt<K>(api: &Api<K>, obj: &K) -> Result<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(created) => Ok(created),
        Err(kube::Error::Api(resp)) if resp.code == 409 => {
            let name = obj.meta().name.clone().unwrap_or_default();
            debug!(%name, "adopting existing object");
            Ok(api.get(&name).await?)
        }
        Err(e) => Err(e.into()),
    }
}

async fn replace_status<K>(api: &Api<K>, obj: &K) -> Result<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = obj.meta().name.clone().unwrap_or_default();
    let data = serde_json::to_vec(obj)?;
    Ok(api.replace_status(&name, &PostParams::default(), data).await?)
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get_workspace(&self, key: &NamespacedName) -> Result<Option<Workspace>> {
        get_opt(&self.namespaced(&key.namespace), &key.name).await
    }

    async fn replace_workspace_status(&self, workspace: &Workspace) -> Result<Workspace> {
        let api: Api<Workspace> = self.namespaced(&Self::namespace_of(workspace)?);
        replace_status(&api, workspace).await
    }

    async fn patch_workspace(&self, key: &NamespacedName, patch: &Value) -> Result<Workspace> {
        let api: Api<Workspace> = self.namespaced(&key.namespace);
        Ok(api
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn get_build(&self, key: &NamespacedName) -> Result<Option<Build>> {
        get_opt(&self.namespaced(&key.namespace), &key.name).await
    }

    async fn list_builds(&self, namespace: &str, selector: &str) -> Result<Vec<Build>> {
        let api: Api<Build> = self.namespaced(namespace);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn create_build(&self, build: &Build) -> Result<Build> {
        let api: Api<Build> = self.namespaced(&Self::namespace_of(build)?);
        Ok(api.create(&PostParams::default(), build).await?)
    }

    async fn replace_build_status(&self, build: &Build) -> Result<Build> {
        let api: Api<Build> = self.namespaced(&Self::namespace_of(build)?);
        replace_status(&api, build).await
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        get_opt(&Api::all(self.client.clone()), name).await
    }

    async fn list_namespaces(&self, selector: &str) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), namespace).await?)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_service(&self, key: &NamespacedName) -> Result<Option<Service>> {
        get_opt(&self.namespaced(&key.namespace), &key.name).await
    }

    async fn ensure_service(&self, service: &Service) -> Result<Service> {
        create_or_adopt(&self.namespaced(&Self::namespace_of(service)?), service).await
    }

    async fn ensure_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        create_or_adopt(&self.namespaced(&Self::namespace_of(ingress)?), ingress).await
    }

    async fn get_pod(&self, key: &NamespacedName) -> Result<Option<Pod>> {
        get_opt(&self.namespaced(&key.namespace), &key.name).await
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = self.namespaced(namespace);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let api: Api<Pod> = self.namespaced(&Self::namespace_of(pod)?);
        Ok(api.create(&PostParams::default(), pod).await?)
    }

    async fn ensure_pod(&self, pod: &Pod) -> Result<Pod> {
        create_or_adopt(&self.namespaced(&Self::namespace_of(pod)?), pod).await
    }

    async fn delete_pod(&self, key: &NamespacedName) -> Result<bool> {
        let api: Api<Pod> = self.namespaced(&key.namespace);
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_secret(&self, key: &NamespacedName) -> Result<Option<Secret>> {
        get_opt(&self.namespaced(&key.namespace), &key.name).await
    }

    async fn publish_event(
        &self,
        regarding: &ObjectReference,
        kind: EventKind,
        reason: &str,
        note: &str,
    ) -> Result<()> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), regarding.clone());
        recorder
            .publish(Event {
                type_: match kind {
                    EventKind::Normal => EventType::Normal,
                    EventKind::Warning => EventType::Warning,
                },
                reason: reason.to_string(),
                note: Some(note.to_string()),
                action: reason.to_string(),
                secondary: None,
            })
            .await?;
        Ok(())
    }
}

/// Resources whose status subresource is written through `Cluster`.
#[async_trait]
pub trait StatusSubresource: Resource + Clone + Send + Sync + Sized {
    type Status: Default + Clone + Send + Sync;

    const KIND: &'static str;

    fn status_mut(&mut self) -> &mut Option<Self::Status>;

    async fn fetch(cluster: &dyn Cluster, key: &NamespacedName) -> Result<Option<Self>>;

    async fn store_status(cluster: &dyn Cluster, obj: &Self) -> Result<Self>;
}

#[async_trait]
impl StatusSubresource for Workspace {
    type Status = WorkspaceStatus;

    const KIND: &'static str = "Workspace";

    fn status_mut(&mut self) -> &mut Option<WorkspaceStatus> {
        &mut self.status
    }

    async fn fetch(cluster: &dyn Cluster, key: &NamespacedName) -> Result<Option<Self>> {
        cluster.get_workspace(key).await
    }

    async fn store_status(cluster: &dyn Cluster, obj: &Self) -> Result<Self> {
        cluster.replace_workspace_status(obj).await
    }
}

#[async_trait]
impl StatusSubresource for Build {
    type Status = BuildStatus;

    const KIND: &'static str = "Build";

    fn status_mut(&mut self) -> &mut Option<BuildStatus> {
        &mut self.status
    }

    async fn fetch(cluster: &dyn Cluster, key: &NamespacedName) -> Result<Option<Self>> {
        cluster.get_build(key).await
    }

    async fn store_status(cluster: &dyn Cluster, obj: &Self) -> Result<Self> {
        cluster.replace_build_status(obj).await
    }
}

fn conflict_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(50),
        max_interval: Duration::from_secs(1),
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Applies `mutate` to the status of `obj` and writes it back.
///
/// A conflicting write re-reads the object and re-applies `mutate` to the
/// fresh copy, so the persisted status is always `mutate` over the latest
/// state. Gives up after `MAX_CONFLICT_ATTEMPTS` writes.
pub async fn update_status<K, F>(cluster: &dyn Cluster, obj: &K, mutate: F) -> Result<K>
where
    K: StatusSubresource,
    F: Fn(&mut K::Status) + Send + Sync,
{
    let key = NamespacedName::of(obj);
    let mut current = obj.clone();
    let mut backoff = conflict_backoff();
    let mut attempt = 1;

    loop {
        let mut status = current.status_mut().clone().unwrap_or_default();
        mutate(&mut status);
        *current.status_mut() = Some(status);

        match K::store_status(cluster, &current).await {
            Ok(stored) => return Ok(stored),
            Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_ATTEMPTS => {
                warn!(kind = K::KIND, %key, attempt, "conflict writing status, retrying");
                if let Some(delay) = backoff.next_backoff() {
                    tokio::time::sleep(delay).await;
                }
                current = K::fetch(cluster, &key).await?.ok_or_else(|| Error::NotFound {
                    kind: K::KIND,
                    name: key.to_string(),
                })?;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Publishes an event, logging instead of failing when the API refuses it.
pub async fn notify<K>(cluster: &dyn Cluster, obj: &K, kind: EventKind, reason: &str, note: &str)
where
    K: Resource<DynamicType = ()>,
{
    if let Err(e) = cluster
        .publish_event(&obj.object_ref(&()), kind, reason, note)
        .await
    {
        warn!(reason, error = %e, "failed to publish event");
    }
}

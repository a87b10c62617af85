use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::build_crd::{Build, BuildConditionType, BuildPhase, BuildStatus};
use crate::builder_pod::builder_pod;
use crate::cluster::{notify, update_status, Cluster, EventKind};
use crate::conditions::ConditionStatus;
use crate::reference::Reference;
use crate::workspace_controller::fail_workspace;
use crate::workspace_crd::{Workspace, WorkspaceConditionType, WorkspacePhase, WorkspaceStatus};
use crate::{ContextData, Error, NamespacedName, Result, BUILD_LABEL};

pub const CONTROLLER: &str = "build";

#[derive(Debug, Clone, Copy, PartialEq)]
enum BuildAction {
    /// The build failed; its workspace has to hear about it.
    NotifyOwner,
    LaunchPod,
    WatchPod,
    /// Hands the image over to the workspace and clears the worker pod.
    Publish,
}

fn determine_action(build: &Build) -> BuildAction {
    let status = build.status();
    if status.is_errored() {
        return BuildAction::NotifyOwner;
    }
    if status.conditions.get_condition(BuildConditionType::PodDeployment).status
        == ConditionStatus::Initialized
    {
        return BuildAction::LaunchPod;
    }
    match status.derived_phase() {
        BuildPhase::Done => BuildAction::Publish,
        _ => BuildAction::WatchPod,
    }
}

pub async fn reconcile(build: Arc<Build>, context: Arc<ContextData>) -> Result<Action> {
    let _timer = context.metrics.count_and_measure(CONTROLLER);
    let cluster = context.cluster.as_ref();

    let key = NamespacedName::of(build.as_ref());
    let build = match cluster.get_build(&key).await? {
        Some(build) => build,
        None => return Ok(Action::await_change()),
    };

    let action = determine_action(&build);
    let outcome = match action {
        BuildAction::NotifyOwner => notify_owner(cluster, &build).await,
        BuildAction::LaunchPod => launch_pod(&context, &build).await,
        BuildAction::WatchPod => watch_pod(cluster, &build).await,
        BuildAction::Publish => publish(cluster, &build).await,
    };

    match outcome {
        Err(e) if e.is_transient() => Err(e),
        Err(e) => {
            let condition = match action {
                BuildAction::LaunchPod | BuildAction::WatchPod => Some(BuildConditionType::PodDeployment),
                _ => None,
            };
            fail_build(cluster, &build, condition, &e.to_string()).await?;
            Ok(Action::await_change())
        }
        ok => ok,
    }
}

/// Name of the Workspace owning `build`, if any.
fn owner_of(build: &Build) -> Option<NamespacedName> {
    build
        .owner_references()
        .iter()
        .find(|owner| owner.kind == "Workspace")
        .map(|owner| NamespacedName::new(build.namespace().unwrap_or_default(), owner.name.clone()))
}

async fn owner_workspace(cluster: &dyn Cluster, build: &Build) -> Result<Option<Workspace>> {
    match owner_of(build) {
        Some(key) => cluster.get_workspace(&key).await,
        None => Ok(None),
    }
}

/// Whether the worker pod exited with a failure that PodDeployment does not
/// record yet.
async fn unrecorded_pod_failure(cluster: &dyn Cluster, build: &Build) -> Result<bool> {
    let status = build.status();
    if status
        .conditions
        .get_condition(BuildConditionType::PodDeployment)
        .status
        == ConditionStatus::Error
    {
        return Ok(false);
    }
    let Some(reference) = status.pod else {
        return Ok(false);
    };
    Ok(cluster
        .get_pod(&reference.namespaced_name())
        .await?
        .map_or(false, |pod| pod_failed(&pod)))
}

async fn notify_owner(cluster: &dyn Cluster, build: &Build) -> Result<Action> {
    let crashed = unrecorded_pod_failure(cluster, build).await?;
    let build = if crashed || build.status().phase != Some(BuildPhase::Error) {
        update_status(cluster, build, |status: &mut BuildStatus| {
            if crashed {
                status
                    .conditions
                    .set(BuildConditionType::PodDeployment, ConditionStatus::Error);
            }
            status.phase = Some(BuildPhase::Error);
        })
        .await?
    } else {
        build.clone()
    };

    if owner_of(&build).is_none() {
        notify(
            cluster,
            &build,
            EventKind::Normal,
            "Error",
            "No workspace to notify: none owns this build",
        )
        .await;
        return Ok(Action::await_change());
    }

    match owner_workspace(cluster, &build).await? {
        Some(workspace) => {
            let status = workspace.status();
            if status.condition(WorkspaceConditionType::BuildingImages) != ConditionStatus::Error
                || status.phase != Some(WorkspacePhase::Error)
            {
                let error = format!("image could not be built by {}", NamespacedName::of(&build));
                fail_workspace(cluster, &workspace, WorkspaceConditionType::BuildingImages, &error)
                    .await?;
            }
        }
        None => warn!(build = %NamespacedName::of(&build), "owner workspace is gone"),
    }
    Ok(Action::await_change())
}

async fn launch_pod(context: &ContextData, build: &Build) -> Result<Action> {
    let cluster = context.cluster.as_ref();
    let namespace = build.namespace().unwrap_or_default();

    let secret_key = NamespacedName::new(namespace.clone(), build.spec.secret_ref.clone());
    let secret = cluster
        .get_secret(&secret_key)
        .await?
        .ok_or_else(|| Error::NotFound {
            kind: "Secret",
            name: secret_key.to_string(),
        })?;

    let selector = format!("{}={}", BUILD_LABEL, build.name_any());
    let pod = match cluster.list_pods(&namespace, &selector).await?.into_iter().next() {
        Some(pod) => {
            info!(pod = %pod.name_any(), "adopting builder pod");
            pod
        }
        None => {
            cluster
                .create_pod(&builder_pod(build, &secret, &context.config))
                .await?
        }
    };
    let reference = Reference::new(&pod);

    update_status(cluster, build, |status: &mut BuildStatus| {
        status
            .conditions
            .set(BuildConditionType::PodDeployment, ConditionStatus::InProgress);
        status.pod = Some(reference.clone());
        status.refresh_phase();
    })
    .await?;
    info!(build = %NamespacedName::of(build), pod = %reference, "builder pod launched");
    notify(
        cluster,
        build,
        EventKind::Normal,
        "Running",
        &format!("Launched the builder pod({reference})"),
    )
    .await;
    Ok(Action::await_change())
}

/// Whether a container of `pod` exited with a non-zero code.
fn pod_failed(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .map_or(false, |statuses| {
            statuses.iter().any(|cs| {
                cs.state
                    .as_ref()
                    .and_then(|state| state.terminated.as_ref())
                    .map_or(false, |terminated| terminated.exit_code != 0)
            })
        })
}

fn pod_started(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Running") | Some("Succeeded")
    )
}

async fn watch_pod(cluster: &dyn Cluster, build: &Build) -> Result<Action> {
    let status = build.status();
    let reference = status.pod.clone().ok_or(Error::StageWithInvalidState)?;
    let pod = cluster
        .get_pod(&reference.namespaced_name())
        .await?
        .ok_or_else(|| Error::NotFound {
            kind: "Pod",
            name: reference.to_string(),
        })?;

    if pod_failed(&pod) {
        return Err(Error::PodUnexpectedlyFailed);
    }

    if pod_started(&pod)
        && status.conditions.get_condition(BuildConditionType::PodDeployment).status
            == ConditionStatus::InProgress
    {
        update_status(cluster, build, |status: &mut BuildStatus| {
            status
                .conditions
                .set(BuildConditionType::PodDeployment, ConditionStatus::Success);
            status.refresh_phase();
        })
        .await?;
    }
    Ok(Action::await_change())
}

async fn publish(cluster: &dyn Cluster, build: &Build) -> Result<Action> {
    let status = build.status();
    let image = status.image.clone().ok_or(Error::StageWithInvalidState)?;
    let owner = owner_of(build).ok_or(Error::StageWithInvalidState)?;
    let workspace = cluster
        .get_workspace(&owner)
        .await?
        .ok_or_else(|| Error::NotFound {
            kind: "Workspace",
            name: owner.to_string(),
        })?;

    let key = build.image_key();
    if workspace.status().images.get(&key) != Some(&image) {
        update_status(cluster, &workspace, |status: &mut WorkspaceStatus| {
            status.images.insert(key.clone(), image.clone());
        })
        .await?;
        info!(workspace = %owner, image = %key, "image published");
    }

    if status.phase != Some(BuildPhase::Done) {
        update_status(cluster, build, |status: &mut BuildStatus| status.refresh_phase()).await?;
    }

    if let Some(reference) = &status.pod {
        clear_pod(cluster, build, reference).await?;
    }
    Ok(Action::await_change())
}

/// Deletes the worker pod of a finished build. A pod already gone is fine.
async fn clear_pod(cluster: &dyn Cluster, build: &Build, reference: &Reference) -> Result<()> {
    let key = reference.namespaced_name();
    if cluster.get_pod(&key).await?.is_none() {
        return Ok(());
    }

    notify(
        cluster,
        build,
        EventKind::Normal,
        "Done",
        &format!("Clearing the builder pod({key})"),
    )
    .await;
    if let Err(e) = cluster.delete_pod(&key).await {
        warn!(pod = %key, error = %e, "could not delete the builder pod");
        notify(
            cluster,
            build,
            EventKind::Warning,
            "Done",
            &format!("Could not delete the pod as part of housekeeping, pod: {key}"),
        )
        .await;
    }
    Ok(())
}

/// Marks the build as failed, and `condition` with it when there's one to
/// blame.
pub async fn fail_build(
    cluster: &dyn Cluster,
    build: &Build,
    condition: Option<BuildConditionType>,
    error: &str,
) -> Result<()> {
    warn!(build = %NamespacedName::of(build), ?condition, %error, "build failed");
    update_status(cluster, build, |status: &mut BuildStatus| {
        if let Some(type_) = condition {
            status.conditions.set(type_, ConditionStatus::Error);
        }
        status.phase = Some(BuildPhase::Error);
    })
    .await?;
    notify(cluster, build, EventKind::Warning, "Error", error).await;
    Ok(())
}

/// Builds whose worker is `pod`.
pub fn builds_for_pod(builds: &[Arc<Build>], pod: &Pod) -> Vec<ObjectRef<Build>> {
    builds
        .iter()
        .filter(|build| {
            build
                .status
                .as_ref()
                .and_then(|status| status.pod.as_ref())
                .map_or(false, |reference| reference.points_to(pod))
        })
        .map(|build| ObjectRef::from_obj(build.as_ref()))
        .collect()
}

pub fn on_error(build: Arc<Build>, error: &Error, context: Arc<ContextData>) -> Action {
    warn!(
        build = %NamespacedName::of(build.as_ref()),
        error = %error,
        "reconciliation error"
    );
    context.metrics.reconcile_failure(CONTROLLER, error);
    Action::requeue(Duration::from_secs(5))
}

/// Runs the Build controller, woken up by the builds and their worker pods.
pub async fn run(client: Client, context: Arc<ContextData>) {
    let builds: Api<Build> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client);

    let controller = Controller::new(builds, Config::default().any_semantic());
    let store = controller.store();

    controller
        .watches(pods, Config::default().labels(BUILD_LABEL), move |pod: Pod| {
            builds_for_pod(&store.state(), &pod)
        })
        .run(reconcile, on_error, context)
        .for_each(|reconciliation_result| async move {
            match reconciliation_result {
                Ok(build) => info!("Reconciliation successful. Resource: {:?}", build),
                Err(reconciliation_err) => warn!("Reconciliation error: {:?}", reconciliation_err),
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_crd::{BuildImage, BuildSpec, ImageSpec, RegistrySpec, RepositorySpec};
    use crate::conditions::ConditionType;
    use crate::config::ControllerConfig;
    use crate::images::build_for;
    use crate::testing::{workspace_fixture, FakeCluster};
    use crate::workspace_crd::ComponentSpec;
    use crate::Metrics;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStatus, PodStatus, Secret,
    };
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use kube::Resource;

    fn context(cluster: Arc<FakeCluster>) -> Arc<ContextData> {
        Arc::new(ContextData::new(
            cluster,
            ControllerConfig::default(),
            Metrics::default(),
        ))
    }

    fn component() -> ComponentSpec {
        ComponentSpec {
            name: "app".to_string(),
            image: ImageSpec {
                name: "app".to_string(),
                tag: Some("wdemo".to_string()),
                repository: Some(RepositorySpec {
                    url: "https://github.com/acme/app".to_string(),
                    branch: "main".to_string(),
                    hash: "abc123".to_string(),
                    ..Default::default()
                }),
                registry: Some(RegistrySpec {
                    url: "registry.example.com/acme/app".to_string(),
                }),
            },
            environments: vec![],
            networks: vec![],
            command: vec![],
        }
    }

    fn build_secret(cluster: &FakeCluster) {
        cluster.insert_secret(Secret {
            metadata: ObjectMeta {
                name: Some("spot-build-secrets".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(
                [("repositories", "[]"), ("registries", "[]")]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        });
    }

    /// Workspace owning one Build for its component.
    fn setup(cluster: &FakeCluster) -> (NamespacedName, NamespacedName) {
        let ws = cluster.insert_workspace(workspace_fixture("feature-login", vec![component()]));
        let build = cluster.insert_build(build_for(&ws, &ws.spec.components[0], "spot-build-secrets"));
        (NamespacedName::of(&ws), NamespacedName::of(&build))
    }

    async fn reconcile_build(cluster: &Arc<FakeCluster>, key: &NamespacedName) -> Action {
        let build = cluster.build(key).unwrap();
        reconcile(Arc::new(build), context(cluster.clone()))
            .await
            .unwrap()
    }

    fn terminated(exit_code: i32) -> PodStatus {
        PodStatus {
            phase: Some(if exit_code == 0 { "Succeeded" } else { "Failed" }.to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "buildkit".to_string(),
                state: Some(ContainerState {
                    terminated: Some(ContainerStateTerminated {
                        exit_code,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    fn pod_key(cluster: &FakeCluster, build: &NamespacedName) -> NamespacedName {
        cluster
            .build(build)
            .unwrap()
            .status()
            .pod
            .unwrap()
            .namespaced_name()
    }

    #[tokio::test]
    async fn launches_a_single_worker_pod() {
        let cluster = Arc::new(FakeCluster::default());
        build_secret(&cluster);
        let (_, key) = setup(&cluster);

        reconcile_build(&cluster, &key).await;

        let status = cluster.build(&key).unwrap().status();
        assert_eq!(
            status
                .conditions
                .get_condition(BuildConditionType::PodDeployment)
                .status,
            ConditionStatus::InProgress
        );
        assert_eq!(status.phase, Some(BuildPhase::Running));
        let pods = cluster.pods();
        assert_eq!(pods.len(), 1);
        assert!(status.pod.unwrap().points_to(&pods[0]));
        assert!(pods[0]
            .metadata
            .generate_name
            .as_deref()
            .unwrap()
            .starts_with("build-app-"));
    }

    #[tokio::test]
    async fn relaunch_adopts_the_existing_pod() {
        let cluster = Arc::new(FakeCluster::default());
        build_secret(&cluster);
        let (_, key) = setup(&cluster);
        let build = cluster.build(&key).unwrap();
        let secret = cluster
            .get_secret(&NamespacedName::new("default", "spot-build-secrets"))
            .await
            .unwrap()
            .unwrap();
        cluster
            .create_pod(&builder_pod(&build, &secret, &ControllerConfig::default()))
            .await
            .unwrap();

        reconcile_build(&cluster, &key).await;
        assert_eq!(cluster.pods().len(), 1);
    }

    #[tokio::test]
    async fn running_pod_completes_the_pod_deployment() {
        let cluster = Arc::new(FakeCluster::default());
        build_secret(&cluster);
        let (_, key) = setup(&cluster);
        reconcile_build(&cluster, &key).await;

        cluster.set_pod_status(
            &pod_key(&cluster, &key),
            PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            },
        );
        reconcile_build(&cluster, &key).await;

        let status = cluster.build(&key).unwrap().status();
        assert_eq!(
            status
                .conditions
                .get_condition(BuildConditionType::PodDeployment)
                .status,
            ConditionStatus::Success
        );
        assert_eq!(status.phase, Some(BuildPhase::Running));
    }

    #[tokio::test]
    async fn missing_secret_fails_the_build_and_its_workspace() {
        let cluster = Arc::new(FakeCluster::default());
        let (ws_key, key) = setup(&cluster);

        reconcile_build(&cluster, &key).await;
        let status = cluster.build(&key).unwrap().status();
        assert_eq!(status.phase, Some(BuildPhase::Error));
        assert!(cluster.pods().is_empty());
        assert!(cluster
            .events()
            .iter()
            .any(|e| e.kind == EventKind::Warning && e.note.contains("spot-build-secrets")));

        reconcile_build(&cluster, &key).await;
        let ws_status = cluster.workspace(&ws_key).unwrap().status();
        assert_eq!(
            ws_status.condition(WorkspaceConditionType::BuildingImages),
            ConditionStatus::Error
        );
        assert_eq!(ws_status.phase, Some(WorkspacePhase::Error));
    }

    #[tokio::test]
    async fn crashed_worker_fails_the_build() {
        let cluster = Arc::new(FakeCluster::default());
        build_secret(&cluster);
        let (ws_key, key) = setup(&cluster);
        reconcile_build(&cluster, &key).await;

        cluster.set_pod_status(&pod_key(&cluster, &key), terminated(137));
        reconcile_build(&cluster, &key).await;

        let status = cluster.build(&key).unwrap().status();
        assert_eq!(
            status
                .conditions
                .get_condition(BuildConditionType::PodDeployment)
                .status,
            ConditionStatus::Error
        );
        assert_eq!(status.phase, Some(BuildPhase::Error));
        assert!(cluster
            .events()
            .iter()
            .any(|e| e.note == "pod failed without notifying the build"));

        // the failure reaches the workspace on the next pass
        reconcile_build(&cluster, &key).await;
        assert_eq!(
            cluster.workspace(&ws_key).unwrap().status().phase,
            Some(WorkspacePhase::Error)
        );
    }

    #[tokio::test]
    async fn worker_exit_after_a_failed_stage_marks_the_pod_deployment() {
        let cluster = Arc::new(FakeCluster::default());
        build_secret(&cluster);
        let (ws_key, key) = setup(&cluster);
        reconcile_build(&cluster, &key).await;
        let pod = pod_key(&cluster, &key);
        cluster.set_pod_status(
            &pod,
            PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            },
        );
        reconcile_build(&cluster, &key).await;

        cluster.update_build(&key, |build| {
            build
                .status
                .get_or_insert_with(Default::default)
                .conditions
                .set(BuildConditionType::Building, ConditionStatus::Error);
        });
        reconcile_build(&cluster, &key).await;
        let pod_deployment = |cluster: &FakeCluster| {
            cluster
                .build(&key)
                .unwrap()
                .status()
                .conditions
                .get_condition(BuildConditionType::PodDeployment)
                .status
        };
        assert_eq!(pod_deployment(&cluster), ConditionStatus::Success);
        assert_eq!(
            cluster.workspace(&ws_key).unwrap().status().phase,
            Some(WorkspacePhase::Error)
        );

        cluster.set_pod_status(&pod, terminated(1));
        reconcile_build(&cluster, &key).await;

        assert_eq!(pod_deployment(&cluster), ConditionStatus::Error);
        let status = cluster.build(&key).unwrap().status();
        assert_eq!(status.phase, Some(BuildPhase::Error));
        assert_eq!(
            status.conditions.get_condition(BuildConditionType::Building).status,
            ConditionStatus::Error
        );
    }

    #[tokio::test]
    async fn failed_build_without_owner_only_reports() {
        let cluster = Arc::new(FakeCluster::default());
        let mut build = Build::new(
            "orphan",
            BuildSpec {
                image: component().image,
                secret_ref: "spot-build-secrets".to_string(),
            },
        );
        build.metadata.namespace = Some("default".to_string());
        let mut status = BuildStatus::default();
        status
            .conditions
            .set(BuildConditionType::Building, ConditionStatus::Error);
        build.status = Some(status);
        let key = NamespacedName::of(&cluster.insert_build(build));

        reconcile_build(&cluster, &key).await;

        assert_eq!(cluster.build(&key).unwrap().status().phase, Some(BuildPhase::Error));
        let event = cluster.events().pop().unwrap();
        assert_eq!(event.kind, EventKind::Normal);
        assert_eq!(event.note, "No workspace to notify: none owns this build");
    }

    #[tokio::test]
    async fn finished_build_publishes_its_image_and_clears_the_pod() {
        let cluster = Arc::new(FakeCluster::default());
        build_secret(&cluster);
        let (ws_key, key) = setup(&cluster);
        reconcile_build(&cluster, &key).await;
        let pod = pod_key(&cluster, &key);

        cluster.update_build(&key, |build| {
            let image = BuildImage {
                url: build.image_key(),
                metadata: "{\"schemaVersion\":2}".to_string(),
            };
            let status = build.status.get_or_insert_with(Default::default);
            for t in BuildConditionType::ALL {
                status.conditions.set(*t, ConditionStatus::Success);
            }
            status.image = Some(image);
        });
        cluster.set_pod_status(&pod, terminated(0));

        reconcile_build(&cluster, &key).await;

        let images = cluster.workspace(&ws_key).unwrap().status().images;
        assert_eq!(
            images["registry.example.com/acme/app:wdemo"].url,
            "registry.example.com/acme/app:wdemo"
        );
        assert_eq!(cluster.build(&key).unwrap().status().phase, Some(BuildPhase::Done));
        assert!(cluster.pods().is_empty());
        assert!(cluster
            .events()
            .iter()
            .any(|e| e.note == format!("Clearing the builder pod({pod})")));

        // pod already gone
        reconcile_build(&cluster, &key).await;
        assert!(cluster.pods().is_empty());
    }

    #[test]
    fn pods_map_back_to_their_builds() {
        let mut build = Build::new("app-x7k2p", BuildSpec::default());
        build.metadata.namespace = Some("default".to_string());
        build.status = Some(BuildStatus {
            pod: Some(Reference {
                namespace: "default".to_string(),
                name: "build-app-x7k2p-00001".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let other = Build::new("api-1", BuildSpec::default());

        let mut pod = Pod::default();
        pod.meta_mut().name = Some("build-app-x7k2p-00001".to_string());
        pod.meta_mut().namespace = Some("default".to_string());

        let refs = builds_for_pod(&[Arc::new(build), Arc::new(other)], &pod);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "app-x7k2p");
    }

    #[test]
    fn actions_follow_the_build_lifecycle() {
        let mut build = Build::new("app-x7k2p", BuildSpec::default());
        assert_eq!(determine_action(&build), BuildAction::LaunchPod);

        let mut status = BuildStatus::default();
        status
            .conditions
            .set(BuildConditionType::PodDeployment, ConditionStatus::InProgress);
        build.status = Some(status.clone());
        assert_eq!(determine_action(&build), BuildAction::WatchPod);

        for t in BuildConditionType::ALL {
            status.conditions.set(*t, ConditionStatus::Success);
        }
        build.status = Some(status.clone());
        assert_eq!(determine_action(&build), BuildAction::Publish);

        status.phase = Some(BuildPhase::Error);
        build.status = Some(status);
        assert_eq!(determine_action(&build), BuildAction::NotifyOwner);
    }
}

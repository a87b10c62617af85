use futures::stream::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::build_crd::Build;
use crate::cluster::{notify, update_status, Cluster, EventKind};
use crate::conditions::{ConditionStatus, ConditionType, DerivedPhase};
use crate::images::{self, Progress};
use crate::namespace::{self, NamespaceState};
use crate::workspace_crd::{
    Workspace, WorkspaceConditionType, WorkspacePhase, WorkspaceStage, WorkspaceStatus,
};
use crate::{deployment, finalizer, networking, ContextData, Error, NamespacedName, Result};

pub const CONTROLLER: &str = "workspace";

/// Namespace deletion is polled at this interval.
const TERMINATION_REQUEUE: Duration = Duration::from_secs(5);
/// Builds are polled at this interval, on top of the events they trigger.
const BUILDS_REQUEUE: Duration = Duration::from_secs(10);

#[derive(Debug, PartialEq)]
enum WorkspaceAction {
    Terminate,
    AddFinalizer,
    Initialize,
    /// A condition failed without the phase following.
    MirrorError(WorkspaceConditionType),
    /// Runs the first condition that hasn't succeeded yet.
    Gate(WorkspaceConditionType),
    /// Every condition succeeded; the phase catches up.
    Settle,
    NoOp,
}

pub async fn reconcile(workspace: Arc<Workspace>, context: Arc<ContextData>) -> Result<Action> {
    let _timer = context.metrics.count_and_measure(CONTROLLER);
    let cluster = context.cluster.as_ref();

    // work on a fresh private copy
    let key = NamespacedName::of(workspace.as_ref());
    let workspace = match cluster.get_workspace(&key).await? {
        Some(workspace) => workspace,
        None => return Ok(Action::await_change()),
    };

    match determine_action(&workspace) {
        WorkspaceAction::Terminate => terminate(cluster, &workspace).await,
        WorkspaceAction::AddFinalizer => {
            finalizer::add(cluster, &workspace).await?;
            Ok(Action::await_change())
        }
        WorkspaceAction::Initialize => {
            update_status(cluster, &workspace, |status: &mut WorkspaceStatus| {
                status.phase = Some(WorkspacePhase::Running);
                status.stage = Some(WorkspaceStage::Initialized);
            })
            .await?;
            notify(
                cluster,
                &workspace,
                EventKind::Normal,
                "Initialized",
                "Creating the workspace namespace",
            )
            .await;
            Ok(Action::await_change())
        }
        WorkspaceAction::MirrorError(type_) => {
            let error = format!("condition {type_:?} failed");
            fail_workspace(cluster, &workspace, type_, &error).await?;
            Ok(Action::await_change())
        }
        WorkspaceAction::Gate(type_) => match run_gate(&context, &workspace, type_).await {
            Ok(action) => Ok(action),
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                fail_workspace(cluster, &workspace, type_, &e.to_string()).await?;
                Ok(Action::await_change())
            }
        },
        WorkspaceAction::Settle => {
            update_status(cluster, &workspace, |status: &mut WorkspaceStatus| {
                status.phase = Some(status.derived_phase());
            })
            .await?;
            Ok(Action::await_change())
        }
        WorkspaceAction::NoOp => Ok(Action::await_change()),
    }
}

fn determine_action(workspace: &Workspace) -> WorkspaceAction {
    if workspace.is_terminating() {
        return WorkspaceAction::Terminate;
    }
    if !workspace.has_finalizer() {
        return WorkspaceAction::AddFinalizer;
    }

    let status = workspace.status();
    match status.phase {
        None => WorkspaceAction::Initialize,
        Some(WorkspacePhase::Error) | Some(WorkspacePhase::Terminating) => WorkspaceAction::NoOp,
        Some(phase) => {
            if let Some(failed) = status.conditions.last_error() {
                return WorkspaceAction::MirrorError(failed.type_);
            }
            let pending = WorkspaceConditionType::ALL
                .iter()
                .find(|t| status.condition(**t) != ConditionStatus::Success);
            match pending {
                Some(type_) => WorkspaceAction::Gate(*type_),
                None if phase != WorkspacePhase::Done => WorkspaceAction::Settle,
                None => WorkspaceAction::NoOp,
            }
        }
    }
}

async fn run_gate(
    context: &ContextData,
    workspace: &Workspace,
    type_: WorkspaceConditionType,
) -> Result<Action> {
    match type_ {
        WorkspaceConditionType::Namespace => assign_namespace(context.cluster.as_ref(), workspace).await,
        WorkspaceConditionType::Networking => setup_networking(context.cluster.as_ref(), workspace).await,
        WorkspaceConditionType::BuildingImages => build_images(context, workspace).await,
        WorkspaceConditionType::Deployment => deploy_components(context.cluster.as_ref(), workspace).await,
    }
}

fn managed_namespace(workspace: &Workspace) -> Result<String> {
    workspace
        .status()
        .namespace
        .ok_or(Error::StageWithInvalidState)
}

async fn assign_namespace(cluster: &dyn Cluster, workspace: &Workspace) -> Result<Action> {
    let name = namespace::assign(cluster, workspace).await?;
    update_status(cluster, workspace, |status: &mut WorkspaceStatus| {
        status.namespace = Some(name.clone());
        status
            .conditions
            .set(WorkspaceConditionType::Namespace, ConditionStatus::Success);
        status.stage = Some(WorkspaceStage::Networking);
    })
    .await?;
    info!(workspace = %NamespacedName::of(workspace), namespace = %name, "namespace assigned");
    notify(
        cluster,
        workspace,
        EventKind::Normal,
        "Networking",
        &format!("Namespace {name} is ready, creating services"),
    )
    .await;
    Ok(Action::await_change())
}

async fn setup_networking(cluster: &dyn Cluster, workspace: &Workspace) -> Result<Action> {
    let namespace = managed_namespace(workspace)?;
    let services = networking::provision(cluster, workspace, &namespace).await?;
    update_status(cluster, workspace, |status: &mut WorkspaceStatus| {
        status.services = services.clone();
        status
            .conditions
            .set(WorkspaceConditionType::Networking, ConditionStatus::Success);
        status.stage = Some(WorkspaceStage::Building);
    })
    .await?;
    notify(
        cluster,
        workspace,
        EventKind::Normal,
        "BuildingImages",
        "Services are ready, building images",
    )
    .await;
    Ok(Action::await_change())
}

async fn build_images(context: &ContextData, workspace: &Workspace) -> Result<Action> {
    let cluster = context.cluster.as_ref();
    let status = workspace.status();

    if status.condition(WorkspaceConditionType::BuildingImages) == ConditionStatus::Initialized {
        notify(
            cluster,
            workspace,
            EventKind::Normal,
            "BuildingImages",
            "deploying builders",
        )
        .await;
        let builds = images::dispatch(cluster, workspace, &context.config.build_secret_name).await?;

        if builds.is_empty() {
            return complete_images(cluster, workspace, status.images).await;
        }

        update_status(cluster, workspace, |status: &mut WorkspaceStatus| {
            status.builds = builds.clone();
            status
                .conditions
                .set(WorkspaceConditionType::BuildingImages, ConditionStatus::InProgress);
            status.stage = Some(WorkspaceStage::Building);
        })
        .await?;
        return Ok(Action::requeue(BUILDS_REQUEUE));
    }

    match images::monitor(cluster, workspace).await? {
        Progress::Failed(build) => Err(Error::BuildFailed(build)),
        Progress::Pending(images) => {
            if images != status.images {
                update_status(cluster, workspace, |status: &mut WorkspaceStatus| {
                    status.images.extend(images.clone());
                })
                .await?;
            }
            Ok(Action::requeue(BUILDS_REQUEUE))
        }
        Progress::Complete(images) => complete_images(cluster, workspace, images).await,
    }
}

async fn complete_images(
    cluster: &dyn Cluster,
    workspace: &Workspace,
    images: std::collections::BTreeMap<String, crate::build_crd::BuildImage>,
) -> Result<Action> {
    update_status(cluster, workspace, |status: &mut WorkspaceStatus| {
        status.images.extend(images.clone());
        status
            .conditions
            .set(WorkspaceConditionType::BuildingImages, ConditionStatus::Success);
        status.stage = Some(WorkspaceStage::Deploying);
    })
    .await?;
    notify(
        cluster,
        workspace,
        EventKind::Normal,
        "Deploying",
        "Deploying services and updating routes",
    )
    .await;
    Ok(Action::await_change())
}

async fn deploy_components(cluster: &dyn Cluster, workspace: &Workspace) -> Result<Action> {
    let namespace = managed_namespace(workspace)?;
    deployment::deploy(cluster, workspace, &namespace).await?;
    update_status(cluster, workspace, |status: &mut WorkspaceStatus| {
        status
            .conditions
            .set(WorkspaceConditionType::Deployment, ConditionStatus::Success);
        status.stage = Some(WorkspaceStage::Deployed);
        if status.conditions.tracked_phase() == DerivedPhase::Done {
            status.phase = Some(WorkspacePhase::Done);
        }
    })
    .await?;
    notify(
        cluster,
        workspace,
        EventKind::Normal,
        "Deployed",
        &format!("Components are running in {namespace}"),
    )
    .await;
    Ok(Action::await_change())
}

async fn terminate(cluster: &dyn Cluster, workspace: &Workspace) -> Result<Action> {
    if !workspace.has_finalizer() {
        return Ok(Action::await_change());
    }

    match namespace::state(cluster, workspace).await? {
        NamespaceState::Absent | NamespaceState::Unmanaged(_) => {
            finalizer::remove(cluster, workspace).await?;
            info!(workspace = %NamespacedName::of(workspace), "namespace gone, finalizer removed");
            Ok(Action::await_change())
        }
        NamespaceState::Terminating(name) => {
            info!(namespace = %name, "waiting for the namespace to terminate");
            Ok(Action::requeue(TERMINATION_REQUEUE))
        }
        NamespaceState::Active(name) => {
            update_status(cluster, workspace, |status: &mut WorkspaceStatus| {
                status.phase = Some(WorkspacePhase::Terminating);
                status.stage = Some(WorkspaceStage::Terminating);
            })
            .await?;
            notify(
                cluster,
                workspace,
                EventKind::Normal,
                "Terminating",
                &format!("Deleting namespace {name}"),
            )
            .await;
            namespace::delete(cluster, &name).await?;
            Ok(Action::requeue(TERMINATION_REQUEUE))
        }
    }
}

/// Marks `type_` and the workspace as failed and tells the user why.
pub async fn fail_workspace(
    cluster: &dyn Cluster,
    workspace: &Workspace,
    type_: WorkspaceConditionType,
    error: &str,
) -> Result<()> {
    warn!(workspace = %NamespacedName::of(workspace), condition = ?type_, %error, "workspace failed");
    update_status(cluster, workspace, |status: &mut WorkspaceStatus| status.fail(type_)).await?;
    notify(
        cluster,
        workspace,
        EventKind::Warning,
        &format!("{type_:?}"),
        error,
    )
    .await;
    Ok(())
}

//error handling
pub fn on_error(workspace: Arc<Workspace>, error: &Error, context: Arc<ContextData>) -> Action {
    warn!(
        workspace = %NamespacedName::of(workspace.as_ref()),
        error = %error,
        "reconciliation error"
    );
    context.metrics.reconcile_failure(CONTROLLER, error);
    Action::requeue(Duration::from_secs(5))
}

/// Runs the Workspace controller until the watch streams end.
pub async fn run(client: Client, context: Arc<ContextData>) {
    let workspaces: Api<Workspace> = Api::all(client.clone());
    let builds: Api<Build> = Api::all(client);

    Controller::new(workspaces, Config::default().any_semantic())
        .owns(builds, Config::default())
        .run(reconcile, on_error, context)
        .for_each(|reconciliation_result| async move {
            match reconciliation_result {
                Ok(workspace) => info!("Reconciliation successful. Resource: {:?}", workspace),
                Err(reconciliation_err) => warn!("Reconciliation error: {:?}", reconciliation_err),
            }
        })
        .await;
}

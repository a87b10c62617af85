use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

use crate::cluster::Cluster;
use crate::workspace_crd::Workspace;
use crate::{Result, MANAGED_BY, MANAGED_BY_LABEL, WORKSPACE_UID_LABEL};

#[derive(Debug, Clone, PartialEq)]
pub enum NamespaceState {
    Absent,
    /// Exists but wasn't created by the operator, so it is left alone.
    Unmanaged(String),
    Active(String),
    Terminating(String),
}

fn is_managed(namespace: &Namespace) -> bool {
    namespace
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_BY_LABEL))
        .map_or(false, |value| value == MANAGED_BY)
}

fn is_terminating(namespace: &Namespace) -> bool {
    namespace.metadata.deletion_timestamp.is_some()
        || namespace
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            == Some("Terminating")
}

fn selector(workspace: &Workspace) -> String {
    format!(
        "{}={},{}={}",
        MANAGED_BY_LABEL,
        MANAGED_BY,
        WORKSPACE_UID_LABEL,
        workspace.metadata.uid.clone().unwrap_or_default()
    )
}

/// Namespace to create for `workspace`, named by the API server.
pub fn managed_namespace(workspace: &Workspace) -> Namespace {
    let mut labels: BTreeMap<String, String> = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels.insert(
        WORKSPACE_UID_LABEL.to_string(),
        workspace.metadata.uid.clone().unwrap_or_default(),
    );

    Namespace {
        metadata: ObjectMeta {
            generate_name: Some(format!("workspace-{}-", workspace.spec.tag)),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

//create namespace, or adopt the one a previous attempt created
pub async fn assign(cluster: &dyn Cluster, workspace: &Workspace) -> Result<String> {
    let existing = cluster.list_namespaces(&selector(workspace)).await?;
    if let Some(namespace) = existing.iter().find(|ns| !is_terminating(ns)) {
        let name = namespace.metadata.name.clone().unwrap_or_default();
        log::warn!("Namespace {} already exists", name);
        return Ok(name);
    }

    let created = cluster.create_namespace(&managed_namespace(workspace)).await?;
    let name = created.metadata.name.unwrap_or_default();
    log::info!("Created namespace {}", name);
    Ok(name)
}

/// State of the namespace managed for `workspace`. Falls back to the labels
/// when the status never recorded it.
pub async fn state(cluster: &dyn Cluster, workspace: &Workspace) -> Result<NamespaceState> {
    let namespace = match workspace.status().namespace {
        Some(name) => cluster.get_namespace(&name).await?,
        None => cluster
            .list_namespaces(&selector(workspace))
            .await?
            .into_iter()
            .next(),
    };

    Ok(match namespace {
        None => NamespaceState::Absent,
        Some(ns) => {
            let name = ns.metadata.name.clone().unwrap_or_default();
            if !is_managed(&ns) {
                NamespaceState::Unmanaged(name)
            } else if is_terminating(&ns) {
                NamespaceState::Terminating(name)
            } else {
                NamespaceState::Active(name)
            }
        }
    })
}

//delete namespace, only if it is labelled as managed
pub async fn delete(cluster: &dyn Cluster, name: &str) -> Result<()> {
    match cluster.get_namespace(name).await? {
        Some(ns) if is_managed(&ns) => {
            cluster.delete_namespace(name).await?;
            log::info!("Deleted namespace {}", name);
        }
        Some(_) => {
            log::warn!(
                "Namespace {} does not have label {}={}",
                name,
                MANAGED_BY_LABEL,
                MANAGED_BY
            );
        }
        None => {
            log::warn!("Namespace {} does not exist", name);
        }
    }
    Ok(())
}

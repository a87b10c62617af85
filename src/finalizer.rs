use serde_json::{json, Value};

use crate::cluster::Cluster;
use crate::reference::NamespacedName;
use crate::workspace_crd::Workspace;
use crate::{Result, WORKSPACE_FINALIZER};

fn finalizers(workspace: &Workspace) -> Vec<String> {
    workspace.metadata.finalizers.clone().unwrap_or_default()
}

// the resourceVersion makes the merge patch fail on a stale copy
fn patch(workspace: &Workspace, finalizers: Vec<String>) -> Value {
    json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": workspace.metadata.resource_version,
        }
    })
}

//add finalizer
pub async fn add(cluster: &dyn Cluster, workspace: &Workspace) -> Result<Workspace> {
    let mut finalizers = finalizers(workspace);
    if !finalizers.iter().any(|f| f == WORKSPACE_FINALIZER) {
        finalizers.push(WORKSPACE_FINALIZER.to_string());
    }
    cluster
        .patch_workspace(&NamespacedName::of(workspace), &patch(workspace, finalizers))
        .await
}

//delete finalizer, keeping the ones owned by others
pub async fn remove(cluster: &dyn Cluster, workspace: &Workspace) -> Result<Workspace> {
    let finalizers = finalizers(workspace)
        .into_iter()
        .filter(|f| f != WORKSPACE_FINALIZER)
        .collect();
    cluster
        .patch_workspace(&NamespacedName::of(workspace), &patch(workspace, finalizers))
        .await
}

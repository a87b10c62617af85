use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::info;

use crate::build_crd::{Build, BuildImage, BuildPhase, BuildSpec};
use crate::cluster::Cluster;
use crate::reference::Reference;
use crate::workspace_crd::{ComponentSpec, Workspace};
use crate::{Error, Result, MANAGED_BY, MANAGED_BY_LABEL, WORKSPACE_UID_LABEL};

/// Component a Build produces the image of.
pub const BUILD_COMPONENT_LABEL: &str = "spot.release.com/component";

/// Where the builds of a workspace stand.
#[derive(Debug, PartialEq)]
pub enum Progress {
    /// A build failed, by reference.
    Failed(String),
    /// Images gathered so far.
    Pending(BTreeMap<String, BuildImage>),
    Complete(BTreeMap<String, BuildImage>),
}

fn selector(workspace: &Workspace) -> String {
    format!(
        "{}={}",
        WORKSPACE_UID_LABEL,
        workspace.uid().unwrap_or_default()
    )
}

/// Build of `component`'s image, owned by `workspace` and living next to it.
pub fn build_for(workspace: &Workspace, component: &ComponentSpec, secret_ref: &str) -> Build {
    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (WORKSPACE_UID_LABEL.to_string(), workspace.uid().unwrap_or_default()),
        (BUILD_COMPONENT_LABEL.to_string(), component.name.clone()),
    ]);

    Build {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", component.name)),
            namespace: workspace.namespace(),
            labels: Some(labels),
            owner_references: workspace.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..Default::default()
        },
        spec: BuildSpec {
            image: component.image.clone(),
            secret_ref: secret_ref.to_string(),
        },
        status: None,
    }
}

/// Creates one Build per component built from source. Builds left behind by
/// an interrupted attempt are adopted.
pub async fn dispatch(
    cluster: &dyn Cluster,
    workspace: &Workspace,
    secret_ref: &str,
) -> Result<Vec<Reference>> {
    let namespace = workspace.namespace().unwrap_or_default();
    let existing = cluster.list_builds(&namespace, &selector(workspace)).await?;

    let mut references = Vec::new();
    for component in workspace
        .spec
        .components
        .iter()
        .filter(|c| c.image.repository.is_some())
    {
        let adopted = existing
            .iter()
            .find(|b| b.labels().get(BUILD_COMPONENT_LABEL) == Some(&component.name));
        let build = match adopted {
            Some(build) => {
                info!(build = %build.name_any(), component = %component.name, "adopting build");
                build.clone()
            }
            None => {
                let build = cluster
                    .create_build(&build_for(workspace, component, secret_ref))
                    .await?;
                info!(build = %build.name_any(), component = %component.name, "created build");
                build
            }
        };
        references.push(Reference::new(&build));
    }

    Ok(references)
}

/// Gathers the images of the finished builds into the workspace images.
/// Complete once every referenced build is done, its image recorded under
/// its key.
pub async fn monitor(cluster: &dyn Cluster, workspace: &Workspace) -> Result<Progress> {
    let status = workspace.status();
    let mut images = status.images.clone();
    let mut complete = true;

    for reference in &status.builds {
        let build = cluster
            .get_build(&reference.namespaced_name())
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "Build",
                name: reference.to_string(),
            })?;
        let build_status = build.status();

        if build_status.is_errored() {
            return Ok(Progress::Failed(reference.to_string()));
        }

        match (build_status.derived_phase(), build_status.image) {
            (BuildPhase::Done, Some(image)) => {
                images.insert(build.image_key(), image);
            }
            _ => complete = false,
        }
    }

    if complete {
        Ok(Progress::Complete(images))
    } else {
        Ok(Progress::Pending(images))
    }
}

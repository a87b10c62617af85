use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, Pod, PodSpec, Service};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::info;

use crate::cluster::Cluster;
use crate::workspace_crd::{service_key, ComponentSpec, Workspace};
use crate::{Error, Result, COMPONENT_LABEL};

/// Environment of a component's container. An alias renames the variable,
/// a literal value wins over the workspace environments.
pub fn environments_for(component: &ComponentSpec, workspace: &Workspace) -> Result<Vec<EnvVar>> {
    component
        .environments
        .iter()
        .map(|env| {
            let value = match &env.value {
                Some(value) => value.clone(),
                None => workspace
                    .environment(&env.name)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| Error::EnvironmentNotFound(env.name.clone()))?,
            };
            Ok(EnvVar {
                name: env.alias.clone().unwrap_or_else(|| env.name.clone()),
                value: Some(value),
                ..Default::default()
            })
        })
        .collect()
}

/// Image a component runs: the pushed image when it was built, its name
/// otherwise.
pub fn component_image(component: &ComponentSpec) -> String {
    let image = &component.image;
    if image.repository.is_some() && image.registry.is_some() {
        return image.key();
    }
    match &image.tag {
        Some(tag) => format!("{}:{}", image.name, tag),
        None => image.name.clone(),
    }
}

fn container_port(service: &Service) -> Option<ContainerPort> {
    let port = service.spec.as_ref()?.ports.as_ref()?.first()?.port;
    Some(ContainerPort {
        name: service.metadata.name.clone(),
        container_port: port,
        host_port: Some(port),
        ..Default::default()
    })
}

pub fn pod_for(
    component: &ComponentSpec,
    namespace: &str,
    env: Vec<EnvVar>,
    services: &[Service],
) -> Pod {
    let labels = BTreeMap::from([(COMPONENT_LABEL.to_string(), component.name.clone())]);

    let mut pod = Pod {
        metadata: ObjectMeta {
            name: Some(component.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: component.name.clone(),
                image: Some(component_image(component)),
                image_pull_policy: Some("Always".to_string()),
                env: Some(env),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    };

    if let Some(container) = pod
        .spec
        .as_mut()
        .and_then(|spec| spec.containers.first_mut())
    {
        let ports: Vec<ContainerPort> = services.iter().filter_map(container_port).collect();
        if !ports.is_empty() {
            container.ports = Some(ports);
        }
        if !component.command.is_empty() {
            container.command = Some(component.command.clone());
        }
    }

    pod
}

/// Services of `component`, as recorded by the networking gate.
async fn services_for(
    cluster: &dyn Cluster,
    workspace: &Workspace,
    component: &ComponentSpec,
) -> Result<Vec<Service>> {
    let status = workspace.status();
    let mut services = Vec::new();
    for network in &component.networks {
        let key = service_key(&component.name, &network.name);
        let reference = status.services.get(&key).ok_or_else(|| Error::NotFound {
            kind: "Service",
            name: key.clone(),
        })?;
        let service = cluster
            .get_service(&reference.namespaced_name())
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "Service",
                name: reference.to_string(),
            })?;
        services.push(service);
    }
    Ok(services)
}

/// Creates the pod of every component in the managed namespace. Nothing is
/// created unless every component's services are known.
pub async fn deploy(cluster: &dyn Cluster, workspace: &Workspace, namespace: &str) -> Result<()> {
    let mut pods = Vec::new();
    for component in &workspace.spec.components {
        let env = environments_for(component, workspace)?;
        let services = services_for(cluster, workspace, component).await?;
        pods.push(pod_for(component, namespace, env, &services));
    }

    for pod in &pods {
        let pod = cluster.ensure_pod(pod).await?;
        info!(pod = ?pod.metadata.name, %namespace, "component pod ready");
    }
    Ok(())
}

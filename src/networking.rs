use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::info;

use crate::cluster::Cluster;
use crate::reference::{Reference, ServiceReference};
use crate::workspace_crd::{service_key, ComponentNetworkSpec, ComponentSpec, Workspace};
use crate::{Error, Result, COMPONENT_LABEL, MANAGED_BY, MANAGED_BY_LABEL};

pub const INGRESS_CLASS_NAME: &str = "nginx";
pub const CERT_CLUSTER_ISSUER_NAME: &str = "spot-workspace-issuer";

fn protocol(network: &ComponentNetworkSpec) -> Option<String> {
    let protocol = network.protocol.as_deref()?.to_uppercase();
    matches!(protocol.as_str(), "TCP" | "UDP" | "SCTP").then_some(protocol)
}

/// Service exposing `network` of `component`, named after the network.
pub fn service_for(namespace: &str, component: &ComponentSpec, network: &ComponentNetworkSpec) -> Service {
    let selector = BTreeMap::from([(COMPONENT_LABEL.to_string(), component.name.clone())]);
    let labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())]);

    Service {
        metadata: ObjectMeta {
            name: Some(network.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some(network.name.clone()),
                port: network.port,
                target_port: Some(IntOrString::Int(network.port)),
                protocol: protocol(network),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// An adopted Service must route to the same component and port as the one
/// that would have been created.
fn serves(service: &Service, component: &ComponentSpec, network: &ComponentNetworkSpec) -> bool {
    let Some(spec) = service.spec.as_ref() else {
        return false;
    };
    let selects_component = spec
        .selector
        .as_ref()
        .and_then(|selector| selector.get(COMPONENT_LABEL))
        == Some(&component.name);
    let on_port = spec
        .ports
        .as_ref()
        .map_or(false, |ports| ports.iter().any(|port| port.port == network.port));
    selects_component && on_port
}

pub fn ingress_host(workspace: &Workspace, network: &ComponentNetworkSpec) -> String {
    format!("{}.{}.{}", network.name, workspace.spec.tag, workspace.spec.host)
}

/// Ingress rule routing to `service_name`, or None when the network isn't
/// exposed.
pub fn ingress_rule(
    workspace: &Workspace,
    network: &ComponentNetworkSpec,
    service_name: &str,
) -> Option<IngressRule> {
    let ingress = network.ingress.as_ref()?;
    let mut path = ingress.http_path();
    path.backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: service_name.to_string(),
            port: Some(ServiceBackendPort {
                number: Some(network.port),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };

    Some(IngressRule {
        host: Some(ingress_host(workspace, network)),
        http: Some(HTTPIngressRuleValue { paths: vec![path] }),
    })
}

/// Single ingress of a workspace, with a TLS block covering every rule host.
pub fn workspace_ingress(workspace: &Workspace, namespace: &str, rules: Vec<IngressRule>) -> Ingress {
    let workspace_name = workspace.metadata.name.clone().unwrap_or_default();
    let annotations = BTreeMap::from([
        (
            "cert-manager.io/cluster-issuer".to_string(),
            CERT_CLUSTER_ISSUER_NAME.to_string(),
        ),
        (
            "cert-manager.io/issue-temporary-certificate".to_string(),
            "true".to_string(),
        ),
        (
            "acme.cert-manager.io/http01-edit-in-place".to_string(),
            "true".to_string(),
        ),
    ]);

    let mut hosts: Vec<String> = Vec::new();
    for host in rules.iter().filter_map(|rule| rule.host.clone()) {
        if !hosts.contains(&host) {
            hosts.push(host);
        }
    }

    Ingress {
        metadata: ObjectMeta {
            name: Some(workspace_name.clone()),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(INGRESS_CLASS_NAME.to_string()),
            rules: Some(rules),
            tls: Some(vec![IngressTLS {
                hosts: Some(hosts),
                secret_name: Some(format!("{workspace_name}-ingress-cert")),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Creates the services of every component network and the workspace
/// ingress. Returns the services keyed by `<component>/<network>`.
pub async fn provision(
    cluster: &dyn Cluster,
    workspace: &Workspace,
    namespace: &str,
) -> Result<BTreeMap<String, ServiceReference>> {
    let mut services = BTreeMap::new();
    let mut rules = Vec::new();

    for component in &workspace.spec.components {
        for network in &component.networks {
            let service = cluster
                .ensure_service(&service_for(namespace, component, network))
                .await?;
            if !serves(&service, component, network) {
                return Err(Error::UserInputError(format!(
                    "network {} of component {} collides with service {} of another component",
                    network.name,
                    component.name,
                    Reference::new(&service)
                )));
            }
            let reference = Reference::new(&service);
            info!(service = %reference, component = %component.name, "service ready");

            if let Some(rule) = ingress_rule(workspace, network, &reference.name) {
                rules.push(rule);
            }
            services.insert(service_key(&component.name, &network.name), reference);
        }
    }

    if !rules.is_empty() {
        let ingress = cluster
            .ensure_ingress(&workspace_ingress(workspace, namespace, rules))
            .await?;
        info!(ingress = ?ingress.metadata.name, %namespace, "ingress ready");
    }

    Ok(services)
}

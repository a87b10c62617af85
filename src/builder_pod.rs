use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, ExecAction, Pod, PodSpec, Probe,
    ResourceRequirements, Secret, SecretKeySelector, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::build_crd::{
    Build, SECRET_ARGUMENTS_KEY, SECRET_BUILD_SECRETS_KEY, SECRET_REGISTRIES_KEY,
    SECRET_REPOSITORIES_KEY,
};
use crate::config::ControllerConfig;
use crate::{BUILD_LABEL, MANAGED_BY, MANAGED_BY_LABEL};

pub const BUILDKITD_IMAGE: &str = "moby/buildkit:master";
const SOCKET_VOLUME: &str = "buildkit-socket";
const SOCKET_PATH: &str = "/run/buildkit/";

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret.to_string()),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn has_key(secret: &Secret, key: &str) -> bool {
    secret.data.as_ref().map_or(false, |d| d.contains_key(key))
        || secret
            .string_data
            .as_ref()
            .map_or(false, |d| d.contains_key(key))
}

fn memory() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([(
            "memory".to_string(),
            Quantity("1Gi".to_string()),
        )])),
        limits: Some(BTreeMap::from([(
            "memory".to_string(),
            Quantity("2Gi".to_string()),
        )])),
        ..Default::default()
    }
}

fn privileged() -> Option<SecurityContext> {
    Some(SecurityContext {
        privileged: Some(true),
        ..Default::default()
    })
}

fn socket_mount() -> Option<Vec<VolumeMount>> {
    Some(vec![VolumeMount {
        name: SOCKET_VOLUME.to_string(),
        mount_path: SOCKET_PATH.to_string(),
        ..Default::default()
    }])
}

/// Environment of the worker container.
fn worker_env(build: &Build, secret: &Secret) -> Vec<EnvVar> {
    let secret_name = secret.name_any();
    let repository = build.spec.image.repository.clone().unwrap_or_default();

    let mut vars = vec![
        env(
            "BUILD_REFERENCE",
            &format!("{}/{}", build.namespace().unwrap_or_default(), build.name_any()),
        ),
        env("REPOSITORY_URL", &repository.url),
        env("REPOSITORY_BRANCH", &repository.branch),
        env("REPOSITORY_COMMIT", &repository.hash),
        env("REPOSITORY_CONTEXT", &repository.context),
    ];
    if let Some(dockerfile) = &repository.dockerfile {
        vars.push(env("REPOSITORY_DOCKERFILE", dockerfile));
    }
    vars.push(env("IMAGE_URL", build.image_url()));
    vars.push(env("IMAGE_TAG", build.tag()));
    vars.push(secret_env(
        "REPOSITORY_SECRETS",
        &secret_name,
        SECRET_REPOSITORIES_KEY,
    ));
    vars.push(secret_env(
        "REGISTRY_SECRETS",
        &secret_name,
        SECRET_REGISTRIES_KEY,
    ));

    if has_key(secret, SECRET_ARGUMENTS_KEY) {
        vars.push(secret_env("BUILD_ARGUMENTS", &secret_name, SECRET_ARGUMENTS_KEY));
    }
    if has_key(secret, SECRET_BUILD_SECRETS_KEY) {
        vars.push(secret_env("BUILD_SECRETS", &secret_name, SECRET_BUILD_SECRETS_KEY));
    }
    vars
}

/// Pod running the worker next to a buildkit daemon, owned by `build`.
pub fn builder_pod(build: &Build, secret: &Secret, config: &ControllerConfig) -> Pod {
    let labels = BTreeMap::from([
        (BUILD_LABEL.to_string(), build.name_any()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
    ]);

    let worker = Container {
        name: "buildkit".to_string(),
        image: Some(config.builder_image.clone()),
        image_pull_policy: Some("Never".to_string()),
        resources: Some(memory()),
        env: Some(worker_env(build, secret)),
        security_context: privileged(),
        volume_mounts: socket_mount(),
        ..Default::default()
    };

    let daemon = Container {
        name: "buildkitd".to_string(),
        image: Some(BUILDKITD_IMAGE.to_string()),
        resources: Some(memory()),
        security_context: privileged(),
        liveness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec![
                    "buildctl".to_string(),
                    "debug".to_string(),
                    "workers".to_string(),
                ]),
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(30),
            ..Default::default()
        }),
        volume_mounts: socket_mount(),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("build-{}-", build.name_any())),
            namespace: build.namespace(),
            labels: Some(labels),
            owner_references: build.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            service_account_name: Some(config.builder_service_account.clone()),
            containers: vec![worker, daemon],
            volumes: Some(vec![Volume {
                name: SOCKET_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_crd::{BuildSpec, ImageSpec, RegistrySpec, RepositorySpec};
    use k8s_openapi::ByteString;

    fn build() -> Build {
        let mut build = Build::new(
            "app-x7k2p",
            BuildSpec {
                image: ImageSpec {
                    name: "app".to_string(),
                    tag: Some("wdemo".to_string()),
                    repository: Some(RepositorySpec {
                        url: "https://github.com/acme/app".to_string(),
                        branch: "main".to_string(),
                        hash: "abc123".to_string(),
                        context: "services/app".to_string(),
                        dockerfile: Some("Dockerfile.dev".to_string()),
                    }),
                    registry: Some(RegistrySpec {
                        url: "registry.example.com/acme/app".to_string(),
                    }),
                },
                secret_ref: "spot-build-secrets".to_string(),
            },
        );
        build.metadata.namespace = Some("default".to_string());
        build.metadata.uid = Some("build-uid".to_string());
        build
    }

    fn secret(keys: &[&str]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("spot-build-secrets".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(
                keys.iter()
                    .map(|k| (k.to_string(), ByteString(b"[]".to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn value<'a>(vars: &'a [EnvVar], name: &str) -> Option<&'a str> {
        vars.iter()
            .find(|v| v.name == name)
            .and_then(|v| v.value.as_deref())
    }

    #[test]
    fn pod_is_owned_by_the_build() {
        let pod = builder_pod(&build(), &secret(&[]), &ControllerConfig::default());

        assert_eq!(pod.metadata.generate_name.as_deref(), Some("build-app-x7k2p-"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(pod.labels()[BUILD_LABEL], "app-x7k2p");
        let owner = &pod.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "Build");
        assert_eq!(owner.uid, "build-uid");
        assert_eq!(owner.controller, Some(true));

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            spec.service_account_name.as_deref(),
            Some("spot-controller-manager")
        );
        assert!(spec.volumes.unwrap()[0].empty_dir.is_some());
    }

    #[test]
    fn worker_and_daemon_share_the_socket() {
        let pod = builder_pod(&build(), &secret(&[]), &ControllerConfig::default());
        let containers = pod.spec.unwrap().containers;
        assert_eq!(containers.len(), 2);

        let (worker, daemon) = (&containers[0], &containers[1]);
        assert_eq!(worker.image.as_deref(), Some("builder:dev"));
        assert_eq!(worker.image_pull_policy.as_deref(), Some("Never"));
        assert_eq!(daemon.image.as_deref(), Some(BUILDKITD_IMAGE));

        for container in [worker, daemon] {
            assert_eq!(
                container.volume_mounts.as_ref().unwrap()[0].mount_path,
                SOCKET_PATH
            );
            assert_eq!(
                container.security_context.as_ref().unwrap().privileged,
                Some(true)
            );
            let resources = container.resources.as_ref().unwrap();
            assert_eq!(resources.requests.as_ref().unwrap()["memory"].0, "1Gi");
            assert_eq!(resources.limits.as_ref().unwrap()["memory"].0, "2Gi");
        }

        let probe = daemon.liveness_probe.as_ref().unwrap();
        assert_eq!(probe.initial_delay_seconds, Some(5));
        assert_eq!(probe.period_seconds, Some(30));
        assert_eq!(
            probe.exec.as_ref().unwrap().command.as_ref().unwrap().join(" "),
            "buildctl debug workers"
        );
    }

    #[test]
    fn worker_environment_describes_the_build() {
        let pod = builder_pod(&build(), &secret(&[]), &ControllerConfig::default());
        let vars = pod.spec.unwrap().containers[0].env.clone().unwrap();

        assert_eq!(value(&vars, "BUILD_REFERENCE"), Some("default/app-x7k2p"));
        assert_eq!(value(&vars, "REPOSITORY_URL"), Some("https://github.com/acme/app"));
        assert_eq!(value(&vars, "REPOSITORY_BRANCH"), Some("main"));
        assert_eq!(value(&vars, "REPOSITORY_COMMIT"), Some("abc123"));
        assert_eq!(value(&vars, "REPOSITORY_CONTEXT"), Some("services/app"));
        assert_eq!(value(&vars, "REPOSITORY_DOCKERFILE"), Some("Dockerfile.dev"));
        assert_eq!(value(&vars, "IMAGE_URL"), Some("registry.example.com/acme/app"));
        assert_eq!(value(&vars, "IMAGE_TAG"), Some("wdemo"));

        let registries = vars.iter().find(|v| v.name == "REGISTRY_SECRETS").unwrap();
        let selector = registries
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(selector.name.as_deref(), Some("spot-build-secrets"));
        assert_eq!(selector.key, SECRET_REGISTRIES_KEY);
        assert!(vars.iter().all(|v| v.name != "BUILD_ARGUMENTS"));
    }

    #[test]
    fn optional_secret_keys_are_forwarded_when_present() {
        let pod = builder_pod(
            &build(),
            &secret(&[SECRET_ARGUMENTS_KEY, SECRET_BUILD_SECRETS_KEY]),
            &ControllerConfig::default(),
        );
        let vars = pod.spec.unwrap().containers[0].env.clone().unwrap();

        assert!(vars.iter().any(|v| v.name == "BUILD_ARGUMENTS"));
        assert!(vars.iter().any(|v| v.name == "BUILD_SECRETS"));
    }
}

//! The Build worker, run inside the builder pod: clones the sources, builds
//! them with buildkit and pushes the image, reporting each stage on the
//! Build's conditions.

pub mod buildkit;
pub mod config;
pub mod oci;
pub mod registry;
pub mod source;
pub mod status;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::build_crd::{Build, BuildConditionType};
use crate::cluster::Cluster;
use crate::NamespacedName;

pub use config::WorkerConfig;
use status::monitor_condition;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("BUILD_REFERENCE is expected to have 2 components, had {count}: {reference}")]
    InvalidReference { count: usize, reference: String },

    #[error("Secret not found for the host: {0}")]
    SecretNotFound(String),

    #[error("couldn't find credentials for the host: {0}")]
    CredentialsNotFound(String),

    #[error("Build {0} not found")]
    BuildNotFound(String),

    #[error("Git Error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("buildctl exited with {0}")]
    BuildkitFailed(String),

    #[error("Registry Error: {0}")]
    Registry(#[from] reqwest::Error),

    #[error("registry answered {status} to {action}: {message}")]
    RegistryRejected {
        action: String,
        status: u16,
        message: String,
    },

    #[error("Invalid OCI layout: {0}")]
    InvalidLayout(String),

    #[error("Cluster Error: {0}")]
    Cluster(#[from] crate::Error),

    #[error("Task Error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = WorkerError> = std::result::Result<T, E>;

/// Credentials for a host, as stored in the build secret.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct HostCredential {
    pub host: String,
    pub access_key: String,
    pub secret_token: String,
}

pub fn parse_credentials(json: &str) -> Result<Vec<HostCredential>> {
    if json.trim().is_empty() {
        return Ok(vec![]);
    }
    Ok(serde_json::from_str(json)?)
}

/// Runs the source, building and registry stages of the Build named by the
/// configuration. Stops at the first failing stage.
pub async fn run(cluster: &dyn Cluster, config: &WorkerConfig) -> Result<()> {
    let key = config.build_key()?;
    let build: Build = cluster
        .get_build(&key)
        .await?
        .ok_or_else(|| WorkerError::BuildNotFound(key.to_string()))?;
    info!(build = %key, image = %build.image_key(), "starting build");

    let workdir = tempfile::tempdir()?;

    let checkout = monitor_condition(
        cluster,
        &key,
        BuildConditionType::Source,
        source::fetch(config, workdir.path().join("src")),
        |_, _| {},
    )
    .await?;

    let layout = monitor_condition(
        cluster,
        &key,
        BuildConditionType::Building,
        buildkit::build(config, &checkout, workdir.path()),
        |_, _| {},
    )
    .await?;

    monitor_condition(
        cluster,
        &key,
        BuildConditionType::Registry,
        registry::upload(config, &layout),
        |image, status| status.image = Some(image.clone()),
    )
    .await?;

    info!(build = %key, "build complete");
    Ok(())
}

/// Splits `BUILD_REFERENCE` into the Build's namespace and name.
pub fn parse_reference(reference: &str) -> Result<NamespacedName> {
    let parts: Vec<&str> = reference.split('/').collect();
    match parts.as_slice() {
        [namespace, name] if !namespace.is_empty() && !name.is_empty() => {
            Ok(NamespacedName::new(*namespace, *name))
        }
        _ => Err(WorkerError::InvalidReference {
            count: parts.len(),
            reference: reference.to_string(),
        }),
    }
}

/// Metrics
pub mod metrics;
pub use metrics::Metrics;

pub mod config;
pub mod telemetry;

pub mod conditions;
pub mod reference;
pub use reference::{NamespacedName, Reference, ServiceReference};

pub mod build_crd;
pub use build_crd::Build;
pub mod workspace_crd;
pub use workspace_crd::Workspace;

pub mod cluster;
pub use cluster::{Cluster, KubeCluster};

mod finalizer;
mod namespace;
mod networking;
mod images;
mod deployment;
pub mod workspace_controller;

mod builder_pod;
pub mod build_controller;

pub mod webhook;
pub mod worker;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use thiserror::Error;

/// Finalizer blocking Workspace deletion on the cleanup of its namespace.
pub const WORKSPACE_FINALIZER: &str = "spot.release.com/namespace";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "spot-operator";
/// Selects the pods of a component.
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/name";
/// Uid of the Workspace a namespace or a Build belongs to.
pub const WORKSPACE_UID_LABEL: &str = "spot.release.com/workspace-uid";
/// Name of the Build a worker pod runs.
pub const BUILD_LABEL: &str = "spot.release.com/build";

/// State shared by the reconcilers.
pub struct ContextData {
    pub cluster: Arc<dyn Cluster>,
    pub config: config::ControllerConfig,
    pub metrics: Metrics,
}

impl ContextData {
    pub fn new(cluster: Arc<dyn Cluster>, config: config::ControllerConfig, metrics: Metrics) -> Self {
        Self {
            cluster,
            config,
            metrics,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid Workspace: {0}")]
    UserInputError(String),

    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("pod failed without notifying the build")]
    PodUnexpectedlyFailed,

    #[error("stage did not match the status of the build")]
    StageWithInvalidState,

    #[error("build {0} failed")]
    BuildFailed(String),

    #[error("could not find a value for the environment {0}")]
    EnvironmentNotFound(String),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::SerializationError(_) => "serialization",
            Error::KubeError(_) => "kube",
            Error::UserInputError(_) => "user_input",
            Error::NotFound { .. } => "not_found",
            Error::PodUnexpectedlyFailed => "pod_failed",
            Error::StageWithInvalidState => "invalid_stage",
            Error::BuildFailed(_) => "build_failed",
            Error::EnvironmentNotFound(_) => "environment_not_found",
        }
        .to_string()
    }

    /// Optimistic concurrency failure on a write.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(resp)) if resp.code == 409)
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 404,
            Error::NotFound { .. } => true,
            _ => false,
        }
    }

    /// Cluster failures worth retrying on a later reconcile: connectivity,
    /// throttling, server errors and conflicts that outlived their retries.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => {
                resp.code >= 500 || resp.code == 429 || resp.code == 409
            }
            Error::KubeError(kube::Error::SerdeError(_)) => false,
            Error::KubeError(_) => true,
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

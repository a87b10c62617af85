use clap::Parser;

use super::{parse_reference, Result};
use crate::build_crd::DEFAULT_IMAGE_TAG;
use crate::NamespacedName;

/// Everything the worker needs, handed over by the builder pod's environment.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "spot-builder", about = "Builds and pushes the image of a Build")]
pub struct WorkerConfig {
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// `<namespace>/<name>` of the Build.
    #[arg(long, env = "BUILD_REFERENCE")]
    pub build_reference: String,

    #[arg(long, env = "REPOSITORY_URL")]
    pub repository_url: String,

    #[arg(long, env = "REPOSITORY_BRANCH")]
    pub repository_branch: String,

    #[arg(long, env = "REPOSITORY_COMMIT")]
    pub repository_commit: String,

    #[arg(long, env = "REPOSITORY_CONTEXT", default_value = "")]
    pub repository_context: String,

    #[arg(long, env = "REPOSITORY_DOCKERFILE")]
    pub repository_dockerfile: Option<String>,

    #[arg(long, env = "IMAGE_URL")]
    pub image_url: String,

    #[arg(long, env = "IMAGE_TAG", default_value = DEFAULT_IMAGE_TAG)]
    pub image_tag: String,

    /// JSON `[{host, access_key, secret_token}]`.
    #[arg(long, env = "REPOSITORY_SECRETS", default_value = "[]", hide_env_values = true)]
    pub repository_secrets: String,

    /// JSON `[{host, access_key, secret_token}]`.
    #[arg(long, env = "REGISTRY_SECRETS", default_value = "[]", hide_env_values = true)]
    pub registry_secrets: String,

    /// JSON `[{key, value}]`.
    #[arg(long, env = "BUILD_ARGUMENTS", hide_env_values = true)]
    pub build_arguments: Option<String>,

    /// JSON `[{key, value}]`.
    #[arg(long, env = "BUILD_SECRETS", hide_env_values = true)]
    pub build_secrets: Option<String>,

    #[arg(long, env = "BUILDCTL", default_value = "buildctl")]
    pub buildctl: String,
}

impl WorkerConfig {
    pub fn build_key(&self) -> Result<NamespacedName> {
        parse_reference(&self.build_reference)
    }

    /// `<IMAGE_URL>:<IMAGE_TAG>`, where the image ends up.
    pub fn image(&self) -> String {
        format!("{}:{}", self.image_url, self.image_tag)
    }
}

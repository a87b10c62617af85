use clap::Parser;
use std::path::PathBuf;

/// Configuration of the operator binary, read from flags or the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "spot-operator", about = "Runs the Workspace and Build controllers")]
pub struct OperatorConfig {
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Image of the worker container in builder pods.
    #[arg(long, env = "BUILDER_IMAGE", default_value = "builder:dev")]
    pub builder_image: String,

    #[arg(long, env = "BUILDER_SERVICE_ACCOUNT", default_value = "spot-controller-manager")]
    pub builder_service_account: String,

    /// Secret with the repository and registry credentials, referenced by
    /// every Build.
    #[arg(long, env = "BUILD_SECRET_NAME", default_value = "spot-build-secrets")]
    pub build_secret_name: String,

    /// Health and metrics.
    #[arg(long, env = "SERVER_ADDRESS", default_value = "0.0.0.0:8080")]
    pub server_address: String,

    /// Admission webhooks.
    #[arg(long, env = "WEBHOOK_ADDRESS", default_value = "0.0.0.0:9443")]
    pub webhook_address: String,

    #[arg(long, env = "WEBHOOK_CERT")]
    pub webhook_cert: Option<PathBuf>,

    #[arg(long, env = "WEBHOOK_KEY")]
    pub webhook_key: Option<PathBuf>,
}

impl OperatorConfig {
    /// Certificate and key, when the webhooks should be served over TLS.
    pub fn webhook_tls(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.webhook_cert, &self.webhook_key) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }
}

/// What the reconcilers need from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub builder_image: String,
    pub builder_service_account: String,
    pub build_secret_name: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            builder_image: "builder:dev".to_string(),
            builder_service_account: "spot-controller-manager".to_string(),
            build_secret_name: "spot-build-secrets".to_string(),
        }
    }
}

impl From<&OperatorConfig> for ControllerConfig {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            builder_image: config.builder_image.clone(),
            builder_service_account: config.builder_service_account.clone(),
            build_secret_name: config.build_secret_name.clone(),
        }
    }
}

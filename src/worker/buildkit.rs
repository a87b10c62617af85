use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

use super::oci::Layout;
use super::source::Checkout;
use super::{Result, WorkerConfig, WorkerError};

const DAEMON_POLL: Duration = Duration::from_millis(100);

/// A `{key, value}` pair from the build secret.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

fn parse_attributes(json: Option<&str>) -> Result<Vec<Attribute>> {
    match json.map(str::trim) {
        None | Some("") => Ok(vec![]),
        Some(json) => Ok(serde_json::from_str(json)?),
    }
}

/// Build secrets are handed to buildctl as files. The files live as long as
/// the returned handles.
fn write_secrets(secrets: &[Attribute], dir: &Path) -> Result<Vec<(String, NamedTempFile)>> {
    secrets
        .iter()
        .map(|secret| {
            let file = tempfile::Builder::new()
                .prefix(&secret.key)
                .tempfile_in(dir)?;
            std::fs::write(file.path(), &secret.value)?;
            Ok((secret.key.clone(), file))
        })
        .collect()
}

/// Arguments of `buildctl build` exporting the image as an OCI layout at `dest`.
pub fn build_args(
    context: &Path,
    dockerfile: Option<&str>,
    dest: &Path,
    arguments: &[Attribute],
    secrets: &[(String, PathBuf)],
) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "--frontend".to_string(),
        "dockerfile.v0".to_string(),
        "--local".to_string(),
        format!("context={}", context.display()),
        "--local".to_string(),
        format!("dockerfile={}", context.display()),
    ];
    if let Some(dockerfile) = dockerfile {
        args.push("--opt".to_string());
        args.push(format!("filename={dockerfile}"));
    }
    args.push("--output".to_string());
    args.push(format!("type=oci,dest={},tar=false", dest.display()));

    for argument in arguments {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", argument.key, argument.value));
    }
    for (id, path) in secrets {
        args.push("--secret".to_string());
        args.push(format!("id={},src={}", id, path.display()));
    }
    args
}

/// Waits until buildkitd, started alongside in the pod, answers.
pub async fn wait_for_daemon(buildctl: &str) {
    let mut attempts = 0u32;
    loop {
        let ready = Command::new(buildctl)
            .args(["debug", "workers"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);
        if ready {
            debug!(attempts, "buildkitd is ready");
            return;
        }
        attempts += 1;
        tokio::time::sleep(DAEMON_POLL).await;
    }
}

/// Builds the checkout and returns the OCI layout of the image.
pub async fn build(config: &WorkerConfig, checkout: &Checkout, workdir: &Path) -> Result<Layout> {
    let arguments = parse_attributes(config.build_arguments.as_deref())?;
    let secrets = parse_attributes(config.build_secrets.as_deref())?;
    let secret_files = write_secrets(&secrets, workdir)?;
    let secret_paths: Vec<(String, PathBuf)> = secret_files
        .iter()
        .map(|(id, file)| (id.clone(), file.path().to_path_buf()))
        .collect();

    wait_for_daemon(&config.buildctl).await;

    let dest = workdir.join("image");
    let args = build_args(
        &checkout.context,
        config.repository_dockerfile.as_deref(),
        &dest,
        &arguments,
        &secret_paths,
    );
    info!(
        context = %checkout.context.display(),
        arguments = arguments.len(),
        secrets = secret_paths.len(),
        "running buildctl"
    );

    let status = Command::new(&config.buildctl)
        .args(&args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .status()
        .await?;
    drop(secret_files);

    if !status.success() {
        return Err(WorkerError::BuildkitFailed(status.to_string()));
    }
    Layout::open(dest)
}

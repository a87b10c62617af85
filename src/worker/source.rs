use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, FetchOptions, Oid, RemoteCallbacks, Repository};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use super::{parse_credentials, HostCredential, Result, WorkerConfig, WorkerError};

/// A repository checked out at the commit to build.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkout {
    pub root: PathBuf,
    /// Absolute build context within `root`.
    pub context: PathBuf,
}

/// Credential of the host serving `repository_url`.
pub fn secret_for_host<'a>(
    secrets: &'a [HostCredential],
    repository_url: &str,
) -> Result<&'a HostCredential> {
    let host = Url::parse(repository_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string));

    secrets
        .iter()
        .find(|secret| Some(&secret.host) == host.as_ref() || secret.host == repository_url)
        .ok_or_else(|| WorkerError::SecretNotFound(host.unwrap_or_else(|| repository_url.to_string())))
}

/// Clones the configured repository into `target` and checks out the commit.
pub async fn fetch(config: &WorkerConfig, target: PathBuf) -> Result<Checkout> {
    let secrets = parse_credentials(&config.repository_secrets)?;
    let credential = secret_for_host(&secrets, &config.repository_url)?.clone();

    let url = config.repository_url.clone();
    let branch = config.repository_branch.clone();
    let commit = config.repository_commit.clone();
    let context = config.repository_context.clone();

    tokio::task::spawn_blocking(move || {
        clone_at(&url, &branch, &commit, &context, Some(&credential), &target)
    })
    .await?
}

/// Single branch clone of `branch`, without checkout, then a detached
/// checkout of `commit`.
pub fn clone_at(
    url: &str,
    branch: &str,
    commit: &str,
    context: &str,
    credential: Option<&HostCredential>,
    target: &Path,
) -> Result<Checkout> {
    std::fs::create_dir_all(target)?;

    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0;
    callbacks.credentials(move |_url, _user_from_url, _allowed| {
        attempts += 1;
        match credential {
            // git2 keeps asking as long as the server refuses
            Some(credential) if attempts == 1 => {
                debug!(host = %credential.host, "authenticating with the repository secret");
                Cred::userpass_plaintext(&credential.access_key, &credential.secret_token)
            }
            _ => Err(git2::Error::from_str("repository refused the credentials")),
        }
    });

    let mut fetch_options = FetchOptions::new();
    fetch_options.remote_callbacks(callbacks);

    let mut no_checkout = CheckoutBuilder::new();
    no_checkout.dry_run();

    let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
    let mut builder = RepoBuilder::new();
    builder
        .fetch_options(fetch_options)
        .branch(branch)
        .with_checkout(no_checkout)
        .remote_create(move |repo, name, url| repo.remote_with_fetch(name, url, &refspec));

    info!("Cloning {} ({}) into {}", url, branch, target.display());
    let repo = builder.clone(url, target)?;
    checkout(&repo, commit)?;

    Ok(Checkout {
        root: target.to_path_buf(),
        context: target.join(context),
    })
}

fn checkout(repo: &Repository, commit: &str) -> Result<()> {
    let oid = Oid::from_str(commit)?;
    let commit = repo.find_commit(oid)?;
    repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
    repo.set_head_detached(oid)?;
    info!(commit = %oid, "checked out");
    Ok(())
}

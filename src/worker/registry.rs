use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::BoxFuture;
use futures::FutureExt;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

use super::oci::{Descriptor, ImageIndex, Layout, Manifest, INDEX_MEDIA_TYPE};
use super::{parse_credentials, HostCredential, Result, WorkerConfig, WorkerError};
use crate::build_crd::BuildImage;

const DOCKER_HUB: &str = "index.docker.io";
const DOCKER_HUB_ENDPOINT: &str = "registry-1.docker.io";

lazy_static! {
    static ref CHALLENGE_PARAM: Regex = Regex::new(r#"(\w+)="([^"]*)""#).unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

/// Registry credentials by host.
#[derive(Debug, Default)]
pub struct Keychain {
    credentials: HashMap<String, Credential>,
}

impl Keychain {
    pub fn new(secrets: &[HostCredential]) -> Self {
        let credentials = secrets
            .iter()
            .map(|secret| {
                (
                    secret.host.clone(),
                    Credential {
                        username: secret.access_key.clone(),
                        password: secret.secret_token.clone(),
                    },
                )
            })
            .collect();
        Keychain { credentials }
    }

    pub fn resolve(&self, host: &str) -> Result<&Credential> {
        self.credentials
            .get(host)
            .or_else(|| match host {
                DOCKER_HUB => self.credentials.get("docker.io"),
                _ => None,
            })
            .ok_or_else(|| WorkerError::CredentialsNotFound(host.to_string()))
    }
}

/// Where an image lives: registry host and repository within it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn parse(image_url: &str, tag: &str) -> Self {
        let (registry, repository) = match image_url.split_once('/') {
            Some((host, path)) if host.contains('.') || host.contains(':') || host == "localhost" => {
                (host.to_string(), path.to_string())
            }
            Some(_) => (DOCKER_HUB.to_string(), image_url.to_string()),
            None => (DOCKER_HUB.to_string(), format!("library/{image_url}")),
        };
        ImageReference {
            registry,
            repository,
            tag: tag.to_string(),
        }
    }

    /// Base URL of the registry API.
    pub fn endpoint(&self) -> String {
        let host = match self.registry.as_str() {
            DOCKER_HUB => DOCKER_HUB_ENDPOINT,
            host => host,
        };
        let scheme = if host.starts_with("localhost") || host.starts_with("127.0.0.1") {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{host}")
    }
}

#[derive(Debug, PartialEq)]
struct Challenge {
    scheme: String,
    params: HashMap<String, String>,
}

fn parse_challenge(header: &str) -> Option<Challenge> {
    let (scheme, rest) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    if scheme.is_empty() {
        return None;
    }
    let params = CHALLENGE_PARAM
        .captures_iter(rest)
        .map(|captures| (captures[1].to_lowercase(), captures[2].to_string()))
        .collect();
    Some(Challenge {
        scheme: scheme.to_lowercase(),
        params,
    })
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

async fn check(response: Response, action: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(WorkerError::RegistryRejected {
        action: action.to_string(),
        status: status.as_u16(),
        message,
    })
}

/// Pushes blobs and manifests to one repository of a registry.
pub struct Uploader {
    client: Client,
    endpoint: String,
    reference: ImageReference,
    credential: Credential,
    authorization: Option<String>,
}

impl Uploader {
    pub fn new(reference: ImageReference, credential: Credential) -> Self {
        Uploader {
            client: Client::new(),
            endpoint: reference.endpoint(),
            reference,
            credential,
            authorization: None,
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.authorization {
            Some(authorization) => request.header(AUTHORIZATION, authorization),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}/{}", self.endpoint, self.reference.repository, path)
    }

    /// Answers the registry's challenge, if any, on `GET /v2/`.
    pub async fn authenticate(&mut self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/v2/", self.endpoint))
            .send()
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            check(response, "ping").await?;
            debug!(registry = %self.reference.registry, "no authentication required");
            return Ok(());
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_challenge);
        let basic = format!(
            "Basic {}",
            STANDARD.encode(format!(
                "{}:{}",
                self.credential.username, self.credential.password
            ))
        );

        self.authorization = match challenge {
            Some(challenge) if challenge.scheme == "bearer" => {
                Some(format!("Bearer {}", self.token(&challenge).await?))
            }
            _ => Some(basic),
        };
        debug!(registry = %self.reference.registry, "authenticated");
        Ok(())
    }

    async fn token(&self, challenge: &Challenge) -> Result<String> {
        let realm = challenge.params.get("realm").ok_or_else(|| WorkerError::RegistryRejected {
            action: "authenticate".to_string(),
            status: StatusCode::UNAUTHORIZED.as_u16(),
            message: "bearer challenge without realm".to_string(),
        })?;
        let mut url = Url::parse(realm)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = challenge.params.get("service") {
                query.append_pair("service", service);
            }
            query.append_pair(
                "scope",
                &format!("repository:{}:pull,push", self.reference.repository),
            );
        }

        let response = self
            .client
            .get(url)
            .basic_auth(&self.credential.username, Some(&self.credential.password))
            .send()
            .await?;
        let token: TokenResponse = check(response, "token").await?.json().await?;
        token
            .token
            .or(token.access_token)
            .ok_or_else(|| WorkerError::RegistryRejected {
                action: "token".to_string(),
                status: StatusCode::OK.as_u16(),
                message: "no token in the response".to_string(),
            })
    }

    /// Uploads a blob of `layout` unless the registry already has it. The
    /// blob is verified, then streamed from disk.
    pub async fn push_blob(&self, layout: &Layout, descriptor: &Descriptor) -> Result<()> {
        let blob_url = self.url(&format!("blobs/{}", descriptor.digest));
        let existing = self.request(Method::HEAD, &blob_url).send().await?;
        if existing.status().is_success() {
            debug!(digest = %descriptor.digest, "blob already present");
            return Ok(());
        }
        let path = layout.verify_blob(descriptor).await?;

        let started = self
            .request(Method::POST, &self.url("blobs/uploads/"))
            .send()
            .await?;
        let started = check(started, "start upload").await?;
        let location = started
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| WorkerError::RegistryRejected {
                action: "start upload".to_string(),
                status: started.status().as_u16(),
                message: "no upload location".to_string(),
            })?;

        let mut upload = Url::parse(&self.endpoint)?.join(location)?;
        upload
            .query_pairs_mut()
            .append_pair("digest", &descriptor.digest);

        let file = tokio::fs::File::open(&path).await?;
        let response = self
            .request(Method::PUT, upload.as_str())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, descriptor.size)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?;
        check(response, "upload blob").await?;
        debug!(digest = %descriptor.digest, size = descriptor.size, "blob pushed");
        Ok(())
    }

    pub async fn put_manifest(&self, reference: &str, media_type: &str, body: Vec<u8>) -> Result<()> {
        let response = self
            .request(Method::PUT, &self.url(&format!("manifests/{reference}")))
            .header(CONTENT_TYPE, media_type)
            .body(body)
            .send()
            .await?;
        check(response, "put manifest").await?;
        Ok(())
    }

    /// Pushes what `descriptor` points to, children first.
    fn push_manifest<'a>(
        &'a self,
        layout: &'a Layout,
        descriptor: &'a Descriptor,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let body = layout.read_blob(descriptor)?;
            if descriptor.is_index() {
                let index: ImageIndex = serde_json::from_slice(&body)?;
                for child in &index.manifests {
                    self.push_manifest(layout, child).await?;
                }
            } else {
                let manifest: Manifest = serde_json::from_slice(&body)?;
                for blob in std::iter::once(&manifest.config).chain(&manifest.layers) {
                    self.push_blob(layout, blob).await?;
                }
            }
            self.put_manifest(&descriptor.digest, &descriptor.media_type, body)
                .await
        }
        .boxed()
    }

    /// Pushes every image of the layout, then its index under the tag.
    pub async fn push_layout(&self, layout: &Layout) -> Result<()> {
        for descriptor in &layout.index.manifests {
            self.push_manifest(layout, descriptor).await?;
        }
        let media_type = layout.index.media_type.as_deref().unwrap_or(INDEX_MEDIA_TYPE);
        self.put_manifest(&self.reference.tag, media_type, layout.raw_index().to_vec())
            .await
    }
}

/// Pushes the built image to `<IMAGE_URL>:<IMAGE_TAG>`.
pub async fn upload(config: &WorkerConfig, layout: &Layout) -> Result<BuildImage> {
    let secrets = parse_credentials(&config.registry_secrets)?;
    let keychain = Keychain::new(&secrets);
    let reference = ImageReference::parse(&config.image_url, &config.image_tag);
    let credential = keychain.resolve(&reference.registry)?.clone();

    let mut uploader = Uploader::new(reference, credential);
    uploader.authenticate().await?;
    uploader.push_layout(layout).await?;

    info!(image = %config.image(), "image pushed");
    Ok(BuildImage {
        url: config.image(),
        metadata: layout.metadata()?,
    })
}

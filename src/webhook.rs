use actix_web::dev::Server;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use anyhow::{anyhow, Context};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;

use crate::Workspace;

pub const MUTATE_PATH: &str = "/mutate-spot-release-com-v1alpha1-workspace";
pub const VALIDATE_PATH: &str = "/validate-spot-release-com-v1alpha1-workspace";

#[derive(Serialize, Deserialize)]
struct Health {
    status: String,
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(Health {
        status: "ok".to_string(),
    })
}

#[get("/metrics")]
pub async fn metrics(registry: web::Data<Registry>) -> impl Responder {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        warn!(error = %e, "could not encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

/// Fills in the finalizer and tag of a Workspace being created.
pub fn mutate_review(review: AdmissionReview<Workspace>) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<Workspace> = match review.try_into() {
        Ok(request) => request,
        Err(e) => return AdmissionResponse::invalid(e.to_string()).into_review(),
    };
    let response = AdmissionResponse::from(&request);

    let workspace = match (&request.operation, &request.object) {
        (Operation::Create, Some(workspace)) => workspace,
        _ => return response.into_review(),
    };

    let operations = workspace.default_patch();
    if operations.is_empty() {
        return response.into_review();
    }
    info!(name = ?request.name, patches = operations.len(), "defaulting workspace");

    let patch: json_patch::Patch = match serde_json::from_value(operations.into()) {
        Ok(patch) => patch,
        Err(e) => return AdmissionResponse::invalid(e.to_string()).into_review(),
    };
    match response.with_patch(patch) {
        Ok(response) => response.into_review(),
        Err(e) => AdmissionResponse::invalid(e.to_string()).into_review(),
    }
}

/// Rejects Workspaces without a finalizer or a valid tag.
pub fn validate_review(review: AdmissionReview<Workspace>) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<Workspace> = match review.try_into() {
        Ok(request) => request,
        Err(e) => return AdmissionResponse::invalid(e.to_string()).into_review(),
    };
    let response = AdmissionResponse::from(&request);

    match &request.object {
        Some(workspace) => match workspace.validate_admission() {
            Ok(()) => response.into_review(),
            Err(e) => {
                info!(name = ?request.name, error = %e, "workspace rejected");
                response.deny(e.to_string()).into_review()
            }
        },
        None => response.into_review(),
    }
}

#[post("/mutate-spot-release-com-v1alpha1-workspace")]
pub async fn mutate(review: web::Json<AdmissionReview<Workspace>>) -> impl Responder {
    HttpResponse::Ok().json(mutate_review(review.into_inner()))
}

#[post("/validate-spot-release-com-v1alpha1-workspace")]
pub async fn validate(review: web::Json<AdmissionReview<Workspace>>) -> impl Responder {
    HttpResponse::Ok().json(validate_review(review.into_inner()))
}

/// Health and metrics.
pub fn server(address: &str, registry: Registry) -> anyhow::Result<Server> {
    let registry = web::Data::new(registry);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(registry.clone())
            .service(health)
            .service(metrics)
    })
    .bind(address)
    .with_context(|| format!("Failed to bind to {address}"))?
    .shutdown_timeout(5)
    .run();
    Ok(server)
}

/// Admission endpoints, over TLS when a certificate and key are given.
pub fn admission_server(address: &str, tls: Option<(&Path, &Path)>) -> anyhow::Result<Server> {
    let server = HttpServer::new(|| {
        App::new()
            .wrap(TracingLogger::default())
            .service(health)
            .service(mutate)
            .service(validate)
    });

    let server = match tls {
        Some((cert, key)) => server.bind_rustls_021(address, tls_config(cert, key)?),
        None => {
            warn!(%address, "serving admission webhooks without TLS");
            server.bind(address)
        }
    }
    .with_context(|| format!("Failed to bind to {address}"))?;

    Ok(server.shutdown_timeout(5).run())
}

fn tls_config(cert: &Path, key: &Path) -> anyhow::Result<rustls::ServerConfig> {
    let cert_pem = std::fs::read(cert).with_context(|| format!("reading {}", cert.display()))?;
    let key_pem = std::fs::read(key).with_context(|| format!("reading {}", key.display()))?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())?
        .into_iter()
        .map(rustls::Certificate)
        .collect::<Vec<_>>();

    let mut keys = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_slice())?;
    if keys.is_empty() {
        keys = rustls_pemfile::rsa_private_keys(&mut key_pem.as_slice())?;
    }
    let key = keys
        .pop()
        .ok_or_else(|| anyhow!("no private key found in {}", key.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, rustls::PrivateKey(key))?;
    Ok(config)
}

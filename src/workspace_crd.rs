use k8s_openapi::api::networking::v1::HTTPIngressPath;
use kube::CustomResource;
use lazy_static::lazy_static;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use validator::Validate;

use crate::build_crd::{BuildImage, ImageSpec};
use crate::conditions::{ConditionStatus, ConditionType, Conditions, DerivedPhase};
use crate::reference::{Reference, ServiceReference};
use crate::{Error, Result, WORKSPACE_FINALIZER};

lazy_static! {
    pub static ref RE_TAG: regex::Regex = regex::Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").unwrap();
}

pub const GENERATED_TAG_LENGTH: usize = 6;
const GENERATED_TAG_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub const ERR_FINALIZER_MISSING: &str = "workflow requires a finalizer for namespaces";
pub const ERR_TAG_MISSING: &str = "workflow requires a tag to be set";

#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Validate)]
#[kube(
    group = "spot.release.com",
    version = "v1alpha1",
    kind = "Workspace",
    plural = "workspaces",
    status = "WorkspaceStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Namespace", "type":"string", "jsonPath":".status.namespace"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// DNS suffix of the hostnames generated for ingresses.
    pub host: String,

    /// Short DNS label identifying the workspace. Generated on admission
    /// when left empty.
    #[serde(default)]
    #[validate(regex = "RE_TAG")]
    pub tag: String,

    #[serde(default)]
    pub components: Vec<ComponentSpec>,

    /// Workspace-level values components can reference by name.
    #[serde(default)]
    pub environments: Vec<EnvironmentSpec>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    pub name: String,

    pub image: ImageSpec,

    #[serde(default)]
    pub environments: Vec<ComponentEnvironmentSpec>,

    #[serde(default)]
    pub networks: Vec<ComponentNetworkSpec>,

    /// Overrides the image's entrypoint when not empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentEnvironmentSpec {
    pub name: String,

    /// Name the variable is exposed as in the container.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Literal value. When absent the value is looked up in the workspace
    /// environments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentNetworkSpec {
    pub name: String,

    pub port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Exposes the network through the workspace ingress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<ComponentIngressSpec>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComponentIngressSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(alias = "path_type", default, skip_serializing_if = "Option::is_none")]
    pub path_type: Option<PathType>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema, Default)]
pub enum PathType {
    #[default]
    Prefix,
    Exact,
    ImplementationSpecific,
}

impl PathType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathType::Prefix => "Prefix",
            PathType::Exact => "Exact",
            PathType::ImplementationSpecific => "ImplementationSpecific",
        }
    }
}

impl ComponentIngressSpec {
    /// Ingress path with `/` and `Prefix` as defaults. The backend is filled
    /// in by the caller.
    pub fn http_path(&self) -> HTTPIngressPath {
        HTTPIngressPath {
            path: Some(self.path.clone().unwrap_or_else(|| "/".to_string())),
            path_type: self.path_type.unwrap_or_default().as_str().to_string(),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
pub struct EnvironmentSpec {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum WorkspaceConditionType {
    Namespace,
    Networking,
    BuildingImages,
    Deployment,
}

impl ConditionType for WorkspaceConditionType {
    const ALL: &'static [Self] = &[
        WorkspaceConditionType::Namespace,
        WorkspaceConditionType::Networking,
        WorkspaceConditionType::BuildingImages,
        WorkspaceConditionType::Deployment,
    ];
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum WorkspacePhase {
    Running,
    Done,
    Error,
    Terminating,
}

/// Coarse progress marker kept for clients that predate conditions.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum WorkspaceStage {
    Initialized,
    Networking,
    Building,
    Deploying,
    Deployed,
    Errored,
    Terminating,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    /// Managed namespace, set once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<WorkspacePhase>,

    #[serde(default)]
    pub conditions: Conditions<WorkspaceConditionType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<WorkspaceStage>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub builds: Vec<Reference>,

    /// Built images keyed by `<image url>:<tag>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, BuildImage>,

    /// Services keyed by `<component>/<network>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceReference>,
}

impl WorkspaceStatus {
    pub fn condition(&self, type_: WorkspaceConditionType) -> ConditionStatus {
        self.conditions.get_condition(type_).status
    }

    /// Phase derived over every workspace condition.
    pub fn derived_phase(&self) -> WorkspacePhase {
        match self.conditions.tracked_phase() {
            DerivedPhase::Running => WorkspacePhase::Running,
            DerivedPhase::Done => WorkspacePhase::Done,
            DerivedPhase::Error => WorkspacePhase::Error,
        }
    }

    /// Marks `type_` as failed along with the phase and the stage.
    pub fn fail(&mut self, type_: WorkspaceConditionType) {
        self.conditions.set(type_, ConditionStatus::Error);
        self.phase = Some(WorkspacePhase::Error);
        self.stage = Some(WorkspaceStage::Errored);
    }
}

pub fn service_key(component: &str, network: &str) -> String {
    format!("{component}/{network}")
}

/// `w` followed by random lowercase alphanumerics.
pub fn generate_tag() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..GENERATED_TAG_LENGTH - 1)
        .map(|_| GENERATED_TAG_CHARSET[rng.gen_range(0..GENERATED_TAG_CHARSET.len())] as char)
        .collect();
    format!("w{suffix}")
}

impl Workspace {
    pub fn status(&self) -> WorkspaceStatus {
        self.status.clone().unwrap_or_default()
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map_or(false, |finalizers| finalizers.iter().any(|f| f == WORKSPACE_FINALIZER))
    }

    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Lookup of a workspace-level environment value.
    pub fn environment(&self, name: &str) -> Option<&str> {
        self.spec
            .environments
            .iter()
            .find(|env| env.name == name)
            .map(|env| env.value.as_str())
    }

    /// Applies the admission defaults: the namespace finalizer and a
    /// generated tag.
    pub fn apply_defaults(&mut self) {
        if !self.has_finalizer() {
            self.metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(WORKSPACE_FINALIZER.to_string());
        }
        if self.spec.tag.is_empty() {
            self.spec.tag = generate_tag();
        }
    }

    /// JSON patch operations equivalent to `apply_defaults`.
    pub fn default_patch(&self) -> Vec<Value> {
        let mut operations = Vec::new();
        if !self.has_finalizer() {
            operations.push(match self.metadata.finalizers {
                Some(_) => json!({
                    "op": "add",
                    "path": "/metadata/finalizers/-",
                    "value": WORKSPACE_FINALIZER,
                }),
                None => json!({
                    "op": "add",
                    "path": "/metadata/finalizers",
                    "value": [WORKSPACE_FINALIZER],
                }),
            });
        }
        if self.spec.tag.is_empty() {
            operations.push(json!({
                "op": "add",
                "path": "/spec/tag",
                "value": generate_tag(),
            }));
        }
        operations
    }

    /// Admission checks for creates and updates. Workspaces being deleted are
    /// always accepted.
    pub fn validate_admission(&self) -> Result<()> {
        if self.is_terminating() {
            return Ok(());
        }
        if !self.has_finalizer() {
            return Err(Error::UserInputError(ERR_FINALIZER_MISSING.to_string()));
        }
        if self.spec.tag.is_empty() {
            tracing::info!(name = ?self.metadata.name, "tag validation failed");
            return Err(Error::UserInputError(ERR_TAG_MISSING.to_string()));
        }
        self.spec
            .validate()
            .map_err(|e| Error::UserInputError(e.to_string()))
    }
}

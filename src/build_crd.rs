use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{ConditionType, Conditions, DerivedPhase};
use crate::reference::Reference;

/// Key of the build secret holding the repository credentials.
pub const SECRET_REPOSITORIES_KEY: &str = "repositories";
/// Key of the build secret holding the registry credentials.
pub const SECRET_REGISTRIES_KEY: &str = "registries";
/// Optional key with `[{key, value}]` build arguments.
pub const SECRET_ARGUMENTS_KEY: &str = "arguments";
/// Optional key with `[{key, value}]` build secrets.
pub const SECRET_BUILD_SECRETS_KEY: &str = "secrets";

pub const DEFAULT_IMAGE_TAG: &str = "latest";

#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[kube(
    group = "spot.release.com",
    version = "v1alpha1",
    kind = "Build",
    plural = "builds",
    status = "BuildStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".status.image.url"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Copy of the component's image. The image is built from
    /// `image.repository` and pushed to `image.registry`.
    pub image: ImageSpec,

    /// Secret in the Build's namespace holding the repository and registry
    /// credentials.
    #[serde(default)]
    pub secret_ref: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Name of the image, used as is when the image isn't built.
    #[serde(default)]
    pub name: String,

    /// Defaults to `latest`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// The image is built from source when the repository is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositorySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySpec>,
}

impl ImageSpec {
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_IMAGE_TAG)
    }

    /// Where the image is pushed to, or its name when there's no registry.
    pub fn url(&self) -> &str {
        match &self.registry {
            Some(registry) => &registry.url,
            None => &self.name,
        }
    }

    /// Key under which the built image is recorded in `Workspace.status.images`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.url(), self.tag_or_default())
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    pub url: String,

    /// Branch the commit lives on.
    #[serde(alias = "ref")]
    pub branch: String,

    /// Exact commit to build.
    pub hash: String,

    /// Build context, relative to the repository root.
    #[serde(default)]
    pub context: String,

    /// Dockerfile name within the context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// Complete URL of the image in the registry, without the tag.
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum BuildConditionType {
    PodDeployment,
    Source,
    Building,
    Registry,
}

impl ConditionType for BuildConditionType {
    const ALL: &'static [Self] = &[
        BuildConditionType::PodDeployment,
        BuildConditionType::Source,
        BuildConditionType::Building,
        BuildConditionType::Registry,
    ];
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, JsonSchema)]
pub enum BuildPhase {
    Running,
    Done,
    Error,
}

impl From<DerivedPhase> for BuildPhase {
    fn from(phase: DerivedPhase) -> Self {
        match phase {
            DerivedPhase::Running => BuildPhase::Running,
            DerivedPhase::Done => BuildPhase::Done,
            DerivedPhase::Error => BuildPhase::Error,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BuildImage {
    pub url: String,
    /// JSON of the pushed OCI image index.
    #[serde(default)]
    pub metadata: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<BuildPhase>,

    #[serde(default)]
    pub conditions: Conditions<BuildConditionType>,

    /// The worker pod running the build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<Reference>,

    /// Set once the Registry condition succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<BuildImage>,
}

impl BuildStatus {
    /// Phase derived from the tracked conditions.
    pub fn derived_phase(&self) -> BuildPhase {
        self.conditions.tracked_phase().into()
    }

    /// A build is errored if a condition failed or if it was marked as such
    /// without a condition to blame.
    pub fn is_errored(&self) -> bool {
        self.phase == Some(BuildPhase::Error) || self.derived_phase() == BuildPhase::Error
    }

    /// Recomputes `phase` from the conditions, keeping an explicit error.
    pub fn refresh_phase(&mut self) {
        if self.phase != Some(BuildPhase::Error) {
            self.phase = Some(self.derived_phase());
        }
    }
}

impl Build {
    pub fn status(&self) -> BuildStatus {
        self.status.clone().unwrap_or_default()
    }

    pub fn image_url(&self) -> &str {
        self.spec.image.url()
    }

    pub fn tag(&self) -> &str {
        self.spec.image.tag_or_default()
    }

    pub fn image_key(&self) -> String {
        self.spec.image.key()
    }

    pub fn reference(&self) -> Reference {
        Reference {
            namespace: self.metadata.namespace.clone().unwrap_or_default(),
            name: self.metadata.name.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pointer to another object in the cluster. The optional fields are only
/// populated for references that need to act as owner references.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

pub type ServiceReference = Reference;

/// Lookup key of a namespaced object.
#[derive(Debug, PartialEq, Eq, Clone, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self::new(
            obj.meta().namespace.clone().unwrap_or_default(),
            obj.meta().name.clone().unwrap_or_default(),
        )
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl Reference {
    /// Fully qualified reference to `obj`.
    pub fn new<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
            uid: obj.uid(),
            kind: Some(K::kind(&()).to_string()),
            api_version: Some(K::api_version(&()).to_string()),
        }
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Whether this reference points at `obj`, by namespace and name.
    pub fn points_to<K: Resource>(&self, obj: &K) -> bool {
        obj.meta().name.as_deref() == Some(self.name.as_str())
            && obj.meta().namespace.as_deref().unwrap_or_default() == self.namespace
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.namespaced_name().fmt(f)
    }
}

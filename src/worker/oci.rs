use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

use super::{Result, WorkerError};

pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
const DOCKER_LIST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const HASH_CHUNK: usize = 64 * 1024;

/// `sha256:<hex>` digest of `bytes`.
pub fn digest_of(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    pub fn is_index(&self) -> bool {
        self.media_type == INDEX_MEDIA_TYPE || self.media_type == DOCKER_LIST_MEDIA_TYPE
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// An OCI image layout on disk, as written by buildkit's `type=oci` exporter.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    /// `index.json` exactly as found on disk.
    raw_index: Vec<u8>,
    pub index: ImageIndex,
}

impl Layout {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join("oci-layout").is_file() {
            return Err(WorkerError::InvalidLayout(format!(
                "{} has no oci-layout file",
                root.display()
            )));
        }
        let raw_index = std::fs::read(root.join("index.json"))?;
        let index = serde_json::from_slice(&raw_index)?;
        Ok(Layout {
            root,
            raw_index,
            index,
        })
    }

    pub fn raw_index(&self) -> &[u8] {
        &self.raw_index
    }

    /// The index as recorded on the Build's image.
    pub fn metadata(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.index)?)
    }

    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let (algorithm, hex) = digest
            .split_once(':')
            .ok_or_else(|| WorkerError::InvalidLayout(format!("malformed digest {digest}")))?;
        let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(algorithm) || !valid(hex) {
            return Err(WorkerError::InvalidLayout(format!("malformed digest {digest}")));
        }
        Ok(self.root.join("blobs").join(algorithm).join(hex))
    }

    fn size_mismatch(descriptor: &Descriptor, size: u64) -> WorkerError {
        WorkerError::InvalidLayout(format!(
            "{} is {} bytes, expected {}",
            descriptor.digest, size, descriptor.size
        ))
    }

    fn digest_mismatch(descriptor: &Descriptor, digest: &str) -> WorkerError {
        WorkerError::InvalidLayout(format!("{} hashes to {}", descriptor.digest, digest))
    }

    fn check_algorithm(descriptor: &Descriptor) -> Result<()> {
        if descriptor.digest.starts_with("sha256:") {
            Ok(())
        } else {
            Err(WorkerError::InvalidLayout(format!(
                "unsupported digest {}",
                descriptor.digest
            )))
        }
    }

    /// Reads a small blob, such as a manifest, checking its size and digest.
    pub fn read_blob(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        Self::check_algorithm(descriptor)?;
        let blob = std::fs::read(self.blob_path(&descriptor.digest)?)?;
        if blob.len() as u64 != descriptor.size {
            return Err(Self::size_mismatch(descriptor, blob.len() as u64));
        }
        let digest = digest_of(&blob);
        if digest != descriptor.digest {
            return Err(Self::digest_mismatch(descriptor, &digest));
        }
        Ok(blob)
    }

    /// Checks a blob of any size against its descriptor without loading it,
    /// and returns its path.
    pub async fn verify_blob(&self, descriptor: &Descriptor) -> Result<PathBuf> {
        Self::check_algorithm(descriptor)?;
        let path = self.blob_path(&descriptor.digest)?;
        let mut file = tokio::fs::File::open(&path).await?;
        let size = file.metadata().await?.len();
        if size != descriptor.size {
            return Err(Self::size_mismatch(descriptor, size));
        }

        let mut hasher = Sha256::new();
        let mut chunk = vec![0u8; HASH_CHUNK];
        loop {
            let read = file.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            hasher.update(&chunk[..read]);
        }
        let digest = format!("sha256:{:x}", hasher.finalize());
        if digest != descriptor.digest {
            return Err(Self::digest_mismatch(descriptor, &digest));
        }
        Ok(path)
    }
}

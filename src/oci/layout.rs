use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::constants::ANNOTATION_REF_NAME;
use crate::descriptor::Descriptor;
use crate::digest::Digest;
use crate::fetch::Fetcher;
use crate::manifest::parse_index;

/// Reads blobs from an OCI image layout directory
/// (`oci-layout`, `index.json`, `blobs/<algorithm>/<hex>`).
#[derive(Debug, Clone)]
pub struct LayoutFetcher {
    root: PathBuf,
}

impl LayoutFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("blobs")
            .join(digest.algorithm().as_str())
            .join(digest.hex())
    }

    /// Descriptor in `index.json` to start a load from.
    ///
    /// With a tag, the entry annotated with that ref name; without one, the
    /// index must hold exactly one entry.
    pub async fn resolve(&self, tag: Option<&str>) -> Result<Descriptor> {
        let index_path = self.root.join("index.json");
        let data = tokio::fs::read(&index_path)
            .await
            .with_context(|| format!("failed to read {}", index_path.display()))?;
        let index = parse_index(&data)
            .with_context(|| format!("invalid layout index {}", index_path.display()))?;

        match tag {
            Some(tag) => index
                .manifests
                .into_iter()
                .find(|m| {
                    m.annotations.get(ANNOTATION_REF_NAME).map(String::as_str) == Some(tag)
                })
                .with_context(|| {
                    format!("no manifest tagged '{}' in {}", tag, self.root.display())
                }),
            None => {
                let mut manifests = index.manifests;
                if manifests.len() != 1 {
                    anyhow::bail!(
                        "layout {} holds {} manifests; name one by tag",
                        self.root.display(),
                        manifests.len()
                    );
                }
                Ok(manifests.remove(0))
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Fetcher for LayoutFetcher {
    async fn fetch(&self, _ctx: &CancellationToken, desc: &Descriptor) -> Result<Vec<u8>> {
        let path = self.blob_path(&desc.digest);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read blob {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MEDIA_TYPE_OCI_MANIFEST;
    use tempfile::TempDir;

    fn write_blob(dir: &Path, data: &[u8]) -> Digest {
        let digest = Digest::sha256(data);
        let blobs = dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs).unwrap();
        std::fs::write(blobs.join(digest.hex()), data).unwrap();
        digest
    }

    fn write_index(dir: &Path, manifests: &[Descriptor]) {
        let index = serde_json::json!({ "schemaVersion": 2, "manifests": manifests });
        std::fs::write(dir.join("index.json"), serde_json::to_vec(&index).unwrap()).unwrap();
        std::fs::write(dir.join("oci-layout"), r#"{"imageLayoutVersion": "1.0.0"}"#).unwrap();
    }

    #[tokio::test]
    async fn test_fetch_blob_by_digest() {
        let dir = TempDir::new().unwrap();
        let digest = write_blob(dir.path(), b"layer data");
        let fetcher = LayoutFetcher::new(dir.path());
        let desc = Descriptor::new("application/octet-stream", digest, 10);

        let bytes = fetcher.fetch(&CancellationToken::new(), &desc).await.unwrap();
        assert_eq!(bytes, b"layer data");

        let missing = Descriptor::for_bytes("application/octet-stream", b"other");
        assert!(fetcher.fetch(&CancellationToken::new(), &missing).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_by_tag() {
        let dir = TempDir::new().unwrap();
        let v1 = Descriptor::for_bytes(MEDIA_TYPE_OCI_MANIFEST, b"one")
            .with_annotation(ANNOTATION_REF_NAME, "v1");
        let v2 = Descriptor::for_bytes(MEDIA_TYPE_OCI_MANIFEST, b"two")
            .with_annotation(ANNOTATION_REF_NAME, "v2");
        write_index(dir.path(), &[v1.clone(), v2.clone()]);
        let fetcher = LayoutFetcher::new(dir.path());

        assert_eq!(fetcher.resolve(Some("v2")).await.unwrap(), v2);
        assert!(fetcher.resolve(Some("v3")).await.is_err());
        assert!(fetcher.resolve(None).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_single_entry() {
        let dir = TempDir::new().unwrap();
        let only = Descriptor::for_bytes(MEDIA_TYPE_OCI_MANIFEST, b"only");
        write_index(dir.path(), &[only.clone()]);

        let resolved = LayoutFetcher::new(dir.path()).resolve(None).await.unwrap();
        assert_eq!(resolved, only);
    }
}

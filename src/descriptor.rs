use std::collections::BTreeMap;

use oci_spec::image::MediaType;
use serde::{Deserialize, Serialize};

use crate::constants::{
    ANNOTATION_TITLE, MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST_LIST,
};
use crate::digest::Digest;

/// What a descriptor's media type says about its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Opaque bytes; registered but never fetched
    Content,
    /// Image manifest: a config plus ordered layers
    Manifest,
    /// Image index: an ordered list of manifests
    Index,
}

impl MediaKind {
    pub fn from_media_type(media_type: &str) -> Self {
        match MediaType::from(media_type) {
            MediaType::ImageManifest => MediaKind::Manifest,
            MediaType::ImageIndex => MediaKind::Index,
            _ => match media_type {
                MEDIA_TYPE_DOCKER_MANIFEST => MediaKind::Manifest,
                MEDIA_TYPE_DOCKER_MANIFEST_LIST => MediaKind::Index,
                _ => MediaKind::Content,
            },
        }
    }

    /// Manifests and indexes are expanded recursively by the loader
    pub fn is_composite(&self) -> bool {
        !matches!(self, MediaKind::Content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Points at addressable content without embedding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    pub fn new(media_type: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            annotations: BTreeMap::new(),
            platform: None,
        }
    }

    /// Descriptor for `data`, digested with sha256
    pub fn for_bytes(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self::new(media_type, Digest::sha256(data), data.len() as u64)
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::from_media_type(&self.media_type)
    }

    /// Logical file path of the content, when annotated
    pub fn title(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_TITLE).map(String::as_str)
    }
}

//! Manifest and image index decoding.
//!
//! Documents are first decoded into permissive raw shapes (every field
//! optional, unknown fields ignored) and then validated field by field, so a
//! missing `config.digest` is reported as such rather than as a generic serde
//! error.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::constants::SUPPORTED_SCHEMA_VERSION;
use crate::descriptor::{Descriptor, Platform};
use crate::digest::Digest;
use crate::error::ParseError;

/// Parsed image manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub schema_version: u32,
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    pub annotations: BTreeMap<String, String>,
}

/// Parsed image index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageIndex {
    pub schema_version: u32,
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    media_type: Option<String>,
    digest: Option<String>,
    size: Option<i64>,
    annotations: Option<BTreeMap<String, String>>,
    /// Informational; an unusable platform is dropped rather than rejected
    platform: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    schema_version: Option<u32>,
    media_type: Option<String>,
    config: Option<RawDescriptor>,
    layers: Option<Vec<RawDescriptor>>,
    annotations: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIndex {
    schema_version: Option<u32>,
    media_type: Option<String>,
    manifests: Option<Vec<RawDescriptor>>,
    annotations: Option<BTreeMap<String, String>>,
}

pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest, ParseError> {
    let raw: RawManifest = serde_json::from_slice(bytes)?;
    let schema_version = check_schema_version(raw.schema_version)?;

    let config = raw
        .config
        .ok_or_else(|| ParseError::MissingField("config".to_string()))?;
    let config = validate_descriptor(config, "config")?;

    let layers = raw
        .layers
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, layer)| validate_descriptor(layer, &format!("layers[{}]", i)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Manifest {
        schema_version,
        media_type: raw.media_type,
        config,
        layers,
        annotations: raw.annotations.unwrap_or_default(),
    })
}

pub fn parse_index(bytes: &[u8]) -> Result<ImageIndex, ParseError> {
    let raw: RawIndex = serde_json::from_slice(bytes)?;
    let schema_version = check_schema_version(raw.schema_version)?;

    let manifests = raw
        .manifests
        .ok_or_else(|| ParseError::MissingField("manifests".to_string()))?
        .into_iter()
        .enumerate()
        .map(|(i, entry)| validate_descriptor(entry, &format!("manifests[{}]", i)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ImageIndex {
        schema_version,
        media_type: raw.media_type,
        manifests,
        annotations: raw.annotations.unwrap_or_default(),
    })
}

fn check_schema_version(found: Option<u32>) -> Result<u32, ParseError> {
    let found = found.ok_or_else(|| ParseError::MissingField("schemaVersion".to_string()))?;
    if found != SUPPORTED_SCHEMA_VERSION {
        return Err(ParseError::UnsupportedSchemaVersion {
            found,
            expected: SUPPORTED_SCHEMA_VERSION,
        });
    }
    Ok(found)
}

fn validate_descriptor(raw: RawDescriptor, field: &str) -> Result<Descriptor, ParseError> {
    let media_type = raw
        .media_type
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ParseError::MissingField(format!("{}.mediaType", field)))?;

    let digest = raw
        .digest
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ParseError::MissingField(format!("{}.digest", field)))?;
    let digest = Digest::parse(&digest).map_err(|e| ParseError::InvalidDescriptor {
        field: format!("{}.digest", field),
        reason: e.to_string(),
    })?;

    let size = raw
        .size
        .ok_or_else(|| ParseError::MissingField(format!("{}.size", field)))?;
    let size = u64::try_from(size).map_err(|_| ParseError::InvalidDescriptor {
        field: format!("{}.size", field),
        reason: format!("negative size {}", size),
    })?;

    Ok(Descriptor {
        media_type,
        digest,
        size,
        annotations: raw.annotations.unwrap_or_default(),
        platform: raw
            .platform
            .and_then(|v| serde_json::from_value::<Platform>(v).ok()),
    })
}

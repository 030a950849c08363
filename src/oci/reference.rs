use std::fmt;
use std::str::FromStr;

use crate::constants::{DEFAULT_REGISTRY, DEFAULT_TAG};
use crate::digest::Digest;
use crate::error::ReferenceError;

/// Parsed `registry/repository[:tag][@digest]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl Reference {
    /// Parse a reference string.
    ///
    /// - `nginx` → index.docker.io/library/nginx:latest
    /// - `localhost:5001/collection:v1` → localhost:5001/collection:v1
    /// - `ghcr.io/org/repo@sha256:...` → digest pinned, no tag
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }
        let invalid = |reason: &str| ReferenceError::Invalid {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let (name_tag, digest) = match reference.split_once('@') {
            Some((name_tag, digest)) => {
                let digest = Digest::parse(digest).map_err(|e| invalid(&e.to_string()))?;
                (name_tag, Some(digest))
            }
            None => (reference, None),
        };

        // A tag colon only counts after the last slash; earlier ones are ports
        let last_slash = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let colon = last_slash + colon;
                (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
            }
            None => (name_tag, None),
        };
        if matches!(tag.as_deref(), Some("")) {
            return Err(invalid("empty tag"));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            Some(_) => (DEFAULT_REGISTRY.to_string(), name.to_string()),
            None => (DEFAULT_REGISTRY.to_string(), format!("library/{}", name)),
        };
        if repository.is_empty() {
            return Err(invalid("empty repository"));
        }
        if repository != repository.to_ascii_lowercase() {
            return Err(invalid("repository must be lowercase"));
        }

        let registry = match registry.as_str() {
            "docker.io" | "registry-1.docker.io" => DEFAULT_REGISTRY.to_string(),
            _ => registry,
        };
        // Official Docker Hub images live under library/
        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// `registry/repository`, the key credential configs are matched on first
    pub fn context(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Digest when pinned, tag otherwise; what a registry manifest URL ends in
    pub fn identifier(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.to_string(),
            (None, Some(tag)) => tag.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.context())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

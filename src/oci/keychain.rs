//! Registry credential resolution from docker-style config files.
//!
//! Each file is read lazily on first use and cached by path for the lifetime
//! of the keychain. Lookups try the full `registry/repository` key first and
//! then the bare registry host, with Docker Hub stored under its legacy
//! `https://index.docker.io/v1/` key.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::constants::{DEFAULT_AUTH_KEY, DEFAULT_REGISTRY};
use crate::error::KeychainError;
use crate::oci::reference::Reference;

/// Credentials to present to a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authenticator {
    Anonymous,
    Basic { username: String, password: String },
    /// Registry-issued bearer token
    Bearer { token: String },
    /// OAuth refresh token; must be exchanged before use
    IdentityToken { token: String },
}

impl Authenticator {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Authenticator::Anonymous)
    }
}

/// Resolves credentials for a reference
pub trait Keychain: Send + Sync {
    fn resolve(&self, reference: &Reference) -> Result<Authenticator, KeychainError>;
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    identitytoken: String,
    #[serde(default)]
    registrytoken: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: BTreeMap<String, String>,
}

impl ConfigFile {
    fn load(path: &Path) -> Result<Self, KeychainError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Credential config not found, skipping");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(KeychainError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_slice(&data).map_err(|e| KeychainError::Decode {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn entry(&self, key: &str) -> Option<&AuthEntry> {
        if let Some(entry) = self.auths.get(key) {
            return Some(entry);
        }
        // Stored keys may carry a scheme and path, e.g. https://host/v1/
        self.auths
            .iter()
            .find(|(stored, _)| strip_to_host(stored) == key)
            .map(|(_, entry)| entry)
    }

    fn authenticator(
        &self,
        key: &str,
        path: &Path,
    ) -> Result<Option<Authenticator>, KeychainError> {
        let Some(entry) = self.entry(key) else {
            return Ok(None);
        };

        if !entry.registrytoken.is_empty() {
            return Ok(Some(Authenticator::Bearer {
                token: entry.registrytoken.clone(),
            }));
        }
        if !entry.identitytoken.is_empty() {
            return Ok(Some(Authenticator::IdentityToken {
                token: entry.identitytoken.clone(),
            }));
        }
        if !entry.username.is_empty() || !entry.password.is_empty() {
            return Ok(Some(Authenticator::Basic {
                username: entry.username.clone(),
                password: entry.password.clone(),
            }));
        }
        if !entry.auth.is_empty() {
            let (username, password) = decode_auth(&entry.auth).map_err(|reason| {
                KeychainError::Decode {
                    path: path.display().to_string(),
                    reason: format!("auth for '{}': {}", key, reason),
                }
            })?;
            return Ok(Some(Authenticator::Basic { username, password }));
        }
        Ok(None)
    }

    fn uses_helpers(&self) -> bool {
        self.creds_store.is_some() || !self.cred_helpers.is_empty()
    }
}

fn strip_to_host(key: &str) -> &str {
    let key = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    key.split('/').next().unwrap_or(key)
}

fn decode_auth(auth: &str) -> Result<(String, String), String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth.trim())
        .map_err(|e| e.to_string())?;
    let decoded = String::from_utf8(decoded).map_err(|e| e.to_string())?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| "expected 'username:password'".to_string())?;
    Ok((username.to_string(), password.to_string()))
}

/// Keys tried for a reference, most specific first
fn lookup_keys(reference: &Reference) -> [String; 2] {
    let registry = if reference.registry == DEFAULT_REGISTRY {
        DEFAULT_AUTH_KEY.to_string()
    } else {
        reference.registry.clone()
    };
    [reference.context(), registry]
}

/// Credentials for `reference` in one config file, if it has any
fn lookup(
    config: &ConfigFile,
    path: &Path,
    reference: &Reference,
) -> Result<Option<Authenticator>, KeychainError> {
    for key in lookup_keys(reference) {
        if let Some(auth) = config.authenticator(&key, path)? {
            tracing::debug!(path = %path.display(), key = %key, "Resolved registry credentials");
            return Ok(Some(auth));
        }
    }
    if config.uses_helpers() {
        tracing::warn!(
            path = %path.display(),
            registry = %reference.registry,
            "Credential helpers are not supported, skipping"
        );
    }
    Ok(None)
}

/// Keychain over a single credential config file
pub struct ConfigKeychain {
    path: PathBuf,
    config: Mutex<Option<Arc<ConfigFile>>>,
}

impl ConfigKeychain {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn config(&self) -> Result<Arc<ConfigFile>, KeychainError> {
        let mut slot = self.config.lock();
        if let Some(config) = slot.as_ref() {
            return Ok(config.clone());
        }
        let config = Arc::new(ConfigFile::load(&self.path)?);
        *slot = Some(config.clone());
        Ok(config)
    }
}

impl Keychain for ConfigKeychain {
    fn resolve(&self, reference: &Reference) -> Result<Authenticator, KeychainError> {
        let config = self.config()?;
        Ok(lookup(&config, &self.path, reference)?.unwrap_or(Authenticator::Anonymous))
    }
}

/// Keychain over an ordered list of credential config files. The first file
/// holding credentials for a reference wins.
pub struct MultiKeychain {
    paths: Vec<PathBuf>,
    cache: Mutex<HashMap<PathBuf, Arc<ConfigFile>>>,
}

impl MultiKeychain {
    pub fn from_config_files(paths: &[PathBuf]) -> Self {
        Self {
            paths: paths.to_vec(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// `$DOCKER_CONFIG/config.json`, or `~/.docker/config.json`
    pub fn default_docker() -> Self {
        let dir = std::env::var_os("DOCKER_CONFIG")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".docker")));
        let paths = dir.map(|d| vec![d.join("config.json")]).unwrap_or_default();
        Self::from_config_files(&paths)
    }

    fn config(&self, path: &Path) -> Result<Arc<ConfigFile>, KeychainError> {
        let mut cache = self.cache.lock();
        if let Some(config) = cache.get(path) {
            return Ok(config.clone());
        }
        let config = Arc::new(ConfigFile::load(path)?);
        cache.insert(path.to_path_buf(), config.clone());
        Ok(config)
    }
}

impl Keychain for MultiKeychain {
    fn resolve(&self, reference: &Reference) -> Result<Authenticator, KeychainError> {
        for path in &self.paths {
            let config = self.config(path)?;
            if let Some(auth) = lookup(&config, path, reference)? {
                return Ok(auth);
            }
        }
        Ok(Authenticator::Anonymous)
    }
}

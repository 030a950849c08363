//! Signing and verification boundary.
//!
//! Signing happens after a collection has been built and pushed; this crate
//! only defines the seam and drives an external `cosign` binary through it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use tempfile::TempDir;
use tokio::process::Command;

use crate::constants::{
    DEFAULT_AUTH_KEY, DEFAULT_FULCIO_URL, DEFAULT_OIDC_CLIENT_ID, DEFAULT_OIDC_ISSUER,
    DEFAULT_REGISTRY, DEFAULT_REKOR_URL, DEFAULT_SIGNING_TIMEOUT_SECS,
};
use crate::oci::keychain::{Authenticator, Keychain};
use crate::oci::reference::Reference;

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, reference: &Reference) -> Result<()>;
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, reference: &Reference) -> Result<()>;
}

/// Keyless signing settings handed to the signing tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningConfig {
    /// Enable the tool's experimental keyless mode for the child process only
    pub experimental: bool,
    pub rekor_url: String,
    pub fulcio_url: String,
    pub oidc_issuer: String,
    pub oidc_client_id: String,
    pub timeout: Duration,
    pub allow_insecure_registry: bool,
    pub verbose: bool,
    /// Accepted signer identities when verifying
    pub certificate_identity_regexp: String,
    pub certificate_oidc_issuer_regexp: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            experimental: true,
            rekor_url: DEFAULT_REKOR_URL.to_string(),
            fulcio_url: DEFAULT_FULCIO_URL.to_string(),
            oidc_issuer: DEFAULT_OIDC_ISSUER.to_string(),
            oidc_client_id: DEFAULT_OIDC_CLIENT_ID.to_string(),
            timeout: Duration::from_secs(DEFAULT_SIGNING_TIMEOUT_SECS),
            allow_insecure_registry: false,
            verbose: false,
            certificate_identity_regexp: ".*".to_string(),
            certificate_oidc_issuer_regexp: ".*".to_string(),
        }
    }
}

impl SigningConfig {
    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure_registry = allow;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn experimental(mut self, experimental: bool) -> Self {
        self.experimental = experimental;
        self
    }
}

/// A prepared child process. Resolved credentials live in a private docker
/// config directory that is removed when this is dropped.
struct Invocation {
    cmd: Command,
    _auth_dir: Option<TempDir>,
}

/// Drives the `cosign` executable
pub struct CosignCli {
    program: PathBuf,
    config: SigningConfig,
    keychain: Arc<dyn Keychain>,
}

impl CosignCli {
    pub fn new(config: SigningConfig, keychain: Arc<dyn Keychain>) -> Self {
        Self {
            program: PathBuf::from("cosign"),
            config,
            keychain,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Writes `auth` as the only entry of a fresh docker `config.json`
    fn docker_config(reference: &Reference, auth: &Authenticator) -> Result<Option<TempDir>> {
        let entry = match auth {
            Authenticator::Basic { username, password } => serde_json::json!({
                "auth": base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password)),
            }),
            Authenticator::Bearer { token } => serde_json::json!({ "registrytoken": token }),
            Authenticator::Anonymous | Authenticator::IdentityToken { .. } => return Ok(None),
        };
        let key = if reference.registry == DEFAULT_REGISTRY {
            DEFAULT_AUTH_KEY
        } else {
            reference.registry.as_str()
        };

        let dir = tempfile::Builder::new()
            .prefix("uor-cosign-")
            .tempdir()
            .context("failed to create credential directory")?;
        let config = serde_json::json!({ "auths": { (key): entry } });
        std::fs::write(dir.path().join("config.json"), serde_json::to_vec(&config)?)
            .context("failed to write credential config")?;
        Ok(Some(dir))
    }

    fn command(&self, subcommand: &str, reference: &Reference) -> Result<Invocation> {
        let config = &self.config;
        let mut cmd = Command::new(&self.program);
        cmd.arg(subcommand).arg("--rekor-url").arg(&config.rekor_url);

        match subcommand {
            "sign" => {
                cmd.arg("--yes")
                    .arg("--fulcio-url")
                    .arg(&config.fulcio_url)
                    .arg("--oidc-issuer")
                    .arg(&config.oidc_issuer)
                    .arg("--oidc-client-id")
                    .arg(&config.oidc_client_id);
            }
            _ => {
                cmd.arg("--certificate-identity-regexp")
                    .arg(&config.certificate_identity_regexp)
                    .arg("--certificate-oidc-issuer-regexp")
                    .arg(&config.certificate_oidc_issuer_regexp);
            }
        }

        cmd.arg("--timeout")
            .arg(format!("{}s", config.timeout.as_secs()));
        if config.allow_insecure_registry {
            cmd.arg("--allow-insecure-registry");
        }
        if config.verbose {
            cmd.arg("--verbose");
        }

        let auth = self
            .keychain
            .resolve(reference)
            .with_context(|| format!("failed to resolve credentials for {}", reference))?;
        // Secrets never go on the command line
        let auth_dir = Self::docker_config(reference, &auth)?;
        if let Some(dir) = &auth_dir {
            cmd.env("DOCKER_CONFIG", dir.path());
        }

        if config.experimental {
            cmd.env("COSIGN_EXPERIMENTAL", "1");
        }
        cmd.arg(reference.to_string());
        Ok(Invocation {
            cmd,
            _auth_dir: auth_dir,
        })
    }

    async fn run(&self, subcommand: &str, reference: &Reference) -> Result<()> {
        let mut invocation = self.command(subcommand, reference)?;
        tracing::info!(reference = %reference, action = subcommand, "Running cosign");

        let output = invocation
            .cmd
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        if !output.status.success() {
            anyhow::bail!(
                "cosign {} failed for {} (exit code {}): {}",
                subcommand,
                reference,
                output.status.code().unwrap_or(1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Signer for CosignCli {
    async fn sign(&self, reference: &Reference) -> Result<()> {
        self.run("sign", reference).await
    }
}

#[async_trait]
impl Verifier for CosignCli {
    async fn verify(&self, reference: &Reference) -> Result<()> {
        self.run("verify", reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::keychain::{ConfigKeychain, MultiKeychain};
    use std::ffi::OsStr;
    use std::path::Path;

    fn args(invocation: &Invocation) -> Vec<String> {
        invocation
            .cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    fn env_value<'a>(invocation: &'a Invocation, key: &str) -> Option<Option<&'a OsStr>> {
        invocation
            .cmd
            .as_std()
            .get_envs()
            .find(|(k, _)| *k == OsStr::new(key))
            .map(|(_, v)| v)
    }

    fn cosign(config: SigningConfig) -> CosignCli {
        CosignCli::new(config, Arc::new(MultiKeychain::from_config_files(&[])))
    }

    #[test]
    fn test_sign_command_arguments() {
        let cli = cosign(SigningConfig::default().allow_insecure(true));
        let reference = Reference::parse("localhost:5001/test:latest").unwrap();
        let cmd = cli.command("sign", &reference).unwrap();
        let args = args(&cmd);

        assert_eq!(args[0], "sign");
        assert!(args.contains(&"--yes".to_string()));
        assert!(args.contains(&DEFAULT_FULCIO_URL.to_string()));
        assert!(args.contains(&"--allow-insecure-registry".to_string()));
        assert!(args.contains(&"100s".to_string()));
        assert_eq!(args.last().unwrap(), "localhost:5001/test:latest");
    }

    #[test]
    fn test_experimental_flag_scoped_to_child() {
        let reference = Reference::parse("localhost:5001/test:latest").unwrap();

        let cmd = cosign(SigningConfig::default()).command("verify", &reference).unwrap();
        assert_eq!(
            env_value(&cmd, "COSIGN_EXPERIMENTAL"),
            Some(Some(OsStr::new("1")))
        );
        assert!(std::env::var_os("COSIGN_EXPERIMENTAL").is_none());

        let cmd = cosign(SigningConfig::default().experimental(false))
            .command("verify", &reference)
            .unwrap();
        assert_eq!(env_value(&cmd, "COSIGN_EXPERIMENTAL"), None);
    }

    #[test]
    fn test_verify_command_arguments() {
        let reference = Reference::parse("localhost:5001/test:latest").unwrap();
        let cmd = cosign(SigningConfig::default().verbose(true))
            .command("verify", &reference)
            .unwrap();
        let args = args(&cmd);
        assert_eq!(args[0], "verify");
        assert!(args.contains(&"--certificate-identity-regexp".to_string()));
        assert!(args.contains(&"--verbose".to_string()));
        assert!(!args.contains(&"--yes".to_string()));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let cli = cosign(SigningConfig::default()).with_program("/nonexistent/cosign");
        let reference = Reference::parse("localhost:5001/test:latest").unwrap();
        assert!(cli.sign(&reference).await.is_err());
    }

    #[test]
    fn test_credentials_stay_off_the_command_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let auth = base64::engine::general_purpose::STANDARD.encode("user:secret");
        std::fs::write(
            &path,
            serde_json::to_vec(&serde_json::json!({
                "auths": { "localhost:5001": { "auth": auth } }
            }))
            .unwrap(),
        )
        .unwrap();
        let cli = CosignCli::new(
            SigningConfig::default(),
            Arc::new(MultiKeychain::from_config_files(&[path])),
        );
        let reference = Reference::parse("localhost:5001/test:latest").unwrap();

        let invocation = cli.command("sign", &reference).unwrap();
        assert!(args(&invocation).iter().all(|a| !a.contains("secret")));

        // The child sees exactly the resolved credentials
        let docker_config = env_value(&invocation, "DOCKER_CONFIG").flatten().unwrap();
        let child_keychain = ConfigKeychain::new(Path::new(docker_config).join("config.json"));
        assert_eq!(
            child_keychain.resolve(&reference).unwrap(),
            Authenticator::Basic {
                username: "user".to_string(),
                password: "secret".to_string(),
            }
        );

        let written = Path::new(docker_config).to_path_buf();
        drop(invocation);
        assert!(!written.exists());
    }

    #[test]
    fn test_anonymous_sets_no_docker_config() {
        let reference = Reference::parse("localhost:5001/test:latest").unwrap();
        let invocation = cosign(SigningConfig::default())
            .command("sign", &reference)
            .unwrap();
        assert_eq!(env_value(&invocation, "DOCKER_CONFIG"), None);
    }
}

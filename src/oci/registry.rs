use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::constants::{
    MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_OCI_MANIFEST,
};
use crate::descriptor::Descriptor;
use crate::digest::Digest;
use crate::fetch::Fetcher;
use crate::oci::keychain::{Authenticator, Keychain};
use crate::oci::reference::Reference;

/// How to reach a registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Talk HTTP instead of HTTPS
    pub plain_http: bool,
    /// Accept invalid TLS certificates
    pub insecure: bool,
}

/// Fetches manifests and blobs of one repository over the OCI distribution API
pub struct RegistryFetcher {
    client: Client,
    base_url: String, // e.g., https://ghcr.io/v2
    reference: Reference,
    auth: Authenticator,
}

impl RegistryFetcher {
    pub fn new(
        reference: Reference,
        options: RegistryOptions,
        keychain: &dyn Keychain,
    ) -> Result<Self> {
        let scheme = if options.plain_http { "http" } else { "https" };
        let base_url = format!("{}://{}/v2", scheme, reference.registry);

        let client = Client::builder()
            .danger_accept_invalid_certs(options.insecure)
            .build()
            .context("failed to build HTTP client")?;

        let auth = keychain
            .resolve(&reference)
            .with_context(|| format!("failed to resolve credentials for {}", reference))?;
        if let Authenticator::IdentityToken { .. } = auth {
            tracing::warn!(
                registry = %reference.registry,
                "Identity tokens need an OAuth exchange, which is not supported; \
                 continuing anonymously"
            );
        }

        Ok(Self {
            client,
            base_url,
            reference,
            auth,
        })
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    fn manifest_url(&self, identifier: &str) -> String {
        format!(
            "{}/{}/manifests/{}",
            self.base_url, self.reference.repository, identifier
        )
    }

    fn blob_url(&self, digest: &Digest) -> String {
        format!(
            "{}/{}/blobs/{}",
            self.base_url, self.reference.repository, digest
        )
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Authenticator::Basic { username, password } => rb.basic_auth(username, Some(password)),
            Authenticator::Bearer { token } => rb.bearer_auth(token),
            Authenticator::Anonymous | Authenticator::IdentityToken { .. } => rb,
        }
    }

    fn status_error(&self, what: &str, status: StatusCode) -> anyhow::Error {
        match status {
            StatusCode::NOT_FOUND => {
                anyhow::anyhow!("{} not found in {}", what, self.reference.context())
            }
            // Token-challenge auth is not negotiated; only preconfigured credentials are sent
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => anyhow::anyhow!(
                "failed to fetch {}: {} (registry {} requires a token exchange or credentials; \
                 add a registry token or username/password to a --config file)",
                what,
                status,
                self.reference.registry
            ),
            status => anyhow::anyhow!("failed to fetch {}: {}", what, status),
        }
    }

    /// Descriptor of the manifest the reference points at.
    ///
    /// The digest is computed from the returned body; a pinned reference whose
    /// body hashes differently is rejected.
    pub async fn resolve(&self) -> Result<Descriptor> {
        let url = self.manifest_url(&self.reference.identifier());
        let accept = [
            MEDIA_TYPE_OCI_MANIFEST,
            MEDIA_TYPE_OCI_INDEX,
            MEDIA_TYPE_DOCKER_MANIFEST,
            MEDIA_TYPE_DOCKER_MANIFEST_LIST,
        ]
        .join(", ");

        let resp = self
            .authorize(self.client.get(&url).header(ACCEPT, accept))
            .send()
            .await
            .with_context(|| format!("failed to request {}", url))?;
        if !resp.status().is_success() {
            return Err(self.status_error(&self.reference.to_string(), resp.status()));
        }

        let media_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| MEDIA_TYPE_OCI_MANIFEST.to_string());
        let body = resp.bytes().await?;

        let desc = Descriptor::for_bytes(media_type, &body);
        if let Some(pinned) = &self.reference.digest {
            if pinned.verify(&body).is_err() {
                anyhow::bail!(
                    "registry returned content for {} that hashes to {}",
                    pinned,
                    desc.digest
                );
            }
            return Ok(Descriptor::new(desc.media_type, pinned.clone(), desc.size));
        }

        tracing::info!(reference = %self.reference, digest = %desc.digest, "Resolved reference");
        Ok(desc)
    }
}

#[async_trait]
impl Fetcher for RegistryFetcher {
    async fn fetch(&self, _ctx: &CancellationToken, desc: &Descriptor) -> Result<Vec<u8>> {
        let rb = if desc.kind().is_composite() {
            self.client
                .get(self.manifest_url(&desc.digest.to_string()))
                .header(ACCEPT, desc.media_type.as_str())
        } else {
            self.client.get(self.blob_url(&desc.digest))
        };

        let resp = self.authorize(rb).send().await?;
        if !resp.status().is_success() {
            return Err(self.status_error(&desc.digest.to_string(), resp.status()));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

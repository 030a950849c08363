// Centralized constants for uor-collection to avoid magic strings and numbers

/// The only manifest / index schema version accepted by the parser
pub const SUPPORTED_SCHEMA_VERSION: u32 = 2;

/// Media type of an OCI image manifest
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of an OCI image index
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Media type of a Docker schema 2 manifest
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media type of a Docker manifest list
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Annotation naming the logical file path of a layer
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";

/// Annotation naming a manifest inside an OCI layout's index.json
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Default number of sibling manifests expanded concurrently
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

/// Registry used when a reference names none
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Key under which docker stores credentials for the default registry
pub const DEFAULT_AUTH_KEY: &str = "https://index.docker.io/v1/";

/// Tag used when a reference carries neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

/// Public transparency log used for keyless signing
pub const DEFAULT_REKOR_URL: &str = "https://rekor.sigstore.dev";

/// Public certificate authority used for keyless signing
pub const DEFAULT_FULCIO_URL: &str = "https://fulcio.sigstore.dev";

/// OIDC issuer used for keyless signing
pub const DEFAULT_OIDC_ISSUER: &str = "https://oauth2.sigstore.dev/auth";

/// OIDC client id used for keyless signing
pub const DEFAULT_OIDC_CLIENT_ID: &str = "sigstore";

/// Timeout handed to the signing tool, in seconds
pub const DEFAULT_SIGNING_TIMEOUT_SECS: u64 = 100;

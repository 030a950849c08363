/// Error types for collection loading and its collaborators
use std::time::Duration;

use crate::digest::Digest;

/// Malformed or unsupported digest strings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    #[error("digest '{0}' is missing the '<algorithm>:' prefix")]
    MissingAlgorithm(String),
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("digest '{digest}' has invalid hex: {reason}")]
    InvalidHex { digest: String, reason: String },
}

/// Malformed or unsupported manifest content
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed manifest JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported schema version {found} (expected {expected})")]
    UnsupportedSchemaVersion { found: u32, expected: u32 },
    #[error("missing required field '{0}'")]
    MissingField(String),
    #[error("invalid descriptor at '{field}': {reason}")]
    InvalidDescriptor { field: String, reason: String },
}

/// Failure of a `load_from_manifest` call. Every variant aborts the whole load.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The fetch collaborator could not produce bytes
    #[error("failed to fetch {digest}: {source:#}")]
    Fetch {
        digest: Digest,
        #[source]
        source: anyhow::Error,
    },
    /// Fetched bytes hash to a different digest than requested
    #[error("integrity failure: expected {expected}, got {actual} (size: {data_size} bytes)")]
    Integrity {
        expected: Digest,
        actual: Digest,
        data_size: usize,
    },
    /// Fetched bytes differ in length from the declared size
    #[error("integrity failure: {digest} declares {expected} bytes, fetched {actual}")]
    SizeMismatch {
        digest: Digest,
        expected: u64,
        actual: u64,
    },
    #[error("failed to parse manifest {digest}: {source}")]
    Parse {
        digest: Digest,
        #[source]
        source: ParseError,
    },
    /// The caller's cancellation token fired
    #[error("load cancelled while fetching {digest}")]
    Cancelled { digest: Digest },
    #[error("fetch of {digest} timed out after {after:?}")]
    TimedOut { digest: Digest, after: Duration },
}

impl LoadError {
    /// Digest of the descriptor the load failed on
    pub fn digest(&self) -> &Digest {
        match self {
            Self::Fetch { digest, .. }
            | Self::SizeMismatch { digest, .. }
            | Self::Parse { digest, .. }
            | Self::Cancelled { digest }
            | Self::TimedOut { digest, .. } => digest,
            Self::Integrity { expected, .. } => expected,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::TimedOut { .. })
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::SizeMismatch { .. })
    }
}

/// Credential configuration could not be read
#[derive(Debug, thiserror::Error)]
pub enum KeychainError {
    #[error("failed to read credential config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode credential config {path}: {reason}")]
    Decode { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("empty reference")]
    Empty,
    #[error("invalid reference '{reference}': {reason}")]
    Invalid { reference: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(hex_char: char) -> Digest {
        Digest::parse(&format!("sha256:{}", hex_char.to_string().repeat(64))).unwrap()
    }

    #[test]
    fn test_integrity_error_display() {
        let err = LoadError::Integrity {
            expected: digest('a'),
            actual: digest('b'),
            data_size: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("sha256:aaaaaaaa"));
        assert!(msg.contains("sha256:bbbbbbbb"));
        assert!(msg.contains("1024"));
        assert!(err.is_integrity());
        assert!(!err.is_cancellation());
    }

    #[test]
    fn test_cancellation_detection() {
        let cancelled = LoadError::Cancelled { digest: digest('c') };
        assert!(cancelled.is_cancellation());

        let timed_out = LoadError::TimedOut {
            digest: digest('c'),
            after: Duration::from_secs(3),
        };
        assert!(timed_out.is_cancellation());
        assert!(!timed_out.is_integrity());
    }

    #[test]
    fn test_fetch_error_carries_digest() {
        let err = LoadError::Fetch {
            digest: digest('d'),
            source: anyhow::anyhow!("blob unknown"),
        };
        assert_eq!(err.digest(), &digest('d'));
        let msg = err.to_string();
        assert!(msg.contains("sha256:dddd"));
        assert!(msg.contains("blob unknown"));
    }

    #[test]
    fn test_parse_error_wraps_source() {
        let err = LoadError::Parse {
            digest: digest('e'),
            source: ParseError::UnsupportedSchemaVersion {
                found: 1,
                expected: 2,
            },
        };
        assert!(err.to_string().contains("unsupported schema version 1"));
        assert!(std::error::Error::source(&err).is_some());
    }
}

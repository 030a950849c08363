//! Manifest tree traversal.
//!
//! A load fetches the root, verifies it against its digest, registers it,
//! parses it, registers every child, and recurses into children that are
//! themselves manifests or indexes. Each digest is fetched at most once per
//! load, which also makes self-referencing trees terminate.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collection::Collection;
use crate::config::LoaderConfig;
use crate::descriptor::{Descriptor, MediaKind};
use crate::digest::Digest;
use crate::error::LoadError;
use crate::fetch::Fetcher;
use crate::manifest::{parse_index, parse_manifest};

/// Counters reported by a finished load
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub manifests_fetched: usize,
    pub nodes_added: usize,
    pub nodes_already_present: usize,
    pub elapsed_ms: u64,
}

/// Loads manifest trees into collections through a fetch collaborator
pub struct ManifestLoader<'f, F: Fetcher + ?Sized> {
    fetcher: &'f F,
    config: LoaderConfig,
}

impl<'f, F: Fetcher + ?Sized> ManifestLoader<'f, F> {
    pub fn new(fetcher: &'f F) -> Self {
        Self {
            fetcher,
            config: LoaderConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve `root` and everything it references into `collection`.
    ///
    /// The first failure anywhere in the tree aborts the load; nodes added
    /// before it stay in the collection.
    pub async fn load(
        &self,
        ctx: &CancellationToken,
        collection: &Collection,
        root: &Descriptor,
    ) -> Result<LoadStats, LoadError> {
        let start_time = Instant::now();
        let walk = Walk {
            fetcher: self.fetcher,
            collection,
            token: ctx.child_token(),
            fetch_permits: Semaphore::new(self.config.max_concurrency.max(1)),
            config: &self.config,
            visited: Mutex::new(HashSet::new()),
            manifests_fetched: AtomicUsize::new(0),
            nodes_added: AtomicUsize::new(0),
            nodes_already_present: AtomicUsize::new(0),
        };

        tracing::info!(
            collection = collection.name(),
            root = %root.digest,
            max_concurrency = self.config.max_concurrency,
            "Loading collection from manifest"
        );

        if let Err(e) = walk.expand(root, true).await {
            // Stop fetchers still observing the token from abandoned branches
            walk.token.cancel();
            warn!(collection = collection.name(), digest = %e.digest(), error = %e, "Load failed");
            return Err(e);
        }

        let stats = LoadStats {
            manifests_fetched: walk.manifests_fetched.load(Ordering::Relaxed),
            nodes_added: walk.nodes_added.load(Ordering::Relaxed),
            nodes_already_present: walk.nodes_already_present.load(Ordering::Relaxed),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        };
        crate::log_load_complete!(collection.name(), stats);
        Ok(stats)
    }
}

/// Load `root` into `collection` with the default loader settings
pub async fn load_from_manifest<F: Fetcher + ?Sized>(
    ctx: &CancellationToken,
    collection: &Collection,
    fetcher: &F,
    root: &Descriptor,
) -> Result<(), LoadError> {
    ManifestLoader::new(fetcher)
        .load(ctx, collection, root)
        .await
        .map(|_| ())
}

/// State shared by every branch of one load
struct Walk<'a, F: Fetcher + ?Sized> {
    fetcher: &'a F,
    collection: &'a Collection,
    token: CancellationToken,
    fetch_permits: Semaphore,
    config: &'a LoaderConfig,
    visited: Mutex<HashSet<Digest>>,
    manifests_fetched: AtomicUsize,
    nodes_added: AtomicUsize,
    nodes_already_present: AtomicUsize,
}

impl<'a, F: Fetcher + ?Sized> Walk<'a, F> {
    /// Fetch, verify and expand `desc`. Children were registered by their
    /// parent already; only the root registers itself, once verified.
    fn expand<'w>(
        &'w self,
        desc: &'w Descriptor,
        is_root: bool,
    ) -> BoxFuture<'w, Result<(), LoadError>> {
        Box::pin(async move {
            let first_visit = self.visited.lock().insert(desc.digest.clone());
            if !first_visit {
                debug!(digest = %desc.digest, "Already visited, skipping");
                return Ok(());
            }

            let bytes = self.fetch_verified(desc).await?;
            self.manifests_fetched.fetch_add(1, Ordering::Relaxed);
            if is_root {
                self.register(desc);
            }

            let children = self.decode(desc, &bytes)?;
            drop(bytes);

            self.expand_children(&children).await
        })
    }

    async fn expand_children(&self, children: &[Descriptor]) -> Result<(), LoadError> {
        if self.config.max_concurrency <= 1 {
            for child in children {
                self.register(child);
                if child.kind().is_composite() {
                    self.expand(child, false).await?;
                }
            }
            return Ok(());
        }

        for child in children {
            self.register(child);
        }

        let branches: Vec<_> = children
            .iter()
            .filter(|c| c.kind().is_composite())
            .map(|child| self.expand(child, false))
            .collect();

        // Dropping the stream on the first error abandons the sibling branches
        futures::stream::iter(branches)
            .buffer_unordered(self.config.max_concurrency)
            .try_collect::<()>()
            .await
    }

    /// Children of a fetched document; manifests also register their config
    fn decode(&self, desc: &Descriptor, bytes: &[u8]) -> Result<Vec<Descriptor>, LoadError> {
        let parse_failed = |source| LoadError::Parse {
            digest: desc.digest.clone(),
            source,
        };

        match desc.kind() {
            MediaKind::Index => Ok(parse_index(bytes).map_err(parse_failed)?.manifests),
            MediaKind::Manifest | MediaKind::Content => {
                let manifest = parse_manifest(bytes).map_err(parse_failed)?;
                self.register(&manifest.config);
                Ok(manifest.layers)
            }
        }
    }

    async fn fetch_verified(&self, desc: &Descriptor) -> Result<Vec<u8>, LoadError> {
        let cancelled = || LoadError::Cancelled {
            digest: desc.digest.clone(),
        };
        if self.token.is_cancelled() {
            return Err(cancelled());
        }

        let bytes = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(cancelled()),
            fetched = self.timed_fetch(desc) => fetched?,
        };

        if let Err(actual) = desc.digest.verify(&bytes) {
            crate::log_integrity_fail!(desc.digest, actual, bytes.len());
            return Err(LoadError::Integrity {
                expected: desc.digest.clone(),
                actual,
                data_size: bytes.len(),
            });
        }
        if desc.size != 0 && desc.size != bytes.len() as u64 {
            return Err(LoadError::SizeMismatch {
                digest: desc.digest.clone(),
                expected: desc.size,
                actual: bytes.len() as u64,
            });
        }

        Ok(bytes)
    }

    async fn timed_fetch(&self, desc: &Descriptor) -> Result<Vec<u8>, LoadError> {
        let _permit = self
            .fetch_permits
            .acquire()
            .await
            .map_err(|_| LoadError::Cancelled {
                digest: desc.digest.clone(),
            })?;

        crate::log_fetch!(desc);
        let fetch = self.fetcher.fetch(&self.token, desc);
        let fetched = match self.config.fetch_timeout {
            Some(after) => tokio::time::timeout(after, fetch)
                .await
                .map_err(|_| LoadError::TimedOut {
                    digest: desc.digest.clone(),
                    after,
                })?,
            None => fetch.await,
        };

        fetched.map_err(|source| LoadError::Fetch {
            digest: desc.digest.clone(),
            source,
        })
    }

    fn register(&self, desc: &Descriptor) {
        if self.collection.add_node(desc) {
            self.nodes_added.fetch_add(1, Ordering::Relaxed);
        } else {
            self.nodes_already_present.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MEDIA_TYPE_OCI_MANIFEST;
    use crate::fetch::MemoryStore;
    use serde_json::json;

    fn walk<'a>(
        store: &'a MemoryStore,
        collection: &'a Collection,
        config: &'a LoaderConfig,
    ) -> Walk<'a, MemoryStore> {
        Walk {
            fetcher: store,
            collection,
            token: CancellationToken::new(),
            fetch_permits: Semaphore::new(config.max_concurrency),
            config,
            visited: Mutex::new(HashSet::new()),
            manifests_fetched: AtomicUsize::new(0),
            nodes_added: AtomicUsize::new(0),
            nodes_already_present: AtomicUsize::new(0),
        }
    }

    fn simple_manifest(store: &MemoryStore) -> Descriptor {
        let config = store.push("application/vnd.uor.config.v1+json", b"{}".to_vec());
        let body = json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_MANIFEST,
            "config": config,
            "layers": []
        });
        store.push(MEDIA_TYPE_OCI_MANIFEST, serde_json::to_vec(&body).unwrap())
    }

    #[tokio::test]
    async fn test_visited_descriptor_is_not_fetched_again() {
        let store = MemoryStore::new();
        let root = simple_manifest(&store);
        let collection = Collection::new("test");
        let config = LoaderConfig::sequential();
        let walk = walk(&store, &collection, &config);

        // A reference back to an ancestor finds it already marked
        walk.visited.lock().insert(root.digest.clone());
        walk.expand(&root, true).await.unwrap();

        assert_eq!(store.total_fetches(), 0);
        assert!(collection.is_empty());
    }

    #[tokio::test]
    async fn test_expand_registers_root_and_config() {
        let store = MemoryStore::new();
        let root = simple_manifest(&store);
        let collection = Collection::new("test");
        let config = LoaderConfig::sequential();
        let walk = walk(&store, &collection, &config);

        walk.expand(&root, true).await.unwrap();
        walk.expand(&root, true).await.unwrap();

        assert_eq!(store.fetch_count(&root.digest), 1);
        assert_eq!(collection.len(), 2);
        assert_eq!(walk.manifests_fetched.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_adds_nothing() {
        let store = MemoryStore::new();
        let root = simple_manifest(&store);
        let collection = Collection::new("test");
        let config = LoaderConfig::sequential();
        let walk = walk(&store, &collection, &config);
        walk.token.cancel();

        let err = walk.expand(&root, true).await.unwrap_err();
        assert!(matches!(err, LoadError::Cancelled { .. }));
        assert_eq!(store.total_fetches(), 0);
        assert!(collection.is_empty());
    }
}

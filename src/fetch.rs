use std::collections::HashMap;
use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::descriptor::Descriptor;
use crate::digest::Digest;

/// Produces the raw bytes a descriptor points at.
///
/// Implementations own their transport and must tolerate repeated and
/// concurrent calls. Retries, caching and rate limiting belong here, never in
/// the loader.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, ctx: &CancellationToken, desc: &Descriptor) -> Result<Vec<u8>>;
}

/// Adapts an async closure into a [`Fetcher`]
pub struct FnFetcher<F> {
    func: F,
}

pub fn fetch_fn<F, Fut>(func: F) -> FnFetcher<F>
where
    F: Fn(CancellationToken, Descriptor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send,
{
    FnFetcher { func }
}

#[async_trait]
impl<F, Fut> Fetcher for FnFetcher<F>
where
    F: Fn(CancellationToken, Descriptor) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send,
{
    async fn fetch(&self, ctx: &CancellationToken, desc: &Descriptor) -> Result<Vec<u8>> {
        (self.func)(ctx.clone(), desc.clone()).await
    }
}

/// In-memory blob store keyed by digest. Records how often each digest was
/// fetched.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<Digest, Vec<u8>>>,
    fetches: Mutex<HashMap<Digest, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` under its sha256 digest and returns its descriptor
    pub fn push(&self, media_type: &str, data: Vec<u8>) -> Descriptor {
        let desc = Descriptor::for_bytes(media_type, &data);
        self.blobs.lock().insert(desc.digest.clone(), data);
        desc
    }

    /// Stores `data` under an arbitrary digest, without checking it
    pub fn insert_raw(&self, digest: Digest, data: Vec<u8>) {
        self.blobs.lock().insert(digest, data);
    }

    pub fn fetch_count(&self, digest: &Digest) -> usize {
        self.fetches.lock().get(digest).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }
}

#[async_trait]
impl Fetcher for MemoryStore {
    async fn fetch(&self, _ctx: &CancellationToken, desc: &Descriptor) -> Result<Vec<u8>> {
        *self.fetches.lock().entry(desc.digest.clone()).or_insert(0) += 1;
        self.blobs
            .lock()
            .get(&desc.digest)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("blob {} not found", desc.digest))
    }
}

//! Concurrent fetch pipeline.
//!
//! [`Fetcher::fetch_one`] goes memory cache → disk cache → source handler,
//! then reads `metadata.toml`, checks the name, and stores the archive in
//! both caches. [`Fetcher::fetch_many`] runs that for a batch on a bounded
//! pool of workers and returns one result per input, in input order.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use quiver_core::archive::read_metadata;
use quiver_core::model::{Artifact, FetchedArtifact, Source};
use quiver_core::{CoreError, LockFile, QuiverConfig};

use crate::cache::{AssetCache, LockfileCache};
use crate::client::{ConditionalOutcome, RegistryClient};
use crate::config::RegistryConfig;
use crate::context::{FetchContext, StopReason};
use crate::digest::verify_hashes;
use crate::error::{FetchError, FetchResult};
use crate::sources::{GitSource, HttpSource, PathSource, SourceSet};

/// Result for one input of [`Fetcher::fetch_many`].
pub type FetchOutcome = FetchResult<FetchedArtifact>;

/// Fetches artifacts through the caches and source handlers.
///
/// Cloning is cheap; clones share the in-memory cache.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: RegistryClient,
    cache: AssetCache,
    lockfiles: LockfileCache,
    sources: SourceSet,
    memory: Arc<RwLock<HashMap<String, FetchedArtifact>>>,
    concurrency: usize,
}

impl Fetcher {
    /// Wire up the default caches and source handlers.
    pub fn new(quiver: &QuiverConfig, registry: RegistryConfig) -> FetchResult<Self> {
        let git = GitSource::from_config(quiver, registry.git_config());
        let concurrency = registry.concurrency;
        let client = RegistryClient::new(registry)?;

        let sources = SourceSet {
            http: Arc::new(HttpSource::new(client.clone())),
            path: Arc::new(PathSource::default()),
            git: Arc::new(git),
        };

        Ok(Self {
            client,
            cache: AssetCache::new(quiver),
            lockfiles: LockfileCache::new(quiver),
            sources,
            memory: Arc::new(RwLock::new(HashMap::new())),
            concurrency,
        })
    }

    /// Resolve relative path sources against `dir` (the lock file directory).
    pub fn with_base_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.sources.path = Arc::new(PathSource::new(dir));
        self
    }

    pub fn with_sources(mut self, sources: SourceSet) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_cache(mut self, cache: AssetCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// Configured worker count.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Drop every in-memory entry. The disk cache is untouched.
    pub async fn clear_memory(&self) {
        self.memory.write().await.clear();
    }

    /// Fetch one artifact.
    pub async fn fetch_one(&self, artifact: &Artifact, ctx: &FetchContext) -> FetchOutcome {
        let key = artifact.id();
        if let Some(hit) = self.memory.read().await.get(&key) {
            debug!(name = %artifact.name, version = %artifact.version, "memory cache hit");
            let mut hit = hit.clone();
            hit.from_cache = true;
            return Ok(hit);
        }

        let version = artifact.version.to_string();

        let (archive, metadata, from_cache) = match self.load_cached(artifact, &version).await {
            Some((archive, metadata)) => (archive, metadata, true),
            None => {
                debug!(name = %artifact.name, version = %version, source = %artifact.source, "fetching from source");
                let archive = self
                    .sources
                    .handler_for(&artifact.source)
                    .fetch(artifact, ctx)
                    .await?;
                let metadata = read_metadata(&archive).map_err(CoreError::from)?;
                (archive, metadata, false)
            }
        };

        if metadata.name != artifact.name {
            return Err(FetchError::integrity(
                &artifact.name,
                format!("archive metadata names '{}'", metadata.name),
            ));
        }

        if !from_cache {
            // A failed store only costs a re-download next time.
            if let Err(e) = self.cache.save(&artifact.name, &version, &archive).await {
                warn!(name = %artifact.name, version = %version, error = %e, "failed to cache archive");
            }
        }

        let fetched = FetchedArtifact {
            artifact: artifact.clone(),
            archive,
            metadata,
            from_cache,
        };
        self.memory.write().await.insert(key, fetched.clone());

        info!(name = %artifact.name, version = %version, from_cache, "fetched artifact");
        Ok(fetched)
    }

    /// Disk cache entry that still passes the checks a fresh download would.
    async fn load_cached(
        &self,
        artifact: &Artifact,
        version: &str,
    ) -> Option<(Vec<u8>, quiver_core::ArtifactMetadata)> {
        let archive = match self.cache.load(&artifact.name, version).await {
            Ok(Some(archive)) => archive,
            Ok(None) => return None,
            Err(e) => {
                warn!(name = %artifact.name, version, error = %e, "cache read failed, refetching");
                return None;
            }
        };

        let check = match &artifact.source {
            Source::Http(spec) => verify_hashes(&artifact.name, &archive, &spec.hashes),
            _ => Ok(()),
        }
        .and_then(|()| read_metadata(&archive).map_err(|e| FetchError::from(CoreError::from(e))));

        match check {
            Ok(metadata) => Some((archive, metadata)),
            Err(e) => {
                warn!(name = %artifact.name, version, error = %e, "cached archive failed verification, evicting");
                if let Err(e) = self.cache.evict(&artifact.name, version).await {
                    warn!(name = %artifact.name, error = %e, "failed to evict cache entry");
                }
                None
            }
        }
    }

    /// Fetch a batch with `max(1, concurrency)` workers.
    ///
    /// The result has one entry per input, at the input's index. Failures
    /// never stop the batch. Once `ctx` stops, every unit not yet started gets
    /// `Cancelled` or `DeadlineExceeded` carrying its index.
    pub async fn fetch_many(
        &self,
        artifacts: &[Artifact],
        concurrency: usize,
        ctx: &FetchContext,
    ) -> Vec<FetchOutcome> {
        let total = artifacts.len();
        let workers = concurrency.max(1).min(total.max(1));
        info!(total, workers, "fetching artifacts");

        let queue: Arc<Mutex<VecDeque<(usize, Artifact)>>> = Arc::new(Mutex::new(
            artifacts.iter().cloned().enumerate().collect(),
        ));

        let mut join_set = JoinSet::new();
        for _ in 0..workers {
            let this = self.clone();
            let queue = Arc::clone(&queue);
            let ctx = ctx.clone();
            join_set.spawn(async move {
                let mut done = Vec::new();
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, artifact)) = next else {
                        break;
                    };
                    let result = match ctx.stop_reason() {
                        Some(StopReason::Cancelled) => Err(FetchError::Cancelled { index }),
                        Some(StopReason::DeadlineExceeded) => {
                            Err(FetchError::DeadlineExceeded { index })
                        }
                        None => this.fetch_one(&artifact, &ctx).await,
                    };
                    done.push((index, result));
                }
                done
            });
        }

        let mut slots: Vec<Option<FetchOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(done) => {
                    for (index, result) in done {
                        slots[index] = Some(result);
                    }
                }
                Err(e) => warn!(error = %e, "fetch worker failed"),
            }
        }

        let results: Vec<FetchOutcome> = slots
            .into_iter()
            .zip(artifacts)
            .map(|(slot, artifact)| {
                slot.unwrap_or_else(|| {
                    Err(FetchError::source(&artifact.name, "fetch worker terminated"))
                })
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total, failed, "fetch finished");
        results
    }

    /// Fetch, parse and validate a lock file published at `url`, revalidating
    /// a cached copy with its ETag.
    pub async fn fetch_remote_lockfile(&self, url: &str) -> FetchResult<LockFile> {
        let etag = self.lockfiles.etag(url).await;

        let content = match self.client.fetch_lockfile(url, etag.as_deref()).await? {
            ConditionalOutcome::NotModified => match self.lockfiles.load(url).await? {
                Some(content) => {
                    debug!(url, "remote lock file not modified, using cache");
                    self.lockfiles.touch(url).await?;
                    content
                }
                None => self.fetch_lockfile_unconditional(url).await?,
            },
            ConditionalOutcome::Fetched { content, etag } => {
                self.store_lockfile(url, content, etag).await?
            }
        };

        LockFile::parse(&content).map_err(|e| FetchError::from(CoreError::from(e)))
    }

    async fn fetch_lockfile_unconditional(&self, url: &str) -> FetchResult<String> {
        match self.client.fetch_lockfile(url, None).await? {
            ConditionalOutcome::Fetched { content, etag } => {
                self.store_lockfile(url, content, etag).await
            }
            ConditionalOutcome::NotModified => Err(FetchError::InvalidResponse {
                message: format!("304 for unconditional request to {}", url),
            }),
        }
    }

    /// Only content that parses is cached.
    async fn store_lockfile(
        &self,
        url: &str,
        content: String,
        etag: Option<String>,
    ) -> FetchResult<String> {
        LockFile::parse(&content).map_err(CoreError::from)?;
        self.lockfiles.store(url, &content, etag.as_deref()).await?;
        Ok(content)
    }
}

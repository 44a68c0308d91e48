//! Source handlers: turn an artifact's [`Source`] into archive bytes.

mod git;
mod http;
mod lock;
mod path;

use std::sync::Arc;

use async_trait::async_trait;

use quiver_core::model::{Artifact, Source};

use crate::context::FetchContext;
use crate::error::FetchResult;

pub use git::GitSource;
pub use http::HttpSource;
pub use lock::RepoLock;
pub use path::PathSource;

/// Produces the archive for one artifact.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    async fn fetch(&self, artifact: &Artifact, ctx: &FetchContext) -> FetchResult<Vec<u8>>;
}

/// One handler per source kind.
#[derive(Clone)]
pub struct SourceSet {
    pub http: Arc<dyn SourceHandler>,
    pub path: Arc<dyn SourceHandler>,
    pub git: Arc<dyn SourceHandler>,
}

impl SourceSet {
    pub fn handler_for(&self, source: &Source) -> &dyn SourceHandler {
        match source {
            Source::Http(_) => self.http.as_ref(),
            Source::Path(_) => self.path.as_ref(),
            Source::Git(_) => self.git.as_ref(),
        }
    }
}

impl std::fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSet").finish_non_exhaustive()
    }
}

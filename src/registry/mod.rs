pub mod civitai;
pub mod filter;
pub mod http;
pub mod huggingface;

use crate::error::Result;
use crate::model::{ModelCategory, RemoteCandidate, SourceId};
use async_trait::async_trait;
use std::path::Path;

pub use civitai::CivitAiClient;
pub use huggingface::HuggingFaceClient;

/// Progress callback: (bytes now in staging, declared total or 0).
pub type ProgressFn<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// A remote service that can search for and serve model files.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    fn source(&self) -> SourceId;

    async fn search(&self, term: &str, category: ModelCategory) -> Result<Vec<RemoteCandidate>>;

    /// Looks a file up by content hash. Registries without a hash index
    /// never match.
    async fn find_by_hash(&self, _hash: &str) -> Result<Option<RemoteCandidate>> {
        Ok(None)
    }

    /// Appends the remainder of `locator` to `staging`, asking the server to
    /// skip the first `resume_offset` bytes already there.
    async fn fetch(
        &self,
        locator: &str,
        staging: &Path,
        resume_offset: u64,
        on_progress: &ProgressFn<'_>,
    ) -> Result<()>;
}

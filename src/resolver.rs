use crate::model::scanner::strip_extension;
use crate::model::{ArtifactReference, ModelCategory, RemoteCandidate};
use crate::registry::RegistryClient;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Precision and pruning tags that registries rarely include in their names.
const VARIANT_SUFFIXES: &[&str] = &["_fp16", "_fp32", "-fp16", "-fp32", "_pruned", "-pruned"];

/// Turns a model file name into a registry search term.
pub fn normalize_search_term(name: &str) -> String {
    let mut term = strip_extension(name);
    for suffix in VARIANT_SUFFIXES {
        term = term.strip_suffix(suffix).unwrap_or(term);
    }
    term.to_string()
}

/// Resolutions are keyed by category as well as name: the same file name
/// can mean different models to different loaders.
pub type ResolvedKey = (ModelCategory, String);

/// Finds a download for each missing model.
///
/// Registries are asked in the order given and the first hit wins; results
/// are never merged across registries. References nobody can serve are
/// left out of the result.
pub struct RemoteResolver {
    sources: Arc<Vec<Arc<dyn RegistryClient>>>,
    hash_source: Option<Arc<dyn RegistryClient>>,
}

impl RemoteResolver {
    pub fn new(
        sources: Vec<Arc<dyn RegistryClient>>,
        hash_source: Option<Arc<dyn RegistryClient>>,
    ) -> Self {
        Self {
            sources: Arc::new(sources),
            hash_source,
        }
    }

    pub async fn resolve(
        &self,
        missing: &[ArtifactReference],
    ) -> HashMap<ResolvedKey, RemoteCandidate> {
        let resolved = Arc::new(Mutex::new(HashMap::new()));

        let handles: Vec<_> = missing
            .iter()
            .cloned()
            .map(|reference| {
                let sources = self.sources.clone();
                let hash_source = self.hash_source.clone();
                let resolved = resolved.clone();
                tokio::spawn(async move {
                    if let Some(candidate) =
                        resolve_one(&sources, hash_source.as_deref(), &reference).await
                    {
                        resolved
                            .lock()
                            .insert((reference.category, reference.name), candidate);
                    }
                })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Resolution task panicked: {}", e);
            }
        }

        let resolved = std::mem::take(&mut *resolved.lock());
        resolved
    }
}

async fn resolve_one(
    sources: &[Arc<dyn RegistryClient>],
    hash_source: Option<&dyn RegistryClient>,
    reference: &ArtifactReference,
) -> Option<RemoteCandidate> {
    let term = normalize_search_term(&reference.name);

    for source in sources {
        match source.search(&term, reference.category).await {
            Ok(candidates) => {
                if let Some(candidate) = candidates.into_iter().next() {
                    tracing::debug!(
                        "Matched {} to {} on {}",
                        reference.name,
                        candidate.file_name,
                        candidate.source
                    );
                    return Some(candidate);
                }
            }
            Err(e) => tracing::warn!(
                "Search for {} on {} failed: {}",
                reference.name,
                source.source(),
                e
            ),
        }
    }

    let (Some(hash), Some(hash_source)) = (reference.expected_hash.as_deref(), hash_source) else {
        return None;
    };

    match hash_source.find_by_hash(hash).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(
                "Hash lookup for {} on {} failed: {}",
                reference.name,
                hash_source.source(),
                e
            );
            None
        }
    }
}

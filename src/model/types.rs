use std::fmt;
use std::path::PathBuf;

/// Functional role of a model file. Decides its storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelCategory {
    Checkpoint,
    Lora,
    Vae,
    Embedding,
    ControlNet,
    Upscaler,
    ClipVision,
}

impl ModelCategory {
    pub const ALL: [ModelCategory; 7] = [
        ModelCategory::Checkpoint,
        ModelCategory::Lora,
        ModelCategory::Vae,
        ModelCategory::Embedding,
        ModelCategory::ControlNet,
        ModelCategory::Upscaler,
        ModelCategory::ClipVision,
    ];

    /// Key used in the `model_dirs` table and as the default directory name.
    pub fn key(self) -> &'static str {
        match self {
            ModelCategory::Checkpoint => "checkpoints",
            ModelCategory::Lora => "loras",
            ModelCategory::Vae => "vae",
            ModelCategory::Embedding => "embeddings",
            ModelCategory::ControlNet => "controlnet",
            ModelCategory::Upscaler => "upscale_models",
            ModelCategory::ClipVision => "clip_vision",
        }
    }
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A model file requested by a workflow. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactReference {
    pub name: String,
    pub category: ModelCategory,
    pub expected_hash: Option<String>,
}

impl ArtifactReference {
    pub fn new(name: impl Into<String>, category: ModelCategory) -> Self {
        Self {
            name: name.into(),
            category,
            expected_hash: None,
        }
    }
}

/// Outcome of a presence lookup for one reference.
#[derive(Debug, Clone)]
pub struct LocalCandidate {
    pub reference: ArtifactReference,
    pub path: PathBuf,
    pub exists: bool,
    pub size: u64,
}

/// Which remote registry a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceId {
    HuggingFace,
    CivitAi,
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::HuggingFace => f.write_str("huggingface"),
            SourceId::CivitAi => f.write_str("civitai"),
        }
    }
}

/// A download option offered by a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCandidate {
    pub source: SourceId,
    pub file_name: String,
    pub locator: String,
    pub declared_size: u64,
    pub content_hash: Option<String>,
}

/// A resolved download: what to fetch, from where, and where it lands.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub reference: ArtifactReference,
    pub candidate: RemoteCandidate,
    pub destination: PathBuf,
}

impl TransferJob {
    pub fn name(&self) -> &str {
        &self.reference.name
    }
}

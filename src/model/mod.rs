pub mod hash;
pub mod scanner;
pub mod types;

pub use scanner::{Classification, PresenceScanner};
pub use types::{
    ArtifactReference, LocalCandidate, ModelCategory, RemoteCandidate, SourceId, TransferJob,
};

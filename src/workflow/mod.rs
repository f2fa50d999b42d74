use crate::error::{Error, Result};
use crate::model::{ArtifactReference, ModelCategory};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

const EMBEDDING_MARKER: &str = "embedding:";
const EMBEDDING_TERMINATORS: &[char] = &[' ', ',', '(', ')', ':'];

#[derive(Debug, Deserialize)]
struct WorkflowNode {
    class_type: String,
    #[serde(default)]
    inputs: HashMap<String, Value>,
}

/// Pulls model references out of an API-format workflow graph.
pub struct WorkflowParser;

impl WorkflowParser {
    pub fn parse_file(path: &Path) -> Result<Vec<ArtifactReference>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::WorkflowError(format!("Failed to read workflow {:?}: {}", path, e))
        })?;
        Self::parse_str(&content)
    }

    pub fn parse_str(content: &str) -> Result<Vec<ArtifactReference>> {
        let nodes: HashMap<String, WorkflowNode> = serde_json::from_str(content)
            .map_err(|e| Error::WorkflowError(format!("Invalid workflow JSON: {}", e)))?;

        // (category, name) ordering doubles as deduplication
        let mut found = BTreeSet::new();

        for node in nodes.values() {
            match loader_input(&node.class_type) {
                Some((key, category)) => {
                    if let Some(name) = node.inputs.get(key).and_then(Value::as_str) {
                        found.insert((category, name.to_string()));
                    }
                }
                None => {
                    for text in node.inputs.values().filter_map(Value::as_str) {
                        for name in find_embeddings(text) {
                            found.insert((ModelCategory::Embedding, name));
                        }
                    }
                }
            }
        }

        tracing::debug!("Workflow has {} nodes, {} model references", nodes.len(), found.len());

        Ok(found
            .into_iter()
            .map(|(category, name)| ArtifactReference::new(name, category))
            .collect())
    }
}

fn loader_input(class_type: &str) -> Option<(&'static str, ModelCategory)> {
    match class_type {
        "CheckpointLoaderSimple" | "CheckpointLoader" => Some(("ckpt_name", ModelCategory::Checkpoint)),
        "LoraLoader" | "LoraLoaderModelOnly" => Some(("lora_name", ModelCategory::Lora)),
        "VAELoader" => Some(("vae_name", ModelCategory::Vae)),
        "ControlNetLoader" => Some(("control_net_name", ModelCategory::ControlNet)),
        "CLIPVisionLoader" => Some(("clip_name", ModelCategory::ClipVision)),
        "UpscaleModelLoader" => Some(("model_name", ModelCategory::Upscaler)),
        _ => None,
    }
}

/// Finds `embedding:name` tokens in prompt text. Bare names get `.pt`.
fn find_embeddings(text: &str) -> Vec<String> {
    text.split(EMBEDDING_MARKER)
        .skip(1)
        .filter_map(|rest| {
            let end = rest.find(EMBEDDING_TERMINATORS).unwrap_or(rest.len());
            let name = &rest[..end];
            if name.is_empty() {
                None
            } else if name.contains('.') {
                Some(name.to_string())
            } else {
                Some(format!("{}.pt", name))
            }
        })
        .collect()
}

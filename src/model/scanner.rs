use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::hash::{self, Fingerprint};
use crate::model::{ArtifactReference, LocalCandidate, ModelCategory};
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions tried when the exact file name is not on disk.
const CANDIDATE_EXTENSIONS: &[&str] = &[
    ".safetensors",
    ".ckpt",
    ".pt",
    ".pth",
    ".bin",
    ".yaml",
    ".json",
];

/// Extensions counted as installed models when listing a directory.
const INVENTORY_EXTENSIONS: &[&str] = &["safetensors", "ckpt", "pt", "pth", "bin"];

/// Files below this size get a full SHA-256 in `inspect`.
const FULL_HASH_LIMIT: u64 = 100 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct Classification {
    pub present: Vec<LocalCandidate>,
    pub missing: Vec<LocalCandidate>,
}

#[derive(Debug, Clone)]
pub struct ModelDetails {
    pub size: u64,
    pub fingerprint: Fingerprint,
}

/// Decides which referenced models are already on disk.
///
/// Only stats paths, never reads file contents, so it is safe to run any
/// number of times against the same tree.
pub struct PresenceScanner {
    config: Config,
}

impl PresenceScanner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Splits references into present and missing.
    ///
    /// A filesystem error on any reference aborts the whole classification;
    /// download decisions made on a half-known tree would be wrong.
    pub fn classify(&self, refs: &[ArtifactReference]) -> Result<Classification> {
        let mut classification = Classification::default();

        for reference in refs {
            let candidate = self.locate(reference)?;
            if candidate.exists {
                classification.present.push(candidate);
            } else {
                classification.missing.push(candidate);
            }
        }

        Ok(classification)
    }

    /// Presence lookup for a single reference.
    pub fn locate(&self, reference: &ArtifactReference) -> Result<LocalCandidate> {
        let expected = self.config.model_path(reference.category, &reference.name);
        let scan_err = |source: io::Error| Error::ScanError {
            name: reference.name.clone(),
            source,
        };

        let found = find_existing(&expected, &reference.name).map_err(scan_err)?;

        Ok(match found {
            Some((path, meta)) => LocalCandidate {
                reference: reference.clone(),
                path,
                exists: true,
                size: if meta.is_file() { meta.len() } else { 0 },
            },
            None => LocalCandidate {
                reference: reference.clone(),
                path: expected,
                exists: false,
                size: 0,
            },
        })
    }

    /// Lists model files under a category directory.
    ///
    /// Best effort: entries that cannot be read are logged and skipped.
    pub fn scan_directory(&self, category: ModelCategory) -> Vec<LocalCandidate> {
        let root = self.config.category_dir(category);
        let mut models = Vec::new();

        if !root.exists() {
            return models;
        }

        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry under {:?}: {}", root, e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !has_inventory_extension(entry.path()) {
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            let name = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();

            models.push(LocalCandidate {
                reference: ArtifactReference::new(name, category),
                path: entry.path().to_path_buf(),
                exists: true,
                size,
            });
        }

        models
    }

    /// Size and fingerprint of an installed model.
    pub fn inspect(&self, candidate: &LocalCandidate) -> Result<ModelDetails> {
        let size = std::fs::metadata(&candidate.path)?.len();
        let fingerprint = if size < FULL_HASH_LIMIT {
            Fingerprint::Sha256(hash::sha256_file(&candidate.path)?)
        } else {
            Fingerprint::Quick(hash::quick_hash(&candidate.path)?)
        };

        Ok(ModelDetails { size, fingerprint })
    }
}

/// Exact file, then the same stem with each tolerated extension, then a
/// directory at the exact path. First hit wins.
fn find_existing(expected: &Path, name: &str) -> io::Result<Option<(PathBuf, Metadata)>> {
    if let Some(meta) = stat(expected)? {
        if meta.is_file() {
            return Ok(Some((expected.to_path_buf(), meta)));
        }
    }

    let dir = expected.parent().unwrap_or(Path::new(""));
    let stem = Path::new(strip_extension(name))
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !stem.is_empty() {
        for ext in CANDIDATE_EXTENSIONS {
            let path = dir.join(format!("{}{}", stem, ext));
            if let Some(meta) = stat(&path)? {
                if meta.is_file() {
                    return Ok(Some((path, meta)));
                }
            }
        }
    }

    if let Some(meta) = stat(expected)? {
        if meta.is_dir() {
            return Ok(Some((expected.to_path_buf(), meta)));
        }
    }

    Ok(None)
}

fn stat(path: &Path) -> io::Result<Option<Metadata>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Drops the last extension of the final path component, if any.
pub fn strip_extension(name: &str) -> &str {
    let start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[start..].rfind('.') {
        Some(dot) if dot > 0 => &name[..start + dot],
        _ => name,
    }
}

fn has_inventory_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            INVENTORY_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PresenceScanner, Config) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            comfyui_path: dir.path().to_path_buf(),
            ..Config::default()
        };
        (dir, PresenceScanner::new(config.clone()), config)
    }

    fn touch(path: &Path, bytes: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn exact_file_is_present() {
        let (_dir, scanner, config) = setup();
        let reference = ArtifactReference::new("sd15.safetensors", ModelCategory::Checkpoint);
        let path = config.model_path(ModelCategory::Checkpoint, "sd15.safetensors");
        touch(&path, b"weights");

        let found = scanner.locate(&reference).unwrap();
        assert!(found.exists);
        assert_eq!(found.path, path);
        assert_eq!(found.size, 7);
    }

    #[test]
    fn other_extension_is_tolerated_and_overrides_path() {
        let (_dir, scanner, config) = setup();
        let reference = ArtifactReference::new("detail.safetensors", ModelCategory::Lora);
        let actual = config.model_path(ModelCategory::Lora, "detail.ckpt");
        touch(&actual, b"ckpt");

        let found = scanner.locate(&reference).unwrap();
        assert!(found.exists);
        assert_eq!(found.path, actual);
    }

    #[test]
    fn nested_names_keep_their_subdirectory() {
        let (_dir, scanner, config) = setup();
        let reference = ArtifactReference::new("sdxl/base.safetensors", ModelCategory::Checkpoint);
        let actual = config.model_path(ModelCategory::Checkpoint, "sdxl/base.pt");
        touch(&actual, b"pt");

        let found = scanner.locate(&reference).unwrap();
        assert!(found.exists);
        assert_eq!(found.path, actual);
    }

    #[test]
    fn directory_shaped_model_is_present() {
        let (_dir, scanner, config) = setup();
        let reference = ArtifactReference::new("clip-vit-large", ModelCategory::ClipVision);
        let path = config.model_path(ModelCategory::ClipVision, "clip-vit-large");
        fs::create_dir_all(&path).unwrap();

        let found = scanner.locate(&reference).unwrap();
        assert!(found.exists);
        assert_eq!(found.path, path);
    }

    #[test]
    fn nothing_on_disk_is_missing() {
        let (_dir, scanner, config) = setup();
        let refs = vec![
            ArtifactReference::new("model_fp16.safetensors", ModelCategory::Checkpoint),
            ArtifactReference::new("vae-ft.safetensors", ModelCategory::Vae),
        ];

        let result = scanner.classify(&refs).unwrap();
        assert!(result.present.is_empty());
        assert_eq!(result.missing.len(), 2);
        assert_eq!(
            result.missing[0].path,
            config.model_path(ModelCategory::Checkpoint, "model_fp16.safetensors")
        );
    }

    #[test]
    fn unreadable_path_aborts_classification() {
        let (_dir, scanner, config) = setup();
        fs::create_dir_all(config.category_dir(ModelCategory::Checkpoint)).unwrap();
        let overlong = format!("{}.safetensors", "a".repeat(300));
        let refs = vec![
            ArtifactReference::new("fine.safetensors", ModelCategory::Checkpoint),
            ArtifactReference::new(overlong.clone(), ModelCategory::Checkpoint),
        ];

        match scanner.classify(&refs) {
            Err(Error::ScanError { name, .. }) => assert_eq!(name, overlong),
            other => panic!("expected a scan error, got {:?}", other),
        }
    }

    #[test]
    fn staging_file_does_not_count_as_present() {
        let (_dir, scanner, config) = setup();
        let reference = ArtifactReference::new("big.safetensors", ModelCategory::Checkpoint);
        let staging = config.model_path(ModelCategory::Checkpoint, "big.safetensors.tmp");
        touch(&staging, b"partial");

        assert!(!scanner.locate(&reference).unwrap().exists);
    }

    #[test]
    fn classification_is_idempotent() {
        let (_dir, scanner, config) = setup();
        let refs = vec![
            ArtifactReference::new("a.safetensors", ModelCategory::Checkpoint),
            ArtifactReference::new("b.safetensors", ModelCategory::Vae),
            ArtifactReference::new("c.pt", ModelCategory::Embedding),
        ];
        touch(&config.model_path(ModelCategory::Checkpoint, "a.safetensors"), b"a");
        touch(&config.model_path(ModelCategory::Embedding, "c.bin"), b"c");

        let first = scanner.classify(&refs).unwrap();
        let second = scanner.classify(&refs).unwrap();

        let names = |c: &[LocalCandidate]| {
            c.iter().map(|m| m.reference.name.clone()).collect::<Vec<_>>()
        };
        assert_eq!(names(&first.present), vec!["a.safetensors", "c.pt"]);
        assert_eq!(names(&first.present), names(&second.present));
        assert_eq!(names(&first.missing), names(&second.missing));
    }

    #[test]
    fn scan_directory_lists_only_model_files() {
        let (_dir, scanner, config) = setup();
        let root = config.category_dir(ModelCategory::Lora);
        touch(&root.join("style.safetensors"), b"12345");
        touch(&root.join("sub/character.PT"), b"1");
        touch(&root.join("notes.txt"), b"ignore");
        touch(&root.join("half.safetensors.tmp"), b"ignore");

        let models = scanner.scan_directory(ModelCategory::Lora);
        let names: Vec<_> = models.iter().map(|m| m.reference.name.as_str()).collect();
        assert_eq!(names, vec!["style.safetensors", "sub/character.PT"]);
        assert_eq!(models[0].size, 5);
    }

    #[test]
    fn scan_directory_of_missing_category_is_empty() {
        let (_dir, scanner, _config) = setup();
        assert!(scanner.scan_directory(ModelCategory::Upscaler).is_empty());
    }

    #[test]
    fn inspect_hashes_small_files_fully() {
        let (_dir, scanner, config) = setup();
        let path = config.model_path(ModelCategory::Vae, "tiny.safetensors");
        touch(&path, b"abc");
        let candidate = scanner
            .locate(&ArtifactReference::new("tiny.safetensors", ModelCategory::Vae))
            .unwrap();

        let details = scanner.inspect(&candidate).unwrap();
        assert_eq!(details.size, 3);
        match details.fingerprint {
            Fingerprint::Sha256(digest) => assert_eq!(
                digest,
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
            ),
            other => panic!("expected full hash, got {:?}", other),
        }
    }

    #[test]
    fn strip_extension_only_touches_last_component() {
        assert_eq!(strip_extension("model.safetensors"), "model");
        assert_eq!(strip_extension("a.b.ckpt"), "a.b");
        assert_eq!(strip_extension("v1.5/model"), "v1.5/model");
        assert_eq!(strip_extension(".hidden"), ".hidden");
        assert_eq!(strip_extension("plain"), "plain");
    }
}

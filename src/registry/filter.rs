//! Candidate filtering shared by every registry client.

use crate::model::ModelCategory;

const MODEL_EXTENSIONS: &[&str] = &[".safetensors", ".ckpt", ".pt", ".pth", ".bin"];
const PICKLE_EXTENSIONS: &[&str] = &[".ckpt", ".pt"];

pub fn has_model_extension(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    MODEL_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// A scan result passes when it is absent, empty or "success".
pub fn scan_passed(status: Option<&str>) -> bool {
    match status {
        None => true,
        Some(s) => s.is_empty() || s.eq_ignore_ascii_case("success"),
    }
}

/// Virus scan always applies; the pickle scan only for pickled formats.
pub fn scans_passed(file_name: &str, virus_scan: Option<&str>, pickle_scan: Option<&str>) -> bool {
    if !scan_passed(virus_scan) {
        return false;
    }
    let lower = file_name.to_lowercase();
    if PICKLE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return scan_passed(pickle_scan);
    }
    true
}

/// Name-based category heuristics, applied last.
pub fn matches_category(file_name: &str, category: ModelCategory) -> bool {
    let lower = file_name.to_lowercase();
    match category {
        ModelCategory::Vae => lower.contains("vae"),
        ModelCategory::Lora => lower.contains("lora") || !lower.contains("vae"),
        ModelCategory::Checkpoint => !lower.contains("vae") && !lower.contains("lora"),
        _ => true,
    }
}

/// Extension and category checks together.
pub fn accepts(file_name: &str, category: ModelCategory) -> bool {
    has_model_extension(file_name) && matches_category(file_name, category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_model_extensions_pass() {
        assert!(has_model_extension("model.SafeTensors"));
        assert!(has_model_extension("x.pth"));
        assert!(!has_model_extension("config.json"));
        assert!(!has_model_extension("README.md"));
    }

    #[test]
    fn failed_virus_scan_excludes_any_file() {
        assert!(!scans_passed("a.safetensors", Some("Danger"), None));
        assert!(scans_passed("a.safetensors", Some("Success"), Some("Danger")));
        assert!(scans_passed("a.safetensors", Some(""), None));
    }

    #[test]
    fn pickle_scan_applies_to_pickled_formats() {
        assert!(!scans_passed("a.ckpt", Some("Success"), Some("Pending")));
        assert!(!scans_passed("a.PT", None, Some("Danger")));
        assert!(scans_passed("a.ckpt", None, Some("success")));
    }

    #[test]
    fn category_heuristics() {
        assert!(accepts("sdxl_vae.safetensors", ModelCategory::Vae));
        assert!(!accepts("sdxl_base.safetensors", ModelCategory::Vae));
        assert!(!accepts("sdxl_vae.safetensors", ModelCategory::Checkpoint));
        assert!(!accepts("style_lora.safetensors", ModelCategory::Checkpoint));
        assert!(accepts("style_lora.safetensors", ModelCategory::Lora));
        assert!(!accepts("vae.safetensors", ModelCategory::Lora));
        assert!(accepts("anything.pth", ModelCategory::Upscaler));
    }
}

use crate::error::{Error, Result};
use crate::model::ModelCategory;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const UNKNOWN_MODEL_DIR: &str = "models/unknown";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub comfyui_path: PathBuf,
	pub huggingface_token: Option<String>,
	pub civitai_token: Option<String>,
	pub huggingface_endpoint: String,
	pub civitai_endpoint: String,
	pub max_workers: usize,
	pub retry_attempts: u32,
	pub request_timeout_secs: u64,
	pub download_idle_timeout_secs: u64,
	pub model_dirs: BTreeMap<String, PathBuf>,
}

impl Default for Config {
	fn default() -> Self {
		let model_dirs = ModelCategory::ALL
			.iter()
			.map(|category| {
				(
					category.key().to_string(),
					Path::new("models").join(category.key()),
				)
			})
			.collect();

		Self {
			comfyui_path: PathBuf::from("/workspace/ComfyUI"),
			huggingface_token: None,
			civitai_token: None,
			huggingface_endpoint: "https://huggingface.co".to_string(),
			civitai_endpoint: "https://civitai.com".to_string(),
			max_workers: 3,
			retry_attempts: 3,
			request_timeout_secs: 30,
			download_idle_timeout_secs: 30 * 60,
			model_dirs,
		}
	}
}

impl Config {
	/// Location used when no `--config` is given.
	pub fn default_path() -> Result<PathBuf> {
		let project_dirs = ProjectDirs::from("", "", "modelfetch")
			.ok_or_else(|| Error::ConfigError("Could not determine config directory".to_string()))?;

		Ok(project_dirs.config_dir().join("config.toml"))
	}

	/// Reads the config file (defaults when it does not exist), then applies
	/// environment overrides.
	pub fn load(path: &Path) -> Result<Self> {
		let mut config = match std::fs::read_to_string(path) {
			Ok(content) => toml::from_str(&content)?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				tracing::debug!("No config at {:?}, using defaults", path);
				Self::default()
			}
			Err(e) => {
				return Err(Error::ConfigError(format!(
					"Failed to read config {:?}: {}",
					path, e
				)))
			}
		};

		config.apply_env();
		config.validate()?;
		Ok(config)
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let content = toml::to_string_pretty(self)?;
		std::fs::write(path, content)?;
		Ok(())
	}

	fn apply_env(&mut self) {
		if let Ok(path) = std::env::var("MODELFETCH_COMFYUI_PATH") {
			self.comfyui_path = PathBuf::from(path);
		}
		if let Some(token) = non_empty_env("HF_TOKEN") {
			self.huggingface_token = Some(token);
		}
		if let Some(token) = non_empty_env("CIVITAI_TOKEN") {
			self.civitai_token = Some(token);
		}
		if let Some(endpoint) = non_empty_env("HF_ENDPOINT") {
			self.huggingface_endpoint = endpoint;
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.max_workers == 0 {
			return Err(Error::ConfigError("max_workers must be at least 1".to_string()));
		}
		if self.retry_attempts == 0 {
			return Err(Error::ConfigError("retry_attempts must be at least 1".to_string()));
		}
		Ok(())
	}

	/// Token for the gated registry, if one is actually set.
	pub fn huggingface_token(&self) -> Option<&str> {
		self.huggingface_token.as_deref().filter(|t| !t.is_empty())
	}

	pub fn civitai_token(&self) -> Option<&str> {
		self.civitai_token.as_deref().filter(|t| !t.is_empty())
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	pub fn download_idle_timeout(&self) -> Duration {
		Duration::from_secs(self.download_idle_timeout_secs)
	}

	pub fn category_dir(&self, category: ModelCategory) -> PathBuf {
		let relative = self
			.model_dirs
			.get(category.key())
			.cloned()
			.unwrap_or_else(|| PathBuf::from(UNKNOWN_MODEL_DIR));
		self.comfyui_path.join(relative)
	}

	pub fn model_path(&self, category: ModelCategory, name: &str) -> PathBuf {
		self.category_dir(category).join(name)
	}
}

fn non_empty_env(key: &str) -> Option<String> {
	std::env::var(key).ok().filter(|v| !v.is_empty())
}

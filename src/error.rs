use std::path::PathBuf;
use thiserror::Error;

/// Lowercase fragments that mark an error as not worth retrying.
const TERMINAL_MARKERS: &[&str] = &["not found", "forbidden", "unauthorized"];

#[derive(Debug, Error)]
pub enum Error {
	#[error("Configuration error: {0}")]
	ConfigError(String),

	#[error("Invalid input: {0}")]
	InvalidInput(String),

	#[error("Failed to parse workflow: {0}")]
	WorkflowError(String),

	#[error("Error checking model {name}: {source}")]
	ScanError {
		name: String,
		#[source]
		source: std::io::Error,
	},

	#[error("Registry error: {0}")]
	RegistryError(String),

	#[error("HTTP {status} from {url}")]
	HttpStatus { status: u16, url: String },

	#[error("HTTP error: {0}")]
	HttpError(String),

	#[error("Download failed: {0}")]
	DownloadFailed(String),

	#[error("Failed to move downloaded file to {path:?}: {source}")]
	PublishFailed {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("{0} download(s) failed")]
	TransferFailed(usize),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	SerializationError(String),
}

impl Error {
	/// Whether a transfer that failed with this error must not be retried.
	///
	/// Auth and not-found responses will not change on retry, and a failed
	/// publish means the bytes are fine but the environment is not.
	pub fn is_terminal(&self) -> bool {
		match self {
			Error::HttpStatus { status, .. } => matches!(status, 401 | 403 | 404),
			Error::PublishFailed { .. } => true,
			other => {
				let text = other.to_string().to_lowercase();
				TERMINAL_MARKERS.iter().any(|marker| text.contains(marker))
			}
		}
	}
}

impl From<reqwest::Error> for Error {
	fn from(err: reqwest::Error) -> Self {
		match err.status() {
			Some(status) => Error::HttpStatus {
				status: status.as_u16(),
				url: err.url().map(|u| u.to_string()).unwrap_or_default(),
			},
			None => Error::HttpError(err.to_string()),
		}
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::SerializationError(err.to_string())
	}
}

impl From<toml::de::Error> for Error {
	fn from(err: toml::de::Error) -> Self {
		Error::SerializationError(err.to_string())
	}
}

impl From<toml::ser::Error> for Error {
	fn from(err: toml::ser::Error) -> Self {
		Error::SerializationError(err.to_string())
	}
}

pub type Result<T> = std::result::Result<T, Error>;

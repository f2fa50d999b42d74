use crate::config::Config;
use crate::error::Result;
use crate::model::{ModelCategory, RemoteCandidate, SourceId};
use crate::registry::{filter, http, ProgressFn, RegistryClient};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::path::Path;

const SEARCH_LIMIT: &str = "10";

#[derive(Debug, Deserialize)]
struct HfModel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct HfRepoFile {
    rfilename: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    lfs: Option<HfLfs>,
}

#[derive(Debug, Deserialize)]
struct HfLfs {
    size: u64,
    #[serde(default)]
    sha256: Option<String>,
}

/// Search and download against a Hugging Face compatible hub.
pub struct HuggingFaceClient {
    api: Client,
    transfer: Client,
    endpoint: String,
    token: Option<String>,
}

impl HuggingFaceClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            api: http::api_client(config.request_timeout())?,
            transfer: http::download_client(
                config.request_timeout(),
                config.download_idle_timeout(),
            )?,
            endpoint: config.huggingface_endpoint.trim_end_matches('/').to_string(),
            token: config.huggingface_token().map(str::to_string),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn repo_files(&self, repo_id: &str, category: ModelCategory) -> Result<Vec<RemoteCandidate>> {
        let url = format!("{}/api/models/{}/tree/main", self.endpoint, repo_id);
        let response = self.authorize(self.api.get(&url)).send().await?;
        let files: Vec<HfRepoFile> = http::json(http::check_status(response).await?).await?;

        Ok(files
            .into_iter()
            .filter(|file| filter::accepts(&file.rfilename, category))
            .map(|file| {
                let (declared_size, content_hash) = match file.lfs {
                    Some(lfs) => (lfs.size, lfs.sha256),
                    None => (file.size, None),
                };
                RemoteCandidate {
                    source: SourceId::HuggingFace,
                    locator: format!(
                        "{}/{}/resolve/main/{}",
                        self.endpoint, repo_id, file.rfilename
                    ),
                    file_name: file.rfilename,
                    declared_size,
                    content_hash,
                }
            })
            .collect())
    }
}

fn search_tags(category: ModelCategory) -> &'static [&'static str] {
    match category {
        ModelCategory::Checkpoint => &["stable-diffusion", "text-to-image"],
        ModelCategory::Lora => &["lora", "stable-diffusion"],
        ModelCategory::Vae => &["vae", "stable-diffusion"],
        ModelCategory::ControlNet => &["controlnet", "stable-diffusion"],
        ModelCategory::Upscaler => &["super-resolution", "image-enhancement"],
        ModelCategory::ClipVision => &["clip", "vision"],
        ModelCategory::Embedding => &[],
    }
}

#[async_trait]
impl RegistryClient for HuggingFaceClient {
    fn source(&self) -> SourceId {
        SourceId::HuggingFace
    }

    async fn search(&self, term: &str, category: ModelCategory) -> Result<Vec<RemoteCandidate>> {
        let mut query = vec![
            ("search", term),
            ("limit", SEARCH_LIMIT),
            ("full", "true"),
        ];
        query.extend(search_tags(category).iter().map(|tag| ("filter", *tag)));

        let url = format!("{}/api/models", self.endpoint);
        tracing::debug!("Searching Hugging Face for '{}' ({})", term, category);

        let response = self.authorize(self.api.get(&url).query(&query)).send().await?;
        let models: Vec<HfModel> = http::json(http::check_status(response).await?).await?;

        let mut candidates = Vec::new();
        for model in models {
            match self.repo_files(&model.id, category).await {
                Ok(files) => candidates.extend(files),
                Err(e) => tracing::debug!("Skipping repository {}: {}", model.id, e),
            }
        }

        Ok(candidates)
    }

    async fn fetch(
        &self,
        locator: &str,
        staging: &Path,
        resume_offset: u64,
        on_progress: &ProgressFn<'_>,
    ) -> Result<()> {
        let request = self.authorize(self.transfer.get(locator));
        http::download(request, staging, resume_offset, on_progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, token: Option<&str>) -> HuggingFaceClient {
        let config = Config {
            huggingface_endpoint: server.uri(),
            huggingface_token: token.map(str::to_string),
            ..Config::default()
        };
        HuggingFaceClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn search_lists_filtered_repository_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models"))
            .and(query_param("search", "sdxl"))
            .and(query_param("filter", "stable-diffusion"))
            .and(header("Authorization", "Bearer hf_secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": "org/sdxl" },
                { "id": "org/broken" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/models/org/sdxl/tree/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "rfilename": "README.md", "size": 10 },
                { "rfilename": "sdxl_vae.safetensors", "size": 100 },
                {
                    "rfilename": "sdxl_base.safetensors",
                    "size": 134,
                    "lfs": { "size": 6000, "sha256": "abc123", "pointerSize": 134 }
                }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/models/org/broken/tree/main"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("hf_secret"));
        let found = client.search("sdxl", ModelCategory::Checkpoint).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_name, "sdxl_base.safetensors");
        assert_eq!(found[0].declared_size, 6000);
        assert_eq!(found[0].content_hash.as_deref(), Some("abc123"));
        assert_eq!(
            found[0].locator,
            format!("{}/org/sdxl/resolve/main/sdxl_base.safetensors", server.uri())
        );
    }

    #[tokio::test]
    async fn lfs_entry_without_hash_still_lists() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([{ "id": "org/vae" }])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/models/org/vae/tree/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "rfilename": "ft_vae.safetensors", "size": 130, "lfs": { "size": 335000 } }
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let found = client.search("ft", ModelCategory::Vae).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].declared_size, 335000);
        assert!(found[0].content_hash.is_none());
    }

    #[tokio::test]
    async fn search_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let err = client.search("x", ModelCategory::Vae).await.unwrap_err();
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn fetch_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/org/m/resolve/main/m.safetensors"))
            .and(header("Authorization", "Bearer hf_secret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"weights".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let staging = dir.path().join("m.safetensors.tmp");
        let client = client_for(&server, Some("hf_secret"));
        let locator = format!("{}/org/m/resolve/main/m.safetensors", server.uri());

        client.fetch(&locator, &staging, 0, &|_: u64, _: u64| {}).await.unwrap();
        assert_eq!(std::fs::read(&staging).unwrap(), b"weights");
    }
}

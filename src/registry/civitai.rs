use crate::config::Config;
use crate::error::Result;
use crate::model::{ModelCategory, RemoteCandidate, SourceId};
use crate::registry::{filter, http, ProgressFn, RegistryClient};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::path::Path;

const SEARCH_LIMIT: &str = "20";
const ACCEPTED_FORMATS: &[&str] = &["SafeTensor", "PickleTensor", "Model", "Other"];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<CivitModel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CivitModel {
    #[serde(default)]
    model_versions: Vec<CivitModelVersion>,
}

#[derive(Debug, Deserialize)]
struct CivitModelVersion {
    #[serde(default)]
    files: Vec<CivitFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CivitFile {
    id: u64,
    name: String,
    #[serde(rename = "sizeKB", default)]
    size_kb: f64,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    pickle_scan_result: Option<String>,
    #[serde(default)]
    virus_scan_result: Option<String>,
    #[serde(default)]
    hashes: CivitHashes,
    #[serde(default)]
    download_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CivitHashes {
    #[serde(rename = "SHA256")]
    sha256: Option<String>,
}

impl CivitFile {
    fn passes_checks(&self) -> bool {
        let format_ok = self
            .format
            .as_deref()
            .map(|f| ACCEPTED_FORMATS.contains(&f))
            .unwrap_or(true);

        format_ok
            && filter::has_model_extension(&self.name)
            && filter::scans_passed(
                &self.name,
                self.virus_scan_result.as_deref(),
                self.pickle_scan_result.as_deref(),
            )
    }
}

/// Search, hash lookup and download against CivitAI.
pub struct CivitAiClient {
    api: Client,
    transfer: Client,
    endpoint: String,
    token: Option<String>,
}

impl CivitAiClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            api: http::api_client(config.request_timeout())?,
            transfer: http::download_client(
                config.request_timeout(),
                config.download_idle_timeout(),
            )?,
            endpoint: config.civitai_endpoint.trim_end_matches('/').to_string(),
            token: config.civitai_token().map(str::to_string),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn candidate(&self, file: CivitFile) -> RemoteCandidate {
        let locator = file
            .download_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| format!("{}/api/download/models/{}", self.endpoint, file.id));

        RemoteCandidate {
            source: SourceId::CivitAi,
            file_name: file.name,
            locator,
            declared_size: (file.size_kb * 1024.0) as u64,
            content_hash: file.hashes.sha256,
        }
    }

    /// Downloads need the token in the query string as well as the header.
    fn download_url(&self, locator: &str) -> String {
        match &self.token {
            Some(token) if !locator.contains("token=") => {
                let sep = if locator.contains('?') { '&' } else { '?' };
                format!("{}{}token={}", locator, sep, token)
            }
            _ => locator.to_string(),
        }
    }
}

fn civitai_type(category: ModelCategory) -> Option<&'static str> {
    match category {
        ModelCategory::Checkpoint => Some("Checkpoint"),
        ModelCategory::Lora => Some("LORA"),
        ModelCategory::Vae => Some("VAE"),
        ModelCategory::ControlNet => Some("Controlnet"),
        ModelCategory::Upscaler => Some("Upscaler"),
        ModelCategory::Embedding => Some("TextualInversion"),
        ModelCategory::ClipVision => None,
    }
}

#[async_trait]
impl RegistryClient for CivitAiClient {
    fn source(&self) -> SourceId {
        SourceId::CivitAi
    }

    async fn search(&self, term: &str, category: ModelCategory) -> Result<Vec<RemoteCandidate>> {
        let mut query = vec![("query", term), ("limit", SEARCH_LIMIT)];
        if let Some(kind) = civitai_type(category) {
            query.push(("types", kind));
        }

        let url = format!("{}/api/v1/models", self.endpoint);
        tracing::debug!("Searching CivitAI for '{}' ({})", term, category);

        let response = self.authorize(self.api.get(&url).query(&query)).send().await?;
        let body: SearchResponse = http::json(http::check_status(response).await?).await?;

        Ok(body
            .items
            .into_iter()
            .flat_map(|model| model.model_versions)
            .flat_map(|version| version.files)
            .filter(|file| file.passes_checks() && filter::matches_category(&file.name, category))
            .map(|file| self.candidate(file))
            .collect())
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<RemoteCandidate>> {
        let url = format!("{}/api/v1/model-versions/by-hash/{}", self.endpoint, hash);
        let response = self.authorize(self.api.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let version: CivitModelVersion = http::json(http::check_status(response).await?).await?;

        Ok(version
            .files
            .into_iter()
            .find(|file| file.passes_checks() && file.kind.as_deref() == Some("Model"))
            .map(|file| self.candidate(file)))
    }

    async fn fetch(
        &self,
        locator: &str,
        staging: &Path,
        resume_offset: u64,
        on_progress: &ProgressFn<'_>,
    ) -> Result<()> {
        let url = self.download_url(locator);
        let request = self.authorize(self.transfer.get(&url));
        http::download(request, staging, resume_offset, on_progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, token: Option<&str>) -> CivitAiClient {
        let config = Config {
            civitai_endpoint: server.uri(),
            civitai_token: token.map(str::to_string),
            ..Config::default()
        };
        CivitAiClient::new(&config).unwrap()
    }

    fn file(id: u64, name: &str, extra: serde_json::Value) -> serde_json::Value {
        let mut base = serde_json::json!({
            "id": id,
            "name": name,
            "sizeKB": 2.0,
            "type": "Model",
            "format": "SafeTensor",
            "hashes": { "SHA256": format!("HASH{}", id) },
        });
        if let (Some(obj), Some(more)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in more {
                obj.insert(k.clone(), v.clone());
            }
        }
        base
    }

    #[tokio::test]
    async fn search_applies_scan_and_category_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/models"))
            .and(query_param("query", "detail"))
            .and(query_param("types", "LORA"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "modelVersions": [{
                        "files": [
                            file(1, "detail.ckpt", serde_json::json!({ "pickleScanResult": "Danger" })),
                            file(2, "detail.safetensors", serde_json::json!({ "virusScanResult": "Success" })),
                            file(3, "detail.zip", serde_json::json!({})),
                            file(4, "detail_v2.safetensors", serde_json::json!({ "downloadUrl": "https://cdn.example/4" }))
                        ]
                    }]
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let found = client.search("detail", ModelCategory::Lora).await.unwrap();

        let names: Vec<_> = found.iter().map(|c| c.file_name.as_str()).collect();
        assert_eq!(names, vec!["detail.safetensors", "detail_v2.safetensors"]);
        assert_eq!(found[0].declared_size, 2048);
        assert_eq!(found[0].content_hash.as_deref(), Some("HASH2"));
        assert_eq!(
            found[0].locator,
            format!("{}/api/download/models/2", server.uri())
        );
        assert_eq!(found[1].locator, "https://cdn.example/4");
    }

    #[tokio::test]
    async fn hash_lookup_returns_primary_model_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/model-versions/by-hash/ABCD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [
                    file(7, "config.safetensors", serde_json::json!({ "type": "Config" })),
                    file(8, "real.safetensors", serde_json::json!({}))
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let found = client.find_by_hash("ABCD").await.unwrap().unwrap();
        assert_eq!(found.file_name, "real.safetensors");
        assert_eq!(found.source, SourceId::CivitAi);
    }

    #[tokio::test]
    async fn unknown_hash_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        assert!(client.find_by_hash("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_adds_token_to_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/download/models/9"))
            .and(query_param("token", "civ"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let staging = dir.path().join("f.tmp");
        let client = client_for(&server, Some("civ"));
        let locator = format!("{}/api/download/models/9", server.uri());

        client
            .fetch(&locator, &staging, 0, &|_: u64, _: u64| {})
            .await
            .unwrap();
        assert_eq!(std::fs::read(&staging).unwrap(), b"data");
    }

    #[test]
    fn existing_token_parameter_is_kept() {
        let config = Config {
            civitai_token: Some("civ".to_string()),
            ..Config::default()
        };
        let client = CivitAiClient::new(&config).unwrap();
        assert_eq!(
            client.download_url("https://x/y?type=Model"),
            "https://x/y?type=Model&token=civ"
        );
        assert_eq!(client.download_url("https://x/y?token=a"), "https://x/y?token=a");
    }
}

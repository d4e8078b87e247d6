use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Url};
use serde::Deserialize;

use super::{EntryKind, SourceAdapter, SourceEntry, SourceError, segments};
use crate::config::GitHubConfig;

const CLIENT_USER_AGENT: &str = concat!("notedex/", env!("CARGO_PKG_VERSION"));

/// Serves a folder tree through the GitHub repository contents API.
#[derive(Clone, Debug)]
pub struct GitHubSource {
    client: Client,
    config: GitHubConfig,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Listing(Vec<ContentItem>),
    Single(ContentItem),
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GitHubSource {
    pub fn new(config: GitHubConfig) -> Result<Self, SourceError> {
        let client = Client::builder().user_agent(CLIENT_USER_AGENT).build()?;
        Ok(Self { client, config })
    }

    fn contents_url(&self, path: &str) -> Result<Url, SourceError> {
        let base = format!(
            "{}/repos/{}/{}/contents",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repo
        );
        let mut url = Url::parse(&base).map_err(|err| SourceError::InvalidPath(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidPath(base.clone()))?
            .extend(segments(path));
        url.query_pairs_mut().append_pair("ref", &self.config.branch);
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, SourceError> {
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.config.token {
            request = request.header(AUTHORIZATION, format!("token {token}"));
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|parsed| parsed.message)
            .unwrap_or(body);
        Err(SourceError::Http {
            status: status.as_u16(),
            message,
        })
    }

    async fn contents(&self, path: &str) -> Result<ContentsResponse, SourceError> {
        let url = self.contents_url(path)?;
        let response = self.get(url).await?;
        response
            .json::<ContentsResponse>()
            .await
            .map_err(|err| SourceError::Decode {
                path: path.to_string(),
                message: err.to_string(),
            })
    }
}

fn decode_base64(path: &str, encoded: &str) -> Result<Vec<u8>, SourceError> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned)
        .map_err(|err| SourceError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })
}

fn entry_kind(kind: &str) -> EntryKind {
    if kind == "dir" {
        EntryKind::Dir
    } else {
        EntryKind::File
    }
}

#[async_trait]
impl SourceAdapter for GitHubSource {
    fn describe(&self) -> String {
        format!(
            "github:{}/{}@{}",
            self.config.owner, self.config.repo, self.config.branch
        )
    }

    async fn list_children(&self, path: &str) -> Result<Vec<SourceEntry>, SourceError> {
        match self.contents(path).await? {
            ContentsResponse::Listing(items) => Ok(items
                .into_iter()
                .map(|item| SourceEntry::new(item.name, entry_kind(&item.kind), item.path))
                .collect()),
            ContentsResponse::Single(_) => Err(SourceError::DirectoryNotFound(path.to_string())),
        }
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        let item = match self.contents(path).await? {
            ContentsResponse::Single(item) if item.kind == "file" => item,
            _ => return Err(SourceError::NotAFile(path.to_string())),
        };

        if let Some(encoded) = item.content.as_deref().filter(|c| !c.is_empty()) {
            return decode_base64(path, encoded);
        }

        // Files over ~1 MB come back without inline content.
        let Some(download) = item.download_url else {
            return Err(SourceError::Decode {
                path: path.to_string(),
                message: "file content not available".to_string(),
            });
        };
        let url = Url::parse(&download).map_err(|err| SourceError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        let bytes = self.get(url).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

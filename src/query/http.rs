use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::{Item, Tag};
use crate::error::SearchError;
use crate::query::client::SearchClient;
use crate::query::credentials::Credentials;

/// Moebooru 风格 `post.json` 接口的检索客户端
///
/// 远端页码从 1 开始，这里把 0 基页码 +1 后再请求。
pub struct HttpSearchClient {
    client: reqwest::Client,
    base_url: String,
    credentials_path: PathBuf,
}

#[derive(Deserialize)]
struct PostRecord {
    id: u64,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    sample_url: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    file_url: Option<String>,
}

impl From<PostRecord> for Item {
    fn from(p: PostRecord) -> Self {
        Item {
            id: p.id,
            tags: p.tags.split_whitespace().map(str::to_string).collect(),
            preview_url: p.sample_url.or(p.preview_url).unwrap_or_default(),
            // 缺少原图链接的条目保留在页内（页长决定是否 exhausted），由引擎过滤
            download_url: p.file_url.unwrap_or_default(),
        }
    }
}

impl HttpSearchClient {
    pub fn new(
        base_url: String,
        credentials_path: PathBuf,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            credentials_path,
        })
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn query(
        &self,
        tags: &[Tag],
        page: u32,
        page_size: usize,
    ) -> Result<Vec<Item>, SearchError> {
        let headers = Credentials::load_or_empty(&self.credentials_path).to_header_map();
        let remote_page = page + 1;
        let response = self
            .client
            .get(&self.base_url)
            .headers(headers)
            .query(&[
                ("limit", page_size.to_string()),
                ("tags", tags.join(" ")),
                ("page", remote_page.to_string()),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SearchError::BadStatus(status.as_u16()));
        }

        let body = response.text().await.map_err(map_transport_error)?;
        parse_posts(&body)
    }
}

fn map_transport_error(e: reqwest::Error) -> SearchError {
    if e.is_timeout() {
        SearchError::Timeout
    } else {
        SearchError::Connection(e.to_string())
    }
}

/// 解析一页结果；HTML 或结构不符都视为被拦截，绝不当作空页
pub fn parse_posts(body: &str) -> Result<Vec<Item>, SearchError> {
    if body.trim_start().starts_with('<') {
        return Err(SearchError::Blocked(
            "HTML page instead of JSON (anti-automation check?)".into(),
        ));
    }
    let posts: Vec<PostRecord> = serde_json::from_str(body)
        .map_err(|e| SearchError::Blocked(format!("unexpected payload shape: {}", e)))?;
    Ok(posts.into_iter().map(Item::from).collect())
}

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// 凭据文件：`{"headers": {...}, "cookies": {...}}`
///
/// 每次请求都重新读取，运维在遇到反爬拦截时可以直接改文件，无需重启进程。
#[derive(Debug, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

impl Credentials {
    /// 文件不存在视为空凭据
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// 载入失败时告警并退回空凭据：请求照常发出，由远端响应决定是否拦截
    pub fn load_or_empty(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Credentials file {:?} unreadable: {}", path, e);
            Self::default()
        })
    }

    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in &self.headers {
            match (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => tracing::warn!("Skipping invalid header {:?}", k),
            }
        }
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    map.insert(COOKIE, value);
                }
                Err(_) => tracing::warn!("Skipping invalid cookie header"),
            }
        }
        map
    }
}

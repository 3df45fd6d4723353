use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::download::client::DownloadClient;
use crate::error::FetchError;
use crate::query::Credentials;

pub struct HttpDownloadClient {
    client: reqwest::Client,
    credentials_path: PathBuf,
}

impl HttpDownloadClient {
    pub fn new(credentials_path: PathBuf, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            credentials_path,
        })
    }
}

#[async_trait]
impl DownloadClient for HttpDownloadClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let headers = Credentials::load_or_empty(&self.credentials_path).to_header_map();
        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(map_transport_error)?;
        Ok(bytes.to_vec())
    }
}

fn map_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Connection(e.to_string())
    }
}

use async_trait::async_trait;

use crate::error::FetchError;

/// 原图下载能力；失败一律按暂时错误处理，由调用方决定重试节奏
#[async_trait]
pub trait DownloadClient: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

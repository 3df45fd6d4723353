use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::download::client::DownloadClient;
use crate::download::naming::file_name_for_url;
use crate::download::queue::DownloadQueue;
use crate::error::FetchError;
use crate::stats::SessionStats;

/// 按错误类型区分的重试间隔（重试次数无上限）
///
/// `write` 用于本地落盘失败（磁盘满、目录不可写），与远端错误无关。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadBackoff {
    pub timeout: Duration,
    pub connection: Duration,
    pub bad_status: Duration,
    pub write: Duration,
}

impl Default for DownloadBackoff {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            connection: Duration::from_millis(1000),
            bad_status: Duration::from_millis(3000),
            write: Duration::from_millis(5000),
        }
    }
}

impl DownloadBackoff {
    pub fn delay_for(&self, err: &FetchError) -> Duration {
        match err {
            FetchError::Timeout => self.timeout,
            FetchError::Connection(_) => self.connection,
            FetchError::BadStatus(_) => self.bad_status,
        }
    }
}

/// 唯一的下载 worker：一次只处理队首一个条目
pub struct DownloadWorker {
    queue: DownloadQueue,
    client: Arc<dyn DownloadClient>,
    image_dir: PathBuf,
    backoff: DownloadBackoff,
    stats: Arc<SessionStats>,
}

impl DownloadWorker {
    pub fn new(
        queue: DownloadQueue,
        client: Arc<dyn DownloadClient>,
        image_dir: PathBuf,
        backoff: DownloadBackoff,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            queue,
            client,
            image_dir,
            backoff,
            stats,
        }
    }

    pub async fn run(self) {
        tracing::info!(
            "Download worker started: {} pending, target {:?}",
            self.queue.len(),
            self.image_dir
        );
        loop {
            let url = self.queue.next_pending().await;
            self.process(&url).await;
        }
    }

    /// 下载 → 写文件 → 出队落盘；任何失败都在原地重试，条目绝不丢弃
    async fn process(&self, url: &str) {
        let bytes = self.fetch_until_ok(url).await;
        let target = self.image_dir.join(file_name_for_url(url));

        loop {
            let dir = self.image_dir.clone();
            let path = target.clone();
            let payload = bytes.clone();
            let written =
                tokio::task::spawn_blocking(move || write_file_atomic(&dir, &path, &payload))
                    .await;
            match written {
                Ok(Ok(())) => break,
                Ok(Err(e)) => tracing::error!("Failed to write {:?}: {}", target, e),
                Err(e) => tracing::error!("Write task for {:?} panicked: {}", target, e),
            }
            SessionStats::bump(&self.stats.download_retries);
            tokio::time::sleep(self.backoff.write).await;
        }

        SessionStats::bump(&self.stats.downloads_completed);
        SessionStats::add(&self.stats.bytes_written, bytes.len() as u64);
        tracing::info!("Downloaded {:?} ({} bytes)", target, bytes.len());

        // 落盘失败时内存中已出队，随下一次成功写入一起持久化；
        // 若进程在此之前退出，条目会在重启后被重新下载（覆盖同名文件）。
        if let Err(e) = self.queue.complete(url).await {
            tracing::error!("Failed to persist queue after downloading {}: {}", url, e);
        }
    }

    async fn fetch_until_ok(&self, url: &str) -> Vec<u8> {
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            match self.client.fetch(url).await {
                Ok(bytes) => return bytes,
                Err(e) => {
                    let delay = self.backoff.delay_for(&e);
                    SessionStats::bump(&self.stats.download_retries);
                    tracing::warn!(
                        "Download {} failed (attempt {}): {}, retrying in {:?}",
                        url,
                        attempts,
                        e,
                        delay
                    );
                    if delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

/// tmp + fsync + rename：目标名下不会出现半截文件
fn write_file_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut tmp_name = target.as_os_str().to_owned();
    tmp_name.push(".part");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, target)?;
    if let Ok(d) = std::fs::File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{RetryPolicy, DEFAULT_MAX_WIDTH};
use crate::download::DownloadBackoff;
use crate::index::DEFAULT_PAGE_SIZE;

/// 运行配置（TOML）。每个段都带 `#[serde(default)]`，缺省字段取默认值。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub state_path: PathBuf,
    pub backup_dir: PathBuf,
    pub image_dir: PathBuf,
    /// 已有图片所在目录（只扫第一层）；`image_dir` 总是会被扫描
    pub library_dirs: Vec<PathBuf>,
    /// 本地文件名 → 条目 ID，第 1 个捕获组为数字 ID
    pub local_file_pattern: String,
    pub credentials_path: PathBuf,
    /// 只读状态接口端口；不设置则不启动
    pub status_port: Option<u16>,
    pub report_interval_secs: u64,
    pub search: SearchConfig,
    pub discovery: DiscoveryConfig,
    pub download: DownloadConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: String,
    pub page_size: usize,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub max_width: usize,
    pub idle_backoff_secs: u64,
    /// 预览命令模板，`{url}` 替换为预览地址，例如 `xdg-open {url}`
    pub preview_command: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub timeout_retry_ms: u64,
    pub connection_retry_ms: u64,
    pub status_retry_ms: u64,
    /// 本地写文件失败后的重试间隔
    pub write_retry_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("data/state.db"),
            backup_dir: PathBuf::from("data/backup"),
            image_dir: PathBuf::from("images"),
            library_dirs: Vec::new(),
            local_file_pattern: r"^Konachan\.com - (\d+) ".to_string(),
            credentials_path: PathBuf::from("headers.json"),
            status_port: None,
            report_interval_secs: 300,
            search: SearchConfig::default(),
            discovery: DiscoveryConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://konachan.com/post.json".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            max_attempts: 3,
            retry_delay_ms: 2000,
            request_timeout_secs: 30,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            idle_backoff_secs: 30,
            preview_command: None,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_retry_ms: 0,
            connection_retry_ms: 1000,
            status_retry_ms: 3000,
            write_retry_ms: 5000,
            request_timeout_secs: 120,
        }
    }
}

impl Config {
    /// 显式路径必须存在；否则依次尝试 `./tagscout.toml` 与用户配置目录，都没有则用默认值
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_locations().into_iter().find(|p| p.is_file()),
        };

        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("cannot read config {:?}: {}", path, e))?;
                let config: Config = toml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("invalid config {:?}: {}", path, e))?;
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            None => {
                tracing::info!("No config file found, using defaults");
                Config::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("tagscout.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("tagscout").join("config.toml"));
        }
        paths
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.search.page_size == 0 {
            anyhow::bail!("search.page_size must be at least 1");
        }
        let pattern = self.local_file_regex()?;
        if pattern.captures_len() < 2 {
            anyhow::bail!(
                "local_file_pattern {:?} needs a capture group for the item id",
                self.local_file_pattern
            );
        }
        Ok(())
    }

    pub fn local_file_regex(&self) -> anyhow::Result<Regex> {
        Ok(Regex::new(&self.local_file_pattern)?)
    }

    /// 扫描目录：`library_dirs` + `image_dir`（去重）
    pub fn scan_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.library_dirs.clone();
        if !dirs.contains(&self.image_dir) {
            dirs.push(self.image_dir.clone());
        }
        dirs
    }

    pub fn search_retry(&self) -> RetryPolicy {
        RetryPolicy::bounded(
            self.search.max_attempts,
            Duration::from_millis(self.search.retry_delay_ms),
        )
    }

    pub fn download_backoff(&self) -> DownloadBackoff {
        DownloadBackoff {
            timeout: Duration::from_millis(self.download.timeout_retry_ms),
            connection: Duration::from_millis(self.download.connection_retry_ms),
            bad_status: Duration::from_millis(self.download.status_retry_ms),
            write: Duration::from_millis(self.download.write_retry_ms),
        }
    }
}

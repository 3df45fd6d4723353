use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::storage::SessionState;

/// 会话计数器（引擎、缓存、下载 worker 共享，只做原子自增）
#[derive(Debug, Default)]
pub struct SessionStats {
    pub presented: AtomicU64,
    pub likes: AtomicU64,
    pub dislikes: AtomicU64,
    pub filtered: AtomicU64,
    pub restarts: AtomicU64,
    pub width_shrinks: AtomicU64,
    pub pages_fetched: AtomicU64,
    pub search_failures: AtomicU64,
    pub downloads_completed: AtomicU64,
    pub download_retries: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl SessionStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// 某一时刻的统计快照（日志 / 状态接口共用）
#[derive(Clone, Debug, Default, Serialize)]
pub struct StatsReport {
    pub discovery: DiscoveryStats,
    pub search: SearchStats,
    pub downloads: DownloadStats,
    pub state: StateStats,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DiscoveryStats {
    pub presented: u64,
    pub likes: u64,
    pub dislikes: u64,
    /// 本地已有 / 已点踩 / 无原图链接而跳过的条目
    pub filtered: u64,
    /// 排名变化导致的重新选择次数
    pub restarts: u64,
    pub width_shrinks: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SearchStats {
    pub pages_fetched: u64,
    pub failures: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DownloadStats {
    pub completed: u64,
    pub retries: u64,
    pub bytes_written: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StateStats {
    pub width: usize,
    pub tags: usize,
    pub queued: usize,
    pub disliked: usize,
    pub cached_combinations: usize,
    pub exhausted_combinations: usize,
}

impl StatsReport {
    pub fn collect(stats: &SessionStats, session: &SessionState) -> Self {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Self {
            discovery: DiscoveryStats {
                presented: load(&stats.presented),
                likes: load(&stats.likes),
                dislikes: load(&stats.dislikes),
                filtered: load(&stats.filtered),
                restarts: load(&stats.restarts),
                width_shrinks: load(&stats.width_shrinks),
            },
            search: SearchStats {
                pages_fetched: load(&stats.pages_fetched),
                failures: load(&stats.search_failures),
            },
            downloads: DownloadStats {
                completed: load(&stats.downloads_completed),
                retries: load(&stats.download_retries),
                bytes_written: load(&stats.bytes_written),
            },
            state: session.read(|s| StateStats {
                width: s.width,
                tags: s.tag_scores.len(),
                queued: s.download_queue.len(),
                disliked: s.disliked_ids.len(),
                cached_combinations: s.cache.len(),
                exhausted_combinations: s.exhausted_count(),
            }),
        }
    }
}

/// 定期输出会话报告
pub async fn report_loop(stats: Arc<SessionStats>, session: Arc<SessionState>, interval_secs: u64) {
    let interval = std::time::Duration::from_secs(interval_secs.max(1));
    loop {
        tokio::time::sleep(interval).await;
        let report = StatsReport::collect(&stats, &session);
        tracing::info!("\n{}", report);
    }
}

fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════╗")?;
        writeln!(f, "║           tagscout Session Report                ║")?;
        writeln!(f, "╠══════════════════════════════════════════════════╣")?;
        writeln!(f, "║ Discovery:                                       ║")?;
        writeln!(
            f,
            "║   presented:    {:>10}                       ║",
            self.discovery.presented
        )?;
        writeln!(
            f,
            "║   likes:        {:>10}                       ║",
            self.discovery.likes
        )?;
        writeln!(
            f,
            "║   dislikes:     {:>10}                       ║",
            self.discovery.dislikes
        )?;
        writeln!(
            f,
            "║   filtered:     {:>10}                       ║",
            self.discovery.filtered
        )?;
        writeln!(
            f,
            "║   restarts:     {:>10}                       ║",
            self.discovery.restarts
        )?;
        writeln!(
            f,
            "║   shrinks:      {:>10}                       ║",
            self.discovery.width_shrinks
        )?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Search:                                          ║")?;
        writeln!(
            f,
            "║   pages:        {:>10}                       ║",
            self.search.pages_fetched
        )?;
        writeln!(
            f,
            "║   failures:     {:>10}                       ║",
            self.search.failures
        )?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ Downloads:                                       ║")?;
        writeln!(
            f,
            "║   completed:    {:>10}  ({:>10})          ║",
            self.downloads.completed,
            human_bytes(self.downloads.bytes_written)
        )?;
        writeln!(
            f,
            "║   retries:      {:>10}                       ║",
            self.downloads.retries
        )?;
        writeln!(f, "╠──────────────────────────────────────────────────╣")?;
        writeln!(f, "║ State:                                           ║")?;
        writeln!(
            f,
            "║   width:        {:>10}                       ║",
            self.state.width
        )?;
        writeln!(
            f,
            "║   tags:         {:>10}                       ║",
            self.state.tags
        )?;
        writeln!(
            f,
            "║   queued:       {:>10}                       ║",
            self.state.queued
        )?;
        writeln!(
            f,
            "║   disliked:     {:>10}                       ║",
            self.state.disliked
        )?;
        writeln!(
            f,
            "║   combinations: {:>10}  ({:>4} exhausted)     ║",
            self.state.cached_combinations,
            self.state.exhausted_combinations
        )?;
        writeln!(f, "╚══════════════════════════════════════════════════╝")?;
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::core::{Item, ItemId, RetryPolicy, TagCombination};
use crate::error::{DiscoveryError, SearchError, StateError};
use crate::query::SearchClient;
use crate::stats::SessionStats;
use crate::storage::SessionState;

/// 默认分页大小
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// 单个组合的缓存项
///
/// ## 不变量
/// - `seen` 只增不减（永不裁剪，换取跨重启不重复产出）
/// - `exhausted` 一旦为 true 不再回退
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub seen: HashSet<ItemId>,
    pub exhausted: bool,
}

/// 对单个条目的缓存判定
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// 新条目：记入 seen 并产出
    Fresh,
    /// 探索中遇到的重复（分页漂移），跳过继续扫描
    Duplicate,
    /// 已穷尽且遇到旧条目：之后不可能再有新条目，流立即结束
    Exhausted,
}

impl CacheEntry {
    pub fn admit(&self, id: ItemId) -> Admission {
        if !self.seen.contains(&id) {
            Admission::Fresh
        } else if self.exhausted {
            Admission::Exhausted
        } else {
            Admission::Duplicate
        }
    }
}

/// 组合级检索缓存：包装远端分页检索，去重 + 记住穷尽状态。
///
/// 句柄可廉价 clone；数据本身在 SessionState 里，每次修改都原子落盘。
#[derive(Clone)]
pub struct SearchCache {
    session: Arc<SessionState>,
    client: Arc<dyn SearchClient>,
    page_size: usize,
    retry: RetryPolicy,
    stats: Arc<SessionStats>,
}

impl SearchCache {
    pub fn new(
        session: Arc<SessionState>,
        client: Arc<dyn SearchClient>,
        page_size: usize,
        retry: RetryPolicy,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            session,
            client,
            page_size: page_size.max(1),
            retry,
            stats,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// 惰性结果流；调用方随时可以丢弃它
    pub fn stream(&self, combination: TagCombination) -> CacheStream {
        CacheStream {
            cache: self.clone(),
            combination,
            page: 0,
            buffer: VecDeque::new(),
            pending_page_len: None,
            done: false,
            hole: false,
        }
    }

    pub fn entry(&self, combination: &TagCombination) -> Option<CacheEntry> {
        self.session.read(|s| s.cache.get(combination).cloned())
    }

    pub fn is_exhausted(&self, combination: &TagCombination) -> bool {
        self.session
            .read(|s| s.cache.get(combination).map(|e| e.exhausted).unwrap_or(false))
    }

    fn admission(&self, combination: &TagCombination, id: ItemId) -> Admission {
        self.session.read(|s| match s.cache.get(combination) {
            Some(entry) => entry.admit(id),
            None => Admission::Fresh,
        })
    }

    async fn record_seen(&self, combination: &TagCombination, id: ItemId) -> Result<(), StateError> {
        let combination = combination.clone();
        self.session
            .update_blocking(move |s| {
                s.cache.entry(combination).or_default().seen.insert(id);
            })
            .await
    }

    async fn mark_exhausted(&self, combination: &TagCombination) -> Result<(), StateError> {
        let combination = combination.clone();
        self.session
            .update_blocking(move |s| {
                s.cache.entry(combination).or_default().exhausted = true;
            })
            .await
    }

    /// 拉取一页。`Ok(None)` 表示重试耗尽的暂时空洞（不标记 exhausted、不写 seen）。
    async fn fetch_page(
        &self,
        combination: &TagCombination,
        page: u32,
    ) -> Result<Option<Vec<Item>>, DiscoveryError> {
        let mut failures = 0u32;
        loop {
            match self
                .client
                .query(combination.tags(), page, self.page_size)
                .await
            {
                Ok(items) => {
                    SessionStats::bump(&self.stats.pages_fetched);
                    tracing::debug!(
                        "Fetched {} page {}: {} items",
                        combination,
                        page,
                        items.len()
                    );
                    return Ok(Some(items));
                }
                Err(SearchError::Blocked(reason)) => {
                    SessionStats::bump(&self.stats.search_failures);
                    tracing::error!("Search for {} page {} blocked: {}", combination, page, reason);
                    return Err(DiscoveryError::Blocked(reason));
                }
                Err(e) => {
                    SessionStats::bump(&self.stats.search_failures);
                    failures += 1;
                    if !self.retry.should_retry(failures) {
                        tracing::warn!(
                            "Search for {} page {} failed {} times ({}), ending stream",
                            combination,
                            page,
                            failures,
                            e
                        );
                        return Ok(None);
                    }
                    tracing::warn!(
                        "Search for {} page {} failed: {}, retrying in {:?}",
                        combination,
                        page,
                        e,
                        self.retry.delay
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }
}

/// 拉取式结果流：`next()` 返回 `Ok(None)` 即显式结束。
///
/// 页按 0,1,2… 严格递增请求；第 N 页的长度决定是否请求第 N+1 页。
pub struct CacheStream {
    cache: SearchCache,
    combination: TagCombination,
    page: u32,
    buffer: VecDeque<Item>,
    /// 当前缓冲页的原始长度；整页处理完后据此判定 exhausted
    pending_page_len: Option<usize>,
    done: bool,
    /// 因重试耗尽而结束（暂时空洞），不能据此判断组合已无候选
    hole: bool,
}

impl CacheStream {
    pub fn combination(&self) -> &TagCombination {
        &self.combination
    }

    pub fn hit_hole(&self) -> bool {
        self.hole
    }

    pub async fn next(&mut self) -> Result<Option<Item>, DiscoveryError> {
        loop {
            if self.done {
                return Ok(None);
            }

            if let Some(item) = self.buffer.pop_front() {
                match self.cache.admission(&self.combination, item.id) {
                    Admission::Fresh => {
                        self.cache.record_seen(&self.combination, item.id).await?;
                        return Ok(Some(item));
                    }
                    Admission::Duplicate => continue,
                    Admission::Exhausted => {
                        tracing::debug!("{} exhausted, stopping at seen item {}", self.combination, item.id);
                        self.done = true;
                        return Ok(None);
                    }
                }
            }

            // 当前页已处理完
            if let Some(len) = self.pending_page_len.take() {
                if len < self.cache.page_size {
                    self.cache.mark_exhausted(&self.combination).await?;
                    tracing::info!(
                        "{} exhausted after {} pages",
                        self.combination,
                        self.page
                    );
                    self.done = true;
                    return Ok(None);
                }
            }

            match self.cache.fetch_page(&self.combination, self.page).await? {
                Some(items) if !items.is_empty() => {
                    self.pending_page_len = Some(items.len());
                    self.buffer = items.into();
                    self.page += 1;
                }
                // 空页：结束本轮，不标记 exhausted
                Some(_) => {
                    self.done = true;
                    return Ok(None);
                }
                // 暂时失败：同样不标记 exhausted，但要让调用方知道这不是“没有候选”
                None => {
                    self.done = true;
                    self.hole = true;
                    return Ok(None);
                }
            }
        }
    }
}

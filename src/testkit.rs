//! 测试用脚本化协作方
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::{Item, ItemId, Tag};
use crate::download::client::DownloadClient;
use crate::error::{FetchError, SearchError};
use crate::event::feedback::{FeedbackSource, Verdict};
use crate::query::client::SearchClient;

pub fn item(id: ItemId, tags: &[&str]) -> Item {
    Item {
        id,
        tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        preview_url: format!("https://img.test/preview/{}.jpg", id),
        download_url: format!("https://img.test/image/Konachan.com%20-%20{}%20x.jpg", id),
    }
}

pub fn items(ids: std::ops::Range<ItemId>, tags: &[&str]) -> Vec<Item> {
    ids.map(|id| item(id, tags)).collect()
}

fn key(tags: &[&str]) -> Vec<Tag> {
    tags.iter().map(|t| t.to_string()).collect()
}

/// 按 (tags, page) 脚本化的检索端。
///
/// 每个键对应一串响应：依次弹出，最后一个保持粘滞；未配置的键返回空页。
#[derive(Default)]
pub struct ScriptedSearch {
    responses: Mutex<HashMap<(Vec<Tag>, u32), Vec<Result<Vec<Item>, SearchError>>>>,
    calls: Mutex<Vec<(Vec<Tag>, u32)>>,
}

impl ScriptedSearch {
    pub fn page(self, tags: &[&str], page: u32, items: Vec<Item>) -> Self {
        self.respond(tags, page, vec![Ok(items)])
    }

    pub fn respond(
        self,
        tags: &[&str],
        page: u32,
        script: Vec<Result<Vec<Item>, SearchError>>,
    ) -> Self {
        self.responses.lock().insert((key(tags), page), script);
        self
    }

    /// 运行中替换某页（模拟远端发布新内容 / 凭据刷新）
    pub fn set_page(&self, tags: &[&str], page: u32, items: Vec<Item>) {
        self.responses.lock().insert((key(tags), page), vec![Ok(items)]);
    }

    pub fn calls(&self) -> Vec<(Vec<Tag>, u32)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl SearchClient for ScriptedSearch {
    async fn query(
        &self,
        tags: &[Tag],
        page: u32,
        _page_size: usize,
    ) -> Result<Vec<Item>, SearchError> {
        let k = (tags.to_vec(), page);
        self.calls.lock().push(k.clone());
        let mut responses = self.responses.lock();
        match responses.get_mut(&k) {
            None => Ok(Vec::new()),
            Some(script) if script.len() > 1 => script.remove(0),
            Some(script) => script.first().cloned().unwrap_or_else(|| Ok(Vec::new())),
        }
    }
}

/// 按条目 ID 决定喜欢 / 点踩；展示次数达到上限后返回错误以结束引擎循环
pub struct ScriptedFeedback {
    likes: HashSet<ItemId>,
    limit: usize,
    presented: Mutex<Vec<ItemId>>,
    interventions: Mutex<Vec<String>>,
}

impl ScriptedFeedback {
    pub fn new(likes: impl IntoIterator<Item = ItemId>, limit: usize) -> Self {
        Self {
            likes: likes.into_iter().collect(),
            limit,
            presented: Mutex::new(Vec::new()),
            interventions: Mutex::new(Vec::new()),
        }
    }

    pub fn presented(&self) -> Vec<ItemId> {
        self.presented.lock().clone()
    }

    pub fn interventions(&self) -> Vec<String> {
        self.interventions.lock().clone()
    }
}

#[async_trait]
impl FeedbackSource for ScriptedFeedback {
    async fn present(&self, item: &Item) -> anyhow::Result<Verdict> {
        let mut presented = self.presented.lock();
        if presented.len() >= self.limit {
            anyhow::bail!("feedback script exhausted");
        }
        presented.push(item.id);
        Ok(if self.likes.contains(&item.id) {
            Verdict::Like
        } else {
            Verdict::Dislike
        })
    }

    async fn intervention(&self, reason: &str) -> anyhow::Result<()> {
        let mut log = self.interventions.lock();
        log.push(reason.to_string());
        if log.len() > 3 {
            anyhow::bail!("operator gave up");
        }
        Ok(())
    }
}

/// 每个 URL 先失败 `failures` 次（错误类型为 `kind`），之后返回 URL 字节
pub struct FlakyDownloads {
    failures: usize,
    kind: FetchError,
    attempts: Mutex<HashMap<String, usize>>,
    order: Mutex<Vec<String>>,
}

impl FlakyDownloads {
    pub fn new(failures: usize, kind: FetchError) -> Self {
        Self {
            failures,
            kind,
            attempts: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self, url: &str) -> usize {
        self.attempts.lock().get(url).copied().unwrap_or(0)
    }

    pub fn order(&self) -> Vec<String> {
        self.order.lock().clone()
    }
}

#[async_trait]
impl DownloadClient for FlakyDownloads {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.order.lock().push(url.to_string());
        let mut attempts = self.attempts.lock();
        let n = attempts.entry(url.to_string()).or_insert(0);
        *n += 1;
        if *n <= self.failures {
            return Err(self.kind.clone());
        }
        Ok(url.as_bytes().to_vec())
    }
}

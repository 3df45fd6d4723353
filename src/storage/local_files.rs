use ignore::WalkBuilder;
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::core::ItemId;
use crate::download::naming::file_name_for_url;

/// 已在本地落地的条目 ID 集合
///
/// 启动时由目录枚举 + 当前下载队列构建一次；会话内只有“喜欢”会追加。
#[derive(Clone, Debug, Default)]
pub struct LocalFileIndex {
    ids: HashSet<ItemId>,
}

impl LocalFileIndex {
    /// 扫描各目录第一层文件名，按 `pattern` 第 1 个捕获组解析 ID；
    /// 队列中的 URL 按 worker 将写入的文件名同样解析。
    pub fn scan<'a>(
        dirs: &[PathBuf],
        pattern: &Regex,
        queued_urls: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        let mut index = Self::default();
        let mut scanned = 0usize;

        for dir in dirs {
            if !dir.is_dir() {
                tracing::warn!("Library dir {:?} not found, skipping", dir);
                continue;
            }
            let walker = WalkBuilder::new(dir)
                .max_depth(Some(1))
                .standard_filters(false)
                .build();

            for entry in walker.filter_map(|e| e.ok()) {
                if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                    continue;
                }
                scanned += 1;
                if let Some(id) = entry.file_name().to_str().and_then(|n| parse_id(pattern, n)) {
                    index.ids.insert(id);
                }
            }
        }

        let mut from_queue = 0usize;
        for url in queued_urls {
            if let Some(id) = parse_id(pattern, &file_name_for_url(url)) {
                from_queue += usize::from(index.ids.insert(id));
            }
        }

        tracing::info!(
            "Local file index: {} ids ({} files scanned, {} from queue)",
            index.ids.len(),
            scanned,
            from_queue
        );
        index
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.ids.contains(&id)
    }

    pub fn insert(&mut self, id: ItemId) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<ItemId> for LocalFileIndex {
    fn from_iter<T: IntoIterator<Item = ItemId>>(iter: T) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

fn parse_id(pattern: &Regex, name: &str) -> Option<ItemId> {
    pattern.captures(name)?.get(1)?.as_str().parse().ok()
}

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::core::{ItemId, TagCombination, TagScores};
use crate::error::StateError;
use crate::index::CacheEntry;

/// 持久化状态：固定 schema 的单一记录
///
/// - tag_scores：偏好分值（保留插入顺序）
/// - width：当前组合宽度
/// - disliked_ids：只增不减
/// - download_queue：FIFO，条目仅在文件落盘后移除
/// - cache：每个组合的 seen 集合 + exhausted 标记，永不淘汰
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub tag_scores: TagScores,
    pub width: usize,
    pub disliked_ids: BTreeSet<ItemId>,
    pub download_queue: VecDeque<String>,
    pub cache: HashMap<TagCombination, CacheEntry>,
}

impl PersistedState {
    /// 加载后的形状校验；不通过即视为致命（不信任未知数据）
    pub fn validate(&self, max_width: usize) -> Result<(), StateError> {
        if self.width > max_width {
            return Err(StateError::Invalid(format!(
                "width {} exceeds max_width {}",
                self.width, max_width
            )));
        }
        if !self.tag_scores.all_finite() {
            return Err(StateError::Invalid("non-finite tag score".into()));
        }
        if let Some(bad) = self.cache.keys().find(|c| !c.is_well_formed()) {
            return Err(StateError::Invalid(format!(
                "cache key {} repeats a tag",
                bad
            )));
        }
        Ok(())
    }

    pub fn exhausted_count(&self) -> usize {
        self.cache.values().filter(|e| e.exhausted).count()
    }
}

/// 状态存储能力：加载 + 原子保存
pub trait StateStore: Send + Sync {
    /// 文件不存在返回 `Ok(None)`；内容损坏返回 `Err`
    fn load(&self) -> Result<Option<PersistedState>, StateError>;
    fn save_atomic(&self, state: &PersistedState) -> Result<(), StateError>;
}

/// 进程内存储（测试 / 模拟重启用）：保存的是 bincode 字节，与磁盘格式同源
#[derive(Default)]
pub struct MemoryStateStore {
    bytes: Mutex<Option<Vec<u8>>>,
    saves: Mutex<u64>,
}

impl MemoryStateStore {
    pub fn save_count(&self) -> u64 {
        *self.saves.lock()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<PersistedState>, StateError> {
        match self.bytes.lock().as_deref() {
            None => Ok(None),
            Some(bytes) => bincode::deserialize(bytes)
                .map(Some)
                .map_err(|e| StateError::Corrupt(e.to_string())),
        }
    }

    fn save_atomic(&self, state: &PersistedState) -> Result<(), StateError> {
        let bytes = bincode::serialize(state).map_err(|e| StateError::Encode(e.to_string()))?;
        *self.bytes.lock() = Some(bytes);
        *self.saves.lock() += 1;
        Ok(())
    }
}

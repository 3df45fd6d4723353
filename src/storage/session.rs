use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::StateError;
use crate::storage::state::{PersistedState, StateStore};

/// 会话状态：进程顶层持有，按引用传给偏好模型 / 检索缓存 / 下载队列。
///
/// 所有修改都走 `update`：同一把锁覆盖 “读 → 改 → 原子落盘” 全过程，
/// 引擎线程与下载 worker 的写入因此被串行化，快照文件不会交错写坏。
/// 没有显式关闭流程：每次状态变化后立即落盘，进程被硬杀也不丢状态。
pub struct SessionState {
    state: Mutex<PersistedState>,
    store: Arc<dyn StateStore>,
}

impl SessionState {
    pub fn new(state: PersistedState, store: Arc<dyn StateStore>) -> Self {
        Self {
            state: Mutex::new(state),
            store,
        }
    }

    /// 从存储恢复（不存在则为空状态），并做形状校验
    pub fn open(store: Arc<dyn StateStore>, max_width: usize) -> Result<Self, StateError> {
        let state = match store.load()? {
            Some(state) => {
                tracing::info!(
                    "Loaded state: {} tags, width {}, {} disliked, {} queued, {} cached combinations",
                    state.tag_scores.len(),
                    state.width,
                    state.disliked_ids.len(),
                    state.download_queue.len(),
                    state.cache.len()
                );
                state
            }
            None => {
                tracing::info!("No saved state, starting fresh");
                PersistedState::default()
            }
        };
        state.validate(max_width)?;
        Ok(Self::new(state, store))
    }

    pub fn read<R>(&self, f: impl FnOnce(&PersistedState) -> R) -> R {
        f(&self.state.lock())
    }

    /// 锁内修改并原子落盘。
    ///
    /// 落盘失败时内存中的修改仍然保留，会随下一次成功写入一起持久化。
    pub fn update<R>(&self, f: impl FnOnce(&mut PersistedState) -> R) -> Result<R, StateError> {
        let mut state = self.state.lock();
        let out = f(&mut state);
        self.store.save_atomic(&state)?;
        Ok(out)
    }

    /// `update` 的异步版本：序列化 + fsync 放到阻塞线程池，不占用 runtime 工作线程
    pub async fn update_blocking<R, F>(self: &Arc<Self>, f: F) -> Result<R, StateError>
    where
        F: FnOnce(&mut PersistedState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || session.update(f))
            .await
            .map_err(|e| StateError::Task(e.to_string()))?
    }

    /// 不做修改，仅落盘当前状态
    pub fn checkpoint(&self) -> Result<(), StateError> {
        self.update(|_| ())
    }
}

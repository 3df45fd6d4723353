use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::StateError;
use crate::storage::{PersistedState, SessionState};

/// 持久化 FIFO 下载队列（生产者：发现引擎；消费者：唯一的下载 worker）
///
/// 队列本体是 `PersistedState::download_queue`；这里只是带唤醒信号的句柄。
/// 条目只有在文件落盘之后才会被 `complete` 移除，因此是 at-least-once。
#[derive(Clone)]
pub struct DownloadQueue {
    session: Arc<SessionState>,
    notify: Arc<Notify>,
}

impl DownloadQueue {
    pub fn new(session: Arc<SessionState>) -> Self {
        Self {
            session,
            notify: Arc::new(Notify::new()),
        }
    }

    /// 追加并原子落盘整条队列，然后唤醒 worker
    pub fn enqueue(&self, url: String) -> Result<(), StateError> {
        self.session.update(|s| Self::push(s, url))?;
        self.notify_worker();
        Ok(())
    }

    /// 纯状态变换：引擎把入队与偏好更新合并进同一次 checkpoint 时使用，
    /// 落盘后需调用 `notify_worker`
    pub fn push(state: &mut PersistedState, url: String) {
        state.download_queue.push_back(url);
    }

    pub fn notify_worker(&self) {
        self.notify.notify_one();
    }

    pub fn front(&self) -> Option<String> {
        self.session.read(|s| s.download_queue.front().cloned())
    }

    pub fn len(&self) -> usize {
        self.session.read(|s| s.download_queue.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 等待下一个待下载条目（不出队）
    ///
    /// `notify_one` 在无人等待时会保留一个许可，
    /// 所以“检查为空”与“开始等待”之间发生的入队不会丢失唤醒。
    pub async fn next_pending(&self) -> String {
        loop {
            if let Some(url) = self.front() {
                return url;
            }
            self.notify.notified().await;
        }
    }

    /// 文件已落盘：移除该条目并持久化
    pub async fn complete(&self, url: &str) -> Result<bool, StateError> {
        let url = url.to_string();
        self.session
            .update_blocking(move |s| match s.download_queue.iter().position(|u| *u == url) {
                Some(pos) => {
                    s.download_queue.remove(pos);
                    true
                }
                None => false,
            })
            .await
    }
}

use async_trait::async_trait;

use crate::core::{Item, Tag};
use crate::error::SearchError;

/// 分页检索能力
///
/// ## 契约
/// - 每页按“越新越靠前”返回；同一 (tags, page) 在远端无新内容时结果稳定。
/// - `page` 从 0 开始；空页表示结果结束。
/// - 失败与空页严格区分：非预期载荷必须返回 `SearchError::Blocked`。
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn query(
        &self,
        tags: &[Tag],
        page: u32,
        page_size: usize,
    ) -> Result<Vec<Item>, SearchError>;
}

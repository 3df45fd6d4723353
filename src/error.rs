use thiserror::Error;

/// 远端检索错误
///
/// `Blocked` 与其它变体不同：它不是“暂时失败”，而是远端返回了非预期载荷
/// （HTML 反爬页面、JSON 结构不符），需要人工介入（刷新凭据）。
/// 绝不能把它当成“零结果”，否则会把组合错误地标记为 exhausted。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("search request timed out")]
    Timeout,
    #[error("search connection failed: {0}")]
    Connection(String),
    #[error("search returned HTTP {0}")]
    BadStatus(u16),
    #[error("search blocked by remote: {0}")]
    Blocked(String),
}

impl SearchError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, SearchError::Blocked(_))
    }
}

/// 下载错误（全部视为暂时失败，由 worker 无限重试）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("download timed out")]
    Timeout,
    #[error("download connection failed: {0}")]
    Connection(String),
    #[error("download returned HTTP {0}")]
    BadStatus(u16),
}

/// 持久化状态错误：启动时遇到即致命，不做自动修复（从备份人工恢复）。
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state snapshot corrupt: {0}")]
    Corrupt(String),
    #[error("state snapshot invalid: {0}")]
    Invalid(String),
    #[error("state encode failed: {0}")]
    Encode(String),
    #[error("state write task failed: {0}")]
    Task(String),
}

/// 缓存流能向发现引擎暴露的全部错误。
/// 暂时性的网络错误不在此列：它们只表现为流提前结束。
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("search blocked, operator action required: {0}")]
    Blocked(String),
    #[error(transparent)]
    State(#[from] StateError),
}

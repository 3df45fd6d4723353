use std::time::Duration;

/// 单个调用点的重试策略（不是通用装饰器）
///
/// - `max_attempts = None`：无限重试
/// - `max_attempts = Some(n)`：总共最多尝试 n 次
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            delay,
        }
    }

    pub fn forever(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    /// 已经失败 `attempts` 次之后，是否还允许再试一次
    pub fn should_retry(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

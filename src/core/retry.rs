//! 远程调用的重试策略

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// 重试策略（指数退避，只重试基础设施错误）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    /// 不重试
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.base_delay_ms * 2_u64.pow(attempt);
                    attempt += 1;
                    warn!(
                        "{} 失败，{}ms 后重试 ({}/{}): {}",
                        label, delay, attempt, self.max_retries, e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    if attempt > 0 {
                        error!("{} 最终失败 (已重试{}次): {}", label, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

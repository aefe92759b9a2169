//! 指数退避重试
//!
//! `RetryStrategy` 是值类型，采集器与写入器各自持有一份。`execute` 最多尝试
//! `max(max_retries, 1)` 次，两次尝试之间按当前延迟休眠，随后延迟乘以
//! `backoff_multiplier` 并以 `max_delay` 封顶。取消在每次尝试前与休眠期间检查，
//! 以 `RetryError::Cancelled` 区别于最后一次尝试的失败。

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 重试执行结果错误。
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,
    #[error("failed after {attempts} attempt(s): {last_error}")]
    Failed { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }

    /// 取出最后一次失败的原始错误。
    pub fn into_last_error(self) -> Option<E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Failed { last_error, .. } => Some(last_error),
        }
    }
}

/// 退避策略。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryStrategy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryStrategy {
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
        .sanitized()
    }

    /// 短间隔、多次数（适合本地快速恢复的错误）。
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }

    /// 长间隔（本地存储）。
    pub fn gentle() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 修正非法参数：倍率至少为 1，上限不小于初始延迟。
    pub fn sanitized(mut self) -> Self {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            self.backoff_multiplier = 1.0;
        }
        if self.max_delay < self.initial_delay {
            self.max_delay = self.initial_delay;
        }
        self
    }

    /// 总尝试次数。
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// 第 `retry` 次重试前的休眠时长（从 0 计）。
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// 所有休眠时长之和的上界。
    pub fn total_backoff(&self) -> Duration {
        (0..self.attempts().saturating_sub(1))
            .map(|retry| self.delay_for(retry))
            .sum()
    }

    /// 执行 `task`，对 `should_retry` 为真的错误按策略重试。
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut task: F,
        should_retry: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.attempts();
        let mut attempt = 0u32;
        let mut delay = self.initial_delay;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;
            let err = match task().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= attempts || !should_retry(&err) {
                return Err(RetryError::Failed {
                    attempts: attempt,
                    last_error: err,
                });
            }
            debug!(
                target: "igw.retry",
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retry_scheduled"
            );
            igw_telemetry::record_retry_attempt();
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, self.backoff_multiplier, self.max_delay);
        }
    }
}

fn next_delay(current: Duration, multiplier: f64, max: Duration) -> Duration {
    let next = current.as_millis() as f64 * multiplier.max(1.0);
    Duration::from_millis(next.min(max.as_millis() as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_documented_values() {
        let default = RetryStrategy::default();
        assert_eq!(default.max_retries, 3);
        assert_eq!(default.initial_delay, Duration::from_secs(1));
        assert_eq!(default.max_delay, Duration::from_secs(30));
        let aggressive = RetryStrategy::aggressive();
        assert_eq!(aggressive.max_retries, 5);
        assert_eq!(aggressive.backoff_multiplier, 1.5);
        assert_eq!(RetryStrategy::gentle().initial_delay, Duration::from_secs(5));
    }

    #[test]
    fn delay_is_capped() {
        let strategy = RetryStrategy::default().with_max_retries(10);
        assert_eq!(strategy.delay_for(0), Duration::from_secs(1));
        assert_eq!(strategy.delay_for(2), Duration::from_secs(4));
        assert_eq!(strategy.delay_for(8), Duration::from_secs(30));
        assert_eq!(RetryStrategy::default().total_backoff(), Duration::from_secs(3));
    }

    #[test]
    fn sanitized_fixes_multiplier() {
        let strategy = RetryStrategy::new(
            2,
            Duration::from_millis(50),
            Duration::from_millis(10),
            0.5,
        );
        assert_eq!(strategy.backoff_multiplier, 1.0);
        assert_eq!(strategy.max_delay, Duration::from_millis(50));
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 有界重试与指数退避
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次），至少为 1
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 不重试
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// 第 `attempt` 次失败后是否还能再试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// 第 `attempt` 次失败后的等待时长（attempt 从 1 开始）
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        self.initial_backoff
            .mul_f64(factor)
            .min(self.max_backoff)
    }
}

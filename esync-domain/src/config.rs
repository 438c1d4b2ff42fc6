//! 引擎配置
//!
//! 所有字段均有默认值，可从任意 serde 格式部分覆盖；时长字段使用
//! 人类可读格式（如 `"250ms"`、`"5s"`）。
//!
use crate::engine::RetryPolicy;
use crate::error::{DomainError, DomainResult};
use crate::registry::TopicNaming;
use crate::value_object::ValueObject;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 每个命令主题的消费任务数
    pub worker_concurrency: usize,
    /// 单次存储/总线调用的超时，超时按适配器错误处理
    #[serde(with = "humantime_serde")]
    pub adapter_timeout: Duration,
    pub retry: RetryPolicy,
    /// 对账（补发布）周期
    #[serde(with = "humantime_serde")]
    pub reconcile_interval: Duration,
    /// 单次拉取未发布事件的上限
    pub reconcile_batch: usize,
    /// 最近请求窗口容量
    pub recent_requests_capacity: usize,
    pub topics: TopicNaming,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            adapter_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            reconcile_interval: Duration::from_secs(2),
            reconcile_batch: 128,
            recent_requests_capacity: 4096,
            topics: TopicNaming::default(),
        }
    }
}

impl ValueObject for EngineConfig {
    type Error = DomainError;

    fn validate(&self) -> DomainResult<()> {
        let invalid = |reason: &str| {
            Err(DomainError::Validation {
                reason: reason.to_string(),
            })
        };
        if self.worker_concurrency == 0 {
            return invalid("worker_concurrency must be at least 1");
        }
        if self.adapter_timeout.is_zero() {
            return invalid("adapter_timeout must be positive");
        }
        if self.reconcile_interval.is_zero() {
            return invalid("reconcile_interval must be positive");
        }
        if self.reconcile_batch == 0 {
            return invalid("reconcile_batch must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        self.topics.validate()
    }
}

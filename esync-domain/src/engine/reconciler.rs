//! 对账（发件箱补发布）
//!
//! 按聚合 ID 分页扫描每个聚合类型中存在未发布事件的聚合，逐个加锁后按版本顺序补发并标记。
//! 覆盖“已提交、未发布”窗口内的崩溃与发布重试耗尽的情况。
//!
use super::SyncEngine;
use crate::model::AggregateId;
use tracing::{debug, info, warn};

/// 单次对账结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// 存在未发布事件的聚合数
    pub aggregates: usize,
    /// 本次发布的事件数
    pub published: usize,
    /// 补发失败的聚合数
    pub failed: usize,
}

impl SyncEngine {
    /// 执行一轮对账
    pub async fn reconcile_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let limit = self.config.reconcile_batch.max(1);

        for definition in self.registry.iter() {
            let config = definition.config();
            // 按聚合 ID 游标分页，持续失败的聚合不会挡住排在其后的聚合
            let mut cursor: Option<AggregateId> = None;

            loop {
                let page = match self
                    .bounded(
                        "pending_aggregates",
                        self.store.pending_aggregates(config, cursor.as_ref(), limit),
                    )
                    .await
                {
                    Ok(page) => page,
                    Err(err) => {
                        warn!(aggregate_type = config.name(), error = %err, "reconcile scan failed");
                        break;
                    }
                };
                let full = page.len() >= limit;

                for aggregate_id in page {
                    report.aggregates += 1;
                    {
                        let _guard = self.locks.acquire(config.name(), &aggregate_id).await;
                        match self.publish_backlog(config, &aggregate_id).await {
                            Ok(published) => {
                                report.published += published;
                                debug!(
                                    aggregate_type = config.name(),
                                    aggregate_id = %aggregate_id,
                                    published,
                                    "backlog published"
                                );
                            }
                            Err(err) => {
                                report.failed += 1;
                                warn!(
                                    aggregate_type = config.name(),
                                    aggregate_id = %aggregate_id,
                                    error = %err,
                                    "reconcile publish failed"
                                );
                            }
                        }
                    }
                    cursor = Some(aggregate_id);
                }

                if !full {
                    break;
                }
            }
        }

        if report.published > 0 || report.failed > 0 {
            info!(
                aggregates = report.aggregates,
                published = report.published,
                failed = report.failed,
                "reconcile pass finished"
            );
        }
        report
    }
}

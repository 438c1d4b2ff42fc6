use crate::model::AggregateId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockKey = (String, AggregateId);

/// 聚合级互斥表：同一聚合同一时刻至多一条命令在应用
///
/// 表中只保存弱引用，最后一个持有者释放后条目在下次加锁时被清理。
#[derive(Debug, Default)]
pub struct AggregateLocks {
    table: Mutex<HashMap<LockKey, Weak<AsyncMutex<()>>>>,
}

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(
        &self,
        aggregate_type: &str,
        aggregate_id: &AggregateId,
    ) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.retain(|_, weak| weak.strong_count() > 0);

            let key = (aggregate_type.to_string(), aggregate_id.clone());
            match table.get(&key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    table.insert(key, Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// 当前仍被持有或等待中的聚合数
    pub fn active(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

//! Postgres 版聚合存储（PgAggregateStore）
//!
//! 每个聚合类型两张表：快照表（`aggregate_collection`）与事件表（`event_collection`）。
//! 提交在单个事务内完成：快照按期望版本条件更新（或首次插入），事件按
//! `(aggregate_id, version)` 主键插入；唯一约束冲突（`23505`）映射为版本冲突。
//!
//! 表名来自已校验的集合名（仅 `[A-Za-z_][A-Za-z0-9_]*`），可安全拼入 SQL。
//!
use super::{AggregateStore, StoredEvent};
use crate::error::{DomainError, DomainResult as Result};
use crate::model::{Aggregate, AggregateId, Event, RequestId};
use crate::registry::AggregateTypeConfig;
use crate::value_object::Version;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

#[derive(Debug, Clone)]
pub struct PgAggregateStore {
    pool: PgPool,
}

impl PgAggregateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建聚合类型所需的两张表（已存在则跳过）
    pub async fn ensure_schema(&self, config: &AggregateTypeConfig) -> Result<()> {
        let snapshots = config.aggregate_collection();
        let events = config.event_collection();

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{snapshots}" (
                aggregate_id    TEXT PRIMARY KEY,
                aggregate_type  TEXT NOT NULL,
                version         BIGINT NOT NULL CHECK (version > 0),
                last_request_id TEXT NOT NULL,
                deleted         BOOLEAN NOT NULL DEFAULT FALSE,
                state           JSONB NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{events}" (
                aggregate_id   TEXT NOT NULL,
                version        BIGINT NOT NULL CHECK (version > 0),
                event_id       TEXT NOT NULL,
                request_id     TEXT NOT NULL,
                operation      TEXT NOT NULL,
                aggregate_type TEXT NOT NULL,
                payload        JSONB NOT NULL,
                occurred_at    TIMESTAMPTZ NOT NULL,
                published      BOOLEAN NOT NULL DEFAULT FALSE,
                PRIMARY KEY (aggregate_id, version)
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS "{events}_request_idx" ON "{events}" (aggregate_id, request_id)"#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS "{events}_unpublished_idx" ON "{events}" (aggregate_id, version) WHERE NOT published"#
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn current_version(
        tx: &mut Transaction<'_, Postgres>,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
    ) -> Result<u64> {
        let version: Option<i64> = sqlx::query_scalar(&format!(
            r#"SELECT version FROM "{}" WHERE aggregate_id = $1"#,
            config.aggregate_collection()
        ))
        .bind(aggregate_id.as_str())
        .fetch_optional(&mut **tx)
        .await?;
        Ok(version.map_or(0, |v| v as u64))
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn event_from_row(row: &PgRow) -> Result<StoredEvent> {
    let operation: String = row.try_get("operation")?;
    let version: i64 = row.try_get("version")?;
    let event = Event::builder()
        .event_id(row.try_get::<String, _>("event_id")?)
        .operation(operation.parse()?)
        .aggregate_type(row.try_get::<String, _>("aggregate_type")?)
        .aggregate_id(row.try_get::<String, _>("aggregate_id")?)
        .request_id(row.try_get::<String, _>("request_id")?)
        .version(Version::from_value(version as u64))
        .payload(row.try_get::<serde_json::Value, _>("payload")?)
        .occurred_at(row.try_get("occurred_at")?)
        .build();
    Ok(StoredEvent {
        event,
        published: row.try_get("published")?,
    })
}

#[async_trait]
impl AggregateStore for PgAggregateStore {
    async fn load_latest(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
    ) -> Result<Option<Aggregate>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT aggregate_type, version, last_request_id, deleted, state, updated_at
            FROM "{}" WHERE aggregate_id = $1
            "#,
            config.aggregate_collection()
        ))
        .bind(aggregate_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row.try_get("version")?;
        Ok(Some(Aggregate {
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: aggregate_id.clone(),
            version: Version::from_value(version as u64),
            last_request_id: RequestId::new(row.try_get::<String, _>("last_request_id")?),
            deleted: row.try_get("deleted")?,
            state: row.try_get("state")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn commit_event(
        &self,
        config: &AggregateTypeConfig,
        event: &Event,
        expected_prior: Version,
    ) -> Result<()> {
        if event.version() != expected_prior.next() {
            return Err(DomainError::invalid_state(format!(
                "event version {} does not follow expected prior {}",
                event.version(),
                expected_prior
            )));
        }

        let snapshot = Aggregate::from_event(event);
        let conflict = |actual: u64| DomainError::VersionConflict {
            aggregate_id: event.aggregate_id().to_string(),
            expected: expected_prior.value(),
            actual,
        };

        let mut tx = self.pool.begin().await?;

        let affected = if expected_prior.is_initial() {
            sqlx::query(&format!(
                r#"
                INSERT INTO "{}" (aggregate_id, aggregate_type, version, last_request_id, deleted, state, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (aggregate_id) DO NOTHING
                "#,
                config.aggregate_collection()
            ))
            .bind(snapshot.aggregate_id.as_str())
            .bind(&snapshot.aggregate_type)
            .bind(snapshot.version.value() as i64)
            .bind(snapshot.last_request_id.as_str())
            .bind(snapshot.deleted)
            .bind(&snapshot.state)
            .bind(snapshot.updated_at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(&format!(
                r#"
                UPDATE "{}"
                SET version = $3, last_request_id = $4, deleted = $5, state = $6, updated_at = $7
                WHERE aggregate_id = $1 AND version = $2
                "#,
                config.aggregate_collection()
            ))
            .bind(snapshot.aggregate_id.as_str())
            .bind(expected_prior.value() as i64)
            .bind(snapshot.version.value() as i64)
            .bind(snapshot.last_request_id.as_str())
            .bind(snapshot.deleted)
            .bind(&snapshot.state)
            .bind(snapshot.updated_at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            let actual = Self::current_version(&mut tx, config, event.aggregate_id()).await?;
            tx.rollback().await?;
            return Err(conflict(actual));
        }

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO "{}" (aggregate_id, version, event_id, request_id, operation, aggregate_type, payload, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
            config.event_collection()
        ))
        .bind(event.aggregate_id().as_str())
        .bind(event.version().value() as i64)
        .bind(event.event_id())
        .bind(event.request_id().as_str())
        .bind(event.operation().as_str())
        .bind(event.aggregate_type())
        .bind(event.payload())
        .bind(event.occurred_at())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                return Err(conflict(event.version().value()));
            }
            Err(err) => return Err(err.into()),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_event_by_request(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        request_id: &RequestId,
    ) -> Result<Option<StoredEvent>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT * FROM "{}"
            WHERE aggregate_id = $1 AND request_id = $2
            ORDER BY version ASC LIMIT 1
            "#,
            config.event_collection()
        ))
        .bind(aggregate_id.as_str())
        .bind(request_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn fetch_unpublished(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: Option<&AggregateId>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT * FROM "{}"
            WHERE NOT published AND ($1::TEXT IS NULL OR aggregate_id = $1)
            ORDER BY aggregate_id ASC, version ASC
            LIMIT $2
            "#,
            config.event_collection()
        ))
        .bind(aggregate_id.map(AggregateId::as_str))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| event_from_row(row).map(|stored| stored.event))
            .collect()
    }

    async fn pending_aggregates(
        &self,
        config: &AggregateTypeConfig,
        after: Option<&AggregateId>,
        limit: usize,
    ) -> Result<Vec<AggregateId>> {
        let ids: Vec<String> = sqlx::query_scalar(&format!(
            r#"
            SELECT DISTINCT aggregate_id FROM "{}"
            WHERE NOT published AND ($1::TEXT IS NULL OR aggregate_id > $1)
            ORDER BY aggregate_id ASC
            LIMIT $2
            "#,
            config.event_collection()
        ))
        .bind(after.map(AggregateId::as_str))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(AggregateId::from).collect())
    }

    async fn mark_published(
        &self,
        config: &AggregateTypeConfig,
        aggregate_id: &AggregateId,
        version: Version,
    ) -> Result<()> {
        let affected = sqlx::query(&format!(
            r#"UPDATE "{}" SET published = TRUE WHERE aggregate_id = $1 AND version = $2"#,
            config.event_collection()
        ))
        .bind(aggregate_id.as_str())
        .bind(version.value() as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DomainError::NotFound {
                reason: format!("event {aggregate_id}@{}", version.value()),
            });
        }
        Ok(())
    }
}

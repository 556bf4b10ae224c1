//! PostgreSQL-backed [`HistoryStore`].
//!
//! Schema (see `migrations/`):
//! - `durable_instances`: one row per instance, merge-updated at turn commit.
//! - `durable_history`: append-only, `(instance_id, sequence_id)` unique, the
//!   zero-padded row key from [`crate::ids::row_key`] giving lexical order
//!   equal to numeric order.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use crate::ids::row_key;
use crate::model::{FailureDetails, HistoryEvent, InstanceRow, OrchestrationStatus};

use super::store::{AppendOutcome, HistoryStore, InstanceFilter, InstanceUpdate, StoreError};

/// PostgreSQL implementation of [`HistoryStore`], backed by a connection
/// pool shared across the runner, dispatcher, and client.
#[derive(Clone)]
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    #[instrument(skip(self, row))]
    async fn create_instance(&self, row: InstanceRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO durable_instances
                (instance_id, name, created_at, last_updated_at, status, sub_status, input, output, failure)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&row.instance_id)
        .bind(&row.name)
        .bind(row.created_at)
        .bind(row.last_updated_at)
        .bind(row.status.to_string())
        .bind(&row.sub_status)
        .bind(&row.input)
        .bind(&row.output)
        .bind(serialize_failure(&row.failure)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create instance: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(instance_id = %row.instance_id, "created instance");
        Ok(())
    }

    #[instrument(skip(self, event))]
    async fn append_message(
        &self,
        instance_id: &str,
        sequence_id: i64,
        event: HistoryEvent,
    ) -> Result<AppendOutcome, StoreError> {
        let event_data = serde_json::to_value(&event).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO durable_history (instance_id, sequence_id, row_key, event_data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (instance_id, sequence_id) DO NOTHING
            "#,
        )
        .bind(instance_id)
        .bind(sequence_id)
        .bind(row_key(sequence_id))
        .bind(&event_data)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to append history row: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            debug!(instance_id, sequence_id, "duplicate append, ignored");
            Ok(AppendOutcome::Duplicate)
        } else {
            Ok(AppendOutcome::Appended)
        }
    }

    #[instrument(skip(self, update))]
    async fn update_state(&self, instance_id: &str, update: InstanceUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE durable_instances
            SET
                status = COALESCE($2, status),
                sub_status = COALESCE($3, sub_status),
                output = COALESCE($4, output),
                failure = COALESCE($5, failure),
                last_updated_at = now()
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .bind(update.status.map(|s| s.to_string()))
        .bind(&update.sub_status)
        .bind(&update.output)
        .bind(update.failure.as_ref().map(serde_json::to_value).transpose().map_err(|e| StoreError::Serialization(e.to_string()))?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to update instance state: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InstanceNotFound(instance_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_state(&self, instance_id: &str) -> Result<Option<InstanceRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT instance_id, name, created_at, last_updated_at, status, sub_status, input, output, failure
            FROM durable_instances
            WHERE instance_id = $1
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to read instance state: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row.map(row_to_instance).transpose()
    }

    #[instrument(skip(self))]
    async fn stream_messages(&self, instance_id: &str) -> Result<Vec<(i64, HistoryEvent)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT sequence_id, event_data
            FROM durable_history
            WHERE instance_id = $1
            ORDER BY row_key
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to stream messages: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i64 = row.get("sequence_id");
            let data: serde_json::Value = row.get("event_data");
            let event: HistoryEvent = serde_json::from_value(data).map_err(|e| StoreError::Serialization(e.to_string()))?;
            events.push((seq, event));
        }
        Ok(events)
    }

    #[instrument(skip(self))]
    async fn purge(&self, instance_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM durable_history WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM durable_instances WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tx.commit().await.map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn purge_by(&self, filter: InstanceFilter) -> Result<u64, StoreError> {
        let ids: Vec<String> = self
            .list_instances(filter)
            .await?
            .into_iter()
            .map(|row| row.instance_id)
            .collect();

        for id in &ids {
            self.purge(id).await?;
        }
        Ok(ids.len() as u64)
    }

    #[instrument(skip(self, filter))]
    async fn list_instances(&self, filter: InstanceFilter) -> Result<Vec<InstanceRow>, StoreError> {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.to_string()).collect();

        let rows = sqlx::query(
            r#"
            SELECT instance_id, name, created_at, last_updated_at, status, sub_status, input, output, failure
            FROM durable_instances
            WHERE ($1::timestamptz IS NULL OR created_at >= $1)
              AND ($2::timestamptz IS NULL OR created_at <= $2)
              AND (array_length($3::text[], 1) IS NULL OR status = ANY($3))
            ORDER BY created_at
            "#,
        )
        .bind(filter.created_from)
        .bind(filter.created_to)
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to list instances: {}", e);
            StoreError::Database(e.to_string())
        })?;

        rows.into_iter().map(row_to_instance).collect()
    }
}

fn serialize_failure(failure: &Option<FailureDetails>) -> Result<Option<serde_json::Value>, StoreError> {
    failure.as_ref().map(serde_json::to_value).transpose().map_err(|e| StoreError::Serialization(e.to_string()))
}

fn row_to_instance(row: sqlx::postgres::PgRow) -> Result<InstanceRow, StoreError> {
    let status_str: String = row.get("status");
    let failure_json: Option<serde_json::Value> = row.get("failure");

    Ok(InstanceRow {
        instance_id: row.get("instance_id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        last_updated_at: row.get("last_updated_at"),
        status: parse_status(&status_str)?,
        sub_status: row.get("sub_status"),
        input: row.get("input"),
        output: row.get("output"),
        failure: failure_json
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
    })
}

fn parse_status(value: &str) -> Result<OrchestrationStatus, StoreError> {
    match value {
        "pending" => Ok(OrchestrationStatus::Pending),
        "running" => Ok(OrchestrationStatus::Running),
        "suspended" => Ok(OrchestrationStatus::Suspended),
        "completed" => Ok(OrchestrationStatus::Completed),
        "failed" => Ok(OrchestrationStatus::Failed),
        "terminated" => Ok(OrchestrationStatus::Terminated),
        other => Err(StoreError::Database(format!("unknown instance status '{other}'"))),
    }
}

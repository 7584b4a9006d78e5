// ABOUTME: Postgres-backed task and artifact store using sqlx.
// ABOUTME: Claims with FOR UPDATE SKIP LOCKED and flips artifact flags in one transaction.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use super::{ArtifactStore, LEASE_EXPIRED, StoreError, TaskStore};
use crate::domain::{
    Artifact, BackendKind, ENV_DOCUMENT, Promotion, Resolution, Task, TaskKind, TaskResult,
    TaskStatus, VALUES_DOCUMENT,
};
use crate::types::{ArtifactId, TaskId, WorkerId};

const TASK_COLUMNS: &str = "id, type, status, release_artifact_id, target_revision, overrides, \
     execute_after, picked_up_at, picked_up_by, last_heartbeat, completed_at, result, error_message";

const ARTIFACT_COLUMNS: &str = "id, release_version, chart_type, artifact_data, env_data, \
     values_data, sha256, is_current, is_previous";

/// Store backed by the control plane's Postgres tables.
///
/// Expects `agent_task`, `release_artifact` and `deployment_config` to exist.
/// On top of the control plane's columns, `agent_task` carries
/// `picked_up_by TEXT`, `target_revision INTEGER` and `overrides JSONB`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
        let decode = |e: sqlx::Error| StoreError::decode("agent_task", e);

        let id: Uuid = row.try_get("id").map_err(decode)?;
        let kind: String = row.try_get("type").map_err(decode)?;
        let status: String = row.try_get("status").map_err(decode)?;
        let artifact_ref: Option<Uuid> = row.try_get("release_artifact_id").map_err(decode)?;
        let target_revision: Option<i32> = row.try_get("target_revision").map_err(decode)?;
        let overrides: Option<Value> = row.try_get("overrides").map_err(decode)?;
        let result: Option<Value> = row.try_get("result").map_err(decode)?;
        let claimed_by: Option<String> = row.try_get("picked_up_by").map_err(decode)?;

        let overrides: BTreeMap<String, String> = match overrides {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StoreError::decode("agent_task", format!("overrides: {e}")))?,
            None => BTreeMap::new(),
        };

        // Results written by older agents may not match the current shape;
        // treat them as absent rather than failing the whole row.
        let result = result.and_then(|value| serde_json::from_value::<TaskResult>(value).ok());

        Ok(Task {
            id: TaskId::new(id),
            kind: kind
                .parse::<TaskKind>()
                .map_err(|e| StoreError::decode("agent_task", e))?,
            status: status
                .parse::<TaskStatus>()
                .map_err(|e| StoreError::decode("agent_task", e))?,
            artifact_ref: artifact_ref.map(ArtifactId::new),
            target_revision: target_revision.and_then(|r| u32::try_from(r).ok()),
            overrides,
            not_before: row.try_get("execute_after").map_err(decode)?,
            claimed_at: row.try_get("picked_up_at").map_err(decode)?,
            claimed_by: claimed_by.map(WorkerId::from_raw),
            last_heartbeat_at: row.try_get("last_heartbeat").map_err(decode)?,
            finished_at: row.try_get("completed_at").map_err(decode)?,
            result,
            error: row.try_get("error_message").map_err(decode)?,
        })
    }

    fn artifact_from_row(row: &PgRow) -> Result<Artifact, StoreError> {
        let decode = |e: sqlx::Error| StoreError::decode("release_artifact", e);

        let id: Uuid = row.try_get("id").map_err(decode)?;
        let chart_type: String = row.try_get("chart_type").map_err(decode)?;
        let env_data: Option<String> = row.try_get("env_data").map_err(decode)?;
        let values_data: Option<String> = row.try_get("values_data").map_err(decode)?;

        let mut side_documents = BTreeMap::new();
        if let Some(values) = values_data {
            side_documents.insert(VALUES_DOCUMENT.to_string(), values);
        }
        if let Some(env) = env_data {
            side_documents.insert(ENV_DOCUMENT.to_string(), env);
        }

        Ok(Artifact {
            id: ArtifactId::new(id),
            version: row.try_get("release_version").map_err(decode)?,
            backend_kind: chart_type
                .parse::<BackendKind>()
                .map_err(|e| StoreError::decode("release_artifact", e))?,
            payload: row.try_get("artifact_data").map_err(decode)?,
            side_documents,
            checksum: row.try_get("sha256").map_err(decode)?,
            is_current: row.try_get("is_current").map_err(decode)?,
            is_previous: row.try_get("is_previous").map_err(decode)?,
        })
    }

    async fn flagged_artifact(
        &self,
        kind: BackendKind,
        flag: &str,
    ) -> Result<Option<Artifact>, StoreError> {
        let query = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM release_artifact \
             WHERE chart_type = $1 AND {flag} = TRUE LIMIT 1"
        );
        let row = sqlx::query(&query)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::artifact_from_row).transpose()
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn claim_next(&self, worker: &WorkerId) -> Result<Option<Task>, StoreError> {
        let query = format!(
            r#"
            UPDATE agent_task
            SET status = 'inProgress',
                picked_up_at = NOW(),
                picked_up_by = $1,
                last_heartbeat = NULL,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM agent_task
                WHERE status = 'pending'
                AND execute_after <= NOW()
                ORDER BY execute_after ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(worker.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::task_from_row).transpose()
    }

    async fn heartbeat(&self, id: &TaskId, worker: &WorkerId) -> Result<bool, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE agent_task
            SET last_heartbeat = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'inProgress' AND picked_up_by = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker.as_str())
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    async fn resolve(
        &self,
        id: &TaskId,
        worker: &WorkerId,
        resolution: &Resolution,
    ) -> Result<bool, StoreError> {
        let result = serde_json::to_value(resolution.result())
            .map_err(|e| StoreError::Query(format!("failed to encode result: {e}")))?;

        let done = sqlx::query(
            r#"
            UPDATE agent_task
            SET status = $3,
                completed_at = NOW(),
                result = $4,
                error_message = $5,
                updated_at = NOW()
            WHERE id = $1 AND status = 'inProgress' AND picked_up_by = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker.as_str())
        .bind(resolution.status().as_str())
        .bind(result)
        .bind(resolution.error())
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() == 1)
    }

    async fn sweep_expired(&self, lease_timeout: Duration) -> Result<Vec<TaskId>, StoreError> {
        // GREATEST ignores NULLs, so a task that never sent a heartbeat is
        // measured from picked_up_at.
        let rows = sqlx::query(
            r#"
            UPDATE agent_task
            SET status = 'failed',
                completed_at = NOW(),
                error_message = $2,
                updated_at = NOW()
            WHERE status = 'inProgress'
            AND GREATEST(picked_up_at, last_heartbeat) < NOW() - make_interval(secs => $1)
            RETURNING id
            "#,
        )
        .bind(lease_timeout.as_secs_f64())
        .bind(LEASE_EXPIRED)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("id")
                    .map(TaskId::new)
                    .map_err(|e| StoreError::decode("agent_task", e))
            })
            .collect()
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let query = format!("SELECT {TASK_COLUMNS} FROM agent_task WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::task_from_row).transpose()
    }

    async fn record_poll(&self, _worker: &WorkerId) -> Result<(), StoreError> {
        sqlx::query("UPDATE deployment_config SET last_agent_poll = NOW()")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_maintenance_mode(&self, enabled: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE deployment_config SET maintenance_mode_enabled = $1")
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for PgStore {
    async fn get_artifact(&self, id: &ArtifactId) -> Result<Option<Artifact>, StoreError> {
        let query = format!("SELECT {ARTIFACT_COLUMNS} FROM release_artifact WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::artifact_from_row).transpose()
    }

    async fn current_artifact(&self, kind: BackendKind) -> Result<Option<Artifact>, StoreError> {
        self.flagged_artifact(kind, "is_current").await
    }

    async fn previous_artifact(&self, kind: BackendKind) -> Result<Option<Artifact>, StoreError> {
        self.flagged_artifact(kind, "is_previous").await
    }

    async fn promote(&self, kind: BackendKind, id: &ArtifactId) -> Result<Promotion, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Lock every row of this kind so concurrent promotions serialize.
        let rows = sqlx::query(
            r#"
            SELECT id, is_current, is_previous FROM release_artifact
            WHERE chart_type = $1
            FOR UPDATE
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&mut *tx)
        .await?;

        let mut target_is_current = None;
        let mut old_current = None;
        let mut old_previous = None;
        for row in &rows {
            let row_id: Uuid = row
                .try_get("id")
                .map_err(|e| StoreError::decode("release_artifact", e))?;
            let is_current: bool = row
                .try_get("is_current")
                .map_err(|e| StoreError::decode("release_artifact", e))?;
            let is_previous: bool = row
                .try_get("is_previous")
                .map_err(|e| StoreError::decode("release_artifact", e))?;

            if row_id == *id.as_uuid() {
                target_is_current = Some(is_current);
            }
            if is_current {
                old_current = Some(ArtifactId::new(row_id));
            }
            if is_previous {
                old_previous = Some(ArtifactId::new(row_id));
            }
        }

        match target_is_current {
            None => return Err(StoreError::ArtifactNotFound { id: *id, kind }),
            Some(true) => {
                tx.commit().await?;
                return Ok(Promotion {
                    current: *id,
                    previous: old_previous,
                    changed: false,
                });
            }
            Some(false) => {}
        }

        sqlx::query(
            "UPDATE release_artifact SET is_previous = FALSE WHERE chart_type = $1 AND is_previous",
        )
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE release_artifact
            SET is_current = FALSE, is_previous = TRUE
            WHERE chart_type = $1 AND is_current
            "#,
        )
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE release_artifact
            SET is_current = TRUE, is_previous = FALSE, applied_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Promotion {
            current: *id,
            previous: old_current,
            changed: true,
        })
    }
}

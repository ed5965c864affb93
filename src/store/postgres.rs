//! # Postgres Store
//!
//! `sqlx` implementation of every store trait. Queries are built at runtime
//! with `query`/`query_as` and decoded into private row structs, which are
//! then converted into the domain models.
//!
//! Atomic units:
//!
//! - **Claiming**: a transaction-scoped advisory lock serializes claimers so
//!   the `PROCESSING` count check and the claim happen as one step; the
//!   candidate row itself is picked with `FOR UPDATE SKIP LOCKED`.
//! - **Lock acquisition**: a transaction-scoped advisory lock on the
//!   resource key turns reclaim, conflict check and insert into one
//!   compare-and-insert.
//! - **Status changes**: `UPDATE ... WHERE status = $expected` compare-and-set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::{
    EntityDependencyStore, LockStore, OrchestrationStore, QueueStore, RollbackStore,
    ScheduleStore, TenantLimitStore,
};
use crate::config::DatabaseConfig;
use crate::constants::CANCELLED_REASON;
use crate::error::{ImportError, Result};
use crate::models::{
    CancelOutcome, EntityDependency, ImportBatch, LockOutcome, LockRequest, Orchestration,
    OrchestrationDependency, PhaseDetails, ProgressTrackingEntry, QueueEntry, QueueStatus,
    ReservationStatus, ResourceAmounts, ResourceKey, ResourceLock, ResourceReservation,
    RollbackAction, ScheduleExecutionHistory, ScheduleStatus, ScheduledImport,
    TenantResourceLimit,
};
use crate::state_machine::{BatchStatus, OrchestrationStatus};

const CLAIM_LOCK_KEY: &str = "import_queue.claim";

/// [`ImportStore`](super::ImportStore) backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration and optionally apply migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| {
                error!("Failed to connect to import database: {}", e);
                ImportError::Database(e)
            })?;

        let store = Self::new(pool);
        if config.run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Import orchestrator migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn advisory_xact_lock(tx: &mut Transaction<'_, Postgres>, key: &str) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn recompute_positions_in(tx: &mut Transaction<'_, Postgres>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE import_queue q
        SET queue_position = ranked.position
        FROM (
            SELECT request_id,
                   ROW_NUMBER() OVER (ORDER BY priority DESC, requested_at ASC, request_id ASC)::INTEGER AS position
            FROM import_queue
            WHERE status = 'QUEUED'
        ) ranked
        WHERE q.request_id = ranked.request_id
        "#,
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct QueueEntryRow {
    request_id: Uuid,
    priority: i32,
    status: String,
    import_type: String,
    requester: String,
    tenant_id: String,
    requested_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    estimated_duration_seconds: Option<i64>,
    resource_requirements: Json<ResourceAmounts>,
    configuration: Value,
    queue_position: Option<i32>,
    assigned_worker: Option<String>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    cancel_requested: bool,
    attempts: i32,
    error_message: Option<String>,
    orchestration_id: Option<Uuid>,
    schedule_id: Option<Uuid>,
    execution_id: Option<Uuid>,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = ImportError;

    fn try_from(row: QueueEntryRow) -> Result<Self> {
        Ok(Self {
            request_id: row.request_id,
            priority: row.priority,
            status: row.status.parse()?,
            import_type: row.import_type,
            requester: row.requester,
            tenant_id: row.tenant_id,
            requested_at: row.requested_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            estimated_duration_seconds: row.estimated_duration_seconds,
            resource_requirements: row.resource_requirements.0,
            configuration: row.configuration,
            queue_position: row.queue_position,
            assigned_worker: row.assigned_worker,
            last_heartbeat_at: row.last_heartbeat_at,
            cancel_requested: row.cancel_requested,
            attempts: row.attempts,
            error_message: row.error_message,
            orchestration_id: row.orchestration_id,
            schedule_id: row.schedule_id,
            execution_id: row.execution_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResourceLockRow {
    lock_id: Uuid,
    resource_type: String,
    resource_id: String,
    lock_type: String,
    owner_request_id: Uuid,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<ResourceLockRow> for ResourceLock {
    type Error = ImportError;

    fn try_from(row: ResourceLockRow) -> Result<Self> {
        Ok(Self {
            lock_id: row.lock_id,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
            lock_type: row.lock_type.parse()?,
            owner_request_id: row.owner_request_id,
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ImportBatchRow {
    batch_id: Uuid,
    source_descriptor: String,
    import_type: String,
    status: String,
    owner: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    statistics: Value,
    orchestration_id: Option<Uuid>,
    failure_reason: Option<String>,
}

impl TryFrom<ImportBatchRow> for ImportBatch {
    type Error = ImportError;

    fn try_from(row: ImportBatchRow) -> Result<Self> {
        Ok(Self {
            batch_id: row.batch_id,
            source_descriptor: row.source_descriptor,
            import_type: row.import_type,
            status: row.status.parse()?,
            owner: row.owner,
            started_at: row.started_at,
            ended_at: row.ended_at,
            statistics: row.statistics,
            orchestration_id: row.orchestration_id,
            failure_reason: row.failure_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrchestrationRow {
    orchestration_id: Uuid,
    request_id: Option<Uuid>,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    phase_count: i32,
    success_count: i32,
    error_count: i32,
    phase_details: Json<PhaseDetails>,
    configuration: Value,
    statistics: Value,
    error_details: Option<Value>,
    rollback_reason: Option<String>,
}

impl TryFrom<OrchestrationRow> for Orchestration {
    type Error = ImportError;

    fn try_from(row: OrchestrationRow) -> Result<Self> {
        Ok(Self {
            orchestration_id: row.orchestration_id,
            request_id: row.request_id,
            status: row.status.parse()?,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            phase_count: row.phase_count,
            success_count: row.success_count,
            error_count: row.error_count,
            phase_details: row.phase_details.0,
            configuration: row.configuration,
            statistics: row.statistics,
            error_details: row.error_details,
            rollback_reason: row.rollback_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    progress_id: Uuid,
    orchestration_id: Uuid,
    phase: String,
    step: String,
    percentage: f64,
    items_processed: i64,
    items_total: i64,
    status: String,
    message: Option<String>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProgressRow> for ProgressTrackingEntry {
    type Error = ImportError;

    fn try_from(row: ProgressRow) -> Result<Self> {
        Ok(Self {
            progress_id: row.progress_id,
            orchestration_id: row.orchestration_id,
            phase: row.phase,
            step: row.step,
            percentage: row.percentage,
            items_processed: row.items_processed,
            items_total: row.items_total,
            status: row.status.parse()?,
            message: row.message,
            started_at: row.started_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrchestrationDependencyRow {
    dependency_id: Uuid,
    orchestration_id: Uuid,
    depends_on_orchestration_id: Uuid,
    dependency_type: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrchestrationDependencyRow> for OrchestrationDependency {
    type Error = ImportError;

    fn try_from(row: OrchestrationDependencyRow) -> Result<Self> {
        Ok(Self {
            dependency_id: row.dependency_id,
            orchestration_id: row.orchestration_id,
            depends_on_orchestration_id: row.depends_on_orchestration_id,
            dependency_type: row.dependency_type.parse()?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RollbackActionRow {
    action_id: Uuid,
    orchestration_id: Uuid,
    batch_id: Option<Uuid>,
    action_type: String,
    entity_type: String,
    target_phase: String,
    reason: String,
    rollback_details: Value,
    executed_by: String,
    executed_at: DateTime<Utc>,
    success: bool,
    error_message: Option<String>,
    recovery_data: Option<Value>,
}

impl TryFrom<RollbackActionRow> for RollbackAction {
    type Error = ImportError;

    fn try_from(row: RollbackActionRow) -> Result<Self> {
        Ok(Self {
            action_id: row.action_id,
            orchestration_id: row.orchestration_id,
            batch_id: row.batch_id,
            action_type: row.action_type.parse()?,
            entity_type: row.entity_type,
            target_phase: row.target_phase,
            reason: row.reason,
            rollback_details: row.rollback_details,
            executed_by: row.executed_by,
            executed_at: row.executed_at,
            success: row.success,
            error_message: row.error_message,
            recovery_data: row.recovery_data,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScheduledImportRow {
    schedule_id: Uuid,
    name: String,
    import_type: String,
    tenant_id: String,
    requester: String,
    schedule_expression: String,
    recurring: bool,
    priority: i32,
    status: String,
    next_execution_at: Option<DateTime<Utc>>,
    last_execution_at: Option<DateTime<Utc>>,
    execution_count: i32,
    success_count: i32,
    failure_count: i32,
    import_configuration: Value,
    resource_requirements: Json<ResourceAmounts>,
    expected_duration_minutes: i64,
    max_retries: i32,
    retry_delay_minutes: i64,
    timeout_minutes: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduledImportRow> for ScheduledImport {
    type Error = ImportError;

    fn try_from(row: ScheduledImportRow) -> Result<Self> {
        Ok(Self {
            schedule_id: row.schedule_id,
            name: row.name,
            import_type: row.import_type,
            tenant_id: row.tenant_id,
            requester: row.requester,
            schedule_expression: row.schedule_expression,
            recurring: row.recurring,
            priority: row.priority,
            status: row.status.parse()?,
            next_execution_at: row.next_execution_at,
            last_execution_at: row.last_execution_at,
            execution_count: row.execution_count,
            success_count: row.success_count,
            failure_count: row.failure_count,
            import_configuration: row.import_configuration,
            resource_requirements: row.resource_requirements.0,
            expected_duration_minutes: row.expected_duration_minutes,
            max_retries: row.max_retries,
            retry_delay_minutes: row.retry_delay_minutes,
            timeout_minutes: row.timeout_minutes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    execution_id: Uuid,
    schedule_id: Uuid,
    request_id: Option<Uuid>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: String,
    records_processed: i64,
    error_message: Option<String>,
    execution_details: Value,
}

impl TryFrom<ExecutionRow> for ScheduleExecutionHistory {
    type Error = ImportError;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        Ok(Self {
            execution_id: row.execution_id,
            schedule_id: row.schedule_id,
            request_id: row.request_id,
            started_at: row.started_at,
            completed_at: row.completed_at,
            status: row.status.parse()?,
            records_processed: row.records_processed,
            error_message: row.error_message,
            execution_details: row.execution_details,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    reservation_id: Uuid,
    schedule_id: Uuid,
    execution_id: Option<Uuid>,
    tenant_id: String,
    resource_type: String,
    amount: f64,
    reserved_from: DateTime<Utc>,
    reserved_until: DateTime<Utc>,
    status: String,
}

impl TryFrom<ReservationRow> for ResourceReservation {
    type Error = ImportError;

    fn try_from(row: ReservationRow) -> Result<Self> {
        Ok(Self {
            reservation_id: row.reservation_id,
            schedule_id: row.schedule_id,
            execution_id: row.execution_id,
            tenant_id: row.tenant_id,
            resource_type: row.resource_type,
            amount: row.amount,
            reserved_from: row.reserved_from,
            reserved_until: row.reserved_until,
            status: row.status.parse()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TenantLimitRow {
    tenant_id: String,
    resource_type: String,
    unit: String,
    limit_value: f64,
    enforcement: String,
}

impl TryFrom<TenantLimitRow> for TenantResourceLimit {
    type Error = ImportError;

    fn try_from(row: TenantLimitRow) -> Result<Self> {
        Ok(Self {
            tenant_id: row.tenant_id,
            resource_type: row.resource_type,
            unit: row.unit,
            limit_value: row.limit_value,
            enforcement: row.enforcement.parse()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntityDependencyRow {
    entity_type: String,
    depends_on: Option<String>,
    import_order: i32,
    required: bool,
    validation_query: Option<String>,
    rollback_query: Option<String>,
}

impl From<EntityDependencyRow> for EntityDependency {
    fn from(row: EntityDependencyRow) -> Self {
        Self {
            entity_type: row.entity_type,
            depends_on: row.depends_on,
            import_order: row.import_order,
            required: row.required,
            validation_query: row.validation_query,
            rollback_query: row.rollback_query,
        }
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = ImportError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[async_trait]
impl QueueStore for PgStore {
    #[instrument(skip(self, entry), fields(request_id = %entry.request_id))]
    async fn insert_entry(&self, entry: &QueueEntry) -> Result<i32> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO import_queue (
                request_id, priority, status, import_type, requester, tenant_id,
                requested_at, estimated_duration_seconds, resource_requirements,
                configuration, cancel_requested, attempts, orchestration_id,
                schedule_id, execution_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE, 0, $11, $12, $13)
            "#,
        )
        .bind(entry.request_id)
        .bind(entry.priority)
        .bind(entry.status.as_str())
        .bind(&entry.import_type)
        .bind(&entry.requester)
        .bind(&entry.tenant_id)
        .bind(entry.requested_at)
        .bind(entry.estimated_duration_seconds)
        .bind(Json(&entry.resource_requirements))
        .bind(&entry.configuration)
        .bind(entry.orchestration_id)
        .bind(entry.schedule_id)
        .bind(entry.execution_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert queue entry {}: {}", entry.request_id, e);
            ImportError::Database(e)
        })?;

        recompute_positions_in(&mut tx).await?;

        let (position,): (Option<i32>,) =
            sqlx::query_as("SELECT queue_position FROM import_queue WHERE request_id = $1")
                .bind(entry.request_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(position.unwrap_or(1))
    }

    async fn get_entry(&self, request_id: Uuid) -> Result<Option<QueueEntry>> {
        sqlx::query_as::<_, QueueEntryRow>("SELECT * FROM import_queue WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?
            .map(QueueEntry::try_from)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn claim_next(
        &self,
        max_processing: usize,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, CLAIM_LOCK_KEY).await?;

        let (processing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM import_queue WHERE status = 'PROCESSING'")
                .fetch_one(&mut *tx)
                .await?;

        if processing >= max_processing as i64 {
            debug!(processing, max_processing, "Concurrency bound reached");
            tx.commit().await?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, QueueEntryRow>(
            r#"
            UPDATE import_queue
            SET status = 'PROCESSING',
                started_at = $2,
                last_heartbeat_at = $2,
                assigned_worker = $1,
                queue_position = NULL,
                attempts = attempts + 1
            WHERE request_id = (
                SELECT q.request_id FROM import_queue q
                WHERE q.status = 'QUEUED'
                  AND NOT EXISTS (
                      SELECT 1
                      FROM orchestration_dependencies d
                      JOIN import_orchestrations o
                        ON o.orchestration_id = d.depends_on_orchestration_id
                      WHERE d.orchestration_id = q.orchestration_id
                        AND o.status IN ('PENDING', 'IN_PROGRESS')
                  )
                ORDER BY q.priority DESC, q.requested_at ASC, q.request_id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to claim queue entry: {}", e);
            ImportError::Database(e)
        })?;

        if row.is_some() {
            recompute_positions_in(&mut tx).await?;
        }
        tx.commit().await?;

        row.map(QueueEntry::try_from).transpose()
    }

    async fn finish_entry(
        &self,
        request_id: Uuid,
        worker_id: &str,
        status: QueueStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE import_queue
            SET status = $3, completed_at = $4, error_message = $5, queue_position = NULL
            WHERE request_id = $1 AND assigned_worker = $2 AND status = 'PROCESSING'
            "#,
        )
        .bind(request_id)
        .bind(worker_id)
        .bind(status.as_str())
        .bind(now)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn requeue_entry(&self, request_id: Uuid, worker_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE import_queue
            SET status = 'QUEUED', assigned_worker = NULL, last_heartbeat_at = NULL
            WHERE request_id = $1 AND assigned_worker = $2 AND status = 'PROCESSING'
            "#,
        )
        .bind(request_id)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 1 {
            recompute_positions_in(&mut tx).await?;
        }
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn request_cancel(&self, request_id: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let mut tx = self.pool.begin().await?;
        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM import_queue WHERE request_id = $1 FOR UPDATE")
                .bind(request_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((status,)) = current else {
            return Err(ImportError::NotFound {
                entity: "queue entry",
                id: request_id,
            });
        };

        let outcome = match status.parse::<QueueStatus>()? {
            QueueStatus::Queued => {
                sqlx::query(
                    r#"
                    UPDATE import_queue
                    SET status = 'CANCELLED', completed_at = $2, queue_position = NULL,
                        error_message = $3
                    WHERE request_id = $1
                    "#,
                )
                .bind(request_id)
                .bind(now)
                .bind(CANCELLED_REASON)
                .execute(&mut *tx)
                .await?;
                recompute_positions_in(&mut tx).await?;
                CancelOutcome::Cancelled
            }
            QueueStatus::Processing => {
                sqlx::query("UPDATE import_queue SET cancel_requested = TRUE WHERE request_id = $1")
                    .bind(request_id)
                    .execute(&mut *tx)
                    .await?;
                CancelOutcome::CancellationRequested
            }
            _ => CancelOutcome::AlreadyFinished,
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn is_cancel_requested(&self, request_id: Uuid) -> Result<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT cancel_requested OR status = 'CANCELLED' FROM import_queue WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(flag,)| flag).unwrap_or(false))
    }

    async fn heartbeat(
        &self,
        request_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE import_queue SET last_heartbeat_at = $3
            WHERE request_id = $1 AND assigned_worker = $2 AND status = 'PROCESSING'
            "#,
        )
        .bind(request_id)
        .bind(worker_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn requeue_abandoned(&self, deadline: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE import_queue
            SET status = 'QUEUED', assigned_worker = NULL, last_heartbeat_at = NULL
            WHERE status = 'PROCESSING'
              AND COALESCE(last_heartbeat_at, started_at, requested_at) < $1
            RETURNING request_id
            "#,
        )
        .bind(deadline)
        .fetch_all(&mut *tx)
        .await?;
        if !rows.is_empty() {
            recompute_positions_in(&mut tx).await?;
        }
        tx.commit().await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn recompute_positions(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        recompute_positions_in(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_entries(&self, status: Option<QueueStatus>) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query_as::<_, QueueEntryRow>(
            r#"
            SELECT * FROM import_queue
            WHERE ($1::VARCHAR IS NULL OR status = $1)
            ORDER BY priority DESC, requested_at ASC, request_id ASC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn tenant_usage(&self, tenant_id: &str, resource_type: &str) -> Result<f64> {
        let (usage,): (f64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM((resource_requirements ->> $2)::DOUBLE PRECISION), 0)::DOUBLE PRECISION
            FROM import_queue
            WHERE tenant_id = $1 AND status IN ('QUEUED', 'PROCESSING')
            "#,
        )
        .bind(tenant_id)
        .bind(resource_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(usage)
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

#[async_trait]
impl LockStore for PgStore {
    #[instrument(skip(self, request), fields(resource = %request.key, owner = %request.owner_request_id))]
    async fn try_acquire(&self, request: &LockRequest, now: DateTime<Utc>) -> Result<LockOutcome> {
        let key = &request.key;
        let mut tx = self.pool.begin().await?;
        advisory_xact_lock(&mut tx, &key.to_string()).await?;

        let reclaimed = sqlx::query(
            "DELETE FROM resource_locks WHERE resource_type = $1 AND resource_id = $2 AND expires_at <= $3",
        )
        .bind(&key.resource_type)
        .bind(&key.resource_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if reclaimed.rows_affected() > 0 {
            debug!(reclaimed = reclaimed.rows_affected(), "Reclaimed expired locks on key");
        }

        let rows = sqlx::query_as::<_, ResourceLockRow>(
            "SELECT * FROM resource_locks WHERE resource_type = $1 AND resource_id = $2",
        )
        .bind(&key.resource_type)
        .bind(&key.resource_id)
        .fetch_all(&mut *tx)
        .await?;
        let current: Vec<ResourceLock> = convert_all(rows)?;

        let holders: Vec<ResourceLock> = current
            .into_iter()
            .filter(|lock| lock.blocks(request))
            .collect();
        if !holders.is_empty() {
            tx.commit().await?;
            return Ok(LockOutcome::Conflict { holders });
        }

        let candidate = request.to_lock(now);
        let row = sqlx::query_as::<_, ResourceLockRow>(
            r#"
            INSERT INTO resource_locks (
                lock_id, resource_type, resource_id, lock_type, owner_request_id,
                acquired_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (resource_type, resource_id, owner_request_id)
            DO UPDATE SET lock_type = EXCLUDED.lock_type, expires_at = EXCLUDED.expires_at
            RETURNING *
            "#,
        )
        .bind(candidate.lock_id)
        .bind(&candidate.resource_type)
        .bind(&candidate.resource_id)
        .bind(candidate.lock_type.as_str())
        .bind(candidate.owner_request_id)
        .bind(candidate.acquired_at)
        .bind(candidate.expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert lock on {}: {}", key, e);
            ImportError::Database(e)
        })?;

        tx.commit().await?;
        Ok(LockOutcome::Granted(row.try_into()?))
    }

    async fn release(&self, key: &ResourceKey, owner_request_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM resource_locks WHERE resource_type = $1 AND resource_id = $2 AND owner_request_id = $3",
        )
        .bind(&key.resource_type)
        .bind(&key.resource_id)
        .bind(owner_request_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_all(&self, owner_request_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM resource_locks WHERE owner_request_id = $1")
            .bind(owner_request_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn extend_all(&self, owner_request_id: Uuid, expires_at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE resource_locks SET expires_at = $2 WHERE owner_request_id = $1 AND acquired_at < $2",
        )
        .bind(owner_request_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<ResourceLock>> {
        let rows = sqlx::query_as::<_, ResourceLockRow>(
            "DELETE FROM resource_locks WHERE expires_at <= $1 RETURNING *",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn active_locks(
        &self,
        key: &ResourceKey,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceLock>> {
        let rows = sqlx::query_as::<_, ResourceLockRow>(
            r#"
            SELECT * FROM resource_locks
            WHERE resource_type = $1 AND resource_id = $2 AND expires_at > $3
            "#,
        )
        .bind(&key.resource_type)
        .bind(&key.resource_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn locks_held_by(&self, owner_request_id: Uuid) -> Result<Vec<ResourceLock>> {
        let rows = sqlx::query_as::<_, ResourceLockRow>(
            "SELECT * FROM resource_locks WHERE owner_request_id = $1 ORDER BY acquired_at",
        )
        .bind(owner_request_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

// ---------------------------------------------------------------------------
// Batches, orchestrations, progress
// ---------------------------------------------------------------------------

#[async_trait]
impl OrchestrationStore for PgStore {
    async fn create_batch(&self, batch: &ImportBatch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_batches (
                batch_id, source_descriptor, import_type, status, owner, started_at,
                ended_at, statistics, orchestration_id, failure_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(batch.batch_id)
        .bind(&batch.source_descriptor)
        .bind(&batch.import_type)
        .bind(batch.status.as_str())
        .bind(&batch.owner)
        .bind(batch.started_at)
        .bind(batch.ended_at)
        .bind(&batch.statistics)
        .bind(batch.orchestration_id)
        .bind(&batch.failure_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<ImportBatch>> {
        sqlx::query_as::<_, ImportBatchRow>("SELECT * FROM import_batches WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?
            .map(ImportBatch::try_from)
            .transpose()
    }

    async fn batches_for_orchestration(&self, orchestration_id: Uuid) -> Result<Vec<ImportBatch>> {
        let rows = sqlx::query_as::<_, ImportBatchRow>(
            "SELECT * FROM import_batches WHERE orchestration_id = $1 ORDER BY started_at",
        )
        .bind(orchestration_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn finalize_batch(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        statistics: &Value,
        failure_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE import_batches
            SET status = $2,
                ended_at = $3,
                statistics = $4,
                failure_reason = COALESCE($5, failure_reason)
            WHERE batch_id = $1
              AND (status = 'IN_PROGRESS'
                   OR ($2 = 'ROLLED_BACK' AND status IN ('COMPLETED', 'FAILED')))
            "#,
        )
        .bind(batch_id)
        .bind(status.as_str())
        .bind(now)
        .bind(statistics)
        .bind(failure_reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_orchestration(&self, orchestration: &Orchestration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_orchestrations (
                orchestration_id, request_id, status, created_at, started_at, completed_at,
                phase_count, success_count, error_count, phase_details, configuration,
                statistics, error_details, rollback_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(orchestration.orchestration_id)
        .bind(orchestration.request_id)
        .bind(orchestration.status.as_str())
        .bind(orchestration.created_at)
        .bind(orchestration.started_at)
        .bind(orchestration.completed_at)
        .bind(orchestration.phase_count)
        .bind(orchestration.success_count)
        .bind(orchestration.error_count)
        .bind(Json(&orchestration.phase_details))
        .bind(&orchestration.configuration)
        .bind(&orchestration.statistics)
        .bind(&orchestration.error_details)
        .bind(&orchestration.rollback_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_orchestration(&self, orchestration_id: Uuid) -> Result<Option<Orchestration>> {
        sqlx::query_as::<_, OrchestrationRow>(
            "SELECT * FROM import_orchestrations WHERE orchestration_id = $1",
        )
        .bind(orchestration_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Orchestration::try_from)
        .transpose()
    }

    async fn transition_orchestration(
        &self,
        orchestration: &Orchestration,
        expected_from: OrchestrationStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE import_orchestrations
            SET request_id = $3,
                status = $4,
                started_at = $5,
                completed_at = $6,
                success_count = $7,
                error_count = $8,
                phase_details = $9,
                statistics = $10,
                error_details = $11,
                rollback_reason = $12
            WHERE orchestration_id = $1 AND status = $2
            "#,
        )
        .bind(orchestration.orchestration_id)
        .bind(expected_from.as_str())
        .bind(orchestration.request_id)
        .bind(orchestration.status.as_str())
        .bind(orchestration.started_at)
        .bind(orchestration.completed_at)
        .bind(orchestration.success_count)
        .bind(orchestration.error_count)
        .bind(Json(&orchestration.phase_details))
        .bind(&orchestration.statistics)
        .bind(&orchestration.error_details)
        .bind(&orchestration.rollback_reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn upsert_progress(&self, entry: &ProgressTrackingEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO progress_tracking (
                progress_id, orchestration_id, phase, step, percentage, items_processed,
                items_total, status, message, started_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (orchestration_id, phase, step) DO UPDATE
            SET percentage = EXCLUDED.percentage,
                items_processed = EXCLUDED.items_processed,
                items_total = EXCLUDED.items_total,
                status = EXCLUDED.status,
                message = EXCLUDED.message,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(entry.progress_id)
        .bind(entry.orchestration_id)
        .bind(&entry.phase)
        .bind(&entry.step)
        .bind(entry.percentage)
        .bind(entry.items_processed)
        .bind(entry.items_total)
        .bind(entry.status.as_str())
        .bind(&entry.message)
        .bind(entry.started_at)
        .bind(entry.updated_at)
        .bind(entry.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_progress(&self, orchestration_id: Uuid) -> Result<Vec<ProgressTrackingEntry>> {
        let rows = sqlx::query_as::<_, ProgressRow>(
            "SELECT * FROM progress_tracking WHERE orchestration_id = $1 ORDER BY started_at",
        )
        .bind(orchestration_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn add_dependency(&self, dependency: &OrchestrationDependency) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orchestration_dependencies (
                dependency_id, orchestration_id, depends_on_orchestration_id,
                dependency_type, created_at
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(dependency.dependency_id)
        .bind(dependency.orchestration_id)
        .bind(dependency.depends_on_orchestration_id)
        .bind(dependency.dependency_type.as_str())
        .bind(dependency.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dependencies_of(
        &self,
        orchestration_id: Uuid,
    ) -> Result<Vec<OrchestrationDependency>> {
        let rows = sqlx::query_as::<_, OrchestrationDependencyRow>(
            "SELECT * FROM orchestration_dependencies WHERE orchestration_id = $1",
        )
        .bind(orchestration_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

// ---------------------------------------------------------------------------
// Rollback audit
// ---------------------------------------------------------------------------

#[async_trait]
impl RollbackStore for PgStore {
    async fn append_action(&self, action: &RollbackAction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rollback_actions (
                action_id, orchestration_id, batch_id, action_type, entity_type,
                target_phase, reason, rollback_details, executed_by, executed_at,
                success, error_message, recovery_data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(action.action_id)
        .bind(action.orchestration_id)
        .bind(action.batch_id)
        .bind(action.action_type.as_str())
        .bind(&action.entity_type)
        .bind(&action.target_phase)
        .bind(&action.reason)
        .bind(&action.rollback_details)
        .bind(&action.executed_by)
        .bind(action.executed_at)
        .bind(action.success)
        .bind(&action.error_message)
        .bind(&action.recovery_data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn actions_for(&self, orchestration_id: Uuid) -> Result<Vec<RollbackAction>> {
        let rows = sqlx::query_as::<_, RollbackActionRow>(
            "SELECT * FROM rollback_actions WHERE orchestration_id = $1 ORDER BY executed_at",
        )
        .bind(orchestration_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

#[async_trait]
impl ScheduleStore for PgStore {
    async fn insert_schedule(&self, schedule: &ScheduledImport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_imports (
                schedule_id, name, import_type, tenant_id, requester, schedule_expression,
                recurring, priority, status, next_execution_at, last_execution_at,
                execution_count, success_count, failure_count, import_configuration,
                resource_requirements, expected_duration_minutes, max_retries,
                retry_delay_minutes, timeout_minutes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(schedule.schedule_id)
        .bind(&schedule.name)
        .bind(&schedule.import_type)
        .bind(&schedule.tenant_id)
        .bind(&schedule.requester)
        .bind(&schedule.schedule_expression)
        .bind(schedule.recurring)
        .bind(schedule.priority)
        .bind(schedule.status.as_str())
        .bind(schedule.next_execution_at)
        .bind(schedule.last_execution_at)
        .bind(schedule.execution_count)
        .bind(schedule.success_count)
        .bind(schedule.failure_count)
        .bind(&schedule.import_configuration)
        .bind(Json(&schedule.resource_requirements))
        .bind(schedule.expected_duration_minutes)
        .bind(schedule.max_retries)
        .bind(schedule.retry_delay_minutes)
        .bind(schedule.timeout_minutes)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Option<ScheduledImport>> {
        sqlx::query_as::<_, ScheduledImportRow>(
            "SELECT * FROM scheduled_imports WHERE schedule_id = $1",
        )
        .bind(schedule_id)
        .fetch_optional(&self.pool)
        .await?
        .map(ScheduledImport::try_from)
        .transpose()
    }

    async fn list_schedules(&self) -> Result<Vec<ScheduledImport>> {
        let rows = sqlx::query_as::<_, ScheduledImportRow>(
            "SELECT * FROM scheduled_imports ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledImport>> {
        let rows = sqlx::query_as::<_, ScheduledImportRow>(
            r#"
            SELECT * FROM scheduled_imports
            WHERE status = 'SCHEDULED' AND next_execution_at <= $1
            ORDER BY next_execution_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn save_schedule(
        &self,
        schedule: &ScheduledImport,
        expected_status: ScheduleStatus,
        expected_execution_count: i32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_imports
            SET status = $4,
                next_execution_at = $5,
                last_execution_at = $6,
                execution_count = $7,
                success_count = $8,
                failure_count = $9,
                updated_at = $10
            WHERE schedule_id = $1 AND status = $2 AND execution_count = $3
            "#,
        )
        .bind(schedule.schedule_id)
        .bind(expected_status.as_str())
        .bind(expected_execution_count)
        .bind(schedule.status.as_str())
        .bind(schedule.next_execution_at)
        .bind(schedule.last_execution_at)
        .bind(schedule.execution_count)
        .bind(schedule.success_count)
        .bind(schedule.failure_count)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_execution(&self, execution: &ScheduleExecutionHistory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedule_execution_history (
                execution_id, schedule_id, request_id, started_at, completed_at, status,
                records_processed, error_message, execution_details
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(execution.execution_id)
        .bind(execution.schedule_id)
        .bind(execution.request_id)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.status.as_str())
        .bind(execution.records_processed)
        .bind(&execution.error_message)
        .bind(&execution.execution_details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_execution(&self, execution: &ScheduleExecutionHistory) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE schedule_execution_history
            SET request_id = $2, completed_at = $3, status = $4, records_processed = $5,
                error_message = $6, execution_details = $7
            WHERE execution_id = $1
            "#,
        )
        .bind(execution.execution_id)
        .bind(execution.request_id)
        .bind(execution.completed_at)
        .bind(execution.status.as_str())
        .bind(execution.records_processed)
        .bind(&execution.error_message)
        .bind(&execution.execution_details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<ScheduleExecutionHistory>> {
        sqlx::query_as::<_, ExecutionRow>(
            "SELECT * FROM schedule_execution_history WHERE execution_id = $1",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?
        .map(ScheduleExecutionHistory::try_from)
        .transpose()
    }

    async fn executions_for(&self, schedule_id: Uuid) -> Result<Vec<ScheduleExecutionHistory>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            "SELECT * FROM schedule_execution_history WHERE schedule_id = $1 ORDER BY started_at",
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn insert_reservation(&self, reservation: &ResourceReservation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resource_reservations (
                reservation_id, schedule_id, execution_id, tenant_id, resource_type,
                amount, reserved_from, reserved_until, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(reservation.reservation_id)
        .bind(reservation.schedule_id)
        .bind(reservation.execution_id)
        .bind(&reservation.tenant_id)
        .bind(&reservation.resource_type)
        .bind(reservation.amount)
        .bind(reservation.reserved_from)
        .bind(reservation.reserved_until)
        .bind(reservation.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_reservation_status(
        &self,
        execution_id: Uuid,
        status: ReservationStatus,
    ) -> Result<u64> {
        let result =
            sqlx::query("UPDATE resource_reservations SET status = $2 WHERE execution_id = $1")
                .bind(execution_id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn reservations_for(&self, schedule_id: Uuid) -> Result<Vec<ResourceReservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            "SELECT * FROM resource_reservations WHERE schedule_id = $1 ORDER BY reserved_from",
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn reserved_amount(
        &self,
        tenant_id: &str,
        resource_type: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<f64> {
        let (amount,): (f64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount), 0)::DOUBLE PRECISION
            FROM resource_reservations
            WHERE tenant_id = $1
              AND resource_type = $2
              AND status IN ('RESERVED', 'ACTIVE')
              AND reserved_from < $4
              AND $3 < reserved_until
            "#,
        )
        .bind(tenant_id)
        .bind(resource_type)
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;
        Ok(amount)
    }
}

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

#[async_trait]
impl TenantLimitStore for PgStore {
    async fn put_limit(&self, limit: &TenantResourceLimit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_resource_limits (tenant_id, resource_type, unit, limit_value, enforcement)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, resource_type) DO UPDATE
            SET unit = EXCLUDED.unit,
                limit_value = EXCLUDED.limit_value,
                enforcement = EXCLUDED.enforcement
            "#,
        )
        .bind(&limit.tenant_id)
        .bind(&limit.resource_type)
        .bind(&limit.unit)
        .bind(limit.limit_value)
        .bind(limit.enforcement.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn limits_for(&self, tenant_id: &str) -> Result<Vec<TenantResourceLimit>> {
        let rows = sqlx::query_as::<_, TenantLimitRow>(
            "SELECT * FROM tenant_resource_limits WHERE tenant_id = $1 ORDER BY resource_type",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl EntityDependencyStore for PgStore {
    async fn put_entity_dependency(&self, dependency: &EntityDependency) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_dependencies (
                entity_type, depends_on, import_order, required, validation_query, rollback_query
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (entity_type) DO UPDATE
            SET depends_on = EXCLUDED.depends_on,
                import_order = EXCLUDED.import_order,
                required = EXCLUDED.required,
                validation_query = EXCLUDED.validation_query,
                rollback_query = EXCLUDED.rollback_query
            "#,
        )
        .bind(&dependency.entity_type)
        .bind(&dependency.depends_on)
        .bind(dependency.import_order)
        .bind(dependency.required)
        .bind(&dependency.validation_query)
        .bind(&dependency.rollback_query)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn entity_dependencies(&self) -> Result<Vec<EntityDependency>> {
        let rows = sqlx::query_as::<_, EntityDependencyRow>(
            "SELECT * FROM entity_dependencies ORDER BY import_order, entity_type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EntityDependency::from).collect())
    }
}

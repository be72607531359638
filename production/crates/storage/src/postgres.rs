use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime, Transaction};
use kernel_types::*;
use std::collections::HashMap;
use tokio_postgres::error::SqlState;
use tokio_postgres::NoTls;
use tracing::{debug, info};

use crate::OperationRepository;

const IDEMPOTENCY_CONSTRAINT: &str = "kernel_operations_idempotency_key_unique";

/// Connection settings for the PostgreSQL backend
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
}

pub struct PostgresStorage {
    pool: Pool,
}

impl PostgresStorage {
    pub async fn new(config: &PostgresConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::StorageError(format!("Invalid connection string: {}", e)))?;

        let mut cfg = Config::new();
        cfg.host = pg_config.get_hosts().first().and_then(|h| match h {
            tokio_postgres::config::Host::Tcp(s) => Some(s.clone()),
            #[allow(unreachable_patterns)]
            _ => None,
        });
        cfg.port = pg_config.get_ports().first().copied();
        cfg.dbname = pg_config.get_dbname().map(|s| s.to_string());
        cfg.user = pg_config.get_user().map(|s| s.to_string());
        cfg.password = pg_config
            .get_password()
            .map(|p| String::from_utf8_lossy(p).to_string());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::StorageError(format!("Failed to create pool: {}", e)))?;

        let storage = Self { pool };
        storage.migrate().await?;

        info!("PostgreSQL storage initialized successfully");

        Ok(storage)
    }

    /// Create the operation tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS kernel_operations (
                    id              UUID PRIMARY KEY,
                    status          TEXT NOT NULL,
                    operation_type  TEXT NOT NULL,
                    idempotency_key TEXT,
                    created_at      TIMESTAMPTZ NOT NULL,
                    body            JSONB NOT NULL,
                    CONSTRAINT kernel_operations_idempotency_key_unique UNIQUE (idempotency_key)
                );
                CREATE INDEX IF NOT EXISTS kernel_operations_status_idx
                    ON kernel_operations (status, created_at DESC);

                CREATE TABLE IF NOT EXISTS kernel_operation_metadata (
                    operation_id UUID PRIMARY KEY REFERENCES kernel_operations (id),
                    body         JSONB NOT NULL
                );

                CREATE TABLE IF NOT EXISTS kernel_state_transitions (
                    id              BIGSERIAL PRIMARY KEY,
                    operation_id    UUID NOT NULL REFERENCES kernel_operations (id),
                    from_status     TEXT NOT NULL,
                    to_status       TEXT NOT NULL,
                    reason          TEXT,
                    transitioned_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS kernel_state_transitions_op_idx
                    ON kernel_state_transitions (operation_id, id);
                "#,
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to run migrations: {}", e)))?;

        Ok(())
    }
}

fn map_insert_error(operation: &Operation, e: tokio_postgres::Error) -> Error {
    match e.as_db_error() {
        Some(db) if db.code() == &SqlState::UNIQUE_VIOLATION => {
            if db.constraint() == Some(IDEMPOTENCY_CONSTRAINT) {
                Error::DuplicateIdempotencyKey(operation.idempotency_key.clone().unwrap_or_default())
            } else {
                Error::DuplicateOperation(operation.id)
            }
        }
        _ => Error::StorageError(format!("Failed to insert operation: {}", e)),
    }
}

/// Overwrite the operation and metadata rows inside `tx`.
async fn write_operation(
    tx: &Transaction<'_>,
    operation: &Operation,
    metadata: &UnifiedOperationMetadata,
) -> Result<()> {
    let body = serde_json::to_value(operation)?;
    let metadata_body = serde_json::to_value(metadata)?;

    let updated = tx
        .execute(
            r#"
            UPDATE kernel_operations
            SET status = $2, body = $3
            WHERE id = $1
            "#,
            &[&operation.id.0, &operation.status.as_str(), &body],
        )
        .await
        .map_err(|e| Error::StorageError(format!("Failed to update operation: {}", e)))?;
    if updated == 0 {
        return Err(Error::OperationNotFound(operation.id));
    }

    let updated = tx
        .execute(
            r#"
            UPDATE kernel_operation_metadata
            SET body = $2
            WHERE operation_id = $1
            "#,
            &[&operation.id.0, &metadata_body],
        )
        .await
        .map_err(|e| Error::StorageError(format!("Failed to update metadata: {}", e)))?;
    if updated == 0 {
        return Err(Error::MetadataNotFound(operation.id));
    }

    Ok(())
}

fn operation_from_body(body: serde_json::Value) -> Result<Operation> {
    Ok(serde_json::from_value(body)?)
}

#[async_trait]
impl OperationRepository for PostgresStorage {
    async fn insert_operation(
        &self,
        operation: &Operation,
        metadata: &UnifiedOperationMetadata,
    ) -> Result<()> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        let body = serde_json::to_value(operation)?;
        let metadata_body = serde_json::to_value(metadata)?;

        let tx = client
            .transaction()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            r#"
            INSERT INTO kernel_operations (id, status, operation_type, idempotency_key, created_at, body)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            &[
                &operation.id.0,
                &operation.status.as_str(),
                &operation.operation_type.as_str(),
                &operation.idempotency_key,
                &operation.created_at,
                &body,
            ],
        )
        .await
        .map_err(|e| map_insert_error(operation, e))?;

        tx.execute(
            r#"
            INSERT INTO kernel_operation_metadata (operation_id, body)
            VALUES ($1, $2)
            "#,
            &[&operation.id.0, &metadata_body],
        )
        .await
        .map_err(|e| Error::StorageError(format!("Failed to insert metadata: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to commit operation: {}", e)))?;

        info!("Persisted operation {} ({})", operation.id, operation.operation_type);

        Ok(())
    }

    async fn get_operation(&self, id: OperationId) -> Result<Option<Operation>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        let row = client
            .query_opt(
                r#"
                SELECT body
                FROM kernel_operations
                WHERE id = $1
                "#,
                &[&id.0],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get operation: {}", e)))?;

        row.map(|r| operation_from_body(r.get(0))).transpose()
    }

    async fn update_operation(
        &self,
        operation: &Operation,
        metadata: &UnifiedOperationMetadata,
    ) -> Result<()> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        let tx = client
            .transaction()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to begin transaction: {}", e)))?;

        write_operation(&tx, operation, metadata).await?;

        tx.commit()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to commit update: {}", e)))?;

        debug!("Updated operation {}", operation.id);
        Ok(())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Operation>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        let row = client
            .query_opt(
                r#"
                SELECT body
                FROM kernel_operations
                WHERE idempotency_key = $1
                "#,
                &[&key],
            )
            .await
            .map_err(|e| {
                Error::StorageError(format!("Failed to look up idempotency key: {}", e))
            })?;

        row.map(|r| operation_from_body(r.get(0))).transpose()
    }

    async fn list_operations(&self, query: &OperationQuery) -> Result<(Vec<Operation>, usize)> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        let status = query.status.map(|s| s.as_str());
        let operation_type = query.operation_type.map(|t| t.as_str());
        let limit_val = query.limit.min(i64::MAX as usize) as i64;
        let offset_val = query.offset.min(i64::MAX as usize) as i64;

        let total_row = client
            .query_one(
                r#"
                SELECT COUNT(*)
                FROM kernel_operations
                WHERE ($1::TEXT IS NULL OR status = $1)
                  AND ($2::TEXT IS NULL OR operation_type = $2)
                "#,
                &[&status, &operation_type],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to count operations: {}", e)))?;
        let total = total_row.get::<_, i64>(0) as usize;

        let rows = client
            .query(
                r#"
                SELECT body
                FROM kernel_operations
                WHERE ($1::TEXT IS NULL OR status = $1)
                  AND ($2::TEXT IS NULL OR operation_type = $2)
                ORDER BY created_at DESC, id DESC
                LIMIT $3 OFFSET $4
                "#,
                &[&status, &operation_type, &limit_val, &offset_val],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to query operations: {}", e)))?;

        let mut operations = Vec::with_capacity(rows.len());
        for row in rows {
            operations.push(operation_from_body(row.get(0))?);
        }

        Ok((operations, total))
    }

    async fn get_metadata(&self, id: OperationId) -> Result<Option<UnifiedOperationMetadata>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        let row = client
            .query_opt(
                r#"
                SELECT body
                FROM kernel_operation_metadata
                WHERE operation_id = $1
                "#,
                &[&id.0],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get metadata: {}", e)))?;

        match row {
            Some(r) => Ok(Some(serde_json::from_value(r.get(0))?)),
            None => Ok(None),
        }
    }

    async fn commit_transition(
        &self,
        operation: &Operation,
        metadata: &UnifiedOperationMetadata,
        record: &StateTransitionRecord,
    ) -> Result<()> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        let tx = client
            .transaction()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to begin transaction: {}", e)))?;

        write_operation(&tx, operation, metadata).await?;

        tx.execute(
            r#"
            INSERT INTO kernel_state_transitions (operation_id, from_status, to_status, reason, transitioned_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
            &[
                &operation.id.0,
                &record.from.as_str(),
                &record.to.as_str(),
                &record.reason,
                &record.timestamp,
            ],
        )
        .await
        .map_err(|e| Error::StorageError(format!("Failed to record transition: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to commit transition: {}", e)))?;

        debug!(
            "Committed transition {} -> {} for operation {}",
            record.from, record.to, operation.id
        );

        Ok(())
    }

    async fn get_transitions(&self, id: OperationId) -> Result<Vec<StateTransitionRecord>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        let rows = client
            .query(
                r#"
                SELECT from_status, to_status, transitioned_at, reason
                FROM kernel_state_transitions
                WHERE operation_id = $1
                ORDER BY id ASC
                "#,
                &[&id.0],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to query transitions: {}", e)))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(StateTransitionRecord {
                from: row.get::<_, String>(0).parse()?,
                to: row.get::<_, String>(1).parse()?,
                timestamp: row.get(2),
                reason: row.get(3),
            });
        }

        Ok(records)
    }

    async fn count_by_status(&self) -> Result<HashMap<OperationStatus, usize>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        let rows = client
            .query(
                r#"
                SELECT status, COUNT(*)
                FROM kernel_operations
                GROUP BY status
                "#,
                &[],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to count by status: {}", e)))?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: OperationStatus = row.get::<_, String>(0).parse()?;
            counts.insert(status, row.get::<_, i64>(1) as usize);
        }

        Ok(counts)
    }

    async fn count_by_type(&self) -> Result<HashMap<OperationType, usize>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::StorageError(format!("Failed to get client: {}", e)))?;

        let rows = client
            .query(
                r#"
                SELECT operation_type, COUNT(*)
                FROM kernel_operations
                GROUP BY operation_type
                "#,
                &[],
            )
            .await
            .map_err(|e| Error::StorageError(format!("Failed to count by type: {}", e)))?;

        let mut counts = HashMap::new();
        for row in rows {
            let operation_type: OperationType = row.get::<_, String>(0).parse()?;
            counts.insert(operation_type, row.get::<_, i64>(1) as usize);
        }

        Ok(counts)
    }
}

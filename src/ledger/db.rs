// src/ledger/db.rs - PostgreSQL-backed ledger and dependent-row stores
use async_trait::async_trait;
use log::{debug, info};
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use uuid::Uuid;

use super::{DependentStore, DependentTable, LedgerStore};
use crate::error::StorageError;
use crate::models::linking::{Decision, LinkingDecision};
use crate::models::records::{EntityId, EntityKind};
use crate::utils::db_connect::PgPool;

const DECISION_COLUMNS: &str =
    "id, uuid, kind, canonical_entity_id, messy_signature, decision, created_at, decided_at";

const LEDGER_SCHEMA: &str = "
DO $$ BEGIN
    CREATE TYPE linking_decision_state AS ENUM ('PENDING', 'APPROVED', 'DENIED');
EXCEPTION
    WHEN duplicate_object THEN NULL;
END $$;

CREATE TABLE IF NOT EXISTS public.linking_decision (
    id BIGSERIAL PRIMARY KEY,
    uuid UUID NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    canonical_entity_id BIGINT,
    messy_signature TEXT NOT NULL,
    decision linking_decision_state NOT NULL DEFAULT 'PENDING',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    decided_at TIMESTAMPTZ
);

CREATE UNIQUE INDEX IF NOT EXISTS linking_decision_key_idx
    ON public.linking_decision (kind, COALESCE(canonical_entity_id, -1), messy_signature);
";

/// Maps unique violations to [`StorageError::UniqueViolation`] so callers can
/// apply their conflict policy; everything else stays a database error.
pub fn map_pg_error(e: tokio_postgres::Error) -> StorageError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        let detail = e
            .as_db_error()
            .map(|db| db.message().to_string())
            .unwrap_or_else(|| e.to_string());
        StorageError::UniqueViolation(detail)
    } else {
        StorageError::Database(e)
    }
}

fn decision_from_row(row: &Row) -> Result<LinkingDecision, StorageError> {
    let kind: String = row.try_get("kind")?;
    Ok(LinkingDecision {
        id: row.try_get("id")?,
        uuid: row.try_get("uuid")?,
        kind: EntityKind::parse(&kind)
            .ok_or_else(|| StorageError::CorruptRow(format!("unknown entity kind '{}'", kind)))?,
        canonical_entity_id: row.try_get("canonical_entity_id")?,
        messy_signature: row.try_get("messy_signature")?,
        decision: row.try_get("decision")?,
        created_at: row.try_get("created_at")?,
        decided_at: row.try_get("decided_at")?,
    })
}

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the decision enum, table and key index if missing.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let conn = self.pool.get().await?;
        conn.batch_execute(LEDGER_SCHEMA).await?;
        info!("Linking decision ledger schema is in place");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn get_or_create_pending(
        &self,
        kind: EntityKind,
        canonical_id: Option<EntityId>,
        signature: &str,
    ) -> Result<(LinkingDecision, bool), StorageError> {
        let conn = self.pool.get().await?;

        let inserted = conn
            .query_opt(
                &*format!(
                    "INSERT INTO public.linking_decision (uuid, kind, canonical_entity_id, messy_signature)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT DO NOTHING
                     RETURNING {}",
                    DECISION_COLUMNS
                ),
                &[&Uuid::new_v4(), &kind.as_str(), &canonical_id, &signature],
            )
            .await?;
        if let Some(row) = inserted {
            let entry = decision_from_row(&row)?;
            debug!("Created pending decision {} for '{}'", entry.uuid, signature);
            return Ok((entry, true));
        }
        drop(conn);

        // Lost the race or the entry already existed: re-read it.
        let entry = self.find(kind, canonical_id, signature).await?.ok_or_else(|| {
            StorageError::CorruptRow(format!(
                "conflicting linking decision for ({}, {:?}, '{}') not found on re-read",
                kind, canonical_id, signature
            ))
        })?;
        Ok((entry, false))
    }

    async fn find(
        &self,
        kind: EntityKind,
        canonical_id: Option<EntityId>,
        signature: &str,
    ) -> Result<Option<LinkingDecision>, StorageError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &*format!(
                    "SELECT {} FROM public.linking_decision
                     WHERE kind = $1
                       AND COALESCE(canonical_entity_id, -1) = COALESCE($2::BIGINT, -1)
                       AND messy_signature = $3",
                    DECISION_COLUMNS
                ),
                &[&kind.as_str(), &canonical_id, &signature],
            )
            .await?;
        row.as_ref().map(decision_from_row).transpose()
    }

    async fn find_approved(
        &self,
        kind: EntityKind,
        signature: &str,
    ) -> Result<Option<LinkingDecision>, StorageError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &*format!(
                    "SELECT {} FROM public.linking_decision
                     WHERE kind = $1 AND messy_signature = $2 AND decision = 'APPROVED'
                     ORDER BY decided_at DESC NULLS LAST, id DESC
                     LIMIT 1",
                    DECISION_COLUMNS
                ),
                &[&kind.as_str(), &signature],
            )
            .await?;
        row.as_ref().map(decision_from_row).transpose()
    }

    async fn get(&self, linking_id: Uuid) -> Result<Option<LinkingDecision>, StorageError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &*format!(
                    "SELECT {} FROM public.linking_decision WHERE uuid = $1",
                    DECISION_COLUMNS
                ),
                &[&linking_id],
            )
            .await?;
        row.as_ref().map(decision_from_row).transpose()
    }

    async fn list_pending(
        &self,
        kind: Option<EntityKind>,
    ) -> Result<Vec<LinkingDecision>, StorageError> {
        let conn = self.pool.get().await?;
        let kind_filter = kind.map(|k| k.as_str());
        let rows = conn
            .query(
                &*format!(
                    "SELECT {} FROM public.linking_decision
                     WHERE decision = 'PENDING' AND ($1::TEXT IS NULL OR kind = $1)
                     ORDER BY id",
                    DECISION_COLUMNS
                ),
                &[&kind_filter],
            )
            .await?;
        rows.iter().map(decision_from_row).collect()
    }

    async fn set_decision(
        &self,
        linking_id: Uuid,
        decision: Decision,
        canonical_id: Option<EntityId>,
    ) -> Result<Option<LinkingDecision>, StorageError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                &*format!(
                    "UPDATE public.linking_decision
                     SET decision = $2, canonical_entity_id = $3, decided_at = NOW()
                     WHERE uuid = $1 AND decision = 'PENDING'
                     RETURNING {}",
                    DECISION_COLUMNS
                ),
                &[&linking_id, &decision, &canonical_id],
            )
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(decision_from_row).transpose()
    }
}

/// Dependent rows in the ingestion tables. Table and column names come from
/// the fixed [`DependentTable`] list, never from input.
pub struct PgDependentStore {
    pool: PgPool,
}

impl PgDependentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependentStore for PgDependentStore {
    async fn bulk_relink(
        &self,
        table: &DependentTable,
        linking_id: Uuid,
        canonical_id: EntityId,
    ) -> Result<u64, StorageError> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "UPDATE public.{} SET {} = $1 WHERE {} = $2",
            table.table, table.fk_column, table.tag_column
        );
        conn.execute(sql.as_str(), &[&canonical_id, &linking_id])
            .await
            .map_err(map_pg_error)
    }

    async fn tagged_rows(
        &self,
        table: &DependentTable,
        linking_id: Uuid,
    ) -> Result<Vec<i64>, StorageError> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "SELECT id FROM public.{} WHERE {} = $1 ORDER BY id",
            table.table, table.tag_column
        );
        let rows = conn.query(sql.as_str(), &[&linking_id]).await?;
        rows.iter()
            .map(|r| r.try_get::<_, i64>("id").map_err(StorageError::from))
            .collect()
    }

    async fn relink_row(
        &self,
        table: &DependentTable,
        row_id: i64,
        canonical_id: EntityId,
    ) -> Result<(), StorageError> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "UPDATE public.{} SET {} = $1 WHERE id = $2",
            table.table, table.fk_column
        );
        conn.execute(sql.as_str(), &[&canonical_id, &row_id])
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    async fn delete_row(&self, table: &DependentTable, row_id: i64) -> Result<(), StorageError> {
        let conn = self.pool.get().await?;
        let sql = format!("DELETE FROM public.{} WHERE id = $1", table.table);
        conn.execute(sql.as_str(), &[&row_id]).await?;
        debug!("Deleted duplicate {} row {}", table.table, row_id);
        Ok(())
    }

    async fn clear_links(&self, table: &DependentTable, linking_id: Uuid) -> Result<u64, StorageError> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "UPDATE public.{} SET {} = NULL, {} = NULL WHERE {} = $1",
            table.table, table.fk_column, table.tag_column, table.tag_column
        );
        Ok(conn.execute(sql.as_str(), &[&linking_id]).await?)
    }
}

//! Postgres-backed [`Store`].
//!
//! Row shapes live here, not in the entities; the pipeline never sees
//! anything but the domain types. Read-side queries are expressed as
//! processor inputs on [`DatabaseProcessor`] so they pick up tracing spans
//! uniformly.

use super::{AccrualDelta, ApplyOutcome, Store, StoreError, apply_delta};
use crate::catalog::EventKind;
use crate::entities::{Accrual, Multiplier, SupportEvent, ValueEntry};
use async_trait::async_trait;
use compact_str::CompactString;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

/// Executes read-side query objects against the pool.
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

// ---------------------------------------------------------------------------
// Row shapes
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct AccrualRow {
    id: Uuid,
    cumulative_seconds: i64,
    elapsed_seconds: i64,
    points: i64,
    money: Decimal,
    currency: CompactString,
    paused: bool,
    locked: bool,
    active: bool,
    reversed: bool,
    multiplier_magnitude: f64,
    multiplier_duration_seconds: Option<i64>,
    multiplier_started_at: Option<OffsetDateTime>,
    multiplier_time: bool,
    multiplier_points: bool,
    multiplier_auto: bool,
}

impl From<AccrualRow> for Accrual {
    fn from(row: AccrualRow) -> Self {
        Accrual {
            id: row.id,
            cumulative_seconds: row.cumulative_seconds,
            elapsed_seconds: row.elapsed_seconds,
            points: row.points,
            money: row.money,
            currency: row.currency,
            paused: row.paused,
            locked: row.locked,
            active: row.active,
            reversed: row.reversed,
            multiplier: Multiplier {
                magnitude: row.multiplier_magnitude,
                duration: row.multiplier_duration_seconds.map(time::Duration::seconds),
                started_at: row.multiplier_started_at,
                applies_to_time: row.multiplier_time,
                applies_to_points: row.multiplier_points,
                from_automatic_source: row.multiplier_auto,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ValueRow {
    kind: EventKind,
    meta: CompactString,
    seconds: i64,
    points: i64,
}

impl From<ValueRow> for ValueEntry {
    fn from(row: ValueRow) -> Self {
        ValueEntry {
            kind: row.kind,
            meta: row.meta,
            seconds: row.seconds,
            points: row.points,
        }
    }
}

// ---------------------------------------------------------------------------
// Read-side query objects
// ---------------------------------------------------------------------------

const SELECT_ACCRUAL: &str = "SELECT id, cumulative_seconds, elapsed_seconds, points, money, \
     currency, paused, locked, active, reversed, \
     multiplier_magnitude, multiplier_duration_seconds, multiplier_started_at, \
     multiplier_time, multiplier_points, multiplier_auto \
     FROM accruals WHERE active";

/// Fetch every accrual row currently flagged active.
#[derive(Debug, Clone, Copy)]
pub struct GetActiveAccruals;

impl Processor<GetActiveAccruals> for DatabaseProcessor {
    type Output = Vec<Accrual>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetActiveAccruals")]
    async fn process(&self, _query: GetActiveAccruals) -> Result<Vec<Accrual>, sqlx::Error> {
        let rows: Vec<AccrualRow> = sqlx::query_as(SELECT_ACCRUAL)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Accrual::from).collect())
    }
}

/// Fetch the full value configuration table.
#[derive(Debug, Clone, Copy)]
pub struct LoadValueEntries;

impl Processor<LoadValueEntries> for DatabaseProcessor {
    type Output = Vec<ValueEntry>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:LoadValueEntries")]
    async fn process(&self, _query: LoadValueEntries) -> Result<Vec<ValueEntry>, sqlx::Error> {
        let rows: Vec<ValueRow> =
            sqlx::query_as("SELECT kind, meta, seconds, points FROM value_entries")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(ValueEntry::from).collect())
    }
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// Production [`Store`] over a Postgres pool.
pub struct PgStore {
    db: DatabaseProcessor,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor { pool },
        }
    }

    fn pool(&self) -> &PgPool {
        &self.db.pool
    }

    async fn write_accrual(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        accrual: &Accrual,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accruals SET cumulative_seconds = $2, elapsed_seconds = $3, points = $4, \
             money = $5, paused = $6, locked = $7, reversed = $8, \
             multiplier_magnitude = $9, multiplier_duration_seconds = $10, \
             multiplier_started_at = $11, multiplier_time = $12, multiplier_points = $13, \
             multiplier_auto = $14 \
             WHERE id = $1",
        )
        .bind(accrual.id)
        .bind(accrual.cumulative_seconds)
        .bind(accrual.elapsed_seconds)
        .bind(accrual.points)
        .bind(accrual.money)
        .bind(accrual.paused)
        .bind(accrual.locked)
        .bind(accrual.reversed)
        .bind(accrual.multiplier.magnitude)
        .bind(accrual.multiplier.duration.map(|d| d.whole_seconds()))
        .bind(accrual.multiplier.started_at)
        .bind(accrual.multiplier.applies_to_time)
        .bind(accrual.multiplier.applies_to_points)
        .bind(accrual.multiplier.from_automatic_source)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn upsert_event(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: &SupportEvent,
        applied: bool,
        accrual_id: Option<Uuid>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO support_events \
             (external_id, platform, occurred_at, kind, command, value, seconds_value, \
              points_value, amount, currency, money, seconds_multiplier, points_multiplier, \
              applied, accrual_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (external_id, platform) DO UPDATE \
             SET applied = EXCLUDED.applied, accrual_id = EXCLUDED.accrual_id",
        )
        .bind(event.id.external_id.as_str())
        .bind(event.id.platform)
        .bind(event.occurred_at)
        .bind(event.kind)
        .bind(event.command)
        .bind(event.value.as_str())
        .bind(event.seconds_value)
        .bind(event.points_value)
        .bind(event.amount)
        .bind(event.currency.as_str())
        .bind(event.money)
        .bind(event.seconds_multiplier)
        .bind(event.points_multiplier)
        .bind(applied)
        .bind(accrual_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn active_accrual(&self) -> Result<Option<Accrual>, StoreError> {
        let mut active = self.db.process(GetActiveAccruals).await?;
        // Single-row assumption is defended here, not by the schema.
        if active.len() == 1 {
            Ok(active.pop())
        } else {
            Ok(None)
        }
    }

    #[tracing::instrument(skip_all, err, fields(event = %event.id))]
    async fn record_event(&self, event: &SupportEvent) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO support_events \
             (external_id, platform, occurred_at, kind, command, value, seconds_value, \
              points_value, amount, currency, money, seconds_multiplier, points_multiplier, \
              applied, accrual_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, false, NULL) \
             ON CONFLICT (external_id, platform) DO NOTHING",
        )
        .bind(event.id.external_id.as_str())
        .bind(event.id.platform)
        .bind(event.occurred_at)
        .bind(event.kind)
        .bind(event.command)
        .bind(event.value.as_str())
        .bind(event.seconds_value)
        .bind(event.points_value)
        .bind(event.amount)
        .bind(event.currency.as_str())
        .bind(event.money)
        .bind(event.seconds_multiplier)
        .bind(event.points_multiplier)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, err, fields(event = %event.id))]
    async fn apply_event(
        &self,
        event: &SupportEvent,
        delta: &AccrualDelta,
    ) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self.pool().begin().await?;

        let rows: Vec<AccrualRow> = sqlx::query_as(&format!("{SELECT_ACCRUAL} FOR UPDATE"))
            .fetch_all(&mut *tx)
            .await?;
        let mut accruals: Vec<Accrual> = rows.into_iter().map(Accrual::from).collect();
        let Some(accrual) = (accruals.len() == 1).then(|| accruals.remove(0)) else {
            return Ok(ApplyOutcome::NoActiveAccrual);
        };

        let already: Option<bool> = sqlx::query_scalar(
            "SELECT applied FROM support_events \
             WHERE external_id = $1 AND platform = $2 FOR UPDATE",
        )
        .bind(event.id.external_id.as_str())
        .bind(event.id.platform)
        .fetch_optional(&mut *tx)
        .await?;
        if already == Some(true) {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let (next, effective) = apply_delta(&accrual, delta);
        Self::write_accrual(&mut tx, &next).await?;
        Self::upsert_event(&mut tx, event, true, Some(next.id)).await?;
        tx.commit().await?;

        Ok(ApplyOutcome::Applied {
            effective,
            accrual: next,
        })
    }

    async fn load_value_entries(&self) -> Result<Vec<ValueEntry>, StoreError> {
        Ok(self.db.process(LoadValueEntries).await?)
    }

    #[tracing::instrument(skip_all, err)]
    async fn upsert_value_entries(&self, entries: &[ValueEntry]) -> Result<u64, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut query_builder =
            sqlx::QueryBuilder::new("INSERT INTO value_entries (kind, meta, seconds, points) ");
        query_builder.push_values(entries, |mut b, entry| {
            b.push_bind(entry.kind)
                .push_bind(entry.meta.as_str())
                .push_bind(entry.seconds)
                .push_bind(entry.points);
        });
        query_builder.push(
            " ON CONFLICT (kind, meta) DO UPDATE \
             SET seconds = EXCLUDED.seconds, points = EXCLUDED.points",
        );

        let result = query_builder.build().execute(self.pool()).await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// DATABASE MODULE
// =============================================================================
// PostgreSQL backend for the ledger store.
//
// NOTES:
// - One connection pool shared by all requests
// - Migrations are inline, idempotent SQL run at startup
// - Writes are conditional on the version column:
//     UPDATE ... SET ..., version = version + 1
//     WHERE id = $1 AND version = $2
//   so two scans racing on the same box can never both win with stale data.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{BoxRecord, DailySales, PackStatus, TicketPack};
use crate::store::LedgerStore;

/// Column list shared by every box query
const BOX_COLUMNS: &str = "id, store_id, box_number, game_number, ticket_serial, \
     opening_number, closing_number, ticket_cost, is_active, last_updated, \
     last_reset_on, created_at, version";

/// Column list shared by every ticket pack query
const PACK_COLUMNS: &str = "id, store_id, game_number, game_name, start_serial, end_serial, \
     current_serial, ticket_price, status, total_tickets, remaining_tickets, scanned_count, \
     today_open_number, last_closing_number, last_reset_date, activation_date, \
     deactivation_date, return_date, game_image, created_at, updated_at, version";

/// Column list shared by every daily sales query
const SALES_COLUMNS: &str = "id, store_id, sales_date, instant_sales, online_sales, \
     lotto_payout, debit_card_deduction, total_sales, net_payout, status, notes, \
     created_at, updated_at, version";

/// Postgres error code for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

// -----------------------------------------------------------------------------
// DATABASE WRAPPER
// -----------------------------------------------------------------------------
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    // -------------------------------------------------------------------------
    // CONNECTION
    // -------------------------------------------------------------------------
    /// Create a new database connection pool
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(2)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .idle_timeout(std::time::Duration::from_secs(300))
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { pool })
    }

    // -------------------------------------------------------------------------
    // MIGRATIONS
    // -------------------------------------------------------------------------
    /// Create the ledger and sales tables if they don't exist.
    pub async fn run_migrations(&self) -> Result<()> {
        // Postgres has no CREATE TYPE IF NOT EXISTS
        sqlx::query(
            r#"
            DO $$ BEGIN
                CREATE TYPE pack_status AS ENUM ('active', 'inactive', 'returned');
            EXCEPTION
                WHEN duplicate_object THEN NULL;
            END $$
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create pack_status type")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS boxes (
                id UUID PRIMARY KEY,
                store_id VARCHAR(64) NOT NULL,
                box_number VARCHAR(64) NOT NULL,
                game_number VARCHAR(64) NOT NULL,
                ticket_serial VARCHAR(128) NOT NULL,
                opening_number BIGINT NOT NULL DEFAULT 0,
                closing_number BIGINT NOT NULL DEFAULT 0,
                ticket_cost NUMERIC(12, 2) NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_reset_on DATE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                version BIGINT NOT NULL DEFAULT 0,

                CONSTRAINT boxes_store_number UNIQUE (store_id, box_number),
                CONSTRAINT boxes_non_negative CHECK (opening_number >= 0 AND closing_number >= 0),
                CONSTRAINT boxes_positive_cost CHECK (ticket_cost > 0)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create boxes table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_boxes_store_active ON boxes(store_id, is_active)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create boxes index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ticket_packs (
                id UUID PRIMARY KEY,
                store_id VARCHAR(64) NOT NULL,
                game_number VARCHAR(64) NOT NULL,
                game_name VARCHAR(255) NOT NULL,
                start_serial BIGINT NOT NULL,
                end_serial BIGINT NOT NULL,
                current_serial BIGINT,
                ticket_price NUMERIC(12, 2) NOT NULL,
                status pack_status NOT NULL DEFAULT 'active',
                total_tickets INTEGER NOT NULL,
                remaining_tickets INTEGER NOT NULL,
                scanned_count INTEGER NOT NULL DEFAULT 0,
                today_open_number BIGINT,
                last_closing_number BIGINT,
                last_reset_date TIMESTAMPTZ,
                activation_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deactivation_date TIMESTAMPTZ,
                return_date TIMESTAMPTZ,
                game_image TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                version BIGINT NOT NULL DEFAULT 0,

                CONSTRAINT packs_serial_range CHECK (start_serial >= 0 AND start_serial <= end_serial),
                CONSTRAINT packs_current_in_range CHECK (
                    current_serial IS NULL OR current_serial BETWEEN start_serial AND end_serial
                ),
                CONSTRAINT packs_remaining CHECK (
                    remaining_tickets >= 0
                    AND remaining_tickets <= total_tickets
                    AND remaining_tickets = total_tickets - scanned_count
                )
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create ticket_packs table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_packs_store_status ON ticket_packs(store_id, status)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create ticket_packs status index")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_packs_game_store ON ticket_packs(game_number, store_id)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create ticket_packs game index")?;

        sqlx::query(
            r#"
            DO $$ BEGIN
                CREATE TYPE sales_status AS ENUM ('pending', 'completed', 'cancelled');
            EXCEPTION
                WHEN duplicate_object THEN NULL;
            END $$
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create sales_status type")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_sales (
                id UUID PRIMARY KEY,
                store_id VARCHAR(64) NOT NULL,
                sales_date DATE NOT NULL,
                instant_sales NUMERIC(12, 2) NOT NULL DEFAULT 0,
                online_sales NUMERIC(12, 2) NOT NULL DEFAULT 0,
                lotto_payout NUMERIC(12, 2) NOT NULL DEFAULT 0,
                debit_card_deduction NUMERIC(12, 2) NOT NULL DEFAULT 0,
                total_sales NUMERIC(14, 2) NOT NULL,
                net_payout NUMERIC(14, 2) NOT NULL,
                status sales_status NOT NULL DEFAULT 'pending',
                notes TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                version BIGINT NOT NULL DEFAULT 0,

                CONSTRAINT daily_sales_store_date UNIQUE (store_id, sales_date),
                CONSTRAINT daily_sales_non_negative CHECK (
                    instant_sales >= 0 AND online_sales >= 0
                    AND lotto_payout >= 0 AND debit_card_deduction >= 0
                )
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create daily_sales table")?;

        Ok(())
    }
}

fn map_insert_error(err: sqlx::Error, what: String) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            AppError::Validation(format!("{} already exists", what))
        }
        _ => AppError::Database(err),
    }
}

// =============================================================================
// LEDGER STORE IMPLEMENTATION
// =============================================================================
#[async_trait]
impl LedgerStore for Database {
    // -------------------------------------------------------------------------
    // BOXES
    // -------------------------------------------------------------------------
    async fn insert_box(&self, record: &BoxRecord) -> AppResult<BoxRecord> {
        let start = Instant::now();
        let query = format!(
            r#"
            INSERT INTO boxes ({BOX_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {BOX_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, BoxRecord>(&query)
            .bind(record.id)
            .bind(&record.store_id)
            .bind(&record.box_number)
            .bind(&record.game_number)
            .bind(&record.ticket_serial)
            .bind(record.opening_number)
            .bind(record.closing_number)
            .bind(record.ticket_cost)
            .bind(record.is_active)
            .bind(record.last_updated)
            .bind(record.last_reset_on)
            .bind(record.created_at)
            .bind(record.version)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                map_insert_error(
                    e,
                    format!("box {} in store {}", record.box_number, record.store_id),
                )
            })?;

        metrics::record_db_query("insert", start.elapsed().as_secs_f64());
        Ok(row)
    }

    async fn get_box(&self, id: Uuid) -> AppResult<Option<BoxRecord>> {
        let start = Instant::now();
        let query = format!("SELECT {BOX_COLUMNS} FROM boxes WHERE id = $1");
        let row = sqlx::query_as::<_, BoxRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(row)
    }

    async fn find_box_by_number(
        &self,
        store_id: &str,
        box_number: &str,
    ) -> AppResult<Option<BoxRecord>> {
        let start = Instant::now();
        let query =
            format!("SELECT {BOX_COLUMNS} FROM boxes WHERE store_id = $1 AND box_number = $2");
        let row = sqlx::query_as::<_, BoxRecord>(&query)
            .bind(store_id)
            .bind(box_number)
            .fetch_optional(&self.pool)
            .await?;

        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(row)
    }

    async fn list_active_boxes(&self, store_id: &str) -> AppResult<Vec<BoxRecord>> {
        let start = Instant::now();
        let query = format!(
            r#"
            SELECT {BOX_COLUMNS}
            FROM boxes
            WHERE store_id = $1 AND is_active
            ORDER BY last_updated DESC
            "#
        );
        let rows = sqlx::query_as::<_, BoxRecord>(&query)
            .bind(store_id)
            .fetch_all(&self.pool)
            .await?;

        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(rows)
    }

    async fn update_box(
        &self,
        record: &BoxRecord,
        expected_version: i64,
    ) -> AppResult<Option<BoxRecord>> {
        let start = Instant::now();
        let query = format!(
            r#"
            UPDATE boxes
            SET game_number = $3,
                ticket_serial = $4,
                opening_number = $5,
                closing_number = $6,
                ticket_cost = $7,
                is_active = $8,
                last_updated = $9,
                last_reset_on = $10,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {BOX_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, BoxRecord>(&query)
            .bind(record.id)
            .bind(expected_version)
            .bind(&record.game_number)
            .bind(&record.ticket_serial)
            .bind(record.opening_number)
            .bind(record.closing_number)
            .bind(record.ticket_cost)
            .bind(record.is_active)
            .bind(record.last_updated)
            .bind(record.last_reset_on)
            .fetch_optional(&self.pool)
            .await?;

        metrics::record_db_query("update", start.elapsed().as_secs_f64());
        Ok(row)
    }

    // -------------------------------------------------------------------------
    // TICKET PACKS
    // -------------------------------------------------------------------------
    async fn insert_pack(&self, pack: &TicketPack) -> AppResult<TicketPack> {
        let start = Instant::now();
        let query = format!(
            r#"
            INSERT INTO ticket_packs ({PACK_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22)
            RETURNING {PACK_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TicketPack>(&query)
            .bind(pack.id)
            .bind(&pack.store_id)
            .bind(&pack.game_number)
            .bind(&pack.game_name)
            .bind(pack.start_serial)
            .bind(pack.end_serial)
            .bind(pack.current_serial)
            .bind(pack.ticket_price)
            .bind(pack.status)
            .bind(pack.total_tickets)
            .bind(pack.remaining_tickets)
            .bind(pack.scanned_count)
            .bind(pack.today_open_number)
            .bind(pack.last_closing_number)
            .bind(pack.last_reset_date)
            .bind(pack.activation_date)
            .bind(pack.deactivation_date)
            .bind(pack.return_date)
            .bind(&pack.game_image)
            .bind(pack.created_at)
            .bind(pack.updated_at)
            .bind(pack.version)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_insert_error(e, format!("ticket pack {}", pack.id)))?;

        metrics::record_db_query("insert", start.elapsed().as_secs_f64());
        Ok(row)
    }

    async fn get_pack(&self, id: Uuid) -> AppResult<Option<TicketPack>> {
        let start = Instant::now();
        let query = format!("SELECT {PACK_COLUMNS} FROM ticket_packs WHERE id = $1");
        let row = sqlx::query_as::<_, TicketPack>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(row)
    }

    async fn list_packs(
        &self,
        store_id: &str,
        status: Option<PackStatus>,
    ) -> AppResult<Vec<TicketPack>> {
        let start = Instant::now();
        let rows = match status {
            Some(status) => {
                let order = match status {
                    PackStatus::Active => "game_number ASC",
                    PackStatus::Inactive => "deactivation_date DESC NULLS LAST",
                    PackStatus::Returned => "return_date DESC NULLS LAST",
                };
                let query = format!(
                    r#"
                    SELECT {PACK_COLUMNS}
                    FROM ticket_packs
                    WHERE store_id = $1 AND status = $2
                    ORDER BY {order}
                    "#
                );
                sqlx::query_as::<_, TicketPack>(&query)
                    .bind(store_id)
                    .bind(status)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let query = format!(
                    r#"
                    SELECT {PACK_COLUMNS}
                    FROM ticket_packs
                    WHERE store_id = $1
                    ORDER BY updated_at DESC
                    "#
                );
                sqlx::query_as::<_, TicketPack>(&query)
                    .bind(store_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(rows)
    }

    async fn update_pack(
        &self,
        pack: &TicketPack,
        expected_version: i64,
    ) -> AppResult<Option<TicketPack>> {
        let start = Instant::now();
        let query = format!(
            r#"
            UPDATE ticket_packs
            SET current_serial = $3,
                status = $4,
                remaining_tickets = $5,
                scanned_count = $6,
                today_open_number = $7,
                last_closing_number = $8,
                last_reset_date = $9,
                deactivation_date = $10,
                return_date = $11,
                updated_at = $12,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {PACK_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TicketPack>(&query)
            .bind(pack.id)
            .bind(expected_version)
            .bind(pack.current_serial)
            .bind(pack.status)
            .bind(pack.remaining_tickets)
            .bind(pack.scanned_count)
            .bind(pack.today_open_number)
            .bind(pack.last_closing_number)
            .bind(pack.last_reset_date)
            .bind(pack.deactivation_date)
            .bind(pack.return_date)
            .bind(pack.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        metrics::record_db_query("update", start.elapsed().as_secs_f64());
        Ok(row)
    }

    // -------------------------------------------------------------------------
    // DAILY SALES
    // -------------------------------------------------------------------------
    async fn insert_sales(&self, record: &DailySales) -> AppResult<DailySales> {
        let start = Instant::now();
        let query = format!(
            r#"
            INSERT INTO daily_sales ({SALES_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {SALES_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, DailySales>(&query)
            .bind(record.id)
            .bind(&record.store_id)
            .bind(record.sales_date)
            .bind(record.instant_sales)
            .bind(record.online_sales)
            .bind(record.lotto_payout)
            .bind(record.debit_card_deduction)
            .bind(record.total_sales)
            .bind(record.net_payout)
            .bind(record.status)
            .bind(&record.notes)
            .bind(record.created_at)
            .bind(record.updated_at)
            .bind(record.version)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                map_insert_error(
                    e,
                    format!("sales for {} in store {}", record.sales_date, record.store_id),
                )
            })?;

        metrics::record_db_query("insert", start.elapsed().as_secs_f64());
        Ok(row)
    }

    async fn get_sales(&self, id: Uuid) -> AppResult<Option<DailySales>> {
        let start = Instant::now();
        let query = format!("SELECT {SALES_COLUMNS} FROM daily_sales WHERE id = $1");
        let row = sqlx::query_as::<_, DailySales>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(row)
    }

    async fn find_sales_by_date(
        &self,
        store_id: &str,
        date: NaiveDate,
    ) -> AppResult<Option<DailySales>> {
        let start = Instant::now();
        let query = format!(
            "SELECT {SALES_COLUMNS} FROM daily_sales WHERE store_id = $1 AND sales_date = $2"
        );
        let row = sqlx::query_as::<_, DailySales>(&query)
            .bind(store_id)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;

        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(row)
    }

    async fn list_sales(
        &self,
        store_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<DailySales>> {
        let start = Instant::now();
        let query = format!(
            r#"
            SELECT {SALES_COLUMNS}
            FROM daily_sales
            WHERE store_id = $1 AND sales_date BETWEEN $2 AND $3
            ORDER BY sales_date ASC
            "#
        );
        let rows = sqlx::query_as::<_, DailySales>(&query)
            .bind(store_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        metrics::record_db_query("select", start.elapsed().as_secs_f64());
        Ok(rows)
    }

    async fn update_sales(
        &self,
        record: &DailySales,
        expected_version: i64,
    ) -> AppResult<Option<DailySales>> {
        let start = Instant::now();
        let query = format!(
            r#"
            UPDATE daily_sales
            SET instant_sales = $3,
                online_sales = $4,
                lotto_payout = $5,
                debit_card_deduction = $6,
                total_sales = $7,
                net_payout = $8,
                status = $9,
                notes = $10,
                updated_at = $11,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING {SALES_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, DailySales>(&query)
            .bind(record.id)
            .bind(expected_version)
            .bind(record.instant_sales)
            .bind(record.online_sales)
            .bind(record.lotto_payout)
            .bind(record.debit_card_deduction)
            .bind(record.total_sales)
            .bind(record.net_payout)
            .bind(record.status)
            .bind(&record.notes)
            .bind(record.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        metrics::record_db_query("update", start.elapsed().as_secs_f64());
        Ok(row)
    }

    // -------------------------------------------------------------------------
    // HEALTH CHECK
    // -------------------------------------------------------------------------
    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

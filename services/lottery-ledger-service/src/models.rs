// =============================================================================
// MODELS MODULE
// =============================================================================
// Data structures used throughout the service: the persisted ledger and
// sales records, API request/response bodies, health checks and error bodies.
//
// NOTES:
// - JSON uses camelCase (the scanner front-end's convention)
// - FromRow maps Postgres rows straight onto the records
// - Every record carries a `version` used for optimistic concurrency
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::serial::SerialInput;

// =============================================================================
// BOX
// =============================================================================
// One physical ticket dispenser slot. Ledger transitions live in ledger.rs.
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BoxRecord {
    pub id: Uuid,

    /// Owning store. Boxes are never shared between stores.
    pub store_id: String,

    /// Slot label, unique per store
    pub box_number: String,

    /// Game currently loaded in the dispenser
    pub game_number: String,

    /// Serial prefix of the loaded pack
    pub ticket_serial: String,

    /// Baseline for today's sales
    pub opening_number: i64,

    /// Advances on every scan / manual entry
    pub closing_number: i64,

    /// Unit price of one ticket
    pub ticket_cost: Decimal,

    /// Boxes are deactivated, never deleted
    pub is_active: bool,

    pub last_updated: DateTime<Utc>,

    /// Business day of the last applied daily reset
    pub last_reset_on: Option<NaiveDate>,

    pub created_at: DateTime<Utc>,

    /// Optimistic concurrency token, bumped on every write
    pub version: i64,
}

// =============================================================================
// TICKET PACK
// =============================================================================
/// Lifecycle of a ticket pack. `Inactive` and `Returned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "pack_status", rename_all = "lowercase")]
pub enum PackStatus {
    Active,
    Inactive,
    Returned,
}

impl PackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackStatus::Active => "active",
            PackStatus::Inactive => "inactive",
            PackStatus::Returned => "returned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PackStatus::Active)
    }
}

impl std::fmt::Display for PackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One printed pack of tickets with a bounded serial range. Tracker
/// transitions live in tracker.rs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TicketPack {
    pub id: Uuid,
    pub store_id: String,
    pub game_number: String,
    pub game_name: String,

    /// Inclusive serial bounds
    pub start_serial: i64,
    pub end_serial: i64,

    /// Last accepted scan
    pub current_serial: Option<i64>,

    pub ticket_price: Decimal,
    pub status: PackStatus,

    pub total_tickets: i32,
    pub remaining_tickets: i32,
    pub scanned_count: i32,

    /// Opening serial for today (carried from yesterday's closing)
    pub today_open_number: Option<i64>,
    pub last_closing_number: Option<i64>,
    pub last_reset_date: Option<DateTime<Utc>>,

    pub activation_date: DateTime<Utc>,
    pub deactivation_date: Option<DateTime<Utc>>,
    pub return_date: Option<DateTime<Utc>>,

    pub game_image: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub version: i64,
}

// =============================================================================
// DAILY SALES
// =============================================================================
/// Reconciliation state of a day's sales record. Only `Pending` records can
/// still be edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "sales_status", rename_all = "lowercase")]
pub enum SalesStatus {
    Pending,
    Completed,
    Cancelled,
}

impl SalesStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalesStatus::Pending => "pending",
            SalesStatus::Completed => "completed",
            SalesStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SalesStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// End-of-day cash reconciliation for one store, one record per business
/// day. Transitions live in sales.rs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailySales {
    pub id: Uuid,
    pub store_id: String,
    pub sales_date: NaiveDate,

    /// Scratch-off sales counted from boxes and packs
    pub instant_sales: Decimal,
    /// Terminal (draw game) sales
    pub online_sales: Decimal,
    /// Prizes paid out over the counter
    pub lotto_payout: Decimal,
    pub debit_card_deduction: Decimal,

    /// instant + online
    pub total_sales: Decimal,
    /// total - payout - debit card deduction; may be negative
    pub net_payout: Decimal,

    pub status: SalesStatus,
    pub notes: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

// =============================================================================
// API REQUEST STRUCTURES
// =============================================================================

/// Body of `POST /api/boxes`
///
/// # Example JSON
/// ```json
/// { "boxNumber": "7", "gameNumber": "1432", "ticketSerial": "1432-0045", "ticketCost": "5.00" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBoxRequest {
    pub box_number: String,
    pub game_number: String,
    pub ticket_serial: String,
    pub ticket_cost: Decimal,
}

/// Body of `POST /api/boxes/{id}/load` (new game pack in an existing slot)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBoxRequest {
    pub game_number: String,
    pub ticket_serial: String,
    pub ticket_cost: Decimal,
}

/// Body of `POST /api/boxes/{id}/manual-entry`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEntryRequest {
    /// New closing number typed in by the clerk
    pub ticket_number: i64,
}

/// Body of `POST /api/tickets`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPackRequest {
    pub store_id: String,
    pub game_number: String,
    pub game_name: String,
    pub start_serial: SerialInput,
    pub end_serial: SerialInput,
    pub ticket_price: Decimal,
    pub total_tickets: i32,
    #[serde(default)]
    pub game_image: Option<String>,
}

/// Body of `PATCH /api/tickets/{id}`
///
/// Either field may be present. A scan is applied before a status change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePackRequest {
    #[serde(default)]
    pub scanned_serial: Option<SerialInput>,
    #[serde(default)]
    pub status: Option<PackStatus>,
}

/// Body of `POST /api/sales`
///
/// `salesDate` defaults to today's business day. `instantSales` defaults to
/// the ledger's computed sales, which is only available for today.
///
/// # Example JSON
/// ```json
/// { "onlineSales": "310.00", "lottoPayout": "120.00", "debitCardDeduction": "15.50" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSalesRequest {
    #[serde(default)]
    pub sales_date: Option<NaiveDate>,
    #[serde(default)]
    pub instant_sales: Option<Decimal>,
    #[serde(default)]
    pub online_sales: Decimal,
    #[serde(default)]
    pub lotto_payout: Decimal,
    #[serde(default)]
    pub debit_card_deduction: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body of `PATCH /api/sales/{id}`. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSalesRequest {
    #[serde(default)]
    pub instant_sales: Option<Decimal>,
    #[serde(default)]
    pub online_sales: Option<Decimal>,
    #[serde(default)]
    pub lotto_payout: Option<Decimal>,
    #[serde(default)]
    pub debit_card_deduction: Option<Decimal>,
    #[serde(default)]
    pub status: Option<SalesStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// `?date=2024-07-01`
#[derive(Debug, Clone, Deserialize)]
pub struct SalesDayQuery {
    pub date: NaiveDate,
}

/// `?year=2024&month=7`
#[derive(Debug, Clone, Deserialize)]
pub struct SalesMonthQuery {
    pub year: i32,
    pub month: u32,
}

/// `?year=2024`
#[derive(Debug, Clone, Deserialize)]
pub struct SalesYearQuery {
    pub year: i32,
}

// =============================================================================
// API RESPONSE STRUCTURES
// =============================================================================

/// A box together with its computed sales
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxView {
    #[serde(flatten)]
    pub record: BoxRecord,
    pub sales: Decimal,
}

/// Result of an explicit box reset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxResetResponse {
    /// False when the box's counters were already today's
    pub applied: bool,
    #[serde(rename = "box")]
    pub box_view: BoxView,
}

/// What the clerk should scan next in a box
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedTicket {
    pub game_number: String,
    pub ticket_serial: String,
    pub ticket_number: i64,
}

/// Result of a per-store batch reset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResetResponse {
    pub store_id: String,
    /// Packs whose opening number was advanced by this call
    pub reset_count: usize,
    pub business_day: NaiveDate,
    pub message: String,
}

/// Today's sales for one ticket pack
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackSales {
    pub pack_id: Uuid,
    pub game_number: String,
    pub tickets_sold: i64,
    pub amount: Decimal,
}

/// Per-store sales roll-up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSalesSummary {
    pub store_id: String,
    pub business_day: NaiveDate,
    pub active_boxes: usize,
    pub box_sales: Decimal,
    pub packs: Vec<PackSales>,
    pub pack_sales: Decimal,
    pub total_sales: Decimal,
}

// =============================================================================
// HEALTH CHECK RESPONSES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub storage: bool,
    /// None when Redis is not configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<bool>,
}

// =============================================================================
// ERROR RESPONSES
// =============================================================================

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code (NOT_FOUND, PACK_DEPLETED, ...)
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

// =============================================================================
// HANDLERS MODULE
// =============================================================================
// HTTP request handlers (controller layer).
//
// Handlers stay thin: extract the store context and the body, call one
// LedgerService command, record the request metric, return JSON.
//
// STORE CONTEXT:
// The upstream auth layer puts the caller's store in the `x-store-id`
// header. Box, ticket-by-id and sales-by-id routes require it; records of
// other stores answer 404. Routes keyed by a store in the path accept a
// missing header, but a header naming another store answers 404.
// =============================================================================

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    Json,
};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::*;
use crate::AppState;

/// Header carrying the caller's store id
pub const STORE_ID_HEADER: &str = "x-store-id";

// =============================================================================
// STORE CONTEXT EXTRACTOR
// =============================================================================
/// The store the request acts for, taken from `x-store-id`.
#[derive(Debug, Clone)]
pub struct StoreContext(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for StoreContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let store_id = parts
            .headers
            .get(STORE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Validation(format!("{} header is required", STORE_ID_HEADER))
            })?;
        Ok(Self(store_id.to_string()))
    }
}

/// Check a path or query store against the caller's `x-store-id`, if any
pub fn scoped_store(store_id: String, session: Option<StoreContext>) -> AppResult<String> {
    let store_id = store_id.trim().to_string();
    match session {
        Some(StoreContext(session)) if session != store_id => {
            Err(AppError::NotFound(format!("Store {} not found", store_id)))
        }
        _ => Ok(store_id),
    }
}

/// Record the request metric for a finished handler
fn observe<T>(
    method: &str,
    endpoint: &str,
    start: Instant,
    ok_status: StatusCode,
    result: &AppResult<T>,
) {
    let status = match result {
        Ok(_) => ok_status,
        Err(e) => e.status(),
    };
    metrics::record_http_request(method, endpoint, status.as_u16(), start.elapsed().as_secs_f64());
}

// =============================================================================
// HEALTH CHECK ENDPOINTS
// =============================================================================

/// Liveness check
///
/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "lottery-ledger-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check: storage reachable, and Redis answering PING when
/// configured. 503 otherwise.
///
/// GET /ready
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let storage_healthy = state.service.storage_healthy().await;

    let redis_healthy = match &state.redis {
        Some(redis) => {
            let start = Instant::now();
            let pong = redis::cmd("PING")
                .query_async::<_, String>(&mut redis.clone())
                .await
                .is_ok();
            metrics::record_redis_operation("ping", start.elapsed().as_secs_f64());
            Some(pong)
        }
        None => None,
    };

    let all_healthy = storage_healthy && redis_healthy.unwrap_or(true);
    let response = ReadinessResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: ReadinessChecks {
            storage: storage_healthy,
            redis: redis_healthy,
        },
    };

    let status = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

// =============================================================================
// METRICS ENDPOINT
// =============================================================================
/// Prometheus metrics in text exposition format
///
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

// =============================================================================
// BOX LEDGER ENDPOINTS
// =============================================================================

/// Active boxes of the caller's store, most recently updated first
///
/// GET /api/boxes/active
pub async fn list_active_boxes(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
) -> AppResult<Json<Vec<BoxView>>> {
    let start = Instant::now();
    let result = state.service.list_active_boxes(&store_id).await;
    observe("GET", "/api/boxes/active", start, StatusCode::OK, &result);
    result.map(Json)
}

/// Create a box
///
/// POST /api/boxes
///
/// # Request Body
/// ```json
/// { "boxNumber": "7", "gameNumber": "1432", "ticketSerial": "1432-0045", "ticketCost": "5.00" }
/// ```
///
/// # Response
/// - 201 Created: the new box, counters at zero
/// - 400 Bad Request: missing fields, non-positive cost, or duplicate box number
pub async fn create_box(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Json(request): Json<CreateBoxRequest>,
) -> AppResult<(StatusCode, Json<BoxView>)> {
    let start = Instant::now();
    let result = state.service.create_box(&store_id, &request).await;
    observe("POST", "/api/boxes", start, StatusCode::CREATED, &result);
    result.map(|view| (StatusCode::CREATED, Json(view)))
}

/// GET /api/boxes/:id
pub async fn get_box(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BoxView>> {
    let start = Instant::now();
    let result = state.service.get_box(&store_id, id).await;
    observe("GET", "/api/boxes/:id", start, StatusCode::OK, &result);
    result.map(Json)
}

/// One ticket sold. Applies the day rollover first when the box still
/// holds yesterday's counters.
///
/// POST /api/boxes/:id/scan
///
/// # Response
/// - 200 OK: the updated box with sales
/// - 409 Conflict: box inactive, or still contended after retries
pub async fn record_scan(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BoxView>> {
    let start = Instant::now();
    let result = state.service.record_scan(&store_id, id).await;
    observe("POST", "/api/boxes/:id/scan", start, StatusCode::OK, &result);
    result.map(Json)
}

/// Clerk-entered closing number
///
/// POST /api/boxes/:id/manual-entry
///
/// # Request Body
/// ```json
/// { "ticketNumber": 42 }
/// ```
///
/// # Response
/// - 200 OK: the updated box
/// - 400 Bad Request: number below the opening or current closing number
pub async fn record_manual_entry(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Path(id): Path<Uuid>,
    Json(request): Json<ManualEntryRequest>,
) -> AppResult<Json<BoxView>> {
    let start = Instant::now();
    let result = state
        .service
        .record_manual_entry(&store_id, id, request.ticket_number)
        .await;
    observe("POST", "/api/boxes/:id/manual-entry", start, StatusCode::OK, &result);
    result.map(Json)
}

/// Explicit reset for the new business day. Repeat calls the same day
/// return `applied: false` and leave the box untouched.
///
/// POST /api/boxes/:id/reset-day
pub async fn reset_box_for_new_day(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BoxResetResponse>> {
    let start = Instant::now();
    let result = state.service.reset_box_for_new_day(&store_id, id).await;
    observe("POST", "/api/boxes/:id/reset-day", start, StatusCode::OK, &result);
    result.map(Json)
}

/// Load a new game pack into the box
///
/// POST /api/boxes/:id/load
pub async fn load_box(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Path(id): Path<Uuid>,
    Json(request): Json<LoadBoxRequest>,
) -> AppResult<Json<BoxView>> {
    let start = Instant::now();
    let result = state.service.load_box(&store_id, id, &request).await;
    observe("POST", "/api/boxes/:id/load", start, StatusCode::OK, &result);
    result.map(Json)
}

/// POST /api/boxes/:id/deactivate
pub async fn deactivate_box(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BoxView>> {
    let start = Instant::now();
    let result = state.service.deactivate_box(&store_id, id).await;
    observe("POST", "/api/boxes/:id/deactivate", start, StatusCode::OK, &result);
    result.map(Json)
}

/// What the clerk should scan next
///
/// GET /api/boxes/:id/next-ticket
pub async fn next_ticket(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SuggestedTicket>> {
    let start = Instant::now();
    let result = state.service.next_ticket(&store_id, id).await;
    observe("GET", "/api/boxes/:id/next-ticket", start, StatusCode::OK, &result);
    result.map(Json)
}

// =============================================================================
// TICKET PACK ENDPOINTS
// =============================================================================

/// Register a ticket pack
///
/// POST /api/tickets
///
/// # Request Body
/// ```json
/// {
///   "storeId": "store-1",
///   "gameNumber": "1501",
///   "gameName": "Lucky 7s",
///   "startSerial": "0001000",
///   "endSerial": "0001299",
///   "ticketPrice": "2.00",
///   "totalTickets": 300
/// }
/// ```
///
/// The store comes from `x-store-id` when present and must match `storeId`.
pub async fn register_pack(
    State(state): State<Arc<AppState>>,
    store: Option<StoreContext>,
    Json(request): Json<RegisterPackRequest>,
) -> AppResult<(StatusCode, Json<TicketPack>)> {
    let start = Instant::now();
    let store_id = store.map_or_else(|| request.store_id.trim().to_string(), |s| s.0);
    let result = state.service.register_pack(&store_id, &request).await;
    observe("POST", "/api/tickets", start, StatusCode::CREATED, &result);
    result.map(|pack| (StatusCode::CREATED, Json(pack)))
}

/// Run today's reset for the store, then list its active packs by game
///
/// GET /api/tickets/active/:store_id
pub async fn list_active_packs(
    State(state): State<Arc<AppState>>,
    session: Option<StoreContext>,
    Path(store_id): Path<String>,
) -> AppResult<Json<Vec<TicketPack>>> {
    let start = Instant::now();
    let result = match scoped_store(store_id, session) {
        Ok(store_id) => state.service.list_active_packs(&store_id).await,
        Err(e) => Err(e),
    };
    observe("GET", "/api/tickets/active/:store_id", start, StatusCode::OK, &result);
    result.map(Json)
}

/// Deactivated packs, most recently deactivated first
///
/// GET /api/tickets/inactive/:store_id
pub async fn list_inactive_packs(
    State(state): State<Arc<AppState>>,
    session: Option<StoreContext>,
    Path(store_id): Path<String>,
) -> AppResult<Json<Vec<TicketPack>>> {
    let start = Instant::now();
    let result = match scoped_store(store_id, session) {
        Ok(store_id) => state.service.list_inactive_packs(&store_id).await,
        Err(e) => Err(e),
    };
    observe("GET", "/api/tickets/inactive/:store_id", start, StatusCode::OK, &result);
    result.map(Json)
}

/// GET /api/tickets/history/:store_id
pub async fn pack_history(
    State(state): State<Arc<AppState>>,
    session: Option<StoreContext>,
    Path(store_id): Path<String>,
) -> AppResult<Json<Vec<TicketPack>>> {
    let start = Instant::now();
    let result = match scoped_store(store_id, session) {
        Ok(store_id) => state.service.pack_history(&store_id).await,
        Err(e) => Err(e),
    };
    observe("GET", "/api/tickets/history/:store_id", start, StatusCode::OK, &result);
    result.map(Json)
}

/// Scan a serial and/or change the pack status
///
/// PATCH /api/tickets/:id
///
/// # Request Body
/// ```json
/// { "scannedSerial": "0001042" }
/// { "status": "returned" }
/// ```
///
/// # Response
/// - 200 OK: the updated pack
/// - 400 Bad Request: serial outside the pack's range
/// - 409 Conflict: pack depleted, not active, or bad status transition
pub async fn update_pack(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePackRequest>,
) -> AppResult<Json<TicketPack>> {
    let start = Instant::now();
    let result = state.service.update_pack(&store_id, id, &request).await;
    observe("PATCH", "/api/tickets/:id", start, StatusCode::OK, &result);
    result.map(Json)
}

/// Batch daily reset for a store. Safe to call repeatedly.
///
/// POST /api/tickets/reset/:store_id
///
/// # Response
/// ```json
/// { "storeId": "store-1", "resetCount": 4, "businessDay": "2024-07-02", "message": "..." }
/// ```
pub async fn reset_daily_numbers(
    State(state): State<Arc<AppState>>,
    session: Option<StoreContext>,
    Path(store_id): Path<String>,
) -> AppResult<Json<StoreResetResponse>> {
    let start = Instant::now();
    let result = match scoped_store(store_id, session) {
        Ok(store_id) => state.service.reset_daily_numbers_for_store(&store_id).await,
        Err(e) => Err(e),
    };
    observe("POST", "/api/tickets/reset/:store_id", start, StatusCode::OK, &result);
    result.map(Json)
}

// =============================================================================
// SALES
// =============================================================================

/// Today's sales computed from the ledger
///
/// GET /api/stores/:store_id/sales
pub async fn store_sales(
    State(state): State<Arc<AppState>>,
    session: Option<StoreContext>,
    Path(store_id): Path<String>,
) -> AppResult<Json<StoreSalesSummary>> {
    let start = Instant::now();
    let result = match scoped_store(store_id, session) {
        Ok(store_id) => state.service.store_sales_summary(&store_id).await,
        Err(e) => Err(e),
    };
    observe("GET", "/api/stores/:store_id/sales", start, StatusCode::OK, &result);
    result.map(Json)
}

/// Record the end-of-day reconciliation for the caller's store
///
/// POST /api/sales
///
/// # Request Body
/// ```json
/// {
///   "salesDate": "2024-07-01",
///   "instantSales": "840.00",
///   "onlineSales": "310.00",
///   "lottoPayout": "120.00",
///   "debitCardDeduction": "15.50",
///   "notes": "shift B"
/// }
/// ```
/// Every field is optional; see `RecordSalesRequest` for defaults.
///
/// # Response
/// - 201 Created: the record with `totalSales` and `netPayout`
/// - 400 Bad Request: bad amount, future date, or the day is already recorded
pub async fn record_daily_sales(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Json(request): Json<RecordSalesRequest>,
) -> AppResult<(StatusCode, Json<DailySales>)> {
    let start = Instant::now();
    let result = state.service.record_daily_sales(&store_id, &request).await;
    observe("POST", "/api/sales", start, StatusCode::CREATED, &result);
    result.map(|record| (StatusCode::CREATED, Json(record)))
}

/// Correct or close a pending sales record
///
/// PATCH /api/sales/:id
///
/// # Response
/// - 200 OK: the updated record
/// - 409 Conflict: the record is already completed or cancelled
pub async fn update_daily_sales(
    State(state): State<Arc<AppState>>,
    StoreContext(store_id): StoreContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSalesRequest>,
) -> AppResult<Json<DailySales>> {
    let start = Instant::now();
    let result = state.service.update_daily_sales(&store_id, id, &request).await;
    observe("PATCH", "/api/sales/:id", start, StatusCode::OK, &result);
    result.map(Json)
}

/// GET /api/sales/daily/:store_id?date=2024-07-01
pub async fn daily_sales(
    State(state): State<Arc<AppState>>,
    session: Option<StoreContext>,
    Path(store_id): Path<String>,
    Query(query): Query<SalesDayQuery>,
) -> AppResult<Json<DailySales>> {
    let start = Instant::now();
    let result = match scoped_store(store_id, session) {
        Ok(store_id) => state.service.daily_sales(&store_id, query.date).await,
        Err(e) => Err(e),
    };
    observe("GET", "/api/sales/daily/:store_id", start, StatusCode::OK, &result);
    result.map(Json)
}

/// GET /api/sales/monthly/:store_id?year=2024&month=7
pub async fn monthly_sales(
    State(state): State<Arc<AppState>>,
    session: Option<StoreContext>,
    Path(store_id): Path<String>,
    Query(query): Query<SalesMonthQuery>,
) -> AppResult<Json<Vec<DailySales>>> {
    let start = Instant::now();
    let result = match scoped_store(store_id, session) {
        Ok(store_id) => {
            state
                .service
                .monthly_sales(&store_id, query.year, query.month)
                .await
        }
        Err(e) => Err(e),
    };
    observe("GET", "/api/sales/monthly/:store_id", start, StatusCode::OK, &result);
    result.map(Json)
}

/// GET /api/sales/yearly/:store_id?year=2024
pub async fn yearly_sales(
    State(state): State<Arc<AppState>>,
    session: Option<StoreContext>,
    Path(store_id): Path<String>,
    Query(query): Query<SalesYearQuery>,
) -> AppResult<Json<Vec<DailySales>>> {
    let start = Instant::now();
    let result = match scoped_store(store_id, session) {
        Ok(store_id) => state.service.yearly_sales(&store_id, query.year).await,
        Err(e) => Err(e),
    };
    observe("GET", "/api/sales/yearly/:store_id", start, StatusCode::OK, &result);
    result.map(Json)
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{BusinessCalendar, FixedClock};
    use crate::notify::Notifier;
    use crate::service::LedgerService;
    use crate::store::MemoryStore;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request},
        Router,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()));
        let service = LedgerService::new(
            Arc::new(MemoryStore::new()),
            Notifier::new(),
            BusinessCalendar::utc(),
            clock,
            3,
        );
        let state = Arc::new(AppState {
            service,
            redis: None,
            metrics_handle: metrics::detached_handle().unwrap(),
        });
        crate::build_router(state)
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        store: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(store) = store {
            req = req.header(STORE_ID_HEADER, store);
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create_box(app: &Router, store: &str) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/boxes",
            Some(store),
            Some(json!({
                "boxNumber": "7",
                "gameNumber": "1432",
                "ticketSerial": "1432-0045",
                "ticketCost": "5.00"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_reports_service() {
        let (status, body) = call(&app(), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "lottery-ledger-service");
    }

    #[tokio::test]
    async fn ready_without_redis() {
        let (status, body) = call(&app(), Method::GET, "/ready", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["storage"], true);
        assert!(body["checks"].get("redis").is_none());
    }

    #[tokio::test]
    async fn box_scan_flow() {
        let app = app();
        let id = create_box(&app, "s1").await;

        let (status, body) =
            call(&app, Method::POST, &format!("/api/boxes/{}/scan", id), Some("s1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["closingNumber"], 1);

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/api/boxes/{}/next-ticket", id),
            Some("s1"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ticketNumber"], 2);

        let (_, listed) = call(&app, Method::GET, "/api/boxes/active", Some("s1"), None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_store_header_is_rejected() {
        let (status, body) = call(&app(), Method::GET, "/api/boxes/active", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn other_store_gets_not_found() {
        let app = app();
        let id = create_box(&app, "s1").await;
        let (status, body) =
            call(&app, Method::GET, &format!("/api/boxes/{}", id), Some("s2"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn manual_entry_below_closing_is_bad_request() {
        let app = app();
        let id = create_box(&app, "s1").await;
        let uri = format!("/api/boxes/{}/manual-entry", id);

        let (status, _) =
            call(&app, Method::POST, &uri, Some("s1"), Some(json!({ "ticketNumber": 20 }))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            call(&app, Method::POST, &uri, Some("s1"), Some(json!({ "ticketNumber": 15 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn pack_lifecycle_over_http() {
        let app = app();
        let (status, pack) = call(
            &app,
            Method::POST,
            "/api/tickets",
            Some("s1"),
            Some(json!({
                "storeId": "s1",
                "gameNumber": "1501",
                "gameName": "Lucky 7s",
                "startSerial": "0001000",
                "endSerial": "0001001",
                "ticketPrice": "2.00",
                "totalTickets": 2
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let uri = format!("/api/tickets/{}", pack["id"].as_str().unwrap());

        let (status, body) =
            call(&app, Method::PATCH, &uri, Some("s1"), Some(json!({ "scannedSerial": "0005000" })))
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        for serial in ["0001000", "0001001"] {
            let (status, _) =
                call(&app, Method::PATCH, &uri, Some("s1"), Some(json!({ "scannedSerial": serial })))
                    .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) =
            call(&app, Method::PATCH, &uri, Some("s1"), Some(json!({ "scannedSerial": 1001 }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "PACK_DEPLETED");

        let (status, body) =
            call(&app, Method::PATCH, &uri, Some("s1"), Some(json!({ "status": "returned" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "returned");

        let (_, active) = call(&app, Method::GET, "/api/tickets/active/s1", None, None).await;
        assert!(active.as_array().unwrap().is_empty());
        let (_, history) = call(&app, Method::GET, "/api/tickets/history/s1", None, None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_reset_and_sales_endpoints() {
        let app = app();
        let (status, body) = call(&app, Method::POST, "/api/tickets/reset/s1", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resetCount"], 0);
        assert_eq!(body["storeId"], "s1");

        let (status, body) = call(&app, Method::GET, "/api/stores/s1/sales", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["activeBoxes"], 0);
    }

    #[tokio::test]
    async fn store_routes_reject_a_foreign_session() {
        let app = app();
        let routes = [
            (Method::GET, "/api/tickets/active/s2"),
            (Method::GET, "/api/tickets/inactive/s2"),
            (Method::GET, "/api/tickets/history/s2"),
            (Method::POST, "/api/tickets/reset/s2"),
            (Method::GET, "/api/stores/s2/sales"),
            (Method::GET, "/api/sales/monthly/s2?year=2024&month=7"),
            (Method::GET, "/api/sales/yearly/s2?year=2024"),
            (Method::GET, "/api/sales/daily/s2?date=2024-07-01"),
        ];

        for (method, uri) in routes {
            let (status, body) = call(&app, method.clone(), uri, Some("s1"), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
            assert_eq!(body["error"], "NOT_FOUND");
        }

        // matching session is fine
        let (status, _) = call(&app, Method::GET, "/api/tickets/active/s2", Some("s2"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn daily_sales_over_http() {
        let app = app();
        let (status, record) = call(
            &app,
            Method::POST,
            "/api/sales",
            Some("s1"),
            Some(json!({
                "instantSales": "840.00",
                "onlineSales": "310.00",
                "lottoPayout": "120.00",
                "debitCardDeduction": "15.50"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(record["salesDate"], "2024-07-01");
        assert_eq!(record["status"], "pending");

        let (status, day) =
            call(&app, Method::GET, "/api/sales/daily/s1?date=2024-07-01", Some("s1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(day["id"], record["id"]);

        let uri = format!("/api/sales/{}", record["id"].as_str().unwrap());
        let (status, done) =
            call(&app, Method::PATCH, &uri, Some("s1"), Some(json!({ "status": "completed" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["status"], "completed");

        let (status, body) =
            call(&app, Method::PATCH, &uri, Some("s1"), Some(json!({ "notes": "late" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "INVALID_STATE");

        let (status, month) =
            call(&app, Method::GET, "/api/sales/monthly/s1?year=2024&month=7", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(month.as_array().unwrap().len(), 1);

        let (status, _) =
            call(&app, Method::GET, "/api/sales/daily/s1?date=2024-07-02", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn inactive_listing_over_http() {
        let app = app();
        let (_, pack) = call(
            &app,
            Method::POST,
            "/api/tickets",
            Some("s1"),
            Some(json!({
                "storeId": "s1",
                "gameNumber": "1501",
                "gameName": "Lucky 7s",
                "startSerial": 1,
                "endSerial": 10,
                "ticketPrice": "2.00",
                "totalTickets": 10
            })),
        )
        .await;
        let uri = format!("/api/tickets/{}", pack["id"].as_str().unwrap());
        call(&app, Method::PATCH, &uri, Some("s1"), Some(json!({ "status": "inactive" }))).await;

        let (status, inactive) =
            call(&app, Method::GET, "/api/tickets/inactive/s1", Some("s1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(inactive[0]["id"], pack["id"]);
        assert!(inactive[0]["deactivationDate"].is_string());
    }

    #[tokio::test]
    async fn oversized_serials_are_rejected_over_http() {
        let (status, _) = call(
            &app(),
            Method::POST,
            "/api/tickets",
            Some("s1"),
            Some(json!({
                "storeId": "s1",
                "gameNumber": "1501",
                "gameName": "Lucky 7s",
                "startSerial": 0,
                "endSerial": 9223372036854775807i64,
                "ticketPrice": "2.00",
                "totalTickets": 10
            })),
        )
        .await;
        // rejected while decoding the body
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let (status, _) = call(&app(), Method::GET, "/metrics", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

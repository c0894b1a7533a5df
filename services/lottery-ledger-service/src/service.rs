// =============================================================================
// SERVICE MODULE
// =============================================================================
// Command layer between the HTTP handlers and the store.
//
// Every mutating command follows the same loop:
//   1. load the record (scoped to the caller's store)
//   2. run the pure transition (ledger.rs / tracker.rs)
//   3. write it back only if the version we read is still current
//   4. on a version mismatch reload and try again, up to max_retries
// After a successful write we record metrics and publish a notification.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::calendar::{BusinessCalendar, Clock};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    BoxRecord, BoxResetResponse, BoxView, CreateBoxRequest, DailySales, LoadBoxRequest,
    PackSales, PackStatus, RecordSalesRequest, RegisterPackRequest, StoreResetResponse,
    StoreSalesSummary, SuggestedTicket, TicketPack, UpdatePackRequest, UpdateSalesRequest,
};
use crate::money;
use crate::notify::{Notifier, Topic};
use crate::sales;
use crate::store::LedgerStore;

/// Outcome of a conditional write loop
#[derive(Debug)]
struct Mutation<T> {
    before: T,
    after: T,
    /// False when the transition decided nothing needed writing
    changed: bool,
}

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    notifier: Notifier,
    calendar: BusinessCalendar,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Notifier,
        calendar: BusinessCalendar,
        clock: Arc<dyn Clock>,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            notifier,
            calendar,
            clock,
            max_retries,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub async fn storage_healthy(&self) -> bool {
        self.store.health_check().await
    }

    // =========================================================================
    // BOX LEDGER
    // =========================================================================

    pub async fn create_box(&self, store_id: &str, req: &CreateBoxRequest) -> AppResult<BoxView> {
        let record = BoxRecord::create(store_id, req, self.clock.now())?;
        if self
            .store
            .find_box_by_number(&record.store_id, &record.box_number)
            .await?
            .is_some()
        {
            return Err(AppError::Validation(format!(
                "box {} already exists in store {}",
                record.box_number, record.store_id
            )));
        }
        let record = self.store.insert_box(&record).await?;

        tracing::info!(
            box_id = %record.id,
            store_id = %record.store_id,
            box_number = %record.box_number,
            game_number = %record.game_number,
            "Box created"
        );

        let view = record.into_view()?;
        self.notifier.publish(Topic::BoxUpdate, store_id, &view);
        Ok(view)
    }

    pub async fn get_box(&self, store_id: &str, id: Uuid) -> AppResult<BoxView> {
        self.fetch_box(store_id, id).await?.into_view()
    }

    pub async fn list_active_boxes(&self, store_id: &str) -> AppResult<Vec<BoxView>> {
        let boxes = self.store.list_active_boxes(store_id).await?;
        boxes.into_iter().map(BoxRecord::into_view).collect()
    }

    pub async fn next_ticket(&self, store_id: &str, id: Uuid) -> AppResult<SuggestedTicket> {
        Ok(self.fetch_box(store_id, id).await?.next_suggested_ticket())
    }

    /// One ticket sold from the box
    pub async fn record_scan(&self, store_id: &str, id: Uuid) -> AppResult<BoxView> {
        let calendar = self.calendar;
        let result = self
            .mutate_box(store_id, id, |b, now| b.record_scan(now, &calendar).map(Some))
            .await;
        self.finish_box_count("scan", result)
    }

    /// Clerk-entered closing number
    pub async fn record_manual_entry(
        &self,
        store_id: &str,
        id: Uuid,
        ticket_number: i64,
    ) -> AppResult<BoxView> {
        let calendar = self.calendar;
        let result = self
            .mutate_box(store_id, id, |b, now| {
                b.record_manual_entry(ticket_number, now, &calendar).map(Some)
            })
            .await;
        self.finish_box_count("manual_entry", result)
    }

    /// Explicit daily reset. Only applies to a box still holding an earlier
    /// business day's counters.
    pub async fn reset_box_for_new_day(
        &self,
        store_id: &str,
        id: Uuid,
    ) -> AppResult<BoxResetResponse> {
        let calendar = self.calendar;
        let mutation = self
            .mutate_box(store_id, id, |b, now| {
                let (next, applied) = b.reset_for_new_day(now, &calendar)?;
                Ok(applied.then_some(next))
            })
            .await?;

        if mutation.changed {
            metrics::record_daily_reset("box", "explicit", 1);
            tracing::info!(
                box_id = %id,
                store_id,
                opening_number = mutation.after.opening_number,
                "Box reset for new day"
            );
        } else {
            tracing::debug!(box_id = %id, "Box counters already belong to today");
        }

        let view = mutation.after.into_view()?;
        if mutation.changed {
            self.notifier.publish(Topic::BoxReset, store_id, &view);
        }
        Ok(BoxResetResponse {
            applied: mutation.changed,
            box_view: view,
        })
    }

    /// Put a new game pack in the box
    pub async fn load_box(
        &self,
        store_id: &str,
        id: Uuid,
        req: &LoadBoxRequest,
    ) -> AppResult<BoxView> {
        let mutation = self
            .mutate_box(store_id, id, |b, now| b.load_game_pack(req, now).map(Some))
            .await?;

        tracing::info!(box_id = %id, store_id, game_number = %req.game_number, "Box loaded with new pack");
        let view = mutation.after.into_view()?;
        self.notifier.publish(Topic::BoxUpdate, store_id, &view);
        Ok(view)
    }

    pub async fn deactivate_box(&self, store_id: &str, id: Uuid) -> AppResult<BoxView> {
        let mutation = self
            .mutate_box(store_id, id, |b, now| {
                Ok(b.is_active.then(|| b.deactivate(now)))
            })
            .await?;

        let view = mutation.after.into_view()?;
        if mutation.changed {
            tracing::info!(box_id = %id, store_id, "Box deactivated");
            self.notifier.publish(Topic::BoxUpdate, store_id, &view);
        }
        Ok(view)
    }

    /// Shared tail of scan / manual entry: metrics, logs, notification
    fn finish_box_count(
        &self,
        command: &'static str,
        result: AppResult<Mutation<BoxRecord>>,
    ) -> AppResult<BoxView> {
        let mutation = match result {
            Ok(mutation) => mutation,
            Err(e) => {
                metrics::record_scan("box", command, e.code());
                return Err(e);
            }
        };
        metrics::record_scan("box", command, "accepted");

        let rolled_over = mutation.after.last_reset_on != mutation.before.last_reset_on;
        if rolled_over {
            metrics::record_daily_reset("box", "rollover", 1);
            tracing::info!(
                box_id = %mutation.after.id,
                opening_number = mutation.after.opening_number,
                "Day rollover applied before {}",
                command
            );
        }

        tracing::info!(
            box_id = %mutation.after.id,
            store_id = %mutation.after.store_id,
            command,
            closing_number = mutation.after.closing_number,
            "Box count updated"
        );

        let store_id = mutation.after.store_id.clone();
        let view = mutation.after.into_view()?;
        self.notifier.publish(Topic::BoxUpdate, &store_id, &view);
        Ok(view)
    }

    // =========================================================================
    // TICKET PACK TRACKER
    // =========================================================================

    pub async fn register_pack(
        &self,
        store_id: &str,
        req: &RegisterPackRequest,
    ) -> AppResult<TicketPack> {
        if req.store_id.trim() != store_id {
            return Err(AppError::Validation(format!(
                "store id '{}' does not match the session store",
                req.store_id
            )));
        }

        let pack = TicketPack::register(req, self.clock.now())?;
        let pack = self.store.insert_pack(&pack).await?;

        tracing::info!(
            pack_id = %pack.id,
            store_id = %pack.store_id,
            game_number = %pack.game_number,
            total_tickets = pack.total_tickets,
            "Ticket pack registered"
        );
        metrics::set_pack_remaining(&pack);
        self.notifier.publish(Topic::TicketUpdate, store_id, &pack);
        Ok(pack)
    }

    pub async fn get_pack(&self, store_id: &str, id: Uuid) -> AppResult<TicketPack> {
        self.fetch_pack(store_id, id).await
    }

    /// PATCH semantics: scan first (if a serial is given), then status change
    pub async fn update_pack(
        &self,
        store_id: &str,
        id: Uuid,
        req: &UpdatePackRequest,
    ) -> AppResult<TicketPack> {
        if req.scanned_serial.is_none() && req.status.is_none() {
            return Err(AppError::Validation(
                "nothing to update: provide scannedSerial and/or status".to_string(),
            ));
        }

        let calendar = self.calendar;
        let result = match self.fetch_pack(store_id, id).await {
            Ok(current) => {
                self.mutate_pack(current, |p, now| {
                    let mut next = p.clone();
                    if let Some(serial) = req.scanned_serial {
                        next = next.scan(serial.0, now, &calendar)?;
                    }
                    if let Some(status) = req.status {
                        next = next.change_status(status, now)?;
                    }
                    Ok((next != *p).then_some(next))
                })
                .await
            }
            Err(e) => Err(e),
        };

        let mutation = match result {
            Ok(mutation) => mutation,
            Err(e) => {
                if req.scanned_serial.is_some() {
                    metrics::record_scan("pack", "scan", e.code());
                }
                return Err(e);
            }
        };

        let pack = mutation.after;
        if let Some(serial) = req.scanned_serial {
            metrics::record_scan("pack", "scan", "accepted");
            if pack.last_reset_date != mutation.before.last_reset_date {
                metrics::record_daily_reset("pack", "rollover", 1);
            }
            tracing::info!(
                pack_id = %pack.id,
                store_id,
                serial = serial.0,
                remaining_tickets = pack.remaining_tickets,
                "Ticket scanned"
            );
        }
        if let Some(status) = req.status {
            tracing::info!(pack_id = %pack.id, store_id, status = %status, "Ticket pack status updated");
        }

        metrics::set_pack_remaining(&pack);
        if mutation.changed {
            self.notifier.publish(Topic::TicketUpdate, store_id, &pack);
        }
        Ok(pack)
    }

    /// Carry yesterday's closing into today's opening for every active pack
    /// of the store. Safe to call any number of times a day.
    pub async fn reset_daily_numbers_for_store(
        &self,
        store_id: &str,
    ) -> AppResult<StoreResetResponse> {
        let calendar = self.calendar;
        let now = self.clock.now();
        let packs = self.store.list_packs(store_id, Some(PackStatus::Active)).await?;

        let mut reset_count = 0usize;
        for pack in packs {
            if !pack.needs_daily_reset(now, &calendar) {
                continue;
            }
            let mutation = self
                .mutate_pack(pack, |p, now| {
                    if p.status != PackStatus::Active {
                        return Ok(None);
                    }
                    let mut next = p.clone();
                    Ok(next.perform_daily_reset(now, &calendar).then_some(next))
                })
                .await?;
            if mutation.changed {
                reset_count += 1;
            }
        }

        let business_day = calendar.business_day(now);
        metrics::record_daily_reset("pack", "batch", reset_count as u64);

        let response = StoreResetResponse {
            store_id: store_id.to_string(),
            reset_count,
            business_day,
            message: "Daily numbers reset successfully".to_string(),
        };

        if reset_count > 0 {
            tracing::info!(store_id, reset_count, %business_day, "Daily ticket numbers reset");
            self.notifier.publish(Topic::TicketReset, store_id, &response);
        }
        Ok(response)
    }

    /// Active packs ordered by game number, after today's reset has run
    pub async fn list_active_packs(&self, store_id: &str) -> AppResult<Vec<TicketPack>> {
        self.reset_daily_numbers_for_store(store_id).await?;
        let packs = self.store.list_packs(store_id, Some(PackStatus::Active)).await?;
        for pack in &packs {
            metrics::set_pack_remaining(pack);
        }
        Ok(packs)
    }

    /// Deactivated packs, most recently deactivated first
    pub async fn list_inactive_packs(&self, store_id: &str) -> AppResult<Vec<TicketPack>> {
        self.store.list_packs(store_id, Some(PackStatus::Inactive)).await
    }

    /// Every pack of the store, most recently touched first
    pub async fn pack_history(&self, store_id: &str) -> AppResult<Vec<TicketPack>> {
        self.store.list_packs(store_id, None).await
    }

    // =========================================================================
    // SALES
    // =========================================================================

    /// Today's sales across the store's active boxes and packs.
    ///
    /// Boxes still holding yesterday's counters and packs not reset today
    /// contribute nothing.
    pub async fn store_sales_summary(&self, store_id: &str) -> AppResult<StoreSalesSummary> {
        let packs = self.list_active_packs(store_id).await?;
        let boxes = self.store.list_active_boxes(store_id).await?;

        let now = self.clock.now();
        let business_day = self.calendar.business_day(now);

        let box_amounts = boxes
            .iter()
            .filter(|b| !b.is_pending_reset(now, &self.calendar))
            .map(BoxRecord::calculate_sales)
            .collect::<AppResult<Vec<Decimal>>>()?;
        let box_sales = money::total(box_amounts)?;

        let mut pack_lines: Vec<PackSales> = Vec::new();
        for pack in packs.iter().filter(|p| !p.needs_daily_reset(now, &self.calendar)) {
            if let Some(line) = pack.todays_sales()? {
                pack_lines.push(line);
            }
        }
        let pack_sales = money::total(pack_lines.iter().map(|s| s.amount))?;

        Ok(StoreSalesSummary {
            store_id: store_id.to_string(),
            business_day,
            active_boxes: boxes.len(),
            box_sales,
            packs: pack_lines,
            pack_sales,
            total_sales: money::total([box_sales, pack_sales])?,
        })
    }

    // =========================================================================
    // DAILY SALES RECORDS
    // =========================================================================

    /// Record the store's end-of-day reconciliation. Without `instantSales`
    /// today's computed ledger total is used; past days must supply it.
    pub async fn record_daily_sales(
        &self,
        store_id: &str,
        req: &RecordSalesRequest,
    ) -> AppResult<DailySales> {
        let now = self.clock.now();
        let today = self.calendar.business_day(now);
        let sales_date = req.sales_date.unwrap_or(today);
        if sales_date > today {
            return Err(AppError::Validation(format!(
                "sales date {} is after the current business day {}",
                sales_date, today
            )));
        }

        let instant_sales = match req.instant_sales {
            Some(amount) => amount,
            None if sales_date == today => self.store_sales_summary(store_id).await?.total_sales,
            None => {
                return Err(AppError::Validation(format!(
                    "instantSales is required for {}",
                    sales_date
                )))
            }
        };

        let record = DailySales::record(store_id, sales_date, instant_sales, req, now)?;
        if self
            .store
            .find_sales_by_date(&record.store_id, sales_date)
            .await?
            .is_some()
        {
            return Err(AppError::Validation(format!(
                "sales for {} in store {} already exist",
                sales_date, record.store_id
            )));
        }
        let record = self.store.insert_sales(&record).await?;

        tracing::info!(
            sales_id = %record.id,
            store_id = %record.store_id,
            sales_date = %record.sales_date,
            total_sales = %record.total_sales,
            net_payout = %record.net_payout,
            "Daily sales recorded"
        );
        self.notifier.publish(Topic::SalesUpdate, store_id, &record);
        Ok(record)
    }

    /// Correct and/or close a pending sales record
    pub async fn update_daily_sales(
        &self,
        store_id: &str,
        id: Uuid,
        req: &UpdateSalesRequest,
    ) -> AppResult<DailySales> {
        let empty = req.instant_sales.is_none()
            && req.online_sales.is_none()
            && req.lotto_payout.is_none()
            && req.debit_card_deduction.is_none()
            && req.status.is_none()
            && req.notes.is_none();
        if empty {
            return Err(AppError::Validation("nothing to update".to_string()));
        }

        for attempt in 0..=self.max_retries {
            let current = self.fetch_sales(store_id, id).await?;
            let next = current.apply_update(req, self.clock.now())?;
            if next == current {
                return Ok(current);
            }

            match self.store.update_sales(&next, current.version).await? {
                Some(written) => {
                    tracing::info!(
                        sales_id = %id,
                        store_id,
                        status = %written.status,
                        net_payout = %written.net_payout,
                        "Daily sales updated"
                    );
                    self.notifier.publish(Topic::SalesUpdate, store_id, &written);
                    return Ok(written);
                }
                None => {
                    metrics::record_concurrency_conflict("sales");
                    tracing::debug!(sales_id = %id, attempt, "Sales record changed underneath us, retrying");
                }
            }
        }

        Err(AppError::ConcurrencyConflict(format!(
            "sales record {} was modified concurrently; retry the command",
            id
        )))
    }

    pub async fn daily_sales(&self, store_id: &str, date: NaiveDate) -> AppResult<DailySales> {
        self.store
            .find_sales_by_date(store_id, date)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No sales found for {}", date)))
    }

    /// Records of one calendar month, oldest first
    pub async fn monthly_sales(
        &self,
        store_id: &str,
        year: i32,
        month: u32,
    ) -> AppResult<Vec<DailySales>> {
        let (from, to) = sales::month_range(year, month)?;
        self.store.list_sales(store_id, from, to).await
    }

    /// Records of one calendar year, oldest first
    pub async fn yearly_sales(&self, store_id: &str, year: i32) -> AppResult<Vec<DailySales>> {
        let (from, to) = sales::year_range(year)?;
        self.store.list_sales(store_id, from, to).await
    }

    // =========================================================================
    // LOAD + CONDITIONAL WRITE
    // =========================================================================

    /// Load a box owned by `store_id`. Boxes of other stores are reported
    /// as missing.
    async fn fetch_box(&self, store_id: &str, id: Uuid) -> AppResult<BoxRecord> {
        match self.store.get_box(id).await? {
            Some(b) if b.store_id == store_id => Ok(b),
            _ => Err(AppError::NotFound(format!("Box {} not found", id))),
        }
    }

    async fn fetch_pack(&self, store_id: &str, id: Uuid) -> AppResult<TicketPack> {
        match self.store.get_pack(id).await? {
            Some(p) if p.store_id == store_id => Ok(p),
            _ => Err(AppError::NotFound(format!("Ticket pack {} not found", id))),
        }
    }

    async fn fetch_sales(&self, store_id: &str, id: Uuid) -> AppResult<DailySales> {
        match self.store.get_sales(id).await? {
            Some(s) if s.store_id == store_id => Ok(s),
            _ => Err(AppError::NotFound(format!("Sales record {} not found", id))),
        }
    }

    /// Apply `transition` to a box and write it with a version check.
    /// `transition` returns Ok(None) when there is nothing to write.
    async fn mutate_box<F>(
        &self,
        store_id: &str,
        id: Uuid,
        transition: F,
    ) -> AppResult<Mutation<BoxRecord>>
    where
        F: Fn(&BoxRecord, DateTime<Utc>) -> AppResult<Option<BoxRecord>> + Send + Sync,
    {
        for attempt in 0..=self.max_retries {
            let current = self.fetch_box(store_id, id).await?;
            let now = self.clock.now();

            let next = match transition(&current, now)? {
                Some(next) => next,
                None => {
                    return Ok(Mutation {
                        before: current.clone(),
                        after: current,
                        changed: false,
                    })
                }
            };

            match self.store.update_box(&next, current.version).await? {
                Some(written) => {
                    return Ok(Mutation {
                        before: current,
                        after: written,
                        changed: true,
                    })
                }
                None => {
                    metrics::record_concurrency_conflict("box");
                    tracing::debug!(box_id = %id, attempt, "Box changed underneath us, retrying");
                }
            }
        }

        Err(AppError::ConcurrencyConflict(format!(
            "box {} was modified concurrently; retry the command",
            id
        )))
    }

    /// Same loop for ticket packs. The first attempt uses `current` as
    /// already loaded by the caller; retries reload it.
    async fn mutate_pack<F>(
        &self,
        mut current: TicketPack,
        transition: F,
    ) -> AppResult<Mutation<TicketPack>>
    where
        F: Fn(&TicketPack, DateTime<Utc>) -> AppResult<Option<TicketPack>> + Send + Sync,
    {
        let id = current.id;
        let store_id = current.store_id.clone();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                current = self.fetch_pack(&store_id, id).await?;
            }
            let now = self.clock.now();

            let next = match transition(&current, now)? {
                Some(next) => next,
                None => {
                    return Ok(Mutation {
                        before: current.clone(),
                        after: current,
                        changed: false,
                    })
                }
            };

            match self.store.update_pack(&next, current.version).await? {
                Some(written) => {
                    return Ok(Mutation {
                        before: current,
                        after: written,
                        changed: true,
                    })
                }
                None => {
                    metrics::record_concurrency_conflict("pack");
                    tracing::debug!(pack_id = %id, attempt, "Ticket pack changed underneath us, retrying");
                }
            }
        }

        Err(AppError::ConcurrencyConflict(format!(
            "ticket pack {} was modified concurrently; retry the command",
            id
        )))
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::FixedClock;
    use crate::serial::SerialInput;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, d, h, m, 0).unwrap()
    }

    fn service_with(store: Arc<dyn LedgerStore>, clock: Arc<FixedClock>) -> LedgerService {
        LedgerService::new(store, Notifier::new(), BusinessCalendar::utc(), clock, 3)
    }

    fn setup() -> (LedgerService, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(at(1, 9, 0)));
        (service_with(Arc::new(MemoryStore::new()), clock.clone()), clock)
    }

    fn box_req(number: &str) -> CreateBoxRequest {
        CreateBoxRequest {
            box_number: number.into(),
            game_number: "1432".into(),
            ticket_serial: "1432-0045".into(),
            ticket_cost: Decimal::from(5),
        }
    }

    fn pack_req(store: &str, total: i32) -> RegisterPackRequest {
        RegisterPackRequest {
            store_id: store.into(),
            game_number: "1501".into(),
            game_name: "Lucky 7s".into(),
            start_serial: SerialInput(100),
            end_serial: SerialInput(100 + i64::from(total) - 1),
            ticket_price: Decimal::from(2),
            total_tickets: total,
            game_image: None,
        }
    }

    fn scan(serial: i64) -> UpdatePackRequest {
        UpdatePackRequest {
            scanned_serial: Some(SerialInput(serial)),
            status: None,
        }
    }

    #[tokio::test]
    async fn scan_rollover_scenario() {
        let (svc, clock) = setup();
        let b = svc.create_box("s1", &box_req("1")).await.unwrap();
        let id = b.record.id;

        clock.set(at(1, 23, 0));
        svc.record_manual_entry("s1", id, 37).await.unwrap();

        clock.set(at(2, 0, 1));
        let after = svc.record_scan("s1", id).await.unwrap();

        assert_eq!(after.record.opening_number, 37);
        assert_eq!(after.record.closing_number, 1);
    }

    #[tokio::test]
    async fn unknown_box_is_not_found() {
        let (svc, _) = setup();
        let err = svc.record_scan("s1", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn other_stores_cannot_touch_a_box() {
        let (svc, _) = setup();
        let b = svc.create_box("s1", &box_req("1")).await.unwrap();

        let err = svc.record_scan("s2", b.record.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let stored = svc.get_box("s1", b.record.id).await.unwrap();
        assert_eq!(stored.record.closing_number, 0);
    }

    #[tokio::test]
    async fn rejected_manual_entry_keeps_closing() {
        let (svc, _) = setup();
        let id = svc.create_box("s1", &box_req("1")).await.unwrap().record.id;
        svc.record_manual_entry("s1", id, 20).await.unwrap();

        let err = svc.record_manual_entry("s1", id, 15).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(svc.get_box("s1", id).await.unwrap().record.closing_number, 20);
    }

    #[tokio::test]
    async fn explicit_reset_runs_once_per_day() {
        let (svc, clock) = setup();
        let id = svc.create_box("s1", &box_req("1")).await.unwrap().record.id;
        svc.record_manual_entry("s1", id, 12).await.unwrap();

        clock.set(at(2, 6, 0));
        let first = svc.reset_box_for_new_day("s1", id).await.unwrap();
        let second = svc.reset_box_for_new_day("s1", id).await.unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(second.box_view.record.opening_number, 12);
        assert_eq!(second.box_view.record.closing_number, 0);
    }

    #[tokio::test]
    async fn evening_reset_keeps_the_baseline_for_tomorrow() {
        let (svc, clock) = setup();
        let id = svc.create_box("s1", &box_req("1")).await.unwrap().record.id;

        clock.set(at(1, 20, 0));
        svc.record_manual_entry("s1", id, 37).await.unwrap();

        clock.set(at(1, 23, 0));
        let evening = svc.reset_box_for_new_day("s1", id).await.unwrap();
        assert!(!evening.applied);
        assert_eq!(evening.box_view.record.closing_number, 37);

        clock.set(at(2, 0, 1));
        let after = svc.record_scan("s1", id).await.unwrap();
        assert_eq!(after.record.opening_number, 37);
        assert_eq!(after.record.closing_number, 1);
    }

    #[tokio::test]
    async fn morning_rollover_never_reports_negative_sales() {
        let (svc, clock) = setup();
        let id = svc.create_box("s1", &box_req("1")).await.unwrap().record.id;
        svc.record_manual_entry("s1", id, 10).await.unwrap();

        clock.set(at(2, 8, 0));
        let view = svc.record_scan("s1", id).await.unwrap();
        assert_eq!((view.record.opening_number, view.record.closing_number), (10, 1));
        assert_eq!(view.sales, Decimal::ZERO);

        let summary = svc.store_sales_summary("s1").await.unwrap();
        assert_eq!(summary.box_sales, Decimal::ZERO);
        assert_eq!(summary.total_sales, Decimal::ZERO);
    }

    #[tokio::test]
    async fn oversized_manual_entry_leaves_the_box_readable() {
        let (svc, _) = setup();
        let mut req = box_req("1");
        req.ticket_cost = money::max_amount();
        let id = svc.create_box("s1", &req).await.unwrap().record.id;

        let err = svc.record_manual_entry("s1", id, i64::MAX).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(svc.get_box("s1", id).await.unwrap().record.closing_number, 0);

        svc.record_manual_entry("s1", id, 999_999_999_999_999_999)
            .await
            .unwrap();
        assert_eq!(svc.list_active_boxes("s1").await.unwrap().len(), 1);
        assert!(svc.store_sales_summary("s1").await.unwrap().box_sales > Decimal::ZERO);
    }

    #[tokio::test]
    async fn load_then_deactivate() {
        let (svc, _) = setup();
        let id = svc.create_box("s1", &box_req("1")).await.unwrap().record.id;
        svc.record_manual_entry("s1", id, 30).await.unwrap();

        let load = LoadBoxRequest {
            game_number: "1600".into(),
            ticket_serial: "1600-0001".into(),
            ticket_cost: Decimal::from(10),
        };
        let loaded = svc.load_box("s1", id, &load).await.unwrap();
        assert_eq!(loaded.record.game_number, "1600");
        assert_eq!(loaded.record.closing_number, 0);
        assert_eq!(svc.next_ticket("s1", id).await.unwrap().ticket_number, 1);

        let off = svc.deactivate_box("s1", id).await.unwrap();
        assert!(!off.record.is_active);
        assert!(svc.list_active_boxes("s1").await.unwrap().is_empty());

        let err = svc.record_scan("s1", id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        // deactivating twice is harmless
        assert!(!svc.deactivate_box("s1", id).await.unwrap().record.is_active);
    }

    #[tokio::test]
    async fn duplicate_box_number_is_rejected() {
        let (svc, _) = setup();
        svc.create_box("s1", &box_req("4")).await.unwrap();
        let err = svc.create_box("s1", &box_req("4")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(svc.create_box("s2", &box_req("4")).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_scans_are_not_lost() {
        let (svc, _) = setup();
        let svc = Arc::new(svc);
        let id = svc.create_box("s1", &box_req("1")).await.unwrap().record.id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move {
                // a conflict after retries is allowed; a silent lost update is not
                svc.record_scan("s1", id).await.is_ok()
            }));
        }
        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap() {
                accepted += 1;
            }
        }

        let stored = svc.get_box("s1", id).await.unwrap();
        assert_eq!(stored.record.closing_number, accepted);
    }

    /// Store that reports a version conflict on the first N box updates
    struct ContendedStore {
        inner: MemoryStore,
        conflicts_left: AtomicU32,
    }

    #[async_trait]
    impl LedgerStore for ContendedStore {
        async fn insert_box(&self, record: &BoxRecord) -> AppResult<BoxRecord> {
            self.inner.insert_box(record).await
        }
        async fn get_box(&self, id: Uuid) -> AppResult<Option<BoxRecord>> {
            self.inner.get_box(id).await
        }
        async fn find_box_by_number(&self, s: &str, n: &str) -> AppResult<Option<BoxRecord>> {
            self.inner.find_box_by_number(s, n).await
        }
        async fn list_active_boxes(&self, s: &str) -> AppResult<Vec<BoxRecord>> {
            self.inner.list_active_boxes(s).await
        }
        async fn update_box(&self, r: &BoxRecord, v: i64) -> AppResult<Option<BoxRecord>> {
            let left = self.conflicts_left.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts_left.store(left - 1, Ordering::SeqCst);
                return Ok(None);
            }
            self.inner.update_box(r, v).await
        }
        async fn insert_pack(&self, p: &TicketPack) -> AppResult<TicketPack> {
            self.inner.insert_pack(p).await
        }
        async fn get_pack(&self, id: Uuid) -> AppResult<Option<TicketPack>> {
            self.inner.get_pack(id).await
        }
        async fn list_packs(&self, s: &str, st: Option<PackStatus>) -> AppResult<Vec<TicketPack>> {
            self.inner.list_packs(s, st).await
        }
        async fn update_pack(&self, p: &TicketPack, v: i64) -> AppResult<Option<TicketPack>> {
            self.inner.update_pack(p, v).await
        }
        async fn insert_sales(&self, r: &DailySales) -> AppResult<DailySales> {
            self.inner.insert_sales(r).await
        }
        async fn get_sales(&self, id: Uuid) -> AppResult<Option<DailySales>> {
            self.inner.get_sales(id).await
        }
        async fn find_sales_by_date(&self, s: &str, d: NaiveDate) -> AppResult<Option<DailySales>> {
            self.inner.find_sales_by_date(s, d).await
        }
        async fn list_sales(&self, s: &str, f: NaiveDate, t: NaiveDate) -> AppResult<Vec<DailySales>> {
            self.inner.list_sales(s, f, t).await
        }
        async fn update_sales(&self, r: &DailySales, v: i64) -> AppResult<Option<DailySales>> {
            self.inner.update_sales(r, v).await
        }
        async fn health_check(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn conflicts_are_retried_then_reported() {
        let clock = Arc::new(FixedClock::new(at(1, 9, 0)));
        let store = Arc::new(ContendedStore {
            inner: MemoryStore::new(),
            conflicts_left: AtomicU32::new(2),
        });
        let svc = service_with(store.clone(), clock);
        let id = svc.create_box("s1", &box_req("1")).await.unwrap().record.id;

        // two conflicts fit in the retry budget of 3
        let ok = svc.record_scan("s1", id).await.unwrap();
        assert_eq!(ok.record.closing_number, 1);

        store.conflicts_left.store(10, Ordering::SeqCst);
        let err = svc.record_scan("s1", id).await.unwrap_err();
        assert!(matches!(err, AppError::ConcurrencyConflict(_)));
        assert_eq!(svc.get_box("s1", id).await.unwrap().record.closing_number, 1);
    }

    #[tokio::test]
    async fn pack_scan_and_depletion() {
        let (svc, _) = setup();
        let pack = svc.register_pack("s1", &pack_req("s1", 2)).await.unwrap();

        svc.update_pack("s1", pack.id, &scan(100)).await.unwrap();
        let p = svc.update_pack("s1", pack.id, &scan(101)).await.unwrap();
        assert_eq!(p.remaining_tickets, 0);

        let err = svc.update_pack("s1", pack.id, &scan(101)).await.unwrap_err();
        assert!(matches!(err, AppError::Depleted { .. }));
        assert_eq!(svc.get_pack("s1", pack.id).await.unwrap().scanned_count, 2);
    }

    #[tokio::test]
    async fn out_of_range_pack_scan_is_rejected() {
        let (svc, _) = setup();
        let pack = svc.register_pack("s1", &pack_req("s1", 10)).await.unwrap();

        let err = svc.update_pack("s1", pack.id, &scan(500)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let stored = svc.get_pack("s1", pack.id).await.unwrap();
        assert_eq!(stored, pack);
    }

    #[tokio::test]
    async fn batch_reset_is_idempotent() {
        let (svc, clock) = setup();
        let a = svc.register_pack("s1", &pack_req("s1", 10)).await.unwrap();
        let b = svc.register_pack("s1", &pack_req("s1", 10)).await.unwrap();
        let untouched = svc.register_pack("s1", &pack_req("s1", 10)).await.unwrap();
        let other_store = svc.register_pack("s2", &pack_req("s2", 10)).await.unwrap();

        svc.update_pack("s1", a.id, &scan(103)).await.unwrap();
        svc.update_pack("s1", b.id, &scan(105)).await.unwrap();
        svc.update_pack("s2", other_store.id, &scan(104)).await.unwrap();

        clock.set(at(2, 7, 0));
        let first = svc.reset_daily_numbers_for_store("s1").await.unwrap();
        let second = svc.reset_daily_numbers_for_store("s1").await.unwrap();

        assert_eq!(first.reset_count, 2);
        assert_eq!(second.reset_count, 0);
        assert_eq!(svc.get_pack("s1", a.id).await.unwrap().today_open_number, Some(103));
        assert_eq!(svc.get_pack("s1", b.id).await.unwrap().today_open_number, Some(105));
        assert_eq!(svc.get_pack("s1", untouched.id).await.unwrap().today_open_number, None);
        // other tenants are left alone
        assert_eq!(
            svc.get_pack("s2", other_store.id).await.unwrap().today_open_number,
            None
        );
    }

    #[tokio::test]
    async fn status_change_skips_returned_packs_in_reset_and_listing() {
        let (svc, clock) = setup();
        let p = svc.register_pack("s1", &pack_req("s1", 10)).await.unwrap();
        svc.update_pack("s1", p.id, &scan(100)).await.unwrap();
        let returned = svc
            .update_pack(
                "s1",
                p.id,
                &UpdatePackRequest {
                    scanned_serial: None,
                    status: Some(PackStatus::Returned),
                },
            )
            .await
            .unwrap();
        assert!(returned.return_date.is_some());

        clock.set(at(2, 7, 0));
        assert!(svc.list_active_packs("s1").await.unwrap().is_empty());
        assert_eq!(svc.pack_history("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inactive_packs_are_listed_newest_first() {
        let (svc, clock) = setup();
        let deactivate = UpdatePackRequest {
            scanned_serial: None,
            status: Some(PackStatus::Inactive),
        };
        let first = svc.register_pack("s1", &pack_req("s1", 10)).await.unwrap();
        let second = svc.register_pack("s1", &pack_req("s1", 10)).await.unwrap();
        svc.register_pack("s1", &pack_req("s1", 10)).await.unwrap();

        svc.update_pack("s1", first.id, &deactivate).await.unwrap();
        clock.set(at(1, 10, 0));
        svc.update_pack("s1", second.id, &deactivate).await.unwrap();

        let inactive = svc.list_inactive_packs("s1").await.unwrap();
        let ids: Vec<Uuid> = inactive.iter().map(|p| p.id).collect();
        assert_eq!(ids, [second.id, first.id]);
        assert!(svc.list_inactive_packs("s2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let (svc, _) = setup();
        let p = svc.register_pack("s1", &pack_req("s1", 10)).await.unwrap();
        let err = svc
            .update_pack("s1", p.id, &UpdatePackRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn register_requires_matching_store() {
        let (svc, _) = setup();
        let err = svc.register_pack("s1", &pack_req("s2", 10)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn sales_summary_counts_today_only() {
        let (svc, clock) = setup();
        let box_id = svc.create_box("s1", &box_req("1")).await.unwrap().record.id;
        let pack = svc.register_pack("s1", &pack_req("s1", 50)).await.unwrap();

        svc.record_manual_entry("s1", box_id, 10).await.unwrap();
        svc.update_pack("s1", pack.id, &scan(110)).await.unwrap();

        clock.set(at(2, 8, 0));
        svc.record_manual_entry("s1", box_id, 14).await.unwrap();
        svc.update_pack("s1", pack.id, &scan(113)).await.unwrap();

        let summary = svc.store_sales_summary("s1").await.unwrap();
        // box: opening 10, closing 14, cost 5
        assert_eq!(summary.box_sales, Decimal::from(20));
        // pack: 110 -> 113 at 2 each
        assert_eq!(summary.pack_sales, Decimal::from(6));
        assert_eq!(summary.total_sales, Decimal::from(26));
        assert_eq!(summary.active_boxes, 1);
    }

    #[tokio::test]
    async fn notifications_follow_commands() {
        let (svc, _) = setup();
        let mut rx = svc.notifier().subscribe();

        let id = svc.create_box("s1", &box_req("1")).await.unwrap().record.id;
        svc.record_scan("s1", id).await.unwrap();

        let created = rx.recv().await.unwrap();
        let scanned = rx.recv().await.unwrap();
        assert_eq!(created.topic, Topic::BoxUpdate);
        assert_eq!(scanned.data["closingNumber"], 1);
    }

    fn sales_req() -> RecordSalesRequest {
        RecordSalesRequest {
            online_sales: Decimal::from(300),
            lotto_payout: Decimal::from(120),
            debit_card_deduction: Decimal::from(15),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn daily_sales_default_to_the_ledger_total() {
        let (svc, _) = setup();
        let box_id = svc.create_box("s1", &box_req("1")).await.unwrap().record.id;
        svc.record_manual_entry("s1", box_id, 10).await.unwrap();

        let record = svc.record_daily_sales("s1", &sales_req()).await.unwrap();

        assert_eq!(record.sales_date, at(1, 0, 0).date_naive());
        // box: 10 tickets at 5
        assert_eq!(record.instant_sales, Decimal::from(50));
        assert_eq!(record.total_sales, Decimal::from(350));
        assert_eq!(record.net_payout, Decimal::from(215));

        let err = svc.record_daily_sales("s1", &sales_req()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(svc.daily_sales("s1", record.sales_date).await.unwrap().id, record.id);
    }

    #[tokio::test]
    async fn past_days_need_explicit_instant_sales() {
        let (svc, clock) = setup();
        clock.set(at(3, 9, 0));

        let mut req = sales_req();
        req.sales_date = Some(at(2, 0, 0).date_naive());
        assert!(svc.record_daily_sales("s1", &req).await.is_err());

        req.instant_sales = Some(Decimal::from(80));
        let record = svc.record_daily_sales("s1", &req).await.unwrap();
        assert_eq!(record.total_sales, Decimal::from(380));

        req.sales_date = Some(at(4, 0, 0).date_naive());
        let err = svc.record_daily_sales("s1", &req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn completed_sales_are_locked() {
        let (svc, _) = setup();
        let record = svc.record_daily_sales("s1", &sales_req()).await.unwrap();

        let done = svc
            .update_daily_sales(
                "s1",
                record.id,
                &UpdateSalesRequest {
                    lotto_payout: Some(Decimal::from(100)),
                    status: Some(crate::models::SalesStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(done.net_payout, Decimal::from(185));
        assert_eq!(done.version, record.version + 1);

        let again = UpdateSalesRequest {
            notes: Some("late correction".into()),
            ..Default::default()
        };
        let err = svc.update_daily_sales("s1", record.id, &again).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let err = svc.update_daily_sales("s2", record.id, &again).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = svc
            .update_daily_sales("s1", record.id, &UpdateSalesRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn monthly_and_yearly_sales_are_date_bounded() {
        let (svc, clock) = setup();
        for (d, amount) in [(1, 10), (15, 20), (31, 30)] {
            clock.set(at(d, 21, 0));
            let mut req = sales_req();
            req.instant_sales = Some(Decimal::from(amount));
            svc.record_daily_sales("s1", &req).await.unwrap();
        }
        clock.set(at(31, 21, 0));
        let mut other = sales_req();
        other.instant_sales = Some(Decimal::ONE);
        svc.record_daily_sales("s2", &other).await.unwrap();

        let july = svc.monthly_sales("s1", 2024, 7).await.unwrap();
        let days: Vec<u32> = july.iter().map(|r| chrono::Datelike::day(&r.sales_date)).collect();
        assert_eq!(days, [1, 15, 31]);

        assert!(svc.monthly_sales("s1", 2024, 6).await.unwrap().is_empty());
        assert_eq!(svc.yearly_sales("s1", 2024).await.unwrap().len(), 3);
        assert!(matches!(
            svc.monthly_sales("s1", 2024, 13).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            svc.daily_sales("s1", at(2, 0, 0).date_naive()).await,
            Err(AppError::NotFound(_))
        ));
    }
}

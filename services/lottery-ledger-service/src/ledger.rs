// =============================================================================
// BOX LEDGER
// =============================================================================
// Opening/closing counters and unit economics for one physical dispenser.
//
// Every transition here is a pure function on a BoxRecord: it validates,
// applies the day-rollover guard and the requested mutation, and returns the
// new record. Nothing is persisted here; the service writes the result with
// a version check so the rollover and the mutation land in one write.
//
// DAY ROLLOVER:
//   A box whose last_updated falls on an earlier business day is "pending
//   reset". Before any scan or manual entry the reset is applied first
//   (opening := closing, closing := 0), then the mutation. An explicit reset
//   is the same transition and only applies to a pending box, so one day
//   boundary never resets a box twice.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::calendar::BusinessCalendar;
use crate::error::{AppError, AppResult};
use crate::money;
use crate::models::{BoxRecord, BoxView, CreateBoxRequest, LoadBoxRequest, SuggestedTicket};
use crate::serial::MAX_SERIAL_VALUE;

impl BoxRecord {
    // -------------------------------------------------------------------------
    // CREATION
    // -------------------------------------------------------------------------
    /// A freshly loaded box: both counters at zero, active.
    pub fn create(store_id: &str, req: &CreateBoxRequest, now: DateTime<Utc>) -> AppResult<Self> {
        let store_id = store_id.trim();
        let box_number = req.box_number.trim();
        if store_id.is_empty() {
            return Err(AppError::Validation("store id is required".to_string()));
        }
        if box_number.is_empty() {
            return Err(AppError::Validation("box number is required".to_string()));
        }
        validate_pack_fields(&req.game_number, &req.ticket_serial, req.ticket_cost)?;

        Ok(Self {
            id: Uuid::new_v4(),
            store_id: store_id.to_string(),
            box_number: box_number.to_string(),
            game_number: req.game_number.trim().to_string(),
            ticket_serial: req.ticket_serial.trim().to_string(),
            opening_number: 0,
            closing_number: 0,
            ticket_cost: req.ticket_cost,
            is_active: true,
            last_updated: now,
            last_reset_on: None,
            created_at: now,
            version: 0,
        })
    }

    // -------------------------------------------------------------------------
    // DERIVED VALUES
    // -------------------------------------------------------------------------
    /// `(closing - opening) * cost`, floored at zero. Pure, no rollover
    /// applied. Right after a rollover closing restarts below opening; the
    /// box shows no sales until the count passes opening again.
    pub fn calculate_sales(&self) -> AppResult<Decimal> {
        let sold = (self.closing_number - self.opening_number).max(0);
        money::extend(sold, self.ticket_cost)
    }

    pub fn next_suggested_ticket(&self) -> SuggestedTicket {
        SuggestedTicket {
            game_number: self.game_number.clone(),
            ticket_serial: self.ticket_serial.clone(),
            ticket_number: self.closing_number + 1,
        }
    }

    /// True when the stored counters belong to an earlier business day
    pub fn is_pending_reset(&self, now: DateTime<Utc>, calendar: &BusinessCalendar) -> bool {
        calendar.is_new_day(Some(self.last_updated), now)
    }

    pub fn into_view(self) -> AppResult<BoxView> {
        let sales = self.calculate_sales()?;
        Ok(BoxView {
            record: self,
            sales,
        })
    }

    // -------------------------------------------------------------------------
    // COMMANDS
    // -------------------------------------------------------------------------
    /// One ticket sold: closing += 1 (after any pending rollover).
    pub fn record_scan(&self, now: DateTime<Utc>, calendar: &BusinessCalendar) -> AppResult<Self> {
        self.ensure_active()?;

        let mut next = self.rolled_over(now, calendar);
        next.closing_number = next
            .closing_number
            .checked_add(1)
            .filter(|n| *n <= MAX_SERIAL_VALUE)
            .ok_or_else(|| {
                AppError::Validation(format!("closing number overflow on box {}", self.id))
            })?;
        next.last_updated = now;
        Ok(next)
    }

    /// Clerk-entered closing number. Must not move the counters backwards
    /// (checked against today's counters, i.e. after any pending rollover).
    pub fn record_manual_entry(
        &self,
        ticket_number: i64,
        now: DateTime<Utc>,
        calendar: &BusinessCalendar,
    ) -> AppResult<Self> {
        self.ensure_active()?;

        let mut next = self.rolled_over(now, calendar);
        if ticket_number < 0 {
            return Err(AppError::Validation(format!(
                "ticket number {} must not be negative",
                ticket_number
            )));
        }
        if ticket_number > MAX_SERIAL_VALUE {
            return Err(AppError::Validation(format!(
                "ticket number {} exceeds {}",
                ticket_number, MAX_SERIAL_VALUE
            )));
        }
        if ticket_number < next.opening_number {
            return Err(AppError::Validation(format!(
                "ticket number {} is below the opening number {}",
                ticket_number, next.opening_number
            )));
        }
        if ticket_number < next.closing_number {
            return Err(AppError::Validation(format!(
                "ticket number {} is below the current closing number {}",
                ticket_number, next.closing_number
            )));
        }

        next.closing_number = ticket_number;
        next.last_updated = now;
        Ok(next)
    }

    /// Explicit daily reset. Returns the new record and whether anything
    /// changed. Only a box still holding an earlier business day's counters
    /// is reset; one touched today (by a scan, an entry or a previous reset)
    /// is left as is.
    pub fn reset_for_new_day(
        &self,
        now: DateTime<Utc>,
        calendar: &BusinessCalendar,
    ) -> AppResult<(Self, bool)> {
        self.ensure_active()?;

        if !self.is_pending_reset(now, calendar) {
            return Ok((self.clone(), false));
        }

        let mut next = self.clone();
        next.apply_reset(now, calendar);
        Ok((next, true))
    }

    /// Put a new game pack in the slot. Counters start over at zero.
    pub fn load_game_pack(&self, req: &LoadBoxRequest, now: DateTime<Utc>) -> AppResult<Self> {
        self.ensure_active()?;
        validate_pack_fields(&req.game_number, &req.ticket_serial, req.ticket_cost)?;

        let mut next = self.clone();
        next.game_number = req.game_number.trim().to_string();
        next.ticket_serial = req.ticket_serial.trim().to_string();
        next.ticket_cost = req.ticket_cost;
        next.opening_number = 0;
        next.closing_number = 0;
        next.last_updated = now;
        Ok(next)
    }

    /// Take the box out of service. Idempotent.
    pub fn deactivate(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        if next.is_active {
            next.is_active = false;
            next.last_updated = now;
        }
        next
    }

    // -------------------------------------------------------------------------
    // INTERNALS
    // -------------------------------------------------------------------------
    fn ensure_active(&self) -> AppResult<()> {
        if self.is_active {
            Ok(())
        } else {
            Err(AppError::InvalidState(format!(
                "box {} is inactive",
                self.box_number
            )))
        }
    }

    /// Copy of self with the pending rollover (if any) applied
    fn rolled_over(&self, now: DateTime<Utc>, calendar: &BusinessCalendar) -> Self {
        let mut next = self.clone();
        if self.is_pending_reset(now, calendar) {
            next.apply_reset(now, calendar);
        }
        next
    }

    fn apply_reset(&mut self, now: DateTime<Utc>, calendar: &BusinessCalendar) {
        self.opening_number = self.closing_number;
        self.closing_number = 0;
        self.last_reset_on = Some(calendar.business_day(now));
        self.last_updated = now;
    }
}

fn validate_pack_fields(game_number: &str, ticket_serial: &str, cost: Decimal) -> AppResult<()> {
    if game_number.trim().is_empty() {
        return Err(AppError::Validation("game number is required".to_string()));
    }
    if ticket_serial.trim().is_empty() {
        return Err(AppError::Validation("ticket serial is required".to_string()));
    }
    money::validate_price("ticket cost", cost)
}

// =============================================================================
// TICKET PACK TRACKER
// =============================================================================
// Serial-range enforcement, inventory depletion and daily opening/closing
// bookkeeping for one ticket pack.
//
// Same shape as the box ledger: pure transitions that return a new
// TicketPack, persisted by the service with a version check.
//
// SCAN ORDER:
//   1. reject (no mutation): pack not active, serial out of range, depleted
//   2. pending daily reset: today_open := last_closing
//   3. count the ticket: scanned += 1, remaining -= 1, closing := serial
// =============================================================================

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::calendar::BusinessCalendar;
use crate::error::{AppError, AppResult};
use crate::money;
use crate::models::{PackSales, PackStatus, RegisterPackRequest, TicketPack};
use crate::serial::SerialRange;

impl TicketPack {
    // -------------------------------------------------------------------------
    // REGISTRATION
    // -------------------------------------------------------------------------
    /// A fresh pack: remaining = total, status active.
    pub fn register(req: &RegisterPackRequest, now: DateTime<Utc>) -> AppResult<Self> {
        let store_id = req.store_id.trim();
        if store_id.is_empty() {
            return Err(AppError::Validation("store id is required".to_string()));
        }
        if req.game_number.trim().is_empty() {
            return Err(AppError::Validation("game number is required".to_string()));
        }
        if req.game_name.trim().is_empty() {
            return Err(AppError::Validation("game name is required".to_string()));
        }
        if req.total_tickets <= 0 {
            return Err(AppError::Validation(format!(
                "total tickets {} must be positive",
                req.total_tickets
            )));
        }
        money::validate_price("ticket price", req.ticket_price)?;
        let range = SerialRange::new(req.start_serial.0, req.end_serial.0)?;
        let fits = range
            .serial_count()
            .is_some_and(|count| i64::from(req.total_tickets) <= count);
        if !fits {
            return Err(AppError::Validation(format!(
                "{} tickets do not fit in serial range [{}, {}]",
                req.total_tickets,
                range.start(),
                range.end()
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            store_id: store_id.to_string(),
            game_number: req.game_number.trim().to_string(),
            game_name: req.game_name.trim().to_string(),
            start_serial: range.start(),
            end_serial: range.end(),
            current_serial: None,
            ticket_price: req.ticket_price,
            status: PackStatus::Active,
            total_tickets: req.total_tickets,
            remaining_tickets: req.total_tickets,
            scanned_count: 0,
            today_open_number: None,
            last_closing_number: None,
            last_reset_date: None,
            activation_date: now,
            deactivation_date: None,
            return_date: None,
            game_image: req.game_image.clone().filter(|s| !s.trim().is_empty()),
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    pub fn serial_range(&self) -> AppResult<SerialRange> {
        SerialRange::new(self.start_serial, self.end_serial)
    }

    // -------------------------------------------------------------------------
    // DAILY RESET
    // -------------------------------------------------------------------------
    /// True if never reset, or last reset on an earlier business day.
    pub fn needs_daily_reset(&self, now: DateTime<Utc>, calendar: &BusinessCalendar) -> bool {
        calendar.is_new_day(self.last_reset_date, now)
    }

    /// Carry the last closing number into today's opening.
    ///
    /// Returns whether anything changed. A no-op when the pack was already
    /// reset today or has never been scanned, so repeated calls are safe.
    pub fn perform_daily_reset(&mut self, now: DateTime<Utc>, calendar: &BusinessCalendar) -> bool {
        if !self.needs_daily_reset(now, calendar) {
            return false;
        }
        match self.last_closing_number {
            Some(closing) => {
                self.today_open_number = Some(closing);
                self.last_reset_date = Some(now);
                self.updated_at = now;
                true
            }
            None => false,
        }
    }

    // -------------------------------------------------------------------------
    // SCAN
    // -------------------------------------------------------------------------
    pub fn scan(
        &self,
        serial: i64,
        now: DateTime<Utc>,
        calendar: &BusinessCalendar,
    ) -> AppResult<Self> {
        if self.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "ticket pack {} is {}",
                self.id, self.status
            )));
        }
        self.serial_range()?.check(serial)?;
        if self.remaining_tickets <= 0 {
            return Err(AppError::Depleted { pack_id: self.id });
        }

        let mut next = self.clone();
        next.perform_daily_reset(now, calendar);

        next.scanned_count += 1;
        next.remaining_tickets -= 1;
        next.current_serial = Some(serial);
        next.last_closing_number = Some(serial);
        next.updated_at = now;
        Ok(next)
    }

    // -------------------------------------------------------------------------
    // STATUS
    // -------------------------------------------------------------------------
    /// Move the pack out of service. `inactive` may still become `returned`;
    /// nothing goes back to `active`.
    pub fn change_status(&self, status: PackStatus, now: DateTime<Utc>) -> AppResult<Self> {
        if status == self.status {
            return Ok(self.clone());
        }

        let mut next = self.clone();
        match (self.status, status) {
            (PackStatus::Active, PackStatus::Inactive) => {
                next.deactivation_date = Some(now);
            }
            (PackStatus::Active | PackStatus::Inactive, PackStatus::Returned) => {
                next.return_date = Some(now);
            }
            (from, to) => {
                return Err(AppError::InvalidState(format!(
                    "ticket pack {} cannot move from {} to {}",
                    self.id, from, to
                )));
            }
        }
        next.status = status;
        next.updated_at = now;
        Ok(next)
    }

    // -------------------------------------------------------------------------
    // SALES
    // -------------------------------------------------------------------------
    /// Today's sales from the opening/closing serials, if both are known.
    pub fn todays_sales(&self) -> AppResult<Option<PackSales>> {
        let (Some(open), Some(close)) = (self.today_open_number, self.last_closing_number) else {
            return Ok(None);
        };
        let sold = close.saturating_sub(open).max(0);
        Ok(Some(PackSales {
            pack_id: self.id,
            game_number: self.game_number.clone(),
            tickets_sold: sold,
            amount: money::extend(sold, self.ticket_price)?,
        }))
    }
}

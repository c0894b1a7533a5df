// =============================================================================
// DAILY SALES
// =============================================================================
// The clerk's end-of-day reconciliation record.
//
// TOTALS:
//   total_sales = instant_sales + online_sales
//   net_payout  = total_sales - lotto_payout - debit_card_deduction
// Both are recomputed on every change so they never drift from the inputs.
//
// A record starts `pending` and is editable until it is `completed` or
// `cancelled`; after that it is read-only.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{DailySales, RecordSalesRequest, SalesStatus, UpdateSalesRequest};
use crate::money;

/// Longest accepted notes field
const MAX_NOTES_LEN: usize = 2000;

impl DailySales {
    /// A new pending record for `sales_date`.
    pub fn record(
        store_id: &str,
        sales_date: NaiveDate,
        instant_sales: Decimal,
        req: &RecordSalesRequest,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let store_id = store_id.trim();
        if store_id.is_empty() {
            return Err(AppError::Validation("store id is required".to_string()));
        }

        let record = Self {
            id: Uuid::new_v4(),
            store_id: store_id.to_string(),
            sales_date,
            instant_sales,
            online_sales: req.online_sales,
            lotto_payout: req.lotto_payout,
            debit_card_deduction: req.debit_card_deduction,
            total_sales: Decimal::ZERO,
            net_payout: Decimal::ZERO,
            status: SalesStatus::Pending,
            notes: clean_notes(req.notes.as_deref())?,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        record.with_totals()
    }

    /// Apply a partial update. Amount changes are applied before the status
    /// change, so one request can correct and complete a record.
    pub fn apply_update(&self, req: &UpdateSalesRequest, now: DateTime<Utc>) -> AppResult<Self> {
        if self.status != SalesStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "sales record for {} is {}",
                self.sales_date, self.status
            )));
        }

        let mut next = self.clone();
        if let Some(amount) = req.instant_sales {
            next.instant_sales = amount;
        }
        if let Some(amount) = req.online_sales {
            next.online_sales = amount;
        }
        if let Some(amount) = req.lotto_payout {
            next.lotto_payout = amount;
        }
        if let Some(amount) = req.debit_card_deduction {
            next.debit_card_deduction = amount;
        }
        if req.notes.is_some() {
            next.notes = clean_notes(req.notes.as_deref())?;
        }
        if let Some(status) = req.status {
            next.status = status;
        }

        let mut next = next.with_totals()?;
        if next != *self {
            next.updated_at = now;
        }
        Ok(next)
    }

    /// Validate the inputs and recompute the derived totals
    fn with_totals(mut self) -> AppResult<Self> {
        money::validate_amount("instant sales", self.instant_sales)?;
        money::validate_amount("online sales", self.online_sales)?;
        money::validate_amount("lotto payout", self.lotto_payout)?;
        money::validate_amount("debit card deduction", self.debit_card_deduction)?;

        self.total_sales = money::total([self.instant_sales, self.online_sales])?;
        self.net_payout = self
            .total_sales
            .checked_sub(self.lotto_payout)
            .and_then(|n| n.checked_sub(self.debit_card_deduction))
            .ok_or_else(|| AppError::Validation("net payout is out of range".to_string()))?;
        Ok(self)
    }
}

fn clean_notes(notes: Option<&str>) -> AppResult<String> {
    let notes = notes.unwrap_or_default().trim();
    if notes.chars().count() > MAX_NOTES_LEN {
        return Err(AppError::Validation(format!(
            "notes are longer than {} characters",
            MAX_NOTES_LEN
        )));
    }
    Ok(notes.to_string())
}

// -----------------------------------------------------------------------------
// DATE RANGES
// -----------------------------------------------------------------------------
/// First and last day of a calendar month
pub fn month_range(year: i32, month: u32) -> AppResult<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::Validation(format!("invalid month {}-{}", year, month)))?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let last = next_month
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| AppError::Validation(format!("invalid month {}-{}", year, month)))?;
    Ok((first, last))
}

/// First and last day of a calendar year
pub fn year_range(year: i32) -> AppResult<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, 1, 1);
    let last = NaiveDate::from_ymd_opt(year, 12, 31);
    match (first, last) {
        (Some(first), Some(last)) => Ok((first, last)),
        _ => Err(AppError::Validation(format!("invalid year {}", year))),
    }
}

// =============================================================================
// TESTS
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 22, 0, 0).unwrap()
    }

    fn request() -> RecordSalesRequest {
        RecordSalesRequest {
            online_sales: Decimal::new(31000, 2),
            lotto_payout: Decimal::new(12000, 2),
            debit_card_deduction: Decimal::new(1550, 2),
            notes: Some("  shift B  ".into()),
            ..Default::default()
        }
    }

    #[test]
    fn totals_follow_the_inputs() {
        let s = DailySales::record("s1", day(1), Decimal::from(500), &request(), now()).unwrap();

        assert_eq!(s.total_sales, Decimal::new(81000, 2));
        // 810 - 120 - 15.50
        assert_eq!(s.net_payout, Decimal::new(67450, 2));
        assert_eq!(s.status, SalesStatus::Pending);
        assert_eq!(s.notes, "shift B");
    }

    #[test]
    fn net_payout_may_go_negative() {
        let req = RecordSalesRequest {
            lotto_payout: Decimal::from(900),
            ..Default::default()
        };
        let s = DailySales::record("s1", day(1), Decimal::from(100), &req, now()).unwrap();
        assert_eq!(s.net_payout, Decimal::from(-800));
    }

    #[test]
    fn amounts_are_validated() {
        let mut req = request();
        req.lotto_payout = Decimal::from(-1);
        assert!(matches!(
            DailySales::record("s1", day(1), Decimal::ZERO, &req, now()),
            Err(AppError::Validation(_))
        ));

        let mut req = request();
        req.online_sales = Decimal::new(10005, 3);
        assert!(DailySales::record("s1", day(1), Decimal::ZERO, &req, now()).is_err());
        assert!(DailySales::record(" ", day(1), Decimal::ZERO, &request(), now()).is_err());
    }

    #[test]
    fn update_recomputes_and_completes() {
        let s = DailySales::record("s1", day(1), Decimal::from(500), &request(), now()).unwrap();
        let later = now() + chrono::Duration::minutes(5);

        let update = UpdateSalesRequest {
            lotto_payout: Some(Decimal::from(200)),
            status: Some(SalesStatus::Completed),
            ..Default::default()
        };
        let done = s.apply_update(&update, later).unwrap();

        assert_eq!(done.net_payout, Decimal::new(59450, 2));
        assert_eq!(done.status, SalesStatus::Completed);
        assert_eq!(done.updated_at, later);

        // closed records are read-only
        assert!(matches!(
            done.apply_update(&UpdateSalesRequest::default(), later),
            Err(AppError::InvalidState(_))
        ));
    }

    #[test]
    fn empty_update_changes_nothing() {
        let s = DailySales::record("s1", day(1), Decimal::from(500), &request(), now()).unwrap();
        let same = s
            .apply_update(&UpdateSalesRequest::default(), now() + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(same, s);
    }

    #[test]
    fn month_and_year_bounds() {
        assert_eq!(month_range(2024, 2).unwrap(), (
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
        ));
        assert_eq!(month_range(2024, 12).unwrap().1, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert!(month_range(2024, 13).is_err());
        assert!(month_range(2024, 0).is_err());

        let (first, last) = year_range(2023).unwrap();
        assert_eq!((first.ordinal(), last.ordinal()), (1, 365));
    }
}

// =============================================================================
// MONEY MODULE
// =============================================================================
// Bounds and checked arithmetic for currency amounts.
//
// Amounts are stored as NUMERIC(12, 2): at most two decimal places and ten
// integer digits. Inputs outside that are rejected up front so the memory
// and Postgres backends always hold the same value.
// =============================================================================

use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};

/// Decimal places kept for any amount
pub const MONEY_SCALE: u32 = 2;

/// Largest amount a NUMERIC(12, 2) column holds: 9999999999.99
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, MONEY_SCALE)
}

/// Non-negative, at most two decimal places, within the column range
pub fn validate_amount(field: &str, amount: Decimal) -> AppResult<()> {
    if amount < Decimal::ZERO {
        return Err(AppError::Validation(format!(
            "{} {} must not be negative",
            field, amount
        )));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(AppError::Validation(format!(
            "{} {} has more than {} decimal places",
            field, amount, MONEY_SCALE
        )));
    }
    if amount > max_amount() {
        return Err(AppError::Validation(format!(
            "{} {} exceeds {}",
            field,
            amount,
            max_amount()
        )));
    }
    Ok(())
}

/// Like `validate_amount`, and strictly positive
pub fn validate_price(field: &str, amount: Decimal) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::Validation(format!(
            "{} {} must be positive",
            field, amount
        )));
    }
    validate_amount(field, amount)
}

/// `count * unit`, rejecting results Decimal cannot represent
pub fn extend(count: i64, unit: Decimal) -> AppResult<Decimal> {
    Decimal::from(count).checked_mul(unit).ok_or_else(|| {
        AppError::Validation(format!("sales amount {} x {} is out of range", count, unit))
    })
}

/// Checked sum of `amounts`
pub fn total<I>(amounts: I) -> AppResult<Decimal>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts.into_iter().try_fold(Decimal::ZERO, |acc, amount| {
        acc.checked_add(amount)
            .ok_or_else(|| AppError::Validation("sales total is out of range".to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_keep_two_decimal_places() {
        assert!(validate_amount("cost", Decimal::new(250, 2)).is_ok());
        // trailing zeros are not extra precision
        assert!(validate_amount("cost", Decimal::new(25000, 4)).is_ok());
        assert!(matches!(
            validate_amount("cost", Decimal::new(2555, 3)),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn amounts_stay_in_column_range() {
        assert!(validate_amount("cost", max_amount()).is_ok());
        assert!(validate_amount("cost", max_amount() + Decimal::new(1, 2)).is_err());
        assert!(validate_amount("cost", Decimal::new(-1, 2)).is_err());
        assert!(validate_amount("cost", Decimal::ZERO).is_ok());
    }

    #[test]
    fn prices_must_be_positive() {
        assert!(validate_price("price", Decimal::ZERO).is_err());
        assert!(validate_price("price", Decimal::ONE).is_ok());
    }

    #[test]
    fn extend_and_total_report_overflow() {
        assert_eq!(extend(3, Decimal::new(250, 2)).unwrap(), Decimal::new(750, 2));
        assert!(matches!(
            extend(i64::MAX, Decimal::MAX),
            Err(AppError::Validation(_))
        ));

        assert_eq!(total([Decimal::ONE, Decimal::from(2)]).unwrap(), Decimal::from(3));
        assert!(total([Decimal::MAX, Decimal::ONE]).is_err());
    }
}

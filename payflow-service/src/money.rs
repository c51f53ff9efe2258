//! Monetary arithmetic for invoice totals.
//!
//! All amounts are integer minor-currency units (cents). The only place a
//! fraction enters is the VAT rate, and the only rounding step is the tax
//! amount: nearest cent, ties away from zero.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Derived monetary totals for an invoice, in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: i64,
    pub tax_amount: i64,
    pub total: i64,
}

/// Total for a single line, in cents.
pub fn line_total(quantity: i32, unit_price: i64) -> i64 {
    i64::from(quantity) * unit_price
}

/// Tax on a subtotal at the given VAT fraction, rounded to the nearest cent
/// with ties away from zero.
pub fn tax_amount(subtotal: i64, vat_rate: Decimal) -> i64 {
    (Decimal::from(subtotal) * vat_rate)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Compute subtotal, tax and grand total from per-line totals.
pub fn compute_totals<I>(line_totals: I, vat_rate: Decimal) -> Totals
where
    I: IntoIterator<Item = i64>,
{
    let subtotal: i64 = line_totals.into_iter().sum();
    let tax = tax_amount(subtotal, vat_rate);
    Totals {
        subtotal,
        tax_amount: tax,
        total: subtotal + tax,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(s: &str) -> Decimal {
        s.parse().expect("valid decimal literal")
    }

    #[test]
    fn totals_are_consistent_and_deterministic() {
        let lines = [line_total(2, 5000), line_total(3, 199)];
        let first = compute_totals(lines, rate("0.21"));
        let second = compute_totals(lines, rate("0.21"));
        assert_eq!(first, second);
        assert_eq!(first.total, first.subtotal + first.tax_amount);
    }

    #[test]
    fn flat_vat_rounds_to_whole_cents() {
        let totals = compute_totals([line_total(1, 10000)], rate("0.15"));
        assert_eq!(totals.subtotal, 10000);
        assert_eq!(totals.tax_amount, 1500);
        assert_eq!(totals.total, 11500);
    }

    #[test]
    fn midpoint_rounds_away_from_zero() {
        // 50 * 0.05 = 2.5 cents
        assert_eq!(tax_amount(50, rate("0.05")), 3);
        // 150 * 0.15 = 22.5 cents
        assert_eq!(tax_amount(150, rate("0.15")), 23);
        // just below the midpoint stays down
        assert_eq!(tax_amount(149, rate("0.15")), 22);
    }

    #[test]
    fn empty_invoice_is_all_zero() {
        let totals = compute_totals([], rate("0.15"));
        assert_eq!(
            totals,
            Totals {
                subtotal: 0,
                tax_amount: 0,
                total: 0
            }
        );
    }

    #[test]
    fn zero_rate_has_no_tax() {
        let totals = compute_totals([line_total(4, 250)], rate("0"));
        assert_eq!(totals.subtotal, 1000);
        assert_eq!(totals.tax_amount, 0);
        assert_eq!(totals.total, 1000);
    }
}

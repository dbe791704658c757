// src/utils/precision.rs
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

fn to_decimal(value: f64, precision: u32) -> Option<Decimal> {
    Decimal::from_f64_retain(value)
        .or_else(|| Decimal::from_f64(value))
        .map(|d| {
            let mut rounded =
                d.round_dp_with_strategy(precision, RoundingStrategy::MidpointNearestEven);
            rounded.rescale(precision);
            rounded
        })
}

/// Rounds to `precision` digits, half to even, the same way every ledger and
/// display value is rounded. Internal state never goes through this.
pub fn round_to(value: f64, precision: u32) -> f64 {
    to_decimal(value, precision)
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Пример: 998.0014, precision=2 -> "998.00"
pub fn format_rounded(value: f64, precision: u32) -> String {
    match to_decimal(value, precision) {
        Some(d) => d.to_string(),
        None => value.to_string(),
    }
}

pub fn format_money(value: f64, precision: u32) -> String {
    format!("${}", format_rounded(value, precision))
}

pub fn format_optional_money(value: Option<f64>, precision: u32) -> String {
    match value {
        Some(v) => format_money(v, precision),
        None => "None".to_string(),
    }
}

/// Decimal fraction (0.05) to a percentage string ("5.00%").
pub fn format_percentage(decimal_value: f64, precision: u32) -> String {
    format!("{}%", format_rounded(decimal_value * 100.0, precision))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_to_even() {
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.375, 2), 0.38);
        assert_eq!(round_to(1097.8011, 2), 1097.8);
    }

    #[test]
    fn formats_money_and_percentages() {
        assert_eq!(format_money(998.001, 2), "$998.00");
        assert_eq!(format_percentage(0.05, 2), "5.00%");
        assert_eq!(format_optional_money(None, 2), "None");
    }
}

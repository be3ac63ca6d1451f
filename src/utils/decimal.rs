use bigdecimal::{BigDecimal, RoundingMode};
use num_traits::{ToPrimitive, Zero};
use std::str::FromStr;

/// Money is carried as `BigDecimal` with two fractional digits, rounded half-up.
pub const MONEY_SCALE: i64 = 2;

pub trait BigDecimalHelpers {
    fn to_i64_or_zero(&self) -> i64;
    fn round_money(&self) -> BigDecimal;
    fn to_cents(&self) -> i64;
}

impl BigDecimalHelpers for BigDecimal {
    fn to_i64_or_zero(&self) -> i64 {
        self.to_i64().unwrap_or(0)
    }

    fn round_money(&self) -> BigDecimal {
        self.with_scale_round(MONEY_SCALE, RoundingMode::HalfUp)
    }

    fn to_cents(&self) -> i64 {
        (self * BigDecimal::from(100))
            .with_scale_round(0, RoundingMode::HalfUp)
            .to_i64()
            .unwrap_or(0)
    }
}

impl BigDecimalHelpers for Option<BigDecimal> {
    fn to_i64_or_zero(&self) -> i64 {
        self.as_ref()
            .map(|bd| bd.to_i64().unwrap_or(0))
            .unwrap_or(0)
    }

    fn round_money(&self) -> BigDecimal {
        self.as_ref()
            .map(|bd| bd.round_money())
            .unwrap_or_else(zero_money)
    }

    fn to_cents(&self) -> i64 {
        self.as_ref().map(|bd| bd.to_cents()).unwrap_or(0)
    }
}

pub fn zero_money() -> BigDecimal {
    BigDecimal::zero().with_scale(MONEY_SCALE)
}

pub fn from_cents(cents: i64) -> BigDecimal {
    BigDecimal::new(cents.into(), MONEY_SCALE)
}

/// Operator inputs arrive as `f64`; anything non-finite is rejected.
pub fn money_from_f64(value: f64) -> Option<BigDecimal> {
    if !value.is_finite() {
        return None;
    }
    BigDecimal::from_str(&value.to_string())
        .ok()
        .map(|bd| bd.round_money())
}

/// Splits `total` into `parts` shares that sum back to `total` exactly.
/// Leftover cents go to the first shares, one each.
pub fn split_evenly(total: &BigDecimal, parts: usize) -> Vec<BigDecimal> {
    if parts == 0 {
        return Vec::new();
    }

    let cents = total.to_cents();
    let sign = if cents < 0 { -1 } else { 1 };
    let magnitude = cents.abs();
    let n = parts as i64;
    let base = magnitude / n;
    let remainder = magnitude % n;

    (0..n)
        .map(|i| {
            let share = if i < remainder { base + 1 } else { base };
            from_cents(sign * share)
        })
        .collect()
}

pub fn clamp(value: BigDecimal, min: BigDecimal, max: BigDecimal) -> BigDecimal {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

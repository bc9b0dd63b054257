//! Exact decimal arithmetic for on-chain fixed-point quantities.
//!
//! Chain balances and prices arrive as integers scaled by `10^18`. Values are
//! held as arbitrary-precision decimals and never pass through binary floats.
//! Division keeps [`DIVISION_SCALE`] fractional digits and rounds toward zero;
//! [`FixedPoint::to_fixed`] follows the same rule.

use std::{
    cmp::Ordering,
    fmt,
    ops::{Add, Mul},
    str::FromStr,
};

use bigdecimal::{BigDecimal, RoundingMode};
use thiserror::Error;

/// Number of implied decimal digits in a chain-native fixed-point integer.
pub const PRECISION: u32 = 18;

/// Fractional digits retained by [`FixedPoint::div`].
pub const DIVISION_SCALE: i64 = 18;

const ONE_INNER: i64 = 1_000_000_000_000_000_000;
const PER_MILLION_TO_ONE: i64 = 1_000_000_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FixedPointError {
    #[error("invalid decimal `{0}`")]
    Parse(String),
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedPoint(BigDecimal);

impl FixedPoint {
    /// The unit value, `10^18`.
    pub fn one() -> Self {
        Self(BigDecimal::from(ONE_INNER))
    }

    pub fn zero() -> Self {
        Self(BigDecimal::from(0))
    }

    pub fn from_integer(value: i64) -> Self {
        Self(BigDecimal::from(value))
    }

    /// Rescales a parts-per-million chain value to the `10^18` base.
    pub fn from_per_million(value: &FixedPoint) -> Self {
        Self(&value.0 * &BigDecimal::from(PER_MILLION_TO_ONE))
    }

    pub fn parse(raw: &str) -> Result<Self, FixedPointError> {
        let trimmed = raw.trim();
        BigDecimal::from_str(trimmed)
            .map(Self)
            .map_err(|_| FixedPointError::Parse(raw.to_string()))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigDecimal::from(0)
    }

    pub fn add(&self, other: &FixedPoint) -> FixedPoint {
        Self(&self.0 + &other.0)
    }

    pub fn mul(&self, other: &FixedPoint) -> FixedPoint {
        Self(&self.0 * &other.0)
    }

    pub fn div(&self, other: &FixedPoint) -> Result<FixedPoint, FixedPointError> {
        if other.is_zero() {
            return Err(FixedPointError::DivisionByZero);
        }
        let quotient = &self.0 / &other.0;
        Ok(Self(quotient.with_scale_round(DIVISION_SCALE, RoundingMode::Down)))
    }

    pub fn gt(&self, other: &FixedPoint) -> bool {
        self.cmp(other) == Ordering::Greater
    }

    pub fn lt(&self, other: &FixedPoint) -> bool {
        self.cmp(other) == Ordering::Less
    }

    /// Renders with exactly `digits` fractional digits, truncating toward zero.
    pub fn to_fixed(&self, digits: u32) -> String {
        let rounded = self.0.with_scale_round(i64::from(digits), RoundingMode::Down);
        render_plain(&rounded, Some(digits))
    }
}

impl fmt::Display for FixedPoint {
    /// Full precision, trailing fractional zeros removed, never exponent form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_plain(&self.0.normalized(), None))
    }
}

impl FromStr for FixedPoint {
    type Err = FixedPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Add for &FixedPoint {
    type Output = FixedPoint;

    fn add(self, rhs: Self) -> FixedPoint {
        FixedPoint::add(self, rhs)
    }
}

impl Mul for &FixedPoint {
    type Output = FixedPoint;

    fn mul(self, rhs: Self) -> FixedPoint {
        FixedPoint::mul(self, rhs)
    }
}

fn render_plain(value: &BigDecimal, min_fraction: Option<u32>) -> String {
    let (digits, scale) = value.as_bigint_and_exponent();
    let rendered = digits.to_string();
    let (negative, magnitude) = match rendered.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, rendered),
    };

    let mut body = if scale <= 0 {
        let mut integer = magnitude;
        if integer != "0" {
            integer.push_str(&"0".repeat(scale.unsigned_abs() as usize));
        }
        integer
    } else {
        let scale = scale as usize;
        let padded = if magnitude.len() <= scale {
            format!("{}{}", "0".repeat(scale - magnitude.len() + 1), magnitude)
        } else {
            magnitude
        };
        let split = padded.len() - scale;
        format!("{}.{}", &padded[..split], &padded[split..])
    };

    if let Some(wanted) = min_fraction {
        let wanted = wanted as usize;
        let current = body.split_once('.').map_or(0, |(_, frac)| frac.len());
        if current < wanted {
            if current == 0 {
                body.push('.');
            }
            body.push_str(&"0".repeat(wanted - current));
        }
    }

    if negative && body.chars().any(|c| c != '0' && c != '.') {
        format!("-{body}")
    } else {
        body
    }
}

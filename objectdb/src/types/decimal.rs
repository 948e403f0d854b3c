//! Fixed-point decimal numbers.
//!
//! A decimal is a signed 128-bit mantissa scaled by a power of ten:
//! `value = mantissa / 10^scale`. Two decimals with different scales compare
//! by numeric value, so `1.50` and `1.5` are equal.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Largest supported scale (number of fractional digits).
pub const MAX_SCALE: u8 = 28;

/// A fixed-point decimal number.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decimal {
    mantissa: i128,
    scale: u8,
}

impl Decimal {
    /// Create a decimal from a mantissa and scale.
    ///
    /// Returns `None` if the scale exceeds [`MAX_SCALE`].
    #[must_use]
    pub const fn new(mantissa: i128, scale: u8) -> Option<Self> {
        if scale > MAX_SCALE {
            return None;
        }
        Some(Self { mantissa, scale })
    }

    /// Create a decimal from an integer.
    #[must_use]
    pub const fn from_i128(n: i128) -> Self {
        Self {
            mantissa: n,
            scale: 0,
        }
    }

    #[must_use]
    pub const fn mantissa(&self) -> i128 {
        self.mantissa
    }

    #[must_use]
    pub const fn scale(&self) -> u8 {
        self.scale
    }

    /// `10^scale`, the denominator of the mantissa.
    fn unit(&self) -> i128 {
        10i128.pow(u32::from(self.scale))
    }

    /// Floor and the non-negative fractional numerator over [`unit`](Self::unit).
    fn split(&self) -> (i128, i128) {
        let unit = self.unit();
        (self.mantissa.div_euclid(unit), self.mantissa.rem_euclid(unit))
    }

    /// Exact numeric comparison.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        let (a_floor, a_frac) = self.split();
        let (b_floor, b_frac) = other.split();
        a_floor.cmp(&b_floor).then_with(|| {
            // Both fractions are below 10^MAX_SCALE once brought to the wider scale.
            let scale = self.scale.max(other.scale);
            let a = a_frac * 10i128.pow(u32::from(scale - self.scale));
            let b = b_frac * 10i128.pow(u32::from(scale - other.scale));
            a.cmp(&b)
        })
    }

    /// Exact comparison against a double.
    ///
    /// NaN sorts above every number, infinities above and below every
    /// decimal, and `-0.0` equals zero.
    #[must_use]
    pub fn compare_f64(&self, f: f64) -> Ordering {
        if f.is_nan() {
            return Ordering::Less;
        }
        if f.is_infinite() {
            return if f > 0.0 {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }
        let floor = f.floor();
        let limit = 2f64.powi(127);
        if floor >= limit {
            return Ordering::Less;
        }
        if floor < -limit {
            return Ordering::Greater;
        }
        #[allow(clippy::cast_possible_truncation)] // integral and within i128 range
        let whole = floor as i128;
        let (int_part, frac_part) = self.split();
        int_part
            .cmp(&whole)
            .then_with(|| compare_fraction(frac_part, self.scale, f - floor))
    }
}

/// Compare `numerator / 10^scale` with `fraction`, both in `[0, 1)`.
fn compare_fraction(numerator: i128, scale: u8, fraction: f64) -> Ordering {
    let (mantissa, shift) = dyadic(fraction);
    let scale = u32::from(scale);
    // fraction * 10^scale == mantissa * 5^scale / 2^(shift - scale)
    let scaled = u128::from(mantissa) * 5u128.pow(scale);
    let numerator = numerator.unsigned_abs();
    // A double below one has at least 53 fractional bits, more than any scale.
    let shift = shift - scale;
    let (floor, exact) = if shift >= u128::BITS {
        (0, scaled == 0)
    } else {
        (scaled >> shift, scaled & ((1u128 << shift) - 1) == 0)
    };
    match numerator.cmp(&floor) {
        Ordering::Equal if !exact => Ordering::Less,
        ord => ord,
    }
}

/// Write a finite double in `[0, 1)` as `mantissa / 2^shift`.
fn dyadic(fraction: f64) -> (u64, u32) {
    let bits = fraction.to_bits();
    let exponent = (bits >> 52) & 0x7ff;
    let significand = bits & ((1 << 52) - 1);
    if exponent == 0 {
        (significand, 1074)
    } else {
        #[allow(clippy::cast_possible_truncation)] // exponent is at most 1022 below one
        let shift = (1075 - exponent) as u32;
        (significand | (1 << 52), shift)
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let scale = usize::from(self.scale);
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

impl FromStr for Decimal {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseDecimalError);
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(ParseDecimalError);
        }

        let scale = u8::try_from(frac_part.len()).map_err(|_| ParseDecimalError)?;
        if scale > MAX_SCALE {
            return Err(ParseDecimalError);
        }

        let mut mantissa: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(b - b'0')))
                .ok_or(ParseDecimalError)?;
        }
        if negative {
            mantissa = -mantissa;
        }
        Ok(Self { mantissa, scale })
    }
}

/// Error returned when text is not a valid decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseDecimalError;

impl fmt::Display for ParseDecimalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid decimal literal")
    }
}

impl std::error::Error for ParseDecimalError {}

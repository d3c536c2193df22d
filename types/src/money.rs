//! Fixed-point money.
//!
//! Every balance, stake and payout is an [Amount] of micro-units (1.00 = 1_000_000).
//! Multipliers are expressed in hundredths and rates in basis points, so all catalog
//! payouts and proportional unlocks are exact integer arithmetic.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error as ThisError;

/// Micro-units per whole unit of either currency.
pub const MICROS_PER_UNIT: u64 = 1_000_000;

/// Micro-units per cent.
pub const MICROS_PER_CENT: u64 = 10_000;

/// Basis points in 100%.
pub const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents * MICROS_PER_CENT)
    }

    pub const fn from_units(units: u64) -> Self {
        Self(units * MICROS_PER_UNIT)
    }

    pub const fn micros(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    pub fn checked_mul(self, factor: u64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount)
    }

    /// `self × numerator / denominator`, floored. Returns zero when `denominator` is zero.
    pub fn mul_div(self, numerator: u64, denominator: u64) -> Amount {
        if denominator == 0 {
            return Amount::ZERO;
        }
        let scaled = (self.0 as u128 * numerator as u128) / denominator as u128;
        Amount(scaled.min(u64::MAX as u128) as u64)
    }

    /// Applies a payout multiplier.
    pub fn times(self, multiplier: Multiplier) -> Amount {
        self.mul_div(multiplier.hundredths() as u64, 100)
    }

    /// Takes a basis-point share of this amount.
    pub fn share(self, bps: u32) -> Amount {
        self.mul_div(bps as u64, BPS_DENOMINATOR as u64)
    }

    pub fn is_multiple_of(self, step: Amount) -> bool {
        step.0 != 0 && self.0 % step.0 == 0
    }

    /// Number of whole `step`s contained in this amount.
    pub fn count_of(self, step: Amount) -> u64 {
        if step.0 == 0 {
            return 0;
        }
        self.0 / step.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.0 / MICROS_PER_UNIT;
        let frac = self.0 % MICROS_PER_UNIT;
        if frac % MICROS_PER_CENT == 0 {
            return write!(f, "{units}.{:02}", frac / MICROS_PER_CENT);
        }
        let digits = format!("{frac:06}");
        write!(f, "{units}.{}", digits.trim_end_matches('0'))
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum AmountParseError {
    #[error("amount is empty")]
    Empty,
    #[error("amount is not a number: {0}")]
    NotANumber(String),
    #[error("amount has more than 6 decimal places: {0}")]
    TooPrecise(String),
    #[error("amount is out of range: {0}")]
    OutOfRange(String),
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AmountParseError::Empty);
        }
        let normalized = trimmed.replace(',', ".");
        let (whole, frac) = match normalized.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (normalized.as_str(), ""),
        };
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(AmountParseError::NotANumber(trimmed.to_string()));
        }
        if frac.len() > 6 {
            return Err(AmountParseError::TooPrecise(trimmed.to_string()));
        }
        let units: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| AmountParseError::OutOfRange(trimmed.to_string()))?
        };
        let frac_micros: u64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<6}")
                .parse()
                .map_err(|_| AmountParseError::NotANumber(trimmed.to_string()))?
        };
        units
            .checked_mul(MICROS_PER_UNIT)
            .and_then(|micros| micros.checked_add(frac_micros))
            .map(Amount)
            .ok_or_else(|| AmountParseError::OutOfRange(trimmed.to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AmountVisitor;

        impl de::Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative decimal amount")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                v.checked_mul(MICROS_PER_UNIT)
                    .map(Amount)
                    .ok_or_else(|| E::custom("amount is out of range"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                let v = u64::try_from(v).map_err(|_| E::custom("amount must not be negative"))?;
                self.visit_u64(v)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
                let micros = (v * MICROS_PER_UNIT as f64).round();
                if !micros.is_finite() || micros < 0.0 || micros > u64::MAX as f64 {
                    return Err(E::custom("amount is out of range"));
                }
                Ok(Amount(micros as u64))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

impl Write for Amount {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for Amount {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(u64::read(reader)?))
    }
}

impl EncodeSize for Amount {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}

/// Payout multiplier in hundredths (`Multiplier::from_hundredths(190)` pays ×1.90).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Multiplier(u32);

impl Multiplier {
    pub const fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    pub const fn whole(times: u32) -> Self {
        Self(times * 100)
    }

    pub const fn hundredths(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 100;
        let frac = self.0 % 100;
        match frac {
            0 => write!(f, "x{whole}"),
            f10 if f10 % 10 == 0 => write!(f, "x{whole}.{}", f10 / 10),
            _ => write!(f, "x{whole}.{frac:02}"),
        }
    }
}

/// The two currencies an account holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Currency {
    /// USD-denominated, wagerable, subject to rollover and referral.
    Main = 0,
    /// Play-money ("AC"), never convertible.
    Demo = 1,
}

impl Currency {
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Main => "$",
            Currency::Demo => "AC",
        }
    }

    /// Formats an amount of this currency for display.
    pub fn format(&self, amount: Amount) -> String {
        match self {
            Currency::Main => format!("${amount}"),
            Currency::Demo => format!("{amount} AC"),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Main => f.write_str("main"),
            Currency::Demo => f.write_str("demo"),
        }
    }
}

impl TryFrom<u8> for Currency {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Currency::Main),
            1 => Ok(Currency::Demo),
            other => Err(other),
        }
    }
}

impl Write for Currency {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for Currency {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let tag = u8::read(reader)?;
        Currency::try_from(tag).map_err(Error::InvalidEnum)
    }
}

impl EncodeSize for Currency {
    fn encode_size(&self) -> usize {
        1
    }
}

/// A stake placed in some currency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Wager {
    pub currency: Currency,
    pub stake: Amount,
}

impl Wager {
    pub fn new(currency: Currency, stake: Amount) -> Self {
        Self { currency, stake }
    }

    /// Narrows to a main-currency wager; demo wagers never touch rollover or referrals.
    pub fn main(self) -> Option<MainWager> {
        match self.currency {
            Currency::Main => Some(MainWager { stake: self.stake }),
            Currency::Demo => None,
        }
    }
}

/// A wager known to be in [Currency::Main]. Only constructible through [Wager::main].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MainWager {
    stake: Amount,
}

impl MainWager {
    pub fn stake(&self) -> Amount {
        self.stake
    }
}

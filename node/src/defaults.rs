//! Defaults for the optional fields of [crate::Config].

use arbuz_types::Amount;

pub const DEFAULT_DATABASE: &str = "arbuz.db";
pub const DEFAULT_HTTP_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "text";

pub const DEFAULT_MIN_STAKE_MAIN: Amount = Amount::from_cents(10);
pub const DEFAULT_MAX_STAKE_MAIN: Amount = Amount::from_units(100);
pub const DEFAULT_MIN_STAKE_DEMO: Amount = Amount::from_units(1);
pub const DEFAULT_MAX_STAKE_DEMO: Amount = Amount::from_units(100_000);

pub const DEFAULT_REAP_AFTER_MS: u64 = 30_000;
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 1_000;
/// Below this the chat client may render consecutive throws out of order.
pub const DEFAULT_THROW_PACING_MS: u64 = 50;
pub const DEFAULT_ANIMATION_WINDOW_MS: u64 = 3_000;
pub const DEFAULT_AWAIT_TIMEOUT_MS: u64 = 4_000;

pub const DEFAULT_COMMISSION_BPS: u32 = 1_000;
pub const DEFAULT_REFERRAL_BPS: u32 = 500;

pub const DEFAULT_JACKPOT_REMINDER_AT: &str = "22:55";
pub const DEFAULT_JACKPOT_FINALIZE_AT: &str = "23:05";
pub const DEFAULT_DAILY_NEAR_POLL_MS: u64 = 10_000;
pub const DEFAULT_DAILY_FAR_POLL_MS: u64 = 60_000;

use arbuz_execution::{daily::DailySchedule, StakeLimits};
use arbuz_types::{Amount, ChatId};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap, fmt, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration,
};
use thiserror::Error;
use tracing::Level;

pub mod defaults;
pub mod engine;
pub mod http;
pub mod intent;
pub mod metrics;
pub mod pvp;
pub mod randomness;
pub mod render;
pub mod scheduler;
pub mod sqlite;
pub mod transport;

#[cfg(test)]
mod mocks;

/// Configuration for the game service.
#[derive(Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
    #[serde(default)]
    pub metrics_auth_token: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Seeds the simulated transport. Unset draws from the OS.
    #[serde(default)]
    pub seed: Option<u64>,

    pub pvp_channel_id: ChatId,
    pub pvp_channel_username: String,
    /// Where special-match announcements go. Defaults to the PvP channel.
    #[serde(default)]
    pub announce_channel_id: Option<ChatId>,

    #[serde(default = "default_min_stake_main")]
    pub min_stake_main: Amount,
    #[serde(default = "default_max_stake_main")]
    pub max_stake_main: Amount,
    #[serde(default = "default_min_stake_demo")]
    pub min_stake_demo: Amount,
    #[serde(default = "default_max_stake_demo")]
    pub max_stake_demo: Amount,

    #[serde(default = "default_reap_after_ms")]
    pub reap_after_ms: u64,
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
    #[serde(default = "default_throw_pacing_ms")]
    pub throw_pacing_ms: u64,
    #[serde(default = "default_animation_window_ms")]
    pub animation_window_ms: u64,
    #[serde(default = "default_await_timeout_ms")]
    pub await_timeout_ms: u64,

    #[serde(default = "default_commission_bps")]
    pub commission_bps: u32,
    #[serde(default = "default_referral_bps")]
    pub referral_bps: u32,

    #[serde(default = "default_jackpot_reminder_at")]
    pub jackpot_reminder_at: String,
    #[serde(default = "default_jackpot_finalize_at")]
    pub jackpot_finalize_at: String,
    #[serde(default = "default_daily_near_poll_ms")]
    pub daily_near_poll_ms: u64,
    #[serde(default = "default_daily_far_poll_ms")]
    pub daily_far_poll_ms: u64,

    /// Sticker name (`dice_4`, `slots_64`, ...) to transport sticker id.
    #[serde(default)]
    pub stickers: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("invalid log format (expected text or json): {value}")]
    InvalidLogFormat { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("{field} must be a socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{field} must be HH:MM: {value}")]
    InvalidTime { field: &'static str, value: String },
    #[error("{field} must be at most 10000 bps (got {value})")]
    InvalidRate { field: &'static str, value: u32 },
    #[error("invalid stake limits: {0}")]
    InvalidStakeLimits(&'static str),
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("jackpot reminder ({reminder}) must come before finalization ({finalize})")]
    ScheduleOrder { reminder: String, finalize: String },
    #[error("await_timeout_ms ({timeout}) must not be below animation_window_ms ({window})")]
    AwaitBelowAnimation { timeout: u64, window: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

pub struct ValidatedConfig {
    pub database: PathBuf,
    pub http_listen: SocketAddr,
    pub metrics_auth_token: Option<String>,
    pub log_level: Level,
    pub log_format: LogFormat,
    pub seed: Option<u64>,

    pub pvp_channel_id: ChatId,
    pub pvp_channel_username: String,
    pub announce_channel_id: ChatId,

    pub limits: StakeLimits,

    pub reap_after: Duration,
    pub reap_interval: Duration,
    pub throw_pacing: Duration,
    pub animation_window: Duration,
    pub await_timeout: Duration,

    pub commission_bps: u32,
    pub referral_bps: u32,

    pub schedule: DailySchedule,

    pub stickers: HashMap<String, String>,
}

impl ValidatedConfig {
    pub fn game(&self) -> engine::GameConfig {
        engine::GameConfig {
            limits: self.limits,
            throw_pacing: self.throw_pacing,
            await_timeout: self.await_timeout,
            reap_after: self.reap_after,
            referral_bps: self.referral_bps,
        }
    }

    pub fn pvp(&self) -> pvp::PvpConfig {
        pvp::PvpConfig {
            channel_id: self.pvp_channel_id,
            announce_channel_id: self.announce_channel_id,
            throw_pacing: self.throw_pacing,
            await_timeout: self.await_timeout,
            commission_bps: self.commission_bps,
        }
    }

    pub fn scheduler(&self) -> scheduler::SchedulerConfig {
        scheduler::SchedulerConfig {
            reap_interval: self.reap_interval,
            schedule: self.schedule,
        }
    }

    pub fn renderer(&self) -> render::Renderer {
        render::Renderer::new(self.pvp_channel_username.clone(), self.stickers.clone())
    }
}

struct RedactedConfig<'a>(&'a Config);

impl fmt::Debug for RedactedConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = self.0;
        f.debug_struct("Config")
            .field("database", &cfg.database)
            .field("http_listen", &cfg.http_listen)
            .field(
                "metrics_auth_token",
                &cfg.metrics_auth_token.as_ref().map(|_| "<redacted>"),
            )
            .field("log_level", &cfg.log_level)
            .field("log_format", &cfg.log_format)
            .field("seed", &cfg.seed)
            .field("pvp_channel_id", &cfg.pvp_channel_id)
            .field("pvp_channel_username", &cfg.pvp_channel_username)
            .field("announce_channel_id", &cfg.announce_channel_id)
            .field("min_stake_main", &cfg.min_stake_main)
            .field("max_stake_main", &cfg.max_stake_main)
            .field("min_stake_demo", &cfg.min_stake_demo)
            .field("max_stake_demo", &cfg.max_stake_demo)
            .field("reap_after_ms", &cfg.reap_after_ms)
            .field("reap_interval_ms", &cfg.reap_interval_ms)
            .field("throw_pacing_ms", &cfg.throw_pacing_ms)
            .field("animation_window_ms", &cfg.animation_window_ms)
            .field("await_timeout_ms", &cfg.await_timeout_ms)
            .field("commission_bps", &cfg.commission_bps)
            .field("referral_bps", &cfg.referral_bps)
            .field("jackpot_reminder_at", &cfg.jackpot_reminder_at)
            .field("jackpot_finalize_at", &cfg.jackpot_finalize_at)
            .field("daily_near_poll_ms", &cfg.daily_near_poll_ms)
            .field("daily_far_poll_ms", &cfg.daily_far_poll_ms)
            .field("stickers", &cfg.stickers.len())
            .finish()
    }
}

fn default_database() -> String {
    defaults::DEFAULT_DATABASE.to_string()
}

fn default_http_listen() -> String {
    defaults::DEFAULT_HTTP_LISTEN.to_string()
}

fn default_log_level() -> String {
    defaults::DEFAULT_LOG_LEVEL.to_string()
}

fn default_log_format() -> String {
    defaults::DEFAULT_LOG_FORMAT.to_string()
}

fn default_min_stake_main() -> Amount {
    defaults::DEFAULT_MIN_STAKE_MAIN
}

fn default_max_stake_main() -> Amount {
    defaults::DEFAULT_MAX_STAKE_MAIN
}

fn default_min_stake_demo() -> Amount {
    defaults::DEFAULT_MIN_STAKE_DEMO
}

fn default_max_stake_demo() -> Amount {
    defaults::DEFAULT_MAX_STAKE_DEMO
}

fn default_reap_after_ms() -> u64 {
    defaults::DEFAULT_REAP_AFTER_MS
}

fn default_reap_interval_ms() -> u64 {
    defaults::DEFAULT_REAP_INTERVAL_MS
}

fn default_throw_pacing_ms() -> u64 {
    defaults::DEFAULT_THROW_PACING_MS
}

fn default_animation_window_ms() -> u64 {
    defaults::DEFAULT_ANIMATION_WINDOW_MS
}

fn default_await_timeout_ms() -> u64 {
    defaults::DEFAULT_AWAIT_TIMEOUT_MS
}

fn default_commission_bps() -> u32 {
    defaults::DEFAULT_COMMISSION_BPS
}

fn default_referral_bps() -> u32 {
    defaults::DEFAULT_REFERRAL_BPS
}

fn default_jackpot_reminder_at() -> String {
    defaults::DEFAULT_JACKPOT_REMINDER_AT.to_string()
}

fn default_jackpot_finalize_at() -> String {
    defaults::DEFAULT_JACKPOT_FINALIZE_AT.to_string()
}

fn default_daily_near_poll_ms() -> u64 {
    defaults::DEFAULT_DAILY_NEAR_POLL_MS
}

fn default_daily_far_poll_ms() -> u64 {
    defaults::DEFAULT_DAILY_FAR_POLL_MS
}

fn nonzero_duration(field: &'static str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::InvalidNonZero { field, value: 0 });
    }
    Ok(Duration::from_millis(ms))
}

fn ensure_rate(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value > arbuz_types::money::BPS_DENOMINATOR {
        return Err(ConfigError::InvalidRate { field, value });
    }
    Ok(())
}

/// Parses `HH:MM` into seconds after midnight.
pub fn parse_time_of_day(field: &'static str, value: &str) -> Result<u32, ConfigError> {
    let invalid = || ConfigError::InvalidTime {
        field,
        value: value.to_string(),
    };
    let (hour, minute) = value.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok(hour * 3_600 + minute * 60)
}

impl Config {
    pub fn redacted_debug(&self) -> impl fmt::Debug + '_ {
        RedactedConfig(self)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        if self.database.trim().is_empty() {
            return Err(ConfigError::Empty { field: "database" });
        }
        if self.pvp_channel_username.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "pvp_channel_username",
            });
        }
        let http_listen =
            SocketAddr::from_str(&self.http_listen).map_err(|_| ConfigError::InvalidAddress {
                field: "http_listen",
                value: self.http_listen.clone(),
            })?;

        let limits = StakeLimits {
            min_main: self.min_stake_main,
            max_main: self.max_stake_main,
            min_demo: self.min_stake_demo,
            max_demo: self.max_stake_demo,
        };
        limits.validate().map_err(ConfigError::InvalidStakeLimits)?;

        let reap_after = nonzero_duration("reap_after_ms", self.reap_after_ms)?;
        let reap_interval = nonzero_duration("reap_interval_ms", self.reap_interval_ms)?;
        let throw_pacing = nonzero_duration("throw_pacing_ms", self.throw_pacing_ms)?;
        let animation_window = nonzero_duration("animation_window_ms", self.animation_window_ms)?;
        let await_timeout = nonzero_duration("await_timeout_ms", self.await_timeout_ms)?;
        if self.await_timeout_ms < self.animation_window_ms {
            return Err(ConfigError::AwaitBelowAnimation {
                timeout: self.await_timeout_ms,
                window: self.animation_window_ms,
            });
        }
        let near_interval = nonzero_duration("daily_near_poll_ms", self.daily_near_poll_ms)?;
        let far_interval = nonzero_duration("daily_far_poll_ms", self.daily_far_poll_ms)?;

        ensure_rate("commission_bps", self.commission_bps)?;
        ensure_rate("referral_bps", self.referral_bps)?;

        let reminder_at = parse_time_of_day("jackpot_reminder_at", &self.jackpot_reminder_at)?;
        let finalize_at = parse_time_of_day("jackpot_finalize_at", &self.jackpot_finalize_at)?;
        if reminder_at >= finalize_at {
            return Err(ConfigError::ScheduleOrder {
                reminder: self.jackpot_reminder_at,
                finalize: self.jackpot_finalize_at,
            });
        }
        let schedule = DailySchedule {
            reminder_at,
            finalize_at,
            near_interval,
            far_interval,
            ..DailySchedule::default()
        };

        let log_level =
            Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            })?;
        let log_format =
            LogFormat::from_str(&self.log_format).map_err(|_| ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            })?;

        Ok(ValidatedConfig {
            database: PathBuf::from(self.database),
            http_listen,
            metrics_auth_token: self
                .metrics_auth_token
                .filter(|token| !token.trim().is_empty()),
            log_level,
            log_format,
            seed: self.seed,
            pvp_channel_id: self.pvp_channel_id,
            pvp_channel_username: self.pvp_channel_username,
            announce_channel_id: self.announce_channel_id.unwrap_or(self.pvp_channel_id),
            limits,
            reap_after,
            reap_interval,
            throw_pacing,
            animation_window,
            await_timeout,
            commission_bps: self.commission_bps,
            referral_bps: self.referral_bps,
            schedule,
            stickers: self.stickers,
        })
    }
}

#[cfg(test)]
mod tests;

use super::*;
use std::time::Duration;

const MINIMAL: &str = "
pvp_channel_id: -100123
pvp_channel_username: arbuz_pvp
";

fn parse(yaml: &str) -> Config {
    serde_yaml::from_str(yaml).unwrap()
}

#[test]
fn minimal_config_uses_defaults() {
    let config = parse(MINIMAL).validate().unwrap();
    assert_eq!(config.database, PathBuf::from(defaults::DEFAULT_DATABASE));
    assert_eq!(config.http_listen.port(), 8080);
    assert_eq!(config.log_level, Level::INFO);
    assert_eq!(config.log_format, LogFormat::Text);
    assert_eq!(config.announce_channel_id, -100123);
    assert_eq!(config.limits.min_main, Amount::from_cents(10));
    assert_eq!(config.limits.max_demo, Amount::from_units(100_000));
    assert_eq!(config.reap_after, Duration::from_secs(30));
    assert_eq!(config.schedule.reminder_at, 22 * 3_600 + 55 * 60);
    assert_eq!(config.schedule.finalize_at, 23 * 3_600 + 5 * 60);
    assert_eq!(config.pvp().commission_bps, 1_000);
    assert_eq!(config.game().referral_bps, 500);
    assert!(config.metrics_auth_token.is_none());
}

#[test]
fn overrides_are_applied() {
    let yaml = format!(
        "{MINIMAL}
announce_channel_id: -100999
log_format: json
log_level: debug
min_stake_main: \"0.50\"
max_stake_main: 20
throw_pacing_ms: 120
jackpot_reminder_at: \"21:30\"
jackpot_finalize_at: \"21:45\"
stickers:
  dice_6: STICKER_D6
"
    );
    let config = parse(&yaml).validate().unwrap();
    assert_eq!(config.announce_channel_id, -100999);
    assert_eq!(config.pvp().channel_id, -100123);
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.log_level, Level::DEBUG);
    assert_eq!(config.limits.min_main, Amount::from_cents(50));
    assert_eq!(config.limits.max_main, Amount::from_units(20));
    assert_eq!(config.game().throw_pacing, Duration::from_millis(120));
    assert_eq!(config.scheduler().schedule.reminder_at, 21 * 3_600 + 30 * 60);
    assert_eq!(config.stickers.get("dice_6").map(String::as_str), Some("STICKER_D6"));
}

#[test]
fn channel_fields_are_required() {
    assert!(serde_yaml::from_str::<Config>("pvp_channel_username: x").is_err());
    assert!(serde_yaml::from_str::<Config>("pvp_channel_id: 1").is_err());
}

#[test]
fn debug_output_redacts_metrics_token() {
    let mut config = parse(MINIMAL);
    config.metrics_auth_token = Some("hunter2".to_string());
    let rendered = format!("{:?}", config.redacted_debug());
    assert!(rendered.contains("<redacted>"));
    assert!(!rendered.contains("hunter2"));
}

#[test]
fn blank_metrics_token_disables_auth() {
    let mut config = parse(MINIMAL);
    config.metrics_auth_token = Some("  ".to_string());
    assert!(config.validate().unwrap().metrics_auth_token.is_none());
}

#[test]
fn invalid_values_are_rejected() {
    let check = |edit: fn(&mut Config), expected: fn(&ConfigError) -> bool| {
        let mut config = parse(MINIMAL);
        edit(&mut config);
        match config.validate() {
            Err(err) => assert!(expected(&err), "unexpected error: {err}"),
            Ok(_) => panic!("config accepted"),
        }
    };

    check(
        |c| c.log_level = "loud".into(),
        |e| matches!(e, ConfigError::InvalidLogLevel { .. }),
    );
    check(
        |c| c.log_format = "xml".into(),
        |e| matches!(e, ConfigError::InvalidLogFormat { .. }),
    );
    check(
        |c| c.http_listen = "localhost".into(),
        |e| matches!(e, ConfigError::InvalidAddress { field: "http_listen", .. }),
    );
    check(
        |c| c.reap_after_ms = 0,
        |e| matches!(e, ConfigError::InvalidNonZero { field: "reap_after_ms", .. }),
    );
    check(
        |c| c.commission_bps = 10_001,
        |e| matches!(e, ConfigError::InvalidRate { field: "commission_bps", .. }),
    );
    check(
        |c| c.min_stake_main = Amount::ZERO,
        |e| matches!(e, ConfigError::InvalidStakeLimits(_)),
    );
    check(
        |c| c.max_stake_demo = Amount::from_cents(50),
        |e| matches!(e, ConfigError::InvalidStakeLimits(_)),
    );
    check(
        |c| c.jackpot_finalize_at = "22:00".into(),
        |e| matches!(e, ConfigError::ScheduleOrder { .. }),
    );
    check(
        |c| c.jackpot_reminder_at = "25:00".into(),
        |e| matches!(e, ConfigError::InvalidTime { field: "jackpot_reminder_at", .. }),
    );
    check(
        |c| c.await_timeout_ms = 1_000,
        |e| matches!(e, ConfigError::AwaitBelowAnimation { .. }),
    );
    check(
        |c| c.pvp_channel_username = " ".into(),
        |e| matches!(e, ConfigError::Empty { field: "pvp_channel_username" }),
    );
}

#[test]
fn time_of_day_parsing() {
    assert_eq!(parse_time_of_day("t", "00:00").unwrap(), 0);
    assert_eq!(parse_time_of_day("t", "23:59").unwrap(), 86_340);
    assert!(parse_time_of_day("t", "12").is_err());
    assert!(parse_time_of_day("t", "12:60").is_err());
    assert!(parse_time_of_day("t", "ab:cd").is_err());
}

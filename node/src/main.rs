use anyhow::{Context, Result};
use arbuz_node::{
    engine::Engine,
    http::{self, Api},
    intent::{self, Dispatcher},
    metrics::Metrics,
    pvp::PvpController,
    randomness::Randomness,
    scheduler,
    sqlite::SqliteState,
    transport::DevTransport,
    Config, LogFormat, ValidatedConfig,
};
use clap::{Arg, ArgAction, Command};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Mutex,
};
use tracing::{error, info, warn};

fn command() -> Command {
    Command::new("arbuz-node")
        .about("Runs arbuz wagers, PvP matches and the daily jackpot.")
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Validate the config and exit without starting the service")
                .action(ArgAction::SetTrue),
        )
        .arg(Arg::new("config").long("config").required(true))
}

fn print_dry_run_report(config: &ValidatedConfig) {
    println!("dry-run report");
    println!("  database: {}", config.database.display());
    println!("  http_listen: {}", config.http_listen);
    println!(
        "  metrics_auth: {}",
        if config.metrics_auth_token.is_some() {
            "token"
        } else {
            "open"
        }
    );
    println!(
        "  pvp: channel={} announce={} username={}",
        config.pvp_channel_id, config.announce_channel_id, config.pvp_channel_username
    );
    println!(
        "  stakes: main=[{}, {}] demo=[{}, {}]",
        config.limits.min_main,
        config.limits.max_main,
        config.limits.min_demo,
        config.limits.max_demo
    );
    println!(
        "  sessions: reap_after={:?} reap_interval={:?}",
        config.reap_after, config.reap_interval
    );
    println!(
        "  throws: pacing={:?} animation={:?} await_timeout={:?}",
        config.throw_pacing, config.animation_window, config.await_timeout
    );
    println!(
        "  rates: commission={}bps referral={}bps",
        config.commission_bps, config.referral_bps
    );
    println!(
        "  jackpot: reminder_at={}s finalize_at={}s",
        config.schedule.reminder_at, config.schedule.finalize_at
    );
    println!("  stickers: {}", config.stickers.len());
}

fn init_tracing(config: &ValidatedConfig) {
    let builder = tracing_subscriber::fmt().with_max_level(config.log_level);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn main() {
    if let Err(err) = main_result() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_result() -> Result<()> {
    // Parse arguments
    let matches = command().get_matches();
    let dry_run = matches.get_flag("dry-run");

    // Load config
    let config_file = matches
        .get_one::<String>("config")
        .context("missing --config")?;
    let config_file = std::fs::read_to_string(config_file)
        .with_context(|| format!("Could not read config file {config_file}"))?;
    let config: Config =
        serde_yaml::from_str(&config_file).context("Could not parse config file")?;

    if dry_run {
        println!("{:#?}", config.redacted_debug());
        let config = config.validate()?;
        print_dry_run_report(&config);
        println!("config ok");
        return Ok(());
    }

    let redacted = format!("{:?}", config.redacted_debug());
    let config = config.validate()?;
    init_tracing(&config);
    info!(config = %redacted, "loaded config file");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: ValidatedConfig) -> Result<()> {
    // Storage
    let store = Arc::new(Mutex::new(SqliteState::open(&config.database)?));
    info!(database = %config.database.display(), "opened state");

    // Metrics
    let mut registry = Registry::default();
    let metrics = Metrics::register(&mut registry);

    // Controllers
    let transport = Arc::new(DevTransport::new(config.seed));
    let randomness = Arc::new(Randomness::new(transport.clone(), config.animation_window));
    let renderer = Arc::new(config.renderer());
    let engine = Arc::new(Engine::new(
        store.clone(),
        transport.clone(),
        randomness.clone(),
        renderer.clone(),
        metrics.clone(),
        config.game(),
    ));
    engine
        .bootstrap()
        .await
        .context("Failed to register house account")?;
    let pvp = Arc::new(PvpController::new(
        store.clone(),
        transport.clone(),
        randomness,
        renderer.clone(),
        metrics,
        config.pvp(),
    ));

    // Background jobs
    let jobs = config.scheduler();
    let reaper = scheduler::spawn_reaper(engine.clone(), jobs.reap_interval);
    let daily = scheduler::spawn_daily(pvp.clone(), jobs.schedule);

    // HTTP
    let api = Arc::new(Api {
        store: store.clone(),
        registry: Arc::new(registry),
        metrics_auth_token: config.metrics_auth_token.clone(),
    });
    let addr = config.http_listen;
    let server = tokio::spawn(async move {
        if let Err(err) = http::serve(addr, http::router(api)).await {
            error!(%addr, ?err, "http server failed");
        }
    });

    // Intents
    let dispatcher = Dispatcher::new(store, transport, renderer, engine, pvp);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("reading intents from stdin");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("stdin closed, serving until interrupted");
                    tokio::signal::ctrl_c().await.context("Failed to wait for ctrl-c")?;
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match intent::parse(line) {
                    Ok(intent) => {
                        dispatcher.dispatch(intent).await;
                    }
                    Err(err) => warn!(?err, line, "invalid intent"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    reaper.abort();
    daily.abort();
    server.abort();
    Ok(())
}

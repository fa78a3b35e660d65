//! Tradeloop CLI: run a paper-trading session, report on the trade log,
//! validate a config.
//!
//! Commands:
//! - `run`: load a TOML config (or defaults), apply flag overrides, run one
//!   session and print the performance report. Ctrl-C stops the loop after
//!   the current iteration and flattens any open position.
//! - `report`: rebuild the performance report from a state directory
//! - `check-config`: validate a config file and print its fingerprint

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tradeloop_core::ports::StateStore;
use tradeloop_runner::config::{ResolverSource, SentimentSource};
use tradeloop_runner::{
    render_report, BotConfig, Clock, JsonStateStore, PerformanceSnapshot, Session, SessionReport,
};

#[derive(Parser)]
#[command(
    name = "tradeloop",
    about = "Tradeloop: signal fusion and risk-managed position lifecycle"
)]
struct Cli {
    /// Log filter when RUST_LOG is unset (e.g. info, debug, tradeloop_core=trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one trading session.
    Run {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Trading pair symbol.
        #[arg(long)]
        symbol: Option<String>,

        /// Session length in minutes.
        #[arg(long)]
        duration: Option<u64>,

        /// Seconds between iterations.
        #[arg(long)]
        interval: Option<u64>,

        /// Fraction of capital risked per trade (e.g. 0.01).
        #[arg(long)]
        risk_percent: Option<f64>,

        /// Cap on position notional as a fraction of capital.
        #[arg(long)]
        max_exposure: Option<f64>,

        /// Use a neutral static sentiment reading.
        #[arg(long, default_value_t = false)]
        no_sentiment: bool,

        /// Tie-breaker for ambiguous signals. Only `none` is available.
        #[arg(long)]
        resolver: Option<ResolverSource>,

        /// Advance a virtual clock instead of sleeping between iterations.
        #[arg(long, default_value_t = false)]
        simulated: bool,

        /// Print the session report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the performance report for a state directory's trade log.
    Report {
        /// State directory containing trades.jsonl.
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Starting capital for percentages and drawdown.
        #[arg(long, default_value_t = 1000.0)]
        capital: f64,

        /// Session length in minutes, for trades per hour.
        #[arg(long, default_value_t = 0.0)]
        minutes: f64,
    },
    /// Validate a config file.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Run {
            config,
            symbol,
            duration,
            interval,
            risk_percent,
            max_exposure,
            no_sentiment,
            resolver,
            simulated,
            json,
        } => {
            let mut bot = load_config(config.as_deref())?;
            let overrides = Overrides {
                symbol,
                duration,
                interval,
                risk_percent,
                max_exposure,
                no_sentiment,
                resolver,
            };
            overrides.apply(&mut bot);
            bot.validate()?;
            run_session(&bot, simulated, json)
        }
        Commands::Report {
            state_dir,
            capital,
            minutes,
        } => run_report(&state_dir, capital, minutes),
        Commands::CheckConfig { config } => run_check_config(&config),
    }
}

struct Overrides {
    symbol: Option<String>,
    duration: Option<u64>,
    interval: Option<u64>,
    risk_percent: Option<f64>,
    max_exposure: Option<f64>,
    no_sentiment: bool,
    resolver: Option<ResolverSource>,
}

impl Overrides {
    fn apply(self, bot: &mut BotConfig) {
        if let Some(symbol) = self.symbol {
            bot.session.symbol = symbol.to_ascii_uppercase();
        }
        if let Some(minutes) = self.duration {
            bot.session.duration_minutes = minutes;
        }
        if let Some(secs) = self.interval {
            bot.session.interval_secs = secs;
        }
        if let Some(risk) = self.risk_percent {
            bot.engine.risk.risk_pct = risk;
        }
        if let Some(exposure) = self.max_exposure {
            bot.engine.risk.max_exposure_pct = exposure;
        }
        if self.no_sentiment {
            bot.sentiment.provider = SentimentSource::Static;
            bot.sentiment.static_score = 0.0;
        }
        if let Some(resolver) = self.resolver {
            bot.resolver.provider = resolver;
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<BotConfig> {
    match path {
        Some(path) => BotConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(BotConfig::default()),
    }
}

fn run_session(bot: &BotConfig, simulated: bool, json: bool) -> Result<()> {
    let clock = if simulated {
        Clock::Simulated {
            start: chrono::Utc::now(),
        }
    } else {
        Clock::Wall
    };
    info!(
        symbol = %bot.session.symbol,
        duration_minutes = bot.session.duration_minutes,
        interval_secs = bot.session.interval_secs,
        market = ?bot.market.provider,
        sentiment = ?bot.sentiment.provider,
        resolver = ?bot.resolver.provider,
        "starting session"
    );

    let mut session = Session::from_config(bot, clock)?;
    install_stop_handler(session.stop_handle())?;
    let report = session.run()?;

    print!("{}", format_report(&report, json)?);
    if report.position_left_open {
        bail!("session ended with a position still open; check the exchange");
    }
    Ok(())
}

/// Ctrl-C sets the session's stop flag; the loop finishes the current
/// iteration and then flattens any open position.
fn install_stop_handler(stop: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        warn!("stop requested, finishing current iteration");
        stop.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")
}

fn format_report(report: &SessionReport, json: bool) -> Result<String> {
    if json {
        Ok(format!("{}\n", serde_json::to_string_pretty(report)?))
    } else {
        Ok(report.render())
    }
}

fn run_report(state_dir: &Path, capital: f64, minutes: f64) -> Result<()> {
    if !(capital > 0.0) {
        bail!("--capital must be > 0");
    }
    if !state_dir.exists() {
        bail!("state directory {} does not exist", state_dir.display());
    }
    let store = JsonStateStore::open(state_dir)?;
    let trades = store.load_trades()?;
    let snapshot = PerformanceSnapshot::compute(&trades, capital, minutes);
    print!("{}", render_report(&snapshot, capital));
    if let Some(state) = store.load_state()? {
        println!(
            "saved capital {:.2} | peak {:.2} | trades completed {}{}",
            state.risk_state.capital,
            state.risk_state.peak_capital,
            state.risk_state.trades_completed,
            if state.open_position.is_some() {
                " | position OPEN"
            } else {
                ""
            }
        );
    }
    Ok(())
}

fn run_check_config(path: &Path) -> Result<()> {
    let bot = BotConfig::from_file(path).with_context(|| format!("checking {}", path.display()))?;
    println!("config OK: {}", path.display());
    println!("  symbol        {}", bot.session.symbol);
    println!("  market        {:?}", bot.market.provider);
    println!("  sentiment     {:?}", bot.sentiment.provider);
    println!("  fingerprint   {}", bot.engine.fingerprint());
    Ok(())
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live terminal view over MQTT sensor telemetry.
//!
//! Subscribes to the configured topic filters, keeps the latest payload
//! per topic, and repaints a compact reading panel every refresh period.
//! Subcommands cover the write side (alarm mute, threshold) and the
//! recorded-history read path.
//!
//! # Usage
//!
//! ```bash
//! # Live panel against a local broker, everything subscribed
//! teledash-watch
//!
//! # Narrow the subscription and record numeric readings to SQLite
//! teledash-watch --host 192.168.1.10 --topic 'esp32_1/#' --topic 'capteur/#' --db telemetry.db
//!
//! # Write side
//! teledash-watch mute
//! teledash-watch threshold 30
//!
//! # Read back what was recorded
//! teledash-watch --db telemetry.db history temperature --limit 20
//! ```

use std::future::Future;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;

use teledash::values::{json_f64, json_flag, parse_f64, parse_flag, resolve_first};
use teledash::{
    Config, DatabaseConfig, HistoryError, HistoryPoint, RollingHistory, RumqttConnector,
    SeriesReader, Session, SqliteHistory, StoreSnapshot, TelemetryService, MAX_POINTS,
    TOPIC_MUTE_ALARM, TOPIC_THRESHOLD,
};

/// Preferred topics per reading. Firmware revisions disagree on names,
/// so each reading carries an ordered candidate list; the JSON bundle
/// topics are the fallback for boards that publish one blob.
const TEMPERATURE_TOPICS: &[&str] = &["esp32_1/temp"];
const LUMINOSITY_TOPICS: &[&str] = &[
    "esp32/sensors/luminosity",
    "esp32_1/luminosity",
    "esp32_1/ldr",
];
const BUNDLE_TOPICS: &[&str] = &["capteur/data", "capteur", "data"];
const ALARM_TOPIC: &str = "esp32_1/alarm";
const STATUS_TOPIC: &str = "esp32_1/status";
const IR_TOPIC: &str = "esp32_1/ir";

#[derive(Parser, Debug)]
#[command(author, version, about = "Live terminal view over MQTT sensor telemetry")]
struct Args {
    /// Broker hostname or IP (overrides $MQTT_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Broker TCP port (overrides $MQTT_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// MQTT client identifier
    #[arg(long, default_value = "teledash-watch")]
    client_id: String,

    /// Topic filter to subscribe (repeatable; default: "#")
    #[arg(short, long = "topic")]
    topics: Vec<String>,

    /// Refresh period in seconds
    #[arg(short, long, default_value_t = 2)]
    refresh: u64,

    /// Rolling history capacity in points
    #[arg(long, default_value_t = MAX_POINTS)]
    history: usize,

    /// SQLite history database path (enables recording and `history`)
    #[arg(long)]
    db: Option<String>,

    /// Default row limit for history queries
    #[arg(long, default_value_t = 50)]
    db_limit: usize,

    /// Replace the session this many seconds after the link dies
    /// (without this flag a dead link stays dead until restart)
    #[arg(long)]
    reconnect: Option<u64>,

    /// Also print the raw per-topic table on each refresh
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish "1" to the alarm mute topic
    Mute {
        /// Mute topic
        #[arg(long, default_value = TOPIC_MUTE_ALARM)]
        topic: String,
    },

    /// Publish a new alarm threshold (sent as text)
    Threshold {
        /// Threshold value
        value: i64,

        /// Threshold topic
        #[arg(long, default_value = TOPIC_THRESHOLD)]
        topic: String,
    },

    /// Query the recorded history database
    History {
        /// Series name; omit to list recorded series
        series: Option<String>,

        /// Row limit (defaults to --db-limit)
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    if args.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let config = build_config(&args);

    let result = match &args.command {
        Some(Command::Mute { topic }) => send_mute(&config, topic).await,
        Some(Command::Threshold { value, topic }) => send_threshold(&config, topic, *value).await,
        Some(Command::History { series, limit }) => {
            show_history(&config, series.as_deref(), limit.unwrap_or(args.db_limit))
        }
        None => watch(&args, config).await,
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Environment defaults first, CLI flags on top.
fn build_config(args: &Args) -> Config {
    let mut config = Config::from_env();

    if let Some(host) = &args.host {
        config.broker_host = host.clone();
    }
    if let Some(port) = args.port {
        config.broker_port = port;
    }
    config.client_id = args.client_id.clone();
    if !args.topics.is_empty() {
        config.subscriptions = args.topics.clone();
    }
    config.history_capacity = args.history;
    config.refresh_secs = args.refresh;
    if let Some(path) = &args.db {
        config.database = Some(DatabaseConfig {
            path: path.clone(),
            query_limit: args.db_limit,
        });
    }

    config
}

// ============================================================================
// Live panel
// ============================================================================

async fn watch(args: &Args, config: Config) -> Result<()> {
    println!(
        "{} {}:{} ({})",
        "Watching".green().bold(),
        config.broker_host.cyan(),
        config.broker_port,
        config.subscriptions.join(", ")
    );
    println!("{}", "Press Ctrl+C to stop".dimmed());

    let mut recorder = match &config.database {
        Some(db) => match SqliteHistory::open(&db.path) {
            Ok(store) => {
                println!("{} {}", "Recording to".dimmed(), db.path.dimmed());
                Some(store)
            }
            Err(e) => {
                eprintln!("{}: {}", "history unavailable".yellow(), e);
                None
            }
        },
        None => None,
    };

    let mut service = TelemetryService::start(RumqttConnector::new(), config.clone());
    let mut history = RollingHistory::with_capacity(config.history_capacity);
    let mut interval = tokio::time::interval(Duration::from_secs(config.refresh_secs.max(1)));
    let mut link_down_since: Option<Instant> = None;

    // One ctrl_c future for the whole loop: a signal landing while the
    // body runs (render, reconnect grace) completes it and is seen on
    // the next wait instead of vanishing with a throwaway future.
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        match next_cycle(&mut interval, &mut shutdown).await {
            Cycle::Quit => break,
            Cycle::Refresh => {}
        }

        let snapshot = service.snapshot();
        let readings = derive_readings(&snapshot);

        let point = HistoryPoint::now()
            .with_series("temperature", readings.temperature)
            .with_series("luminosity", readings.luminosity);
        if history.push_if_any_value(point) {
            if let Some(store) = &recorder {
                if let Err(e) = append_readings(store, &readings) {
                    tracing::warn!("History recording failed, disabling: {}", e);
                    recorder = None;
                }
            }
        }

        render(&snapshot, &readings, &history, args.verbose);

        // A dead link stays dead unless --reconnect opted in; then replace
        // the session (and its store) wholesale after the grace period.
        // The rolling history stays: the chart shows the outage as a gap.
        if snapshot.connected || service.session().is_running() {
            link_down_since = None;
        } else if let Some(delay) = args.reconnect {
            let down_at = *link_down_since.get_or_insert_with(Instant::now);
            if down_at.elapsed() >= Duration::from_secs(delay) {
                println!("{}", "Link down, replacing session".yellow());
                service = service.reconnect().await;
                link_down_since = None;
            }
        }
    }

    let stats = service.session().stats();
    println!(
        "\n{} {} message(s) received, {} publish(es) sent, {} decode replacement(s)",
        "---".dimmed(),
        stats.messages_received,
        stats.publishes_sent,
        stats.decode_replacements
    );
    service.shutdown().await;

    Ok(())
}

/// Outcome of one wait in the panel loop.
enum Cycle {
    Refresh,
    Quit,
}

/// Wait for the next refresh tick or for shutdown, whichever fires
/// first. The shutdown future is polled by reference and survives
/// across calls, so a signal raised between ticks is never lost.
async fn next_cycle(
    interval: &mut tokio::time::Interval,
    shutdown: &mut (impl Future + Unpin),
) -> Cycle {
    tokio::select! {
        _ = shutdown => Cycle::Quit,
        _ = interval.tick() => Cycle::Refresh,
    }
}

/// Latest derived reading per sensor, pulled out of one snapshot.
struct Readings {
    temperature: Option<f64>,
    luminosity: Option<f64>,
    threshold: Option<f64>,
    alarm: Option<bool>,
    flame: Option<bool>,
    ir: Option<bool>,
    status: Option<String>,
}

fn derive_readings(snapshot: &StoreSnapshot) -> Readings {
    let bundle_f64 = |field: &str| {
        BUNDLE_TOPICS
            .iter()
            .find_map(|topic| snapshot.payload(topic).and_then(|p| json_f64(p, field)))
    };
    let bundle_flag = |field: &str| {
        BUNDLE_TOPICS
            .iter()
            .find_map(|topic| snapshot.payload(topic).and_then(|p| json_flag(p, field)))
    };

    Readings {
        temperature: resolve_first(snapshot, TEMPERATURE_TOPICS)
            .and_then(|r| parse_f64(&r.payload))
            .or_else(|| bundle_f64("temperature")),
        luminosity: resolve_first(snapshot, LUMINOSITY_TOPICS)
            .and_then(|r| parse_f64(&r.payload))
            .or_else(|| bundle_f64("pot")),
        threshold: snapshot
            .payload(TOPIC_THRESHOLD)
            .and_then(parse_f64)
            .or_else(|| bundle_f64("seuil")),
        alarm: snapshot
            .payload(ALARM_TOPIC)
            .and_then(parse_flag)
            .or_else(|| bundle_flag("alarm")),
        flame: bundle_flag("flame"),
        ir: snapshot.payload(IR_TOPIC).and_then(parse_flag),
        status: snapshot.payload(STATUS_TOPIC).map(str::to_string),
    }
}

fn append_readings(store: &SqliteHistory, readings: &Readings) -> Result<(), HistoryError> {
    let now = Utc::now();

    if let Some(value) = readings.temperature {
        store.append("temperature", now, value)?;
    }
    if let Some(value) = readings.luminosity {
        store.append("luminosity", now, value)?;
    }

    Ok(())
}

fn render(snapshot: &StoreSnapshot, readings: &Readings, history: &RollingHistory, verbose: bool) {
    let stamp = Local::now().format("%H:%M:%S");
    let link = if snapshot.connected {
        "connected".green().bold()
    } else {
        "disconnected".red().bold()
    };

    println!("\n{} {}", format!("[{}]", stamp).dimmed(), link);
    if let Some(error) = &snapshot.last_error {
        println!("  {:<12} {}", "last error", error.to_string().yellow());
    }

    println!(
        "  {:<12} {}",
        "temperature",
        fmt_value(readings.temperature, 1)
    );
    println!(
        "  {:<12} {}",
        "luminosity",
        fmt_value(readings.luminosity, 0)
    );
    println!("  {:<12} {}", "threshold", fmt_value(readings.threshold, 0));
    println!(
        "  {:<12} {}",
        "alarm",
        fmt_flag(readings.alarm, "ACTIVE", "quiet")
    );
    println!(
        "  {:<12} {}",
        "flame",
        fmt_flag(readings.flame, "DETECTED", "none")
    );
    println!("  {:<12} {}", "ir", fmt_flag(readings.ir, "DETECTED", "idle"));
    println!(
        "  {:<12} {}",
        "status",
        readings.status.as_deref().unwrap_or("-")
    );
    println!(
        "  {:<12} {} topic(s), {}/{} history point(s)",
        "store",
        snapshot.len(),
        history.len(),
        history.capacity()
    );

    if verbose && !snapshot.records.is_empty() {
        let mut topics: Vec<_> = snapshot.records.iter().collect();
        topics.sort_by(|a, b| a.0.cmp(b.0));

        println!(
            "  {}",
            format!("{:<30} {:<24} {}", "topic", "payload", "age").dimmed()
        );
        for (topic, record) in topics {
            println!(
                "  {} {:<24} {}",
                format!("{:<30}", truncate(topic, 30)).cyan(),
                truncate(&record.payload, 24),
                fmt_age(record.received_at).dimmed()
            );
        }
    }
}

fn fmt_value(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

fn fmt_flag(value: Option<bool>, on: &str, off: &str) -> String {
    match value {
        Some(true) => on.red().bold().to_string(),
        Some(false) => off.to_string(),
        None => "-".to_string(),
    }
}

fn fmt_age(received_at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - received_at).num_seconds().max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}~", head)
    }
}

// ============================================================================
// Write side (mute / threshold)
// ============================================================================

/// Start a session and wait for the handshake so a one-shot publish
/// lands on a live link. Errors out on refusal or timeout.
async fn connect_session(config: &Config) -> Result<Session> {
    let session = Session::start(&RumqttConnector::new(), config.clone());
    let deadline = Instant::now() + Duration::from_secs(config.connect_timeout_secs + 2);

    loop {
        if session.connected() {
            return Ok(session);
        }
        if let Some(error) = session.store().last_error() {
            session.stop().await;
            bail!("{}", error);
        }
        if Instant::now() >= deadline {
            session.stop().await;
            bail!(
                "no broker handshake within {}s",
                config.connect_timeout_secs
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Publishes are fire-and-forget; give the link a moment to flush the
/// queued packet, then check whether the attempt was recorded as failed.
async fn settle(session: &Session) -> Result<()> {
    tokio::time::sleep(Duration::from_millis(300)).await;

    if session.stats().publish_errors > 0 {
        match session.store().last_error() {
            Some(error) => bail!("{}", error),
            None => bail!("publish failed"),
        }
    }

    Ok(())
}

async fn send_mute(config: &Config, topic: &str) -> Result<()> {
    let session = connect_session(config).await?;
    session.mute_alarm(topic);

    let flushed = settle(&session).await;
    session.stop().await;
    flushed?;

    println!("{} mute -> {}", "Sent".green().bold(), topic.cyan());
    Ok(())
}

async fn send_threshold(config: &Config, topic: &str, value: i64) -> Result<()> {
    let session = connect_session(config).await?;
    session.set_threshold(topic, value);

    let flushed = settle(&session).await;
    session.stop().await;
    flushed?;

    println!(
        "{} threshold {} -> {}",
        "Sent".green().bold(),
        value,
        topic.cyan()
    );
    Ok(())
}

// ============================================================================
// History read path
// ============================================================================

fn show_history(config: &Config, series: Option<&str>, limit: usize) -> Result<()> {
    let Some(db) = &config.database else {
        bail!("no database configured (pass --db <path>)");
    };

    // The read path degrades instead of failing: a missing or unreadable
    // database prints a notice and exits cleanly.
    if let Err(e) = query_history(&db.path, series, limit) {
        println!("{}: {}", "history unavailable".yellow(), e);
    }

    Ok(())
}

fn query_history(path: &str, series: Option<&str>, limit: usize) -> Result<(), HistoryError> {
    let store = SqliteHistory::open_read_only(path)?;

    match series {
        None => {
            let names = store.series_names()?;
            if names.is_empty() {
                println!("{}", "No series recorded yet".dimmed());
                return Ok(());
            }

            println!("{}", "Recorded series:".bold());
            for name in names {
                println!("  {}", name.cyan());
            }
        }
        Some(series) => {
            let rows = store.recent(series, limit)?;
            if rows.is_empty() {
                println!("{}", format!("No rows recorded for '{}'", series).dimmed());
                return Ok(());
            }

            println!("{}", format!("{} (last {} row(s))", series, rows.len()).bold());
            for row in rows {
                println!(
                    "  {} {} {}",
                    format!("#{:<6}", row.id).dimmed(),
                    row.recorded_at
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S"),
                    format!("{:.3}", row.value).cyan()
                );
            }
        }
    }

    Ok(())
}

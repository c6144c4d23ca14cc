//! Newswire - live news feed cache
//!
//! A caching watcher for a news backend with:
//! - TTL-based in-memory caching with stale fallback on backend failure
//! - A live push channel merged straight into the cache
//! - Prometheus metrics
//! - Disk persistence for warm restarts

use clap::Parser;
use newswire::config::default_push_url;
use newswire::utils::ascii::print_startup_banner;
use newswire::{Config, FeedContext, LiveEvent};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Newswire - live news feed cache
#[derive(Parser, Debug)]
#[command(name = "newswire")]
#[command(author, version, about = "Live news feed cache", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,

    /// Enable debug logging for backend API requests
    #[arg(long)]
    debug_requests: bool,

    /// Backend base URL (overrides NEWSWIRE_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Push channel URL (overrides NEWSWIRE_PUSH_URL)
    #[arg(long)]
    push_url: Option<String>,

    /// Cache directory for persistence (overrides NEWSWIRE_CACHE_DIR)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Do not open the live push channel
    #[arg(long)]
    no_live: bool,

    /// Give up priming the default views after this many seconds
    #[arg(long, default_value_t = 30)]
    prime_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let boot_start = Instant::now();

    // Load .env file first (before parsing args, so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs, args.debug_requests)?;

    print_startup_banner();

    info!("Starting Newswire v{}", env!("CARGO_PKG_VERSION"));

    // Load config (CLI flags override env vars)
    let mut config = Config::from_env()?;
    if let Some(base_url) = args.base_url {
        config.feed.push_url = default_push_url(&base_url);
        config.feed.base_url = base_url;
    }
    if let Some(push_url) = args.push_url {
        config.feed.push_url = push_url;
    }
    if let Some(cache_dir) = args.cache_dir {
        config.cache.persist_dir = Some(cache_dir);
    }

    if args.debug_requests {
        info!("Request debugging enabled");
    }

    let ctx = FeedContext::initialize(config).await;
    info!(
        boot_secs = boot_start.elapsed().as_secs_f64(),
        base_url = %ctx.config.feed.base_url,
        "Feed context ready"
    );

    // Warm the default views before opening the live channel. A dead
    // backend must not stall boot, so priming is bounded.
    let prime_timeout = Duration::from_secs(args.prime_timeout_secs);
    if tokio::time::timeout(prime_timeout, ctx.service.prime())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = args.prime_timeout_secs,
            "Cache priming did not finish in time, continuing without it"
        );
    }

    let mut events = ctx.live.subscribe();
    if args.no_live {
        info!("Live push channel disabled");
    } else {
        ctx.live.connect().await;
    }

    let mut status_tick = tokio::time::interval(Duration::from_secs(60));
    status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, initiating graceful shutdown...");
                break;
            }
            _ = status_tick.tick() => {
                let stats = ctx.service.cache_stats().await;
                info!(
                    entries = stats.size,
                    hits = stats.hit_count,
                    misses = stats.miss_count,
                    hit_rate = stats.hit_rate,
                    live = %ctx.live.state(),
                    "Cache status"
                );
            }
            event = events.recv() => match event {
                Ok(event) => log_event(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagged behind the live channel");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!("Event channel closed");
                    tokio::signal::ctrl_c().await?;
                    info!("Shutdown signal received, initiating graceful shutdown...");
                    break;
                }
            }
        }
    }

    ctx.shutdown().await;

    info!("Newswire shutdown complete");
    Ok(())
}

fn log_event(event: LiveEvent) {
    match event {
        LiveEvent::Connected { client_id } => {
            info!(
                client_id = client_id.as_deref().unwrap_or("unknown"),
                "Live channel connected"
            );
        }
        LiveEvent::Snapshot(snapshot) => {
            info!(summary = %snapshot.summary(), "Initial snapshot merged");
        }
        LiveEvent::Update(snapshot) => {
            info!(summary = %snapshot.summary(), "Live update merged");
        }
        LiveEvent::ChannelError { message } => {
            warn!(message = %message, "Live channel reported an error");
        }
        LiveEvent::Disconnected { code } => {
            info!(code, "Live channel disconnected");
        }
        LiveEvent::ReconnectScheduled { attempt, delay } => {
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Live channel reconnect scheduled"
            );
        }
        LiveEvent::GaveUp { attempts } => {
            warn!(attempts, "Live channel gave up reconnecting");
        }
    }
}

fn init_logging(level: &str, json: bool, debug_requests: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    // Set newswire to the requested level, and optionally enable
    // request debugging for the API client.
    let filter = if debug_requests {
        EnvFilter::new(format!(
            "newswire={},newswire::feed::api=debug,hyper=warn",
            level
        ))
    } else {
        EnvFilter::new(format!("newswire={},hyper=warn", level))
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }

    Ok(())
}

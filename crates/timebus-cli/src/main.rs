//! timebus: command-line host for the in-process timer.
//!
//! Subcommands:
//! - `run`: schedule one task and print every firing from its callback
//! - `stream`: same schedule consumed through the stream adapter

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use futures_util::{Stream, StreamExt};
use miette::{IntoDiagnostic, Result};
use timebus::{FaultPolicy, TaskInfo, TimeUnit, TimerBus, TimerBusConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod run;
mod stream;

#[derive(Parser)]
#[command(name = "timebus")]
#[command(about = "Single-thread delayed and periodic task scheduler", long_about = None)]
struct Cli {
    #[command(flatten)]
    scheduler: SchedulerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule a task and print each firing from its callback
    Run {
        #[command(flatten)]
        task: TaskArgs,

        #[command(flatten)]
        stop: StopArgs,
    },

    /// Schedule a task and consume its firings as async streams
    Stream {
        #[command(flatten)]
        task: TaskArgs,

        #[command(flatten)]
        stop: StopArgs,

        /// Number of subscribers sharing one registration
        #[arg(long, default_value = "1")]
        subscribers: usize,

        /// Deliver the latest firing to subscribers that join late
        #[arg(long)]
        replay: bool,
    },
}

/// Scheduler settings shared by every subcommand.
#[derive(Args)]
struct SchedulerArgs {
    /// Retired records kept for reuse
    #[arg(long, global = true, env = "TIMEBUS_CACHE_CAPACITY", default_value = "20")]
    cache_capacity: usize,

    /// Maximum tasks extracted per pass
    #[arg(long, global = true, env = "TIMEBUS_BATCH_SIZE", default_value = "10")]
    batch_size: usize,

    /// Worker thread name
    #[arg(long, global = true, env = "TIMEBUS_THREAD_NAME", default_value = "timebus-loop")]
    thread_name: String,

    /// What a panicking task does to the scheduler
    #[arg(long, global = true, env = "TIMEBUS_FAULT_POLICY", value_enum, default_value = "isolate")]
    fault_policy: PolicyArg,
}

impl SchedulerArgs {
    fn config(&self) -> TimerBusConfig {
        TimerBusConfig::default()
            .with_cache_capacity(self.cache_capacity)
            .with_batch_size(self.batch_size)
            .with_thread_name(self.thread_name.clone())
            .with_fault_policy(self.fault_policy.into())
    }

    fn build(&self) -> Result<TimerBus> {
        TimerBus::new(self.config()).map_err(|e| miette::miette!("{}", e))
    }
}

#[derive(Args, Clone)]
struct TaskArgs {
    /// Task name passed to the callback
    #[arg(long, default_value = "tick")]
    name: String,

    /// Repeat period; omit for a one-shot task
    #[arg(long)]
    period: Option<u64>,

    /// Delay before the first firing
    #[arg(long, default_value = "0")]
    delay: u64,

    /// Unit for period and delay
    #[arg(long, value_enum, default_value = "seconds")]
    unit: UnitArg,
}

#[derive(Args, Clone, Copy)]
struct StopArgs {
    /// Stop after this many firings
    #[arg(long)]
    count: Option<usize>,

    /// Stop after this many seconds
    #[arg(long = "for")]
    for_secs: Option<u64>,
}

impl StopArgs {
    /// Resolves once the `--for` window has passed, never without one.
    async fn window(self) {
        match self.for_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum UnitArg {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl From<UnitArg> for TimeUnit {
    fn from(unit: UnitArg) -> Self {
        match unit {
            UnitArg::Nanoseconds => TimeUnit::Nanoseconds,
            UnitArg::Microseconds => TimeUnit::Microseconds,
            UnitArg::Milliseconds => TimeUnit::Milliseconds,
            UnitArg::Seconds => TimeUnit::Seconds,
            UnitArg::Minutes => TimeUnit::Minutes,
            UnitArg::Hours => TimeUnit::Hours,
            UnitArg::Days => TimeUnit::Days,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Isolate,
    FailStop,
}

impl From<PolicyArg> for FaultPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Isolate => FaultPolicy::Isolate,
            PolicyArg::FailStop => FaultPolicy::FailStop,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "timebus=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let bus = cli.scheduler.build()?;

    match cli.command {
        Commands::Run { task, stop } => run::run(bus, task, stop).await,
        Commands::Stream {
            task,
            stop,
            subscribers,
            replay,
        } => stream::stream(bus, task, stop, subscribers, replay).await,
    }
}

/// Print each firing as a JSON line until the stop condition is met, the
/// events end, or Ctrl-C. Returns how many firings were printed.
async fn consume<S>(events: S, stop: StopArgs) -> Result<usize>
where
    S: Stream<Item = (Option<usize>, TaskInfo)> + Unpin,
{
    let started = Instant::now();
    let mut events = match stop.count {
        Some(count) => events.take(count).left_stream(),
        None => events.right_stream(),
    };
    let window = stop.window();
    tokio::pin!(window);

    let mut printed = 0;
    loop {
        tokio::select! {
            event = events.next() => {
                let Some((subscriber, firing)) = event else {
                    break;
                };
                let line = serde_json::json!({
                    "name": firing.name,
                    "key": firing.key,
                    "subscriber": subscriber,
                    "elapsed_ms": started.elapsed().as_millis() as u64,
                });
                println!("{}", serde_json::to_string(&line).into_diagnostic()?);
                printed += 1;
            }
            _ = &mut window => {
                info!("run window elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
        }
    }
    Ok(printed)
}

/// Stop the worker without blocking the runtime.
async fn shutdown(bus: Arc<TimerBus>) -> Result<()> {
    tokio::task::spawn_blocking(move || bus.exit())
        .await
        .map_err(|e| miette::miette!("scheduler shutdown failed: {}", e))?;
    info!("scheduler stopped");
    Ok(())
}

use anyhow::Result;
use colored::Colorize;
use feedclock::labs::simulated_feed::FeedSnapshot;
use feedclock::prelude::*;
use feedclock::{ENGINE_NAME, VERSION as LIB_VERSION};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Print one in this many frames while frame output is on.
const FRAME_PRINT_EVERY: u64 = 10;

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct CommandHighlighter;

impl Highlighter for CommandHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", format!("  {ENGINE_NAME} shell").cyan().bold());
    println!("{}", "-".repeat(64).dimmed());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", "-".repeat(64).dimmed());
}

/// Spawns several tasks, each subscribing to a different event stream from the engine.
fn spawn_event_listeners(engine: &FeedClockEngine) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            println!("\n<-- [SYSTEM EVENT] {:?}", event);
        }
    });

    let mut sync_rx = engine.subscribe_sync_events();
    tokio::spawn(async move {
        while let Ok(event) = sync_rx.recv().await {
            println!("\n<-- [SYNC EVENT] {:?}", event);
        }
    });

    let mut fetch_rx = engine.subscribe_fetch_events();
    tokio::spawn(async move {
        while let Ok(event) = fetch_rx.recv().await {
            if let FetchEvent::Failed { reason } = event {
                println!("\n<-- [FETCH FAILED] {}", reason.red());
            }
        }
    });
}

fn print_status(status: &SyncStatus, feed: &FeedSnapshot) {
    let fmt_opt = |value: Option<f64>| match value {
        Some(v) => format!("{v:.3}"),
        None => "-".dimmed().to_string(),
    };
    println!("{}", "Playback".cyan().bold());
    println!("  rate            {:.1} sps", status.rate);
    println!(
        "  buffered        {} samples, {:.3}s (target {:.3}s)",
        status.buffered_samples, status.buffered_span, status.target_depth
    );
    println!("  cadence         {:.3}s per fetch", status.cadence_average);
    println!("  warp            {:.3}", status.warp);
    println!("  position        {}", fmt_opt(status.playback_position));
    println!("  last presented  {}", fmt_opt(status.last_presented));
    println!("  cursor          {}", fmt_opt(status.cursor));
    println!("  fetch in flight {}", status.fetch_in_flight);
    println!("{}", "Simulated feed".cyan().bold());
    println!("  rate            {}", feed.rate);
    println!("  buffered        {} samples, newest {}", feed.buffered, fmt_opt(feed.newest));
    println!(
        "  latency         {:?} + up to {:?}, failure rate {:.2}",
        feed.latency, feed.jitter, feed.failure_rate
    );
    if let Some(left) = feed.stalled_for {
        println!("  {}", format!("stalled, {:.1}s left", left.as_secs_f64()).yellow());
    }
    println!("  requests        {}", feed.requests);
}

fn print_help() {
    println!("Available commands:");
    println!("  status                - Shows playback and simulated feed state.");
    println!("  stall <S>             - Stops the feed from publishing for S seconds.");
    println!("  rate <SPS>            - Changes the feed's sample rate.");
    println!("  latency <MS> [JITTER] - Sets response latency and jitter in milliseconds.");
    println!("  fail <P>              - Makes a fraction P of requests fail.");
    println!("  start frames          - Begins printing presented frames.");
    println!("  stop frames           - Stops printing presented frames.");
    println!("  exit                  - Quits the shell.");
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = FeedClockConfig::load(config_path.as_deref())?;

    let feed = SimulatedFeed::new(SimulatedFeedSettings {
        rate: config.initial_rate,
        ..SimulatedFeedSettings::default()
    });
    let control = feed.control();
    let engine = FeedClockEngine::new(config, feed)?;
    let engine_handle = engine.clone();

    // Shared flag for the frame printer.
    let is_printing_frames = Arc::new(AtomicBool::new(false));
    let printing = is_printing_frames.clone();
    let frame_count = AtomicU64::new(0);
    let renderer = move |frame: Option<&Sample>| {
        let Some(sample) = frame else {
            return;
        };
        let n = frame_count.fetch_add(1, Ordering::Relaxed);
        if printing.load(Ordering::Relaxed) && n % FRAME_PRINT_EVERY == 0 {
            let ball = match sample.payload.ball {
                Some(BallPosition { x, y }) => format!("({x:+.3}, {y:+.3})"),
                None => "unknown".to_string(),
            };
            println!("<-- [FRAME] t={:.3} ball={}", sample.timestamp, ball);
        }
    };

    spawn_event_listeners(&engine_handle);

    info!("Spawning {} in the background...", ENGINE_NAME.cyan());
    tokio::spawn(async move {
        if let Err(e) = engine.run_until_stopped(renderer).await {
            eprintln!("\nEngine stopped with an error: {}", e);
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut rl = Editor::new()?;
    rl.set_helper(Some(CommandHighlighter));

    println!(
        "{} is running. Type 'help' for commands or 'exit' to quit.",
        ENGINE_NAME.cyan()
    );

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        match rl.readline(&prompt) {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();
                let Some(command) = args.first() else {
                    continue;
                };
                match *command {
                    "status" => {
                        let status = engine_handle.status().borrow().clone();
                        let feed = control.snapshot().await;
                        print_status(&status, &feed);
                    }
                    "stall" => match args.get(1).map(|s| s.parse::<f64>()) {
                        Some(Ok(secs)) if secs.is_finite() && secs > 0.0 => {
                            control.stall(Duration::from_secs_f64(secs)).await;
                            println!("--> Feed stalled for {secs}s.");
                        }
                        Some(_) => println!("Error: stall takes a positive number of seconds."),
                        None => println!("Usage: stall <SECONDS>"),
                    },
                    "rate" => match args.get(1).map(|s| s.parse::<f64>()) {
                        Some(Ok(sps)) => match FeedRate::new(sps) {
                            Ok(rate) => {
                                control.set_rate(rate).await;
                                println!("--> Feed now produces {rate}.");
                            }
                            Err(e) => println!("Error: {e}"),
                        },
                        Some(Err(_)) => println!("Error: rate must be a number."),
                        None => println!("Usage: rate <SAMPLES_PER_SEC>"),
                    },
                    "latency" => {
                        let latency = args.get(1).map(|s| s.parse::<u64>());
                        let jitter = args.get(2).map(|s| s.parse::<u64>()).unwrap_or(Ok(0));
                        match (latency, jitter) {
                            (Some(Ok(ms)), Ok(jitter_ms)) => {
                                control
                                    .set_latency(
                                        Duration::from_millis(ms),
                                        Duration::from_millis(jitter_ms),
                                    )
                                    .await;
                                println!("--> Latency set to {ms}ms + up to {jitter_ms}ms.");
                            }
                            (None, _) => println!("Usage: latency <MS> [JITTER_MS]"),
                            _ => println!("Error: latency is a whole number of milliseconds."),
                        }
                    }
                    "fail" => match args.get(1).map(|s| s.parse::<f64>()) {
                        Some(Ok(p)) if (0.0..=1.0).contains(&p) => {
                            control.set_failure_rate(p).await;
                            println!("--> {:.0}% of requests will fail.", p * 100.0);
                        }
                        Some(_) => println!("Error: failure rate must be between 0 and 1."),
                        None => println!("Usage: fail <PROBABILITY>"),
                    },
                    "start" => {
                        if let Some(&"frames") = args.get(1) {
                            is_printing_frames.store(true, Ordering::Relaxed);
                            println!("--> Started printing frames (1 in {FRAME_PRINT_EVERY}).");
                        } else {
                            println!("Unknown 'start' command. Try 'start frames'.");
                        }
                    }
                    "stop" => {
                        if let Some(&"frames") = args.get(1) {
                            is_printing_frames.store(false, Ordering::Relaxed);
                            println!("--> Stopped printing frames.");
                        } else {
                            println!("Unknown 'stop' command. Try 'stop frames'.");
                        }
                    }
                    "help" => print_help(),
                    "exit" => break,
                    _ => println!("Unknown command: '{}'. Type 'help'.", line),
                }
            }
            Err(_) => {
                println!("Exiting feedshell...");
                break;
            }
        }
    }

    engine_handle.stop();
    Ok(())
}

//! sacnscope - terminal sACN universe monitor
//!
//! Listens to one universe, prints source lifecycle events and merge
//! activity, and can append the merged levels to a CSV file.
//!
//! Usage: `sacnscope <universe> [--csv <file>] [--cadence <ms>]`
//!
//! Listener tuning (port, timeout, sweep interval) is read from
//! `sacnscope.toml` in the working directory when present.

mod logger;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sacnscope_core::{ListenerConfig, ListenerEvent, ListenerManager};
use tracing_subscriber::EnvFilter;

use crate::logger::MergedUniverseLogger;

struct Args {
    universe: u16,
    csv: Option<PathBuf>,
    cadence: Duration,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let universe = args
        .next()
        .context("Usage: sacnscope <universe> [--csv <file>] [--cadence <ms>]")?
        .parse::<u16>()
        .context("Universe must be a number (1-63999)")?;

    let mut csv = None;
    let mut cadence = Duration::from_secs(1);
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--csv" => {
                csv = Some(PathBuf::from(
                    args.next().context("--csv requires a file path")?,
                ));
            }
            "--cadence" => {
                let ms: u64 = args
                    .next()
                    .context("--cadence requires milliseconds")?
                    .parse()
                    .context("--cadence must be a number of milliseconds")?;
                cadence = Duration::from_millis(ms);
            }
            other => bail!("Unknown argument: {}", other),
        }
    }

    Ok(Args {
        universe,
        csv,
        cadence,
    })
}

fn load_config() -> Result<ListenerConfig> {
    match std::fs::read_to_string("sacnscope.toml") {
        Ok(contents) => toml::from_str(&contents).context("Invalid sacnscope.toml"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ListenerConfig::default()),
        Err(e) => Err(e).context("Could not read sacnscope.toml"),
    }
}

/// Turns the event stream into console lines. SourceChanged fires for
/// every accepted frame, so only counter movements are reported.
#[derive(Default)]
struct Console {
    counters: std::collections::HashMap<uuid::Uuid, (u64, u64)>,
}

impl Console {
    fn describe(&mut self, event: &ListenerEvent) -> Option<String> {
        match event {
            ListenerEvent::SourceFound(info) => Some(format!(
                "source found: \"{}\" {} from {} prio {} ({})",
                info.name, info.cid, info.ip, info.priority, info.protocol
            )),
            ListenerEvent::SourceLost(info) => {
                Some(format!("source lost: \"{}\" {}", info.name, info.cid))
            }
            ListenerEvent::SourceChanged(info) => {
                let last = self.counters.insert(info.cid, (info.seq_errors, info.jumps));
                let (last_errors, last_jumps) = last.unwrap_or((0, 0));
                if info.seq_errors > last_errors || info.jumps > last_jumps {
                    Some(format!(
                        "source \"{}\": {} seq errors, {} jumps, {:.1} fps",
                        info.name, info.seq_errors, info.jumps, info.fps
                    ))
                } else {
                    None
                }
            }
            // Merge activity is too chatty for the console
            ListenerEvent::LevelsChanged(_) => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = parse_args()?;
    let config = load_config()?;

    let manager = ListenerManager::new(config);
    let listener = manager
        .acquire(args.universe)
        .await
        .with_context(|| format!("Could not listen on universe {}", args.universe))?;
    let mut events = listener.subscribe();

    println!("Monitoring universe {} (Ctrl-C to stop)", args.universe);

    let csv_logger = match &args.csv {
        Some(path) => Some(MergedUniverseLogger::start(
            path,
            Arc::clone(&listener),
            args.cadence,
        )?),
        None => None,
    };

    let mut console = Console::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = console.describe(&event) {
                        println!("{}", line);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Dropped {} events (console too slow)", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    if let Some(logger) = csv_logger {
        logger.stop();
    }
    manager.release(args.universe).await?;
    println!("Stopped.");

    Ok(())
}

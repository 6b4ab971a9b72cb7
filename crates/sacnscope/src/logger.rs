//! CSV merged-universe logger
//!
//! A pure reader over a started listener: on a fixed cadence it pulls the
//! current merged snapshot and appends one CSV row per channel. It never
//! touches listener state.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sacnscope_core::UniverseListener;
use tokio::task::JoinHandle;

/// Columns: ISO-8601 timestamp, generation, channel (1-based), level,
/// winning source name (empty when unclaimed).
const HEADER: &str = "timestamp,generation,channel,level,source\n";

pub struct MergedUniverseLogger {
    task: JoinHandle<()>,
}

impl MergedUniverseLogger {
    /// Start logging `listener`'s merged levels to `path` every `cadence`.
    pub fn start(
        path: &Path,
        listener: Arc<UniverseListener>,
        cadence: Duration,
    ) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(HEADER.as_bytes())?;
        writer.flush()?;

        tracing::info!(
            "Logging universe {} to {} every {:?}",
            listener.universe(),
            path.display(),
            cadence
        );

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            // Generation 0 is the pre-traffic empty snapshot; skip it
            let mut last_generation = 0u64;
            loop {
                interval.tick().await;
                let snapshot = listener.merged_levels();
                if snapshot.generation == last_generation {
                    continue;
                }
                last_generation = snapshot.generation;

                let names: Vec<(uuid::Uuid, String)> = listener
                    .sources()
                    .iter()
                    .map(|s| (s.cid, s.name.clone()))
                    .collect();
                let timestamp = chrono::Utc::now().to_rfc3339();

                for (index, channel) in snapshot.channels.iter().enumerate() {
                    let source = channel
                        .winner
                        .and_then(|cid| names.iter().find(|(c, _)| *c == cid))
                        .map(|(_, name)| name.as_str())
                        .unwrap_or("");
                    let row = format!(
                        "{},{},{},{},{}\n",
                        timestamp,
                        snapshot.generation,
                        index + 1,
                        channel.level,
                        source
                    );
                    if let Err(e) = writer.write_all(row.as_bytes()) {
                        tracing::error!("CSV write failed: {}", e);
                        return;
                    }
                }
                if let Err(e) = writer.flush() {
                    tracing::error!("CSV flush failed: {}", e);
                    return;
                }
            }
        });

        Ok(Self { task })
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

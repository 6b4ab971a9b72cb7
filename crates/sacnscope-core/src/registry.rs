//! Per-universe source registry
//!
//! Owns every [`SacnSource`] seen on one universe. Ingestion, the timeout
//! sweep, and counter resets all mutate source state here; the listener
//! serializes those calls behind one lock. Lifecycle changes come back as
//! [`RegistryEvent`] records for the listener to broadcast.

use std::net::IpAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{Result, SacnError};
use crate::packet::{DataFrame, STARTCODE_DMX, STARTCODE_PRIORITY};
use crate::source::{SacnSource, SequenceClass, SourceInfo};

/// Source lifecycle notification produced by a registry mutation
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    SourceFound(SourceInfo),
    SourceLost(SourceInfo),
    SourceChanged(SourceInfo),
}

/// Result of a registry mutation (ingest or timeout sweep)
#[derive(Debug, Default)]
pub struct RegistryOutcome {
    /// True when source data or validity changed, so the merge must rerun
    pub needs_merge: bool,
    pub events: Vec<RegistryEvent>,
}

/// The set of sources transmitting on one universe
pub struct SourceRegistry {
    universe: u16,
    timeout: Duration,
    // Insertion order doubles as the registration ordinal
    sources: Vec<SacnSource>,
}

impl SourceRegistry {
    pub fn new(universe: u16, timeout: Duration) -> Self {
        Self {
            universe,
            timeout,
            sources: Vec::new(),
        }
    }

    pub fn universe(&self) -> u16 {
        self.universe
    }

    /// Feed one structurally valid frame into the registry.
    ///
    /// Frames for another universe or with an unhandled start code are
    /// dropped here. A previously unseen CID creates a source; a known CID
    /// mutates it, gated by the sequence validator.
    pub fn ingest(&mut self, frame: &DataFrame, origin: IpAddr, now: Instant) -> RegistryOutcome {
        let mut outcome = RegistryOutcome::default();

        if frame.universe != self.universe {
            tracing::trace!(
                "Dropping frame for universe {} on universe {} registry",
                frame.universe,
                self.universe
            );
            return outcome;
        }
        if frame.start_code != STARTCODE_DMX && frame.start_code != STARTCODE_PRIORITY {
            tracing::trace!("Ignoring alternate start code 0x{:02x}", frame.start_code);
            return outcome;
        }

        let index = match self.sources.iter().position(|s| s.cid == frame.cid) {
            Some(index) => index,
            None => {
                let ordinal = self.sources.len();
                let source = SacnSource::new(frame, origin, ordinal, now);
                tracing::debug!(
                    "New source \"{}\" ({}) on universe {}",
                    source.name,
                    source.cid,
                    self.universe
                );
                self.sources.push(source);
                outcome
                    .events
                    .push(RegistryEvent::SourceFound(self.sources[ordinal].info()));
                ordinal
            }
        };
        let source = &mut self.sources[index];

        if frame.stream_terminated {
            source.last_seen = now;
            if source.valid {
                source.valid = false;
                tracing::debug!("Source \"{}\" terminated its stream", source.name);
                outcome.events.push(RegistryEvent::SourceLost(source.info()));
                outcome.needs_merge = true;
            }
            return outcome;
        }

        match source.track_sequence(frame.sequence) {
            SequenceClass::Stale => {
                // Old or duplicated packet; counters moved but levels did not
                outcome.events.push(RegistryEvent::SourceChanged(source.info()));
            }
            SequenceClass::InOrder | SequenceClass::Jump => {
                let was_offline = !source.valid;
                source.apply_frame(frame, now);
                outcome.events.push(RegistryEvent::SourceChanged(source.info()));
                if was_offline {
                    tracing::debug!("Source \"{}\" is back online", source.name);
                }
                outcome.needs_merge = true;
            }
        }

        outcome
    }

    /// Mark sources that have gone silent for longer than the timeout.
    ///
    /// Timed-out sources become invalid and are excluded from the merge,
    /// but remain enumerable.
    pub fn sweep_timeouts(&mut self, now: Instant) -> RegistryOutcome {
        let mut outcome = RegistryOutcome::default();
        for source in &mut self.sources {
            if source.valid && now.duration_since(source.last_seen) > self.timeout {
                source.valid = false;
                tracing::debug!(
                    "Source \"{}\" on universe {} timed out",
                    source.name,
                    self.universe
                );
                outcome.events.push(RegistryEvent::SourceLost(source.info()));
                outcome.needs_merge = true;
            }
        }
        outcome
    }

    /// Restamp every source's last-seen time.
    ///
    /// Called when a paused listener resumes, so the pause duration is not
    /// charged against the timeout window: sources that were online keep a
    /// full window to prove they still are.
    pub fn refresh_liveness(&mut self, now: Instant) {
        for source in &mut self.sources {
            source.last_seen = now;
        }
    }

    /// Zero a source's sequence error counter
    pub fn reset_seq_errors(&mut self, cid: Uuid) -> Result<RegistryEvent> {
        let source = self.source_by_cid_mut(cid)?;
        source.seq_errors = 0;
        Ok(RegistryEvent::SourceChanged(source.info()))
    }

    /// Zero a source's jump counter
    pub fn reset_jumps(&mut self, cid: Uuid) -> Result<RegistryEvent> {
        let source = self.source_by_cid_mut(cid)?;
        source.jumps = 0;
        Ok(RegistryEvent::SourceChanged(source.info()))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn source(&self, index: usize) -> Option<&SacnSource> {
        self.sources.get(index)
    }

    pub fn sources(&self) -> &[SacnSource] {
        &self.sources
    }

    fn source_by_cid_mut(&mut self, cid: Uuid) -> Result<&mut SacnSource> {
        self.sources
            .iter_mut()
            .find(|s| s.cid == cid)
            .ok_or(SacnError::UnknownSource(cid))
    }
}

//! HTP priority merge
//!
//! Recomputes the winning source and level for all 512 channel addresses
//! from the current registry state. Pure read: the merge never mutates
//! source state, and a full new channel array is produced on every run so
//! readers can never observe a half-updated result.

use uuid::Uuid;

use crate::registry::SourceRegistry;
use crate::source::SacnSource;

pub const UNIVERSE_SIZE: usize = 512;

/// A losing contender at one channel address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelContender {
    pub source: Uuid,
    pub level: u8,
    pub priority: u8,
}

/// Merge result for one channel address
#[derive(Debug, Clone, Default)]
pub struct MergedChannel {
    /// CID of the winning source, or `None` when no valid source claims
    /// the channel with a non-zero priority
    pub winner: Option<Uuid>,
    pub level: u8,
    pub priority: u8,
    /// Remaining eligible sources, highest priority first, level breaking
    /// priority ties
    pub others: Vec<ChannelContender>,
}

/// An immutable, fully formed merge result for a universe.
///
/// Published by pointer swap; `generation` increases with every
/// recomputation so consumers can cheaply detect staleness.
#[derive(Debug, Clone)]
pub struct MergedSnapshot {
    pub universe: u16,
    pub generation: u64,
    pub channels: Vec<MergedChannel>,
}

impl MergedSnapshot {
    pub fn empty(universe: u16) -> Self {
        Self {
            universe,
            generation: 0,
            channels: vec![MergedChannel::default(); UNIVERSE_SIZE],
        }
    }
}

fn is_candidate(source: &SacnSource) -> bool {
    source.valid && source.active_dmx
}

/// Recompute the HTP merge across the registry.
///
/// Per channel: only valid, actively transmitting sources with a non-zero
/// effective priority contend. Highest effective priority wins; at equal
/// priority the higher level wins; at equal priority and level the
/// earliest-registered source wins, which keeps repeated recomputations
/// deterministic.
pub fn merge_universe(registry: &SourceRegistry) -> Vec<MergedChannel> {
    let candidates: Vec<&SacnSource> =
        registry.sources().iter().filter(|s| is_candidate(s)).collect();

    let mut channels = Vec::with_capacity(UNIVERSE_SIZE);
    let mut contenders: Vec<(&SacnSource, u8, u8)> = Vec::with_capacity(candidates.len());

    for address in 0..UNIVERSE_SIZE {
        contenders.clear();
        for &source in &candidates {
            let priority = source.effective_priority(address);
            if priority == 0 {
                continue;
            }
            contenders.push((source, priority, source.levels[address]));
        }
        contenders.sort_by(|(a, ap, al), (b, bp, bl)| {
            bp.cmp(ap)
                .then(bl.cmp(al))
                .then(a.ordinal.cmp(&b.ordinal))
        });

        let mut merged = MergedChannel::default();
        if let Some(&(winner, priority, level)) = contenders.first() {
            merged.winner = Some(winner.cid);
            merged.level = level;
            merged.priority = priority;
            merged.others = contenders[1..]
                .iter()
                .map(|&(source, priority, level)| ChannelContender {
                    source: source.cid,
                    level,
                    priority,
                })
                .collect();
        }
        channels.push(merged);
    }

    channels
}

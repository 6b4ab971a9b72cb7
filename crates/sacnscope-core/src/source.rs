//! Per-source receive state
//!
//! One [`SacnSource`] exists per CID seen on a universe. It carries the
//! source's identity, the last accepted levels and priorities, sequence
//! diagnostics, and liveness. Sources are owned exclusively by the
//! registry; consumers get [`SourceInfo`] snapshots.

use std::net::IpAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::packet::{DataFrame, ProtocolVersion, MAX_PRIORITY, STARTCODE_DMX, STARTCODE_PRIORITY};

/// Classification of an incoming sequence number against the last one seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceClass {
    /// Exactly one step forward, the normal case
    InOrder,
    /// Forward gap of 2..=127 steps; data is applied, jump counter bumped
    Jump,
    /// Duplicate or in the past half of the modular window; data discarded
    Stale,
}

/// Classify `incoming` relative to `last` over the wrapping 8-bit space.
///
/// The lower half of the modular distance counts as forward: a diff of 1 is
/// in order, 2..=127 is a jump, and 0 or 128..=255 places the packet in the
/// past and it must be discarded.
pub fn classify_sequence(last: u8, incoming: u8) -> SequenceClass {
    match incoming.wrapping_sub(last) {
        1 => SequenceClass::InOrder,
        2..=127 => SequenceClass::Jump,
        _ => SequenceClass::Stale,
    }
}

/// Rolling frames-per-second estimate over a one second window
#[derive(Debug, Clone)]
struct FpsCounter {
    frames: u32,
    window_start: Instant,
    fps: f32,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
            fps: 0.0,
        }
    }

    fn tick(&mut self, now: Instant) {
        self.frames += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.frames as f32 / elapsed.as_secs_f32();
            self.frames = 0;
            self.window_start = now;
        }
    }
}

/// State for one transmitter on a universe
#[derive(Debug, Clone)]
pub struct SacnSource {
    pub cid: Uuid,
    pub name: String,
    pub ip: IpAddr,
    pub protocol: ProtocolVersion,
    /// Preview-data flag; only release packets carry it
    pub preview: bool,
    /// True once a 0xDD per-channel priority frame has been accepted
    pub per_channel_priority: bool,
    /// Scalar priority, used when no per-channel block is active
    pub priority: u8,
    pub levels: [u8; 512],
    pub priorities: [u8; 512],
    pub last_sequence: Option<u8>,
    pub seq_errors: u64,
    pub jumps: u64,
    /// False once the source times out; it stays enumerable
    pub valid: bool,
    /// True if the source has ever sent level data (start code 0x00),
    /// as opposed to per-channel-priority frames only
    pub active_dmx: bool,
    pub last_seen: Instant,
    /// Registration order within the universe, used as the merge tie-break
    pub(crate) ordinal: usize,
    fps: FpsCounter,
}

impl SacnSource {
    pub(crate) fn new(frame: &DataFrame, ip: IpAddr, ordinal: usize, now: Instant) -> Self {
        Self {
            cid: frame.cid,
            name: frame.source_name.clone(),
            ip,
            protocol: frame.protocol,
            preview: frame.preview,
            per_channel_priority: false,
            priority: frame.priority,
            levels: [0; 512],
            priorities: [0; 512],
            last_sequence: None,
            seq_errors: 0,
            jumps: 0,
            valid: true,
            active_dmx: false,
            last_seen: now,
            ordinal,
            fps: FpsCounter::new(now),
        }
    }

    /// Run the sequence validator and update diagnostics.
    ///
    /// The first frame from a source initializes the counter and is always
    /// in order. Stale frames bump the error counter and advance nothing
    /// else; jumps bump the jump counter but are otherwise accepted.
    pub(crate) fn track_sequence(&mut self, incoming: u8) -> SequenceClass {
        let class = match self.last_sequence {
            None => SequenceClass::InOrder,
            Some(last) => classify_sequence(last, incoming),
        };
        match class {
            SequenceClass::Stale => {
                self.seq_errors += 1;
            }
            SequenceClass::Jump => {
                self.jumps += 1;
                self.last_sequence = Some(incoming);
            }
            SequenceClass::InOrder => {
                self.last_sequence = Some(incoming);
            }
        }
        class
    }

    /// Apply an accepted frame's payload and metadata
    pub(crate) fn apply_frame(&mut self, frame: &DataFrame, now: Instant) {
        self.name = frame.source_name.clone();
        self.protocol = frame.protocol;
        self.preview = frame.preview;
        self.priority = frame.priority;
        self.last_seen = now;
        self.valid = true;

        match frame.start_code {
            STARTCODE_DMX => {
                let len = frame.data.len().min(512);
                self.levels[..len].copy_from_slice(&frame.data[..len]);
                self.levels[len..].fill(0);
                self.active_dmx = true;
                self.fps.tick(now);
            }
            STARTCODE_PRIORITY => {
                let len = frame.data.len().min(512);
                for (slot, &value) in self.priorities[..len].iter_mut().zip(&frame.data[..len]) {
                    *slot = value.min(MAX_PRIORITY);
                }
                self.priorities[len..].fill(0);
                self.per_channel_priority = true;
            }
            _ => {}
        }
    }

    /// Effective priority at a channel address (0-based)
    pub fn effective_priority(&self, address: usize) -> u8 {
        if self.per_channel_priority {
            self.priorities[address]
        } else {
            self.priority
        }
    }

    pub fn fps(&self) -> f32 {
        self.fps.fps
    }

    /// Snapshot for events and consumer enumeration
    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            cid: self.cid,
            name: self.name.clone(),
            ip: self.ip,
            protocol: self.protocol,
            preview: self.preview,
            per_channel_priority: self.per_channel_priority,
            priority: self.priority,
            last_sequence: self.last_sequence,
            seq_errors: self.seq_errors,
            jumps: self.jumps,
            online: self.valid,
            active_dmx: self.active_dmx,
            fps: self.fps.fps,
        }
    }
}

/// Cloneable summary of a source, carried in events and returned to
/// consumers; mirrors what a monitoring front end displays per row.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub cid: Uuid,
    pub name: String,
    pub ip: IpAddr,
    pub protocol: ProtocolVersion,
    pub preview: bool,
    pub per_channel_priority: bool,
    pub priority: u8,
    pub last_sequence: Option<u8>,
    pub seq_errors: u64,
    pub jumps: u64,
    pub online: bool,
    pub active_dmx: bool,
    pub fps: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_in_order_step() {
        assert_eq!(classify_sequence(5, 6), SequenceClass::InOrder);
        // Wrap around
        assert_eq!(classify_sequence(255, 0), SequenceClass::InOrder);
    }

    #[test]
    fn test_forward_gap_is_jump() {
        assert_eq!(classify_sequence(5, 7), SequenceClass::Jump);
        assert_eq!(classify_sequence(5, 132), SequenceClass::Jump); // diff 127
        assert_eq!(classify_sequence(250, 10), SequenceClass::Jump); // wraps
    }

    #[test]
    fn test_past_half_is_stale() {
        assert_eq!(classify_sequence(5, 5), SequenceClass::Stale); // duplicate
        assert_eq!(classify_sequence(5, 4), SequenceClass::Stale);
        assert_eq!(classify_sequence(5, 133), SequenceClass::Stale); // diff 128
        assert_eq!(classify_sequence(0, 255), SequenceClass::Stale);
    }

    proptest! {
        /// A strictly increasing mod-256 sequence never records an anomaly
        #[test]
        fn prop_monotonic_sequence_is_clean(start: u8, steps in 1usize..600) {
            let mut last = start;
            for _ in 0..steps {
                let next = last.wrapping_add(1);
                prop_assert_eq!(classify_sequence(last, next), SequenceClass::InOrder);
                last = next;
            }
        }

        /// Every possible (last, incoming) pair lands in exactly one class
        #[test]
        fn prop_classification_is_total(last: u8, incoming: u8) {
            let class = classify_sequence(last, incoming);
            let diff = incoming.wrapping_sub(last);
            match class {
                SequenceClass::InOrder => prop_assert_eq!(diff, 1),
                SequenceClass::Jump => prop_assert!((2..=127).contains(&diff)),
                SequenceClass::Stale => prop_assert!(diff == 0 || diff >= 128),
            }
        }
    }

    fn frame(seq: u8) -> DataFrame {
        DataFrame {
            cid: Uuid::new_v4(),
            source_name: "test".into(),
            universe: 1,
            sequence: seq,
            priority: 100,
            protocol: ProtocolVersion::Release,
            preview: false,
            stream_terminated: false,
            start_code: STARTCODE_DMX,
            data: vec![0; 512],
        }
    }

    #[test]
    fn test_first_frame_initializes_counter() {
        let f = frame(42);
        let now = Instant::now();
        let mut source = SacnSource::new(&f, "127.0.0.1".parse().unwrap(), 0, now);

        assert_eq!(source.track_sequence(f.sequence), SequenceClass::InOrder);
        assert_eq!(source.last_sequence, Some(42));
        assert_eq!(source.seq_errors, 0);
        assert_eq!(source.jumps, 0);
    }

    #[test]
    fn test_jump_counts_once_and_advances() {
        let f = frame(0);
        let now = Instant::now();
        let mut source = SacnSource::new(&f, "127.0.0.1".parse().unwrap(), 0, now);
        source.track_sequence(0);

        assert_eq!(source.track_sequence(10), SequenceClass::Jump);
        assert_eq!(source.jumps, 1);
        assert_eq!(source.last_sequence, Some(10));
    }

    #[test]
    fn test_stale_does_not_advance_counter() {
        let f = frame(10);
        let now = Instant::now();
        let mut source = SacnSource::new(&f, "127.0.0.1".parse().unwrap(), 0, now);
        source.track_sequence(10);

        assert_eq!(source.track_sequence(9), SequenceClass::Stale);
        assert_eq!(source.seq_errors, 1);
        assert_eq!(source.last_sequence, Some(10));
    }

    #[test]
    fn test_priority_frame_does_not_mark_active_dmx() {
        let mut f = frame(0);
        f.start_code = STARTCODE_PRIORITY;
        f.data = vec![250; 512]; // above the cap, must clamp
        let now = Instant::now();
        let mut source = SacnSource::new(&f, "127.0.0.1".parse().unwrap(), 0, now);
        source.apply_frame(&f, now);

        assert!(!source.active_dmx);
        assert!(source.per_channel_priority);
        assert_eq!(source.priorities[0], MAX_PRIORITY);
        assert_eq!(source.effective_priority(0), MAX_PRIORITY);
    }

    #[test]
    fn test_effective_priority_scalar_fallback() {
        let f = frame(0);
        let now = Instant::now();
        let mut source = SacnSource::new(&f, "127.0.0.1".parse().unwrap(), 0, now);
        source.apply_frame(&f, now);

        assert!(source.active_dmx);
        assert_eq!(source.effective_priority(100), 100);
    }
}

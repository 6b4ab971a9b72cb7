//! sacnscope-core - Receive-only sACN (E1.31) listener and merge engine
//!
//! This crate ingests Streaming ACN data packets for one or more
//! universes, tracks every transmitting source, validates sequence
//! numbers, ages out silent sources, and publishes a per-channel HTP
//! (highest takes precedence) merge that consumers can read without
//! tearing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sacnscope_core::{ListenerConfig, ListenerManager};
//!
//! # async fn demo() -> sacnscope_core::Result<()> {
//! let manager = ListenerManager::new(ListenerConfig::default());
//! let listener = manager.acquire(1).await?;
//!
//! let _events = listener.subscribe();
//! let snapshot = listener.merged_levels();
//! println!("channel 1 level: {}", snapshot.channels[0].level);
//!
//! manager.release(1).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`packet`] - E1.31 wire format parsing (draft and release)
//! - [`source`] - per-source state and the sequence validator
//! - [`registry`] - per-universe source set, timeouts, counters
//! - [`merge`] - the HTP merge recomputation
//! - [`listener`] - universe listener state machine and event fan-out
//! - [`manager`] - shared, reference-counted listeners per universe
//! - [`config`] - listener tuning knobs
//! - [`error`] - error types

/// Listener configuration
pub mod config;
/// Error types
pub mod error;
/// Universe listener orchestration
pub mod listener;
/// Shared listener registry
pub mod manager;
/// HTP merge engine
pub mod merge;
/// E1.31 packet parsing
pub mod packet;
/// Per-universe source registry
pub mod registry;
/// Per-source state
pub mod source;

// Re-exports
pub use config::{ListenerConfig, NETWORK_DATA_LOSS_TIMEOUT, SACN_PORT};
pub use error::{Result, SacnError};
pub use listener::{ListenerEvent, ListenerState, UniverseListener};
pub use manager::ListenerManager;
pub use merge::{ChannelContender, MergedChannel, MergedSnapshot, UNIVERSE_SIZE};
pub use packet::{parse_data_frame, DataFrame, ProtocolVersion};
pub use registry::{RegistryEvent, SourceRegistry};
pub use source::{classify_sequence, SacnSource, SequenceClass, SourceInfo};

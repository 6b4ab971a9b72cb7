//! Universe listener
//!
//! Binds a universe to network reception: a receive task feeds datagrams
//! through the registry, a sweep task ages out silent sources, and every
//! relevant change republishes the merged snapshot and broadcasts events.
//!
//! Mutual exclusion: the registry sits behind a synchronous mutex and both
//! tasks only touch it in bounded, non-blocking critical sections, so
//! ingestion and the sweep are serialized per universe while different
//! universes run fully in parallel.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ListenerConfig, SACN_PORT};
use crate::error::{Result, SacnError};
use crate::merge::{merge_universe, MergedSnapshot};
use crate::packet::{parse_data_frame, MAX_UNIVERSE};
use crate::registry::{RegistryEvent, RegistryOutcome, SourceRegistry};
use crate::source::SourceInfo;

/// Notifications delivered to listener subscribers.
///
/// `LevelsChanged` carries the snapshot produced by the recomputation that
/// fired it, so a subscriber always reads exactly the data that triggered
/// the event even if a newer snapshot has been swapped in since.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    SourceFound(SourceInfo),
    SourceLost(SourceInfo),
    SourceChanged(SourceInfo),
    LevelsChanged(Arc<MergedSnapshot>),
}

/// Listener lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// No network subscription yet
    Idle,
    /// Subscribed, receive and sweep tasks running
    Listening,
    /// Subscription released, registry and last snapshot retained
    Paused,
}

struct Tasks {
    state: ListenerState,
    rx_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// Receive-side endpoint for one sACN universe.
///
/// Created via [`crate::ListenerManager`] in normal use so that all
/// consumers of a universe share one listener and one socket.
pub struct UniverseListener {
    universe: u16,
    config: ListenerConfig,
    registry: Mutex<SourceRegistry>,
    merged: ArcSwap<MergedSnapshot>,
    generation: AtomicU64,
    events: broadcast::Sender<ListenerEvent>,
    tasks: Mutex<Tasks>,
}

impl UniverseListener {
    pub fn new(universe: u16, config: ListenerConfig) -> Result<Self> {
        if universe == 0 || universe > MAX_UNIVERSE {
            return Err(SacnError::InvalidUniverse(universe));
        }
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            universe,
            registry: Mutex::new(SourceRegistry::new(universe, config.timeout())),
            merged: ArcSwap::from_pointee(MergedSnapshot::empty(universe)),
            generation: AtomicU64::new(0),
            events,
            tasks: Mutex::new(Tasks {
                state: ListenerState::Idle,
                rx_task: None,
                sweep_task: None,
                local_addr: None,
            }),
            config,
        })
    }

    /// Multicast group for a universe: 239.255.hi.lo
    pub fn multicast_group(universe: u16) -> Ipv4Addr {
        Ipv4Addr::new(239, 255, (universe >> 8) as u8, (universe & 0xFF) as u8)
    }

    /// Begin receiving: Idle/Paused -> Listening.
    ///
    /// Binding failure is the one fatal error here; the listener stays in
    /// its previous state and the caller is informed synchronously.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        // No suspension point in here, so the lock serializes concurrent
        // start/pause calls outright.
        let mut tasks = self.tasks.lock();
        if tasks.state == ListenerState::Listening {
            return Err(SacnError::ListenerState(format!(
                "Universe {} is already listening",
                self.universe
            )));
        }

        let socket = self.bind_socket()?;
        let local_addr = socket.local_addr()?;
        tracing::info!(
            "Listening for sACN universe {} on {}",
            self.universe,
            local_addr
        );

        // Timestamps were frozen while paused; give every source a fresh
        // timeout window so the resumed sweep cannot fire a false loss.
        if tasks.state == ListenerState::Paused {
            self.registry.lock().refresh_liveness(Instant::now());
        }

        let rx = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.receive_loop(socket).await })
        };
        let sweep = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.sweep_loop().await })
        };

        tasks.rx_task = Some(rx);
        tasks.sweep_task = Some(sweep);
        tasks.local_addr = Some(local_addr);
        tasks.state = ListenerState::Listening;
        Ok(())
    }

    /// Release the network subscription: Listening -> Paused.
    ///
    /// Source state and the last snapshot are frozen; the sweep stops too,
    /// so an intentional pause never produces false source-lost events.
    pub fn pause(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.state != ListenerState::Listening {
            return;
        }
        if let Some(task) = tasks.rx_task.take() {
            task.abort();
        }
        if let Some(task) = tasks.sweep_task.take() {
            task.abort();
        }
        tasks.local_addr = None;
        tasks.state = ListenerState::Paused;
        tracing::info!("Paused listener for universe {}", self.universe);
    }

    pub fn state(&self) -> ListenerState {
        self.tasks.lock().state
    }

    pub fn universe(&self) -> u16 {
        self.universe
    }

    /// Address the receive socket is bound to, while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.tasks.lock().local_addr
    }

    /// Subscribe to source lifecycle and level-change events
    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.events.subscribe()
    }

    /// Latest merged snapshot (pointer load, never blocks the mutators)
    pub fn merged_levels(&self) -> Arc<MergedSnapshot> {
        self.merged.load_full()
    }

    pub fn source_count(&self) -> usize {
        self.registry.lock().source_count()
    }

    pub fn source(&self, index: usize) -> Option<SourceInfo> {
        self.registry.lock().source(index).map(|s| s.info())
    }

    pub fn sources(&self) -> Vec<SourceInfo> {
        self.registry.lock().sources().iter().map(|s| s.info()).collect()
    }

    pub fn reset_seq_errors(&self, cid: Uuid) -> Result<()> {
        let event = self.registry.lock().reset_seq_errors(cid)?;
        self.forward_event(event);
        Ok(())
    }

    pub fn reset_jumps(&self, cid: Uuid) -> Result<()> {
        let event = self.registry.lock().reset_jumps(cid)?;
        self.forward_event(event);
        Ok(())
    }

    fn bind_socket(&self) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.config.port);
        socket.bind(&bind_addr.into())?;

        // Multicast only makes sense on the real sACN port; tests bind an
        // ephemeral port and drive the listener with unicast datagrams.
        if self.config.port == SACN_PORT {
            let group = Self::multicast_group(self.universe);
            if let Err(e) = socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED) {
                tracing::warn!(
                    "Could not join multicast group {} for universe {}: {} (unicast only)",
                    group,
                    self.universe,
                    e
                );
            }
        }

        socket.set_nonblocking(true)?;
        Ok(UdpSocket::from_std(socket.into())?)
    }

    async fn receive_loop(self: Arc<Self>, socket: UdpSocket) {
        // Largest E1.31 data packet is 638 bytes
        let mut buf = [0u8; 1024];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => self.handle_datagram(&buf[..len], addr.ip()),
                Err(e) => {
                    tracing::warn!("Receive error on universe {}: {}", self.universe, e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let mut registry = self.registry.lock();
            let outcome = registry.sweep_timeouts(Instant::now());
            let needs_merge = outcome.needs_merge;
            self.forward(outcome);
            if needs_merge {
                self.republish(&registry);
            }
        }
    }

    fn handle_datagram(&self, payload: &[u8], origin: IpAddr) {
        let Some(frame) = parse_data_frame(payload) else {
            tracing::trace!("Dropped malformed datagram from {}", origin);
            return;
        };
        let mut registry = self.registry.lock();
        let outcome = registry.ingest(&frame, origin, Instant::now());
        let needs_merge = outcome.needs_merge;
        self.forward(outcome);
        if needs_merge {
            self.republish(&registry);
        }
    }

    /// Recompute the merge and swap the snapshot in, under the registry
    /// lock so concurrent mutators cannot interleave a publication.
    fn republish(&self, registry: &SourceRegistry) {
        let snapshot = Arc::new(MergedSnapshot {
            universe: self.universe,
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
            channels: merge_universe(registry),
        });
        self.merged.store(Arc::clone(&snapshot));
        self.emit(ListenerEvent::LevelsChanged(snapshot));
    }

    fn forward(&self, outcome: RegistryOutcome) {
        for event in outcome.events {
            self.forward_event(event);
        }
    }

    fn forward_event(&self, event: RegistryEvent) {
        self.emit(match event {
            RegistryEvent::SourceFound(info) => ListenerEvent::SourceFound(info),
            RegistryEvent::SourceLost(info) => ListenerEvent::SourceLost(info),
            RegistryEvent::SourceChanged(info) => ListenerEvent::SourceChanged(info),
        });
    }

    fn emit(&self, event: ListenerEvent) {
        // Send fails only when nobody is subscribed
        let _ = self.events.send(event);
    }
}

impl Drop for UniverseListener {
    fn drop(&mut self) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.rx_task.take() {
            task.abort();
        }
        if let Some(task) = tasks.sweep_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ListenerConfig {
        ListenerConfig {
            port: 0,
            ..ListenerConfig::default()
        }
    }

    #[test]
    fn test_rejects_invalid_universe() {
        assert!(UniverseListener::new(0, test_config()).is_err());
        assert!(UniverseListener::new(64000, test_config()).is_err());
        assert!(UniverseListener::new(63999, test_config()).is_ok());
    }

    #[test]
    fn test_multicast_group_math() {
        assert_eq!(
            UniverseListener::multicast_group(1),
            Ipv4Addr::new(239, 255, 0, 1)
        );
        assert_eq!(
            UniverseListener::multicast_group(0x1234),
            Ipv4Addr::new(239, 255, 0x12, 0x34)
        );
    }

    #[tokio::test]
    async fn test_state_machine_start_pause_restart() {
        let listener = Arc::new(UniverseListener::new(1, test_config()).unwrap());
        assert_eq!(listener.state(), ListenerState::Idle);

        listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Listening);
        assert!(listener.local_addr().is_some());

        // Starting twice is an error and does not change state
        assert!(listener.start().await.is_err());
        assert_eq!(listener.state(), ListenerState::Listening);

        listener.pause();
        assert_eq!(listener.state(), ListenerState::Paused);
        assert!(listener.local_addr().is_none());

        listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Listening);
        listener.pause();
    }

    #[tokio::test]
    async fn test_initial_snapshot_is_empty() {
        let listener = Arc::new(UniverseListener::new(7, test_config()).unwrap());
        let snapshot = listener.merged_levels();
        assert_eq!(snapshot.universe, 7);
        assert_eq!(snapshot.generation, 0);
        assert_eq!(snapshot.channels.len(), 512);
        assert!(snapshot.channels.iter().all(|c| c.winner.is_none()));
    }

    #[tokio::test]
    async fn test_generation_increases_per_recompute() {
        let listener = Arc::new(UniverseListener::new(1, test_config()).unwrap());
        let cid = Uuid::new_v4();
        let origin: IpAddr = "127.0.0.1".parse().unwrap();

        let frame = |seq: u8, level: u8| {
            let mut data = vec![0u8; 512];
            data[0] = level;
            crate::packet::DataFrame {
                cid,
                source_name: "gen".into(),
                universe: 1,
                sequence: seq,
                priority: 100,
                protocol: crate::packet::ProtocolVersion::Release,
                preview: false,
                stream_terminated: false,
                start_code: crate::packet::STARTCODE_DMX,
                data,
            }
        };

        {
            let mut registry = listener.registry.lock();
            let outcome = registry.ingest(&frame(0, 10), origin, Instant::now());
            assert!(outcome.needs_merge);
            listener.republish(&registry);
        }
        assert_eq!(listener.merged_levels().generation, 1);

        {
            let mut registry = listener.registry.lock();
            registry.ingest(&frame(1, 20), origin, Instant::now());
            listener.republish(&registry);
        }
        let snapshot = listener.merged_levels();
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.channels[0].level, 20);
    }

    fn test_frame(cid: Uuid, seq: u8, level: u8) -> crate::packet::DataFrame {
        let mut data = vec![0u8; 512];
        data[0] = level;
        crate::packet::DataFrame {
            cid,
            source_name: "test".into(),
            universe: 1,
            sequence: seq,
            priority: 100,
            protocol: crate::packet::ProtocolVersion::Release,
            preview: false,
            stream_terminated: false,
            start_code: crate::packet::STARTCODE_DMX,
            data,
        }
    }

    #[tokio::test]
    async fn test_reset_commands_emit_source_changed() {
        let listener = Arc::new(UniverseListener::new(1, test_config()).unwrap());
        let cid = Uuid::new_v4();
        let origin: IpAddr = "127.0.0.1".parse().unwrap();

        {
            let mut registry = listener.registry.lock();
            registry.ingest(&test_frame(cid, 10, 50), origin, Instant::now());
            registry.ingest(&test_frame(cid, 9, 50), origin, Instant::now()); // seq error
            registry.ingest(&test_frame(cid, 20, 50), origin, Instant::now()); // jump
        }
        assert_eq!(listener.source(0).unwrap().seq_errors, 1);
        assert_eq!(listener.source(0).unwrap().jumps, 1);
        let before = listener.merged_levels();

        let mut rx = listener.subscribe();
        listener.reset_seq_errors(cid).unwrap();
        match rx.try_recv().unwrap() {
            ListenerEvent::SourceChanged(info) => {
                assert_eq!(info.seq_errors, 0);
                assert_eq!(info.jumps, 1);
            }
            other => panic!("expected SourceChanged, got {:?}", other),
        }

        listener.reset_jumps(cid).unwrap();
        match rx.try_recv().unwrap() {
            ListenerEvent::SourceChanged(info) => assert_eq!(info.jumps, 0),
            other => panic!("expected SourceChanged, got {:?}", other),
        }

        // Bookkeeping only: no recompute, snapshot untouched
        assert!(rx.try_recv().is_err());
        assert_eq!(listener.merged_levels().generation, before.generation);

        assert!(listener.reset_seq_errors(Uuid::new_v4()).is_err());
    }

    #[tokio::test]
    async fn test_resume_does_not_charge_pause_against_timeout() {
        let config = ListenerConfig {
            port: 0,
            timeout_ms: 1000,
            sweep_interval_ms: 100,
        };
        let listener = Arc::new(UniverseListener::new(1, config).unwrap());
        let origin: IpAddr = "127.0.0.1".parse().unwrap();

        listener.start().await.unwrap();
        {
            let mut registry = listener.registry.lock();
            registry.ingest(&test_frame(Uuid::new_v4(), 0, 50), origin, Instant::now());
        }

        // Pause for longer than the whole timeout window
        listener.pause();
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

        let mut rx = listener.subscribe();
        listener.start().await.unwrap();

        // The resumed sweep runs several times well inside the fresh
        // window; the source must stay online with no lost event
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(
                !matches!(event, ListenerEvent::SourceLost(_)),
                "pause duration was charged against the timeout"
            );
        }
        assert!(listener.source(0).unwrap().online);

        listener.pause();
    }

    #[tokio::test]
    async fn test_levels_changed_carries_triggering_snapshot() {
        let listener = Arc::new(UniverseListener::new(1, test_config()).unwrap());
        let mut rx = listener.subscribe();
        let origin: IpAddr = "127.0.0.1".parse().unwrap();

        let mut data = vec![0u8; 512];
        data[0] = 99;
        let frame = crate::packet::DataFrame {
            cid: Uuid::new_v4(),
            source_name: "snap".into(),
            universe: 1,
            sequence: 0,
            priority: 100,
            protocol: crate::packet::ProtocolVersion::Release,
            preview: false,
            stream_terminated: false,
            start_code: crate::packet::STARTCODE_DMX,
            data,
        };
        {
            let mut registry = listener.registry.lock();
            registry.ingest(&frame, origin, Instant::now());
            listener.republish(&registry);
        }

        // SourceFound, then LevelsChanged with the exact snapshot
        loop {
            match rx.try_recv().unwrap() {
                ListenerEvent::LevelsChanged(snapshot) => {
                    assert_eq!(snapshot.generation, 1);
                    assert_eq!(snapshot.channels[0].level, 99);
                    break;
                }
                _ => continue,
            }
        }
    }
}

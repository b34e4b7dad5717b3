//! The bridge loop: routes bytes between the app, the amplifier and the pedal.
//!
//! ## Data flow
//!
//! ```text
//!   adapter rx ──► inbound ring ──route──► outbound ring ──flush──► send()
//! ```
//!
//! One call to [`Bridge::pump_once`] runs, in order:
//!
//! 1. server upkeep (new app connections, re-advertising)
//! 2. reconnect supervision for amplifier and pedal
//! 3. stale-data flush for every endpoint whose epoch changed
//! 4. routing from inbound rings into live destinations' outbound rings
//! 5. flushing live outbound rings to their transports
//! 6. periodic signal-strength refresh

pub mod routing;

use crate::config::{BridgeConfig, LinkBuffer, BLE_BUFSIZE};
use crate::discovery::{ConnectionManager, LinkEvent, Target};
use crate::error::Result;
use crate::link::{Role, SignalStrength, Transport, TransportSession};
use crate::server::{LocalServer, Peripheral};
use heapless::Vec;
use routing::{RoutingTable, MAX_ROUTES};

/// Bridge-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BridgeStats {
    /// Bytes taken from each role's inbound ring, indexed by [`Role::index`].
    pub routed: [u32; 3],
    /// Bytes that did not fit a destination's outbound ring.
    pub dropped_backpressure: u32,
    /// Bytes not delivered to a dead destination of a multi-destination source.
    pub dropped_unroutable: u32,
    /// Bytes discarded by the reconnect flush.
    pub discarded_stale: u32,
    pub send_failures: u32,
}

/// Link indicator snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStatus {
    pub app: bool,
    pub amplifier: bool,
    pub pedal: bool,
    pub app_rssi: SignalStrength,
    pub amplifier_rssi: SignalStrength,
    pub pedal_rssi: SignalStrength,
}

impl LinkStatus {
    /// App and amplifier both up: the bridge is carrying traffic.
    pub fn is_bridging(&self) -> bool {
        self.app && self.amplifier
    }
}

pub struct Bridge<'a, S: Peripheral, A: Transport, P: Transport> {
    server: LocalServer<'a, S>,
    amplifier: TransportSession<'a, A>,
    pedal: Option<TransportSession<'a, P>>,
    routes: RoutingTable,
    manager: ConnectionManager,
    rssi_interval_ms: u64,
    next_rssi_ms: u64,
    rssi: [SignalStrength; 3],
    seen_epochs: [u32; 3],
    stats: BridgeStats,
    scratch: [u8; BLE_BUFSIZE],
}

impl<'a, S: Peripheral, A: Transport, P: Transport> Bridge<'a, S, A, P> {
    pub fn new(
        config: &BridgeConfig,
        server: LocalServer<'a, S>,
        amplifier: TransportSession<'a, A>,
        pedal: Option<TransportSession<'a, P>>,
    ) -> Self {
        Self::with_routes(config, RoutingTable::new(config.pedal_route), server, amplifier, pedal)
    }

    /// Like [`new`](Self::new) with an explicit routing table.
    pub fn with_routes(
        config: &BridgeConfig,
        routes: RoutingTable,
        server: LocalServer<'a, S>,
        amplifier: TransportSession<'a, A>,
        pedal: Option<TransportSession<'a, P>>,
    ) -> Self {
        Self {
            server,
            amplifier,
            pedal: pedal.filter(|_| config.pedal_enabled),
            routes,
            manager: ConnectionManager::new(config.backoff),
            rssi_interval_ms: config.rssi_poll_interval_ms,
            next_rssi_ms: 0,
            rssi: [SignalStrength::Unknown; 3],
            seen_epochs: [0; 3],
            stats: BridgeStats::default(),
            scratch: [0; BLE_BUFSIZE],
        }
    }

    pub async fn start_local_server(&mut self) -> Result<()> {
        self.server.start().await
    }

    /// Hand outward targets to the connection manager.
    pub fn begin_discovery(&mut self, targets: &[Target], now_ms: u64) {
        for target in targets {
            if target.role == Role::Pedal && self.pedal.is_none() {
                warn!("no pedal session, ignoring pedal target");
                continue;
            }
            self.manager.begin(core::slice::from_ref(target), now_ms);
        }
    }

    pub fn is_app_link_up(&self) -> bool {
        self.server.is_app_connected()
    }

    pub fn is_amplifier_link_up(&self) -> bool {
        self.amplifier.is_connected()
    }

    pub fn is_pedal_link_up(&self) -> bool {
        self.pedal.as_ref().is_some_and(|p| p.is_connected())
    }

    /// Take a fresh signal-strength reading for `role`.
    pub async fn poll_signal_strength(&mut self, role: Role) -> SignalStrength {
        let reading = match role {
            Role::App => self.server.signal_strength().await,
            Role::Amplifier => self.amplifier.signal_strength().await,
            Role::Pedal => match self.pedal.as_mut() {
                Some(p) => p.signal_strength().await,
                None => SignalStrength::Unknown,
            },
        };
        self.rssi[role.index()] = reading;
        reading
    }

    /// Last reading for `role`; `Unknown` whenever the link is down.
    pub fn signal_strength(&self, role: Role) -> SignalStrength {
        if self.is_live(role) {
            self.rssi[role.index()]
        } else {
            SignalStrength::Unknown
        }
    }

    /// Run one bridge iteration. Returns the bytes handed to transports.
    pub async fn pump_once(&mut self, now_ms: u64) -> usize {
        self.server.poll().await;

        let amp = self.manager.service(&mut self.amplifier, now_ms).await;
        log_event(Role::Amplifier, amp);
        if let Some(pedal) = self.pedal.as_mut() {
            let ev = self.manager.service(pedal, now_ms).await;
            log_event(Role::Pedal, ev);
        }

        self.flush_stale();
        self.route();
        let delivered = self.flush_outbound().await;

        if now_ms >= self.next_rssi_ms {
            for role in Role::ALL {
                self.poll_signal_strength(role).await;
            }
            self.next_rssi_ms = now_ms + self.rssi_interval_ms;
        }
        delivered
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            app: self.is_app_link_up(),
            amplifier: self.is_amplifier_link_up(),
            pedal: self.is_pedal_link_up(),
            app_rssi: self.signal_strength(Role::App),
            amplifier_rssi: self.signal_strength(Role::Amplifier),
            pedal_rssi: self.signal_strength(Role::Pedal),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn server(&self) -> &LocalServer<'a, S> {
        &self.server
    }

    pub fn amplifier(&self) -> &TransportSession<'a, A> {
        &self.amplifier
    }

    pub fn pedal(&self) -> Option<&TransportSession<'a, P>> {
        self.pedal.as_ref()
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Discard traffic and signal readings that predate a new connection
    /// epoch.
    fn flush_stale(&mut self) {
        let mut discarded = 0;
        for role in Role::ALL {
            if !self.is_live(role) {
                self.rssi[role.index()] = SignalStrength::Unknown;
            }
            let epoch = self.epoch(role);
            if epoch == self.seen_epochs[role.index()] {
                continue;
            }
            self.seen_epochs[role.index()] = epoch;
            self.rssi[role.index()] = SignalStrength::Unknown;

            let mut n = 0;
            if let Some(ring) = self.inbound(role) {
                n += ring.clear();
            }
            if let Some(ring) = self.outbound(role) {
                n += ring.clear();
            }
            for source in self.routes.sources(role) {
                if let Some(ring) = self.inbound(source) {
                    n += ring.clear();
                }
            }
            if n > 0 {
                info!("{}: new epoch {}, discarded {} stale bytes", role, epoch, n);
            }
            discarded += n;
        }
        self.stats.discarded_stale = self.stats.discarded_stale.wrapping_add(discarded as u32);
    }

    fn route(&mut self) {
        for from in Role::ALL {
            let Some(source) = self.inbound(from) else {
                continue;
            };
            if source.is_empty() {
                continue;
            }

            let mut live: Vec<&'a LinkBuffer, MAX_ROUTES> = Vec::new();
            let mut dead = 0usize;
            for to in self.routes.destinations(from) {
                match self.outbound(to) {
                    Some(ring) if self.is_live(to) => {
                        let _ = live.push(ring);
                    }
                    _ => dead += 1,
                }
            }
            // No live destination: leave the bytes where they are.
            if live.is_empty() {
                continue;
            }

            let n = source.read(&mut self.scratch);
            let mut dropped = 0;
            for ring in &live {
                dropped += n - ring.write(&self.scratch[..n]);
            }
            if dropped > 0 {
                warn!("{}: {} bytes dropped on backpressure", from, dropped);
            }

            let stats = &mut self.stats;
            stats.routed[from.index()] = stats.routed[from.index()].wrapping_add(n as u32);
            stats.dropped_backpressure = stats.dropped_backpressure.wrapping_add(dropped as u32);
            stats.dropped_unroutable = stats.dropped_unroutable.wrapping_add((n * dead) as u32);
        }
    }

    async fn flush_outbound(&mut self) -> usize {
        let mut delivered = 0;

        if self.server.is_app_connected() {
            let n = self.server.outbound().read(&mut self.scratch);
            if n > 0 {
                match self.server.send_to_app(&self.scratch[..n]).await {
                    Ok(()) => delivered += n,
                    Err(_) => self.stats.send_failures += 1,
                }
            }
        }

        match flush_session(&mut self.amplifier, &mut self.scratch).await {
            Ok(n) => delivered += n,
            Err(_) => self.stats.send_failures += 1,
        }

        if let Some(pedal) = self.pedal.as_mut() {
            match flush_session(pedal, &mut self.scratch).await {
                Ok(n) => delivered += n,
                Err(_) => self.stats.send_failures += 1,
            }
        }
        delivered
    }

    fn is_live(&self, role: Role) -> bool {
        match role {
            Role::App => self.is_app_link_up(),
            Role::Amplifier => self.is_amplifier_link_up(),
            Role::Pedal => self.is_pedal_link_up(),
        }
    }

    fn epoch(&self, role: Role) -> u32 {
        match role {
            Role::App => self.server.epoch(),
            Role::Amplifier => self.amplifier.epoch(),
            Role::Pedal => self.pedal.as_ref().map_or(0, |p| p.epoch()),
        }
    }

    fn inbound(&self, role: Role) -> Option<&'a LinkBuffer> {
        match role {
            Role::App => Some(self.server.inbound()),
            Role::Amplifier => Some(self.amplifier.inbound()),
            Role::Pedal => self.pedal.as_ref().map(|p| p.inbound()),
        }
    }

    fn outbound(&self, role: Role) -> Option<&'a LinkBuffer> {
        match role {
            Role::App => Some(self.server.outbound()),
            Role::Amplifier => Some(self.amplifier.outbound()),
            Role::Pedal => self.pedal.as_ref().map(|p| p.outbound()),
        }
    }
}

/// Drain a live session's outbound ring into its transport.
async fn flush_session<T: Transport>(
    session: &mut TransportSession<'_, T>,
    scratch: &mut [u8],
) -> Result<usize> {
    if !session.is_connected() {
        return Ok(0);
    }
    let n = session.outbound().read(scratch);
    if n == 0 {
        return Ok(0);
    }
    session.send(&scratch[..n]).await.map(|()| n)
}

fn log_event(role: Role, event: LinkEvent) {
    match event {
        LinkEvent::Failed(e) => debug!("{}: connect attempt failed: {}", role, e),
        LinkEvent::Lost => info!("{}: waiting to reconnect", role),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::routing::{PedalRoute, Route};
    use super::*;
    use crate::discovery::backoff::BackoffConfig;
    use crate::discovery::DeviceMatch;
    use crate::error::Error;
    use crate::link::TransportKind;
    use crate::testing::{leak_buffer, MockPeripheral, MockTransport};
    use embassy_futures::block_on;
    use std::boxed::Box;

    type TestBridge = Bridge<'static, MockPeripheral, MockTransport, MockTransport>;

    const AMP: Target = Target::new(Role::Amplifier, DeviceMatch::Name("Spark 40 BLE"));
    const PEDAL: Target = Target::new(
        Role::Pedal,
        DeviceMatch::Service128(crate::config::PEDAL_SERVICE_UUID),
    );

    struct Rig {
        app: MockPeripheral,
        amp: MockTransport,
        pedal: MockTransport,
        bridge: Box<TestBridge>,
    }

    fn config() -> BridgeConfig {
        BridgeConfig {
            backoff: BackoffConfig {
                initial_ms: 100,
                max_ms: 1_000,
            },
            rssi_poll_interval_ms: 1_000,
            ..BridgeConfig::default()
        }
    }

    fn rig_with(config: BridgeConfig, routes: Option<RoutingTable>, mtu_payload: usize) -> Rig {
        let app = MockPeripheral::new(mtu_payload);
        let amp = MockTransport::new(TransportKind::BleCentral, mtu_payload);
        let pedal = MockTransport::new(TransportKind::BleCentral, mtu_payload);

        let server = LocalServer::new(app.clone(), leak_buffer(), leak_buffer());
        let amp_session =
            TransportSession::new(Role::Amplifier, amp.clone(), leak_buffer(), leak_buffer());
        let pedal_session =
            TransportSession::new(Role::Pedal, pedal.clone(), leak_buffer(), leak_buffer());

        let routes = routes.unwrap_or_else(|| RoutingTable::new(config.pedal_route));
        let bridge = Box::new(Bridge::with_routes(
            &config,
            routes,
            server,
            amp_session,
            Some(pedal_session),
        ));
        Rig {
            app,
            amp,
            pedal,
            bridge,
        }
    }

    /// App connected, amplifier connected, pedal supervised but absent.
    fn connected_rig(mtu_payload: usize) -> Rig {
        let mut rig = rig_with(config(), None, mtu_payload);
        rig.pedal.fail_with(Error::DeviceNotFound);
        block_on(rig.bridge.start_local_server()).unwrap();
        rig.bridge.begin_discovery(&[AMP, PEDAL], 0);
        rig.app.connect_app();
        block_on(rig.bridge.pump_once(0));
        assert!(rig.bridge.is_app_link_up());
        assert!(rig.bridge.is_amplifier_link_up());
        assert!(!rig.bridge.is_pedal_link_up());
        rig
    }

    #[test]
    fn app_to_amplifier_in_one_iteration_split_by_mtu() {
        let mut rig = connected_rig(20);
        let data: std::vec::Vec<u8> = (1..=45).collect();
        rig.bridge.server().inbound().write(&data);

        assert_eq!(block_on(rig.bridge.pump_once(1)), 45);
        let writes = rig.amp.writes();
        let lens: std::vec::Vec<usize> = writes.iter().map(|w| w.len()).collect();
        assert_eq!(lens, [20, 20, 5]);
        assert_eq!(writes.concat(), data);
        assert_eq!(rig.bridge.stats().routed[Role::App.index()], 45);
    }

    #[test]
    fn amplifier_to_app_via_notifications() {
        let mut rig = connected_rig(20);
        rig.bridge.amplifier().inbound().write(b"preset-reply");

        assert_eq!(block_on(rig.bridge.pump_once(1)), 12);
        assert_eq!(rig.app.notifications(), std::vec![b"preset-reply".to_vec()]);
    }

    #[test]
    fn pedal_traffic_follows_configured_route() {
        let mut rig = connected_rig(20);
        rig.pedal.succeed();
        block_on(rig.bridge.pump_once(100));
        assert!(rig.bridge.is_pedal_link_up());

        let cc = [0x80, 0xB0, 0x07, 0x40];
        rig.bridge.pedal().unwrap().inbound().write(&cc);
        block_on(rig.bridge.pump_once(101));
        assert_eq!(rig.app.notifications(), std::vec![cc.to_vec()]);
        assert!(rig.amp.writes().is_empty());
    }

    #[test]
    fn pedal_to_amplifier_route() {
        let cfg = BridgeConfig {
            pedal_route: PedalRoute::ToAmplifier,
            ..config()
        };
        let mut rig = rig_with(cfg, None, 20);
        rig.bridge.begin_discovery(&[AMP, PEDAL], 0);
        block_on(rig.bridge.pump_once(0));

        rig.bridge.pedal().unwrap().inbound().write(&[0x90, 0x3C]);
        block_on(rig.bridge.pump_once(1));
        assert_eq!(rig.amp.writes(), std::vec![std::vec![0x90, 0x3C]]);
        assert!(rig.app.notifications().is_empty());
    }

    #[test]
    fn absent_pedal_is_steady_state() {
        let mut rig = connected_rig(20);
        for t in 1..50 {
            block_on(rig.bridge.pump_once(t * 10));
        }
        assert!(rig.bridge.is_app_link_up());
        assert!(rig.bridge.is_amplifier_link_up());
        assert!(!rig.bridge.is_pedal_link_up());
        assert_eq!(rig.bridge.stats().send_failures, 0);
    }

    #[test]
    fn disabled_pedal_has_no_session() {
        let cfg = BridgeConfig {
            pedal_enabled: false,
            ..config()
        };
        let mut rig = rig_with(cfg, None, 20);
        rig.bridge.begin_discovery(&[AMP, PEDAL], 0);
        assert!(rig.bridge.pedal().is_none());
        assert!(!rig.bridge.manager().is_supervising(Role::Pedal));
        block_on(rig.bridge.pump_once(0));
        assert_eq!(rig.pedal.scans(), 0);
    }

    #[test]
    fn source_without_live_destination_keeps_its_bytes() {
        let mut rig = rig_with(config(), None, 20);
        block_on(rig.bridge.start_local_server()).unwrap();
        rig.app.connect_app();
        block_on(rig.bridge.pump_once(0));

        rig.bridge.server().inbound().write(b"early");
        block_on(rig.bridge.pump_once(1));
        assert_eq!(rig.bridge.server().inbound().available(), 5);
        assert_eq!(rig.bridge.stats().dropped_unroutable, 0);
    }

    #[test]
    fn reconnect_discards_stale_bytes() {
        let mut rig = connected_rig(20);
        rig.amp.set_link_up(false);
        block_on(rig.bridge.pump_once(10));
        assert!(!rig.bridge.is_amplifier_link_up());

        // Queued while the amplifier was away.
        rig.bridge.server().inbound().write(b"stale-command");
        block_on(rig.bridge.pump_once(50));
        assert_eq!(rig.bridge.server().inbound().available(), 13);

        rig.amp.clear_writes();
        block_on(rig.bridge.pump_once(110));
        assert!(rig.bridge.is_amplifier_link_up());
        assert!(rig.amp.writes().is_empty());
        assert!(rig.bridge.server().inbound().is_empty());
        assert_eq!(rig.bridge.stats().discarded_stale, 13);

        rig.bridge.server().inbound().write(b"fresh");
        block_on(rig.bridge.pump_once(111));
        assert_eq!(rig.amp.writes(), std::vec![b"fresh".to_vec()]);
    }

    #[test]
    fn backpressure_is_counted() {
        let mut rig = connected_rig(20);
        let out = rig.bridge.amplifier().outbound();
        out.write(&[0u8; BLE_BUFSIZE - 4]);
        rig.bridge.server().inbound().write(&[1u8; 10]);

        block_on(rig.bridge.pump_once(1));
        assert_eq!(rig.bridge.stats().dropped_backpressure, 6);
        let sent: usize = rig.amp.writes().iter().map(|w| w.len()).sum();
        assert_eq!(sent, BLE_BUFSIZE);
    }

    #[test]
    fn dead_destination_of_multi_route_is_unroutable() {
        let routes = RoutingTable::from_routes(&[
            Route::new(Role::Amplifier, Role::App),
            Route::new(Role::Amplifier, Role::Pedal),
        ]);
        let mut rig = rig_with(config(), Some(routes), 20);
        rig.pedal.fail_with(Error::DeviceNotFound);
        block_on(rig.bridge.start_local_server()).unwrap();
        rig.bridge.begin_discovery(&[AMP, PEDAL], 0);
        rig.app.connect_app();
        block_on(rig.bridge.pump_once(0));

        rig.bridge.amplifier().inbound().write(b"status");
        block_on(rig.bridge.pump_once(1));
        assert_eq!(rig.app.notifications(), std::vec![b"status".to_vec()]);
        assert_eq!(rig.bridge.stats().dropped_unroutable, 6);
    }

    #[test]
    fn write_failure_drops_amplifier_until_backoff_expires() {
        let mut rig = connected_rig(20);
        rig.amp.fail_write_after(0);
        rig.bridge.server().inbound().write(b"abc");

        assert_eq!(block_on(rig.bridge.pump_once(1)), 0);
        assert!(!rig.bridge.is_amplifier_link_up());
        assert_eq!(rig.bridge.stats().send_failures, 1);

        rig.amp.fail_write_after(usize::MAX);
        block_on(rig.bridge.pump_once(2));
        assert!(!rig.bridge.is_amplifier_link_up());
        assert_eq!(rig.bridge.manager().next_attempt_ms(Role::Amplifier), Some(102));

        block_on(rig.bridge.pump_once(102));
        assert!(rig.bridge.is_amplifier_link_up());
        assert_eq!(rig.amp.scans(), 2);
    }

    #[test]
    fn persistent_write_failure_does_not_spin_reconnects() {
        let mut rig = connected_rig(20);
        rig.amp.fail_write_after(0);
        for t in 1..=10 {
            rig.bridge.server().inbound().write(&[t as u8]);
            block_on(rig.bridge.pump_once(t));
        }
        assert_eq!(rig.amp.scans(), 1);
        assert_eq!(rig.bridge.stats().send_failures, 1);
    }

    #[test]
    fn rssi_refreshed_on_interval_and_unknown_when_down() {
        let mut rig = connected_rig(20);
        assert_eq!(rig.bridge.status().amplifier_rssi, SignalStrength::Unknown);

        rig.amp.set_rssi(Some(-61));
        rig.app.set_rssi(Some(-48));
        block_on(rig.bridge.pump_once(500));
        assert_eq!(rig.bridge.status().amplifier_rssi, SignalStrength::Unknown);

        block_on(rig.bridge.pump_once(1_000));
        let status = rig.bridge.status();
        assert_eq!(status.amplifier_rssi, SignalStrength::Dbm(-61));
        assert_eq!(status.app_rssi, SignalStrength::Dbm(-48));
        assert_eq!(status.pedal_rssi, SignalStrength::Unknown);
        assert!(status.is_bridging());

        rig.amp.set_link_up(false);
        assert_eq!(rig.bridge.status().amplifier_rssi, SignalStrength::Unknown);
    }

    #[test]
    fn reconnect_forgets_previous_signal_reading() {
        let mut rig = connected_rig(20);
        rig.amp.set_rssi(Some(-40));
        block_on(rig.bridge.pump_once(1_000));
        assert_eq!(rig.bridge.status().amplifier_rssi, SignalStrength::Dbm(-40));

        rig.amp.set_link_up(false);
        rig.amp.set_rssi(None);
        block_on(rig.bridge.pump_once(1_010));
        block_on(rig.bridge.pump_once(1_110));
        assert!(rig.bridge.is_amplifier_link_up());
        assert_eq!(rig.bridge.amplifier().epoch(), 2);
        assert_eq!(rig.bridge.status().amplifier_rssi, SignalStrength::Unknown);
    }

    #[test]
    fn poll_signal_strength_on_demand() {
        let mut rig = connected_rig(20);
        rig.amp.set_rssi(Some(-72));
        assert_eq!(
            block_on(rig.bridge.poll_signal_strength(Role::Amplifier)),
            SignalStrength::Dbm(-72)
        );
        assert_eq!(
            block_on(rig.bridge.poll_signal_strength(Role::Pedal)),
            SignalStrength::Unknown
        );
    }
}

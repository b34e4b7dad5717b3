//! Connection state machine for one remote endpoint.

use super::{EndpointId, LinkState, Negotiated, Peer, Role, SignalStrength, Transport};
use crate::config::LinkBuffer;
use crate::discovery::Target;
use crate::error::{Error, Result};

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    pub bytes_sent: u32,
    pub fragments_sent: u32,
    pub write_failures: u32,
    pub link_losses: u32,
    pub connects: u32,
    pub connect_failures: u32,
}

/// Drives one [`Transport`] through
/// `Idle → Scanning → Connecting → ServiceDiscovery → Subscribing → Connected`.
///
/// The session never touches its ring buffers' contents: the adapter fills
/// `inbound`, the bridge fills `outbound`, and stale data is flushed by the
/// bridge when [`epoch`](Self::epoch) changes.
pub struct TransportSession<'a, T: Transport> {
    role: Role,
    transport: T,
    state: LinkState,
    peer: Option<Peer>,
    negotiated: Option<Negotiated>,
    last_rssi: Option<i8>,
    epoch: u32,
    write_dropped: bool,
    inbound: &'a LinkBuffer,
    outbound: &'a LinkBuffer,
    stats: LinkStats,
}

impl<'a, T: Transport> TransportSession<'a, T> {
    pub fn new(
        role: Role,
        transport: T,
        inbound: &'a LinkBuffer,
        outbound: &'a LinkBuffer,
    ) -> Self {
        Self {
            role,
            transport,
            state: LinkState::Idle,
            peer: None,
            negotiated: None,
            last_rssi: None,
            epoch: 0,
            write_dropped: false,
            inbound,
            outbound,
            stats: LinkStats::default(),
        }
    }

    /// Bring the link up. A no-op success when already connected.
    ///
    /// On failure the adapter is closed, the session is back in `Idle` and
    /// the establishment error is returned.
    pub async fn connect(&mut self, target: &Target) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.state != LinkState::Idle {
            self.abort();
        }

        match self.establish(target).await {
            Ok(()) => {
                self.epoch = self.epoch.wrapping_add(1);
                self.write_dropped = false;
                self.stats.connects += 1;
                info!("{}: connected (epoch {})", self.role, self.epoch);
                Ok(())
            }
            Err(e) => {
                self.stats.connect_failures += 1;
                warn!("{}: connect failed in {}: {}", self.role, self.state, e);
                self.abort();
                Err(e)
            }
        }
    }

    async fn establish(&mut self, target: &Target) -> Result<()> {
        self.state = LinkState::Scanning;
        let peer = self.transport.scan(target).await?;
        debug!("{}: found {}", self.role, peer.name.as_str());

        self.state = LinkState::Connecting;
        let negotiated = self.transport.open(&peer).await?;
        self.last_rssi = peer.rssi;
        self.peer = Some(peer);
        self.negotiated = Some(negotiated);

        self.state = LinkState::ServiceDiscovery;
        self.transport.discover().await?;

        self.state = LinkState::Subscribing;
        self.transport.subscribe().await?;

        self.state = LinkState::Connected;
        Ok(())
    }

    /// True only while `Connected` and the adapter still reports the link up.
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected && self.transport.is_link_up()
    }

    /// Detect a link loss, either reported by the adapter or caused by a
    /// failed write. Returns `true` exactly once per loss.
    pub fn check_link(&mut self) -> bool {
        if self.state == LinkState::Connected && !self.transport.is_link_up() {
            warn!("{}: link lost", self.role);
            self.stats.link_losses += 1;
            self.abort();
            return true;
        }
        core::mem::take(&mut self.write_dropped)
    }

    /// Write `bytes` in chunks of at most `max_payload()` bytes, in order.
    ///
    /// A failed chunk tears the link down; chunks already written stay
    /// delivered.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::LinkLost);
        }

        let chunk_len = self.transport.max_payload().max(1);
        for chunk in bytes.chunks(chunk_len) {
            if let Err(e) = self.transport.write(chunk).await {
                warn!("{}: write failed: {}", self.role, e);
                self.stats.write_failures += 1;
                self.write_dropped = true;
                self.state = LinkState::Disconnecting;
                self.abort();
                return Err(Error::WriteFailed);
            }
            self.stats.bytes_sent = self.stats.bytes_sent.wrapping_add(chunk.len() as u32);
            self.stats.fragments_sent = self.stats.fragments_sent.wrapping_add(1);
        }
        Ok(())
    }

    /// Close the link. Buffers are left as they are.
    pub fn disconnect(&mut self) {
        if self.state == LinkState::Idle {
            return;
        }
        info!("{}: disconnecting", self.role);
        self.state = LinkState::Disconnecting;
        self.abort();
    }

    /// `Unknown` unless connected; otherwise a fresh reading, falling back
    /// to the last one taken on this connection.
    pub async fn signal_strength(&mut self) -> SignalStrength {
        if !self.is_connected() {
            return SignalStrength::Unknown;
        }
        if let Some(rssi) = self.transport.read_rssi().await {
            self.last_rssi = Some(rssi);
        }
        match self.last_rssi {
            Some(dbm) => SignalStrength::Dbm(dbm),
            None => SignalStrength::Unknown,
        }
    }

    fn abort(&mut self) {
        self.transport.close();
        self.state = LinkState::Idle;
        self.peer = None;
        self.negotiated = None;
        self.last_rssi = None;
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn endpoint(&self) -> EndpointId {
        EndpointId {
            role: self.role,
            kind: self.transport.kind(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }

    pub fn negotiated(&self) -> Option<Negotiated> {
        self.negotiated
    }

    /// Incremented on every successful connect.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn inbound(&self) -> &'a LinkBuffer {
        self.inbound
    }

    pub fn outbound(&self) -> &'a LinkBuffer {
        self.outbound
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}

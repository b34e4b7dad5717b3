//! Remote endpoint links.
//!
//! A [`Transport`] is the black-box adapter over one radio or serial
//! stack. [`TransportSession`](session::TransportSession) drives it through
//! the connection state machine and owns chunked writes and signal
//! strength. Inbound bytes never pass through the session: the adapter's
//! receive context writes them straight into the session's inbound ring.

pub mod liveness;
pub mod session;

use crate::discovery::Target;
use crate::error::Result;
use heapless::String;

pub use liveness::Liveness;
pub use session::{LinkStats, TransportSession};

/// Which party an endpoint talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    App,
    Amplifier,
    Pedal,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::App, Role::Amplifier, Role::Pedal];

    /// Dense index for per-role tables.
    pub const fn index(self) -> usize {
        match self {
            Role::App => 0,
            Role::Amplifier => 1,
            Role::Pedal => 2,
        }
    }
}

/// Physical transport used by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportKind {
    BlePeripheral,
    BleCentral,
    ClassicSerial,
}

/// Identity of one endpoint: exactly one session per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointId {
    pub role: Role,
    pub kind: TransportKind,
}

/// Connection state of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    ServiceDiscovery,
    Subscribing,
    Connected,
    Disconnecting,
}

/// Parameters agreed when the link came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Negotiated {
    /// BLE ATT MTU in bytes.
    Mtu(u16),
    /// Serial baud rate.
    Baud(u32),
}

/// Signal strength of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalStrength {
    /// Not connected, or never measured on this connection.
    #[default]
    Unknown,
    Dbm(i8),
}

/// A peer found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Peer {
    /// Advertised name, truncated to 32 bytes.
    pub name: String<32>,
    pub address: [u8; 6],
    pub rssi: Option<i8>,
}

impl Peer {
    pub fn new(name: &str, address: [u8; 6]) -> Self {
        let mut n = String::new();
        for c in name.chars() {
            if n.push(c).is_err() {
                break;
            }
        }
        Self {
            name: n,
            address,
            rssi: None,
        }
    }
}

/// Adapter over one client-role transport stack.
///
/// Every async operation must complete within its own bounded timeout.
#[allow(async_fn_in_trait)]
pub trait Transport {
    fn kind(&self) -> TransportKind;

    /// Look for a peer matching `target` for one scan window.
    async fn scan(&mut self, target: &Target) -> Result<Peer>;

    /// Open the link-layer connection to `peer`.
    async fn open(&mut self, peer: &Peer) -> Result<Negotiated>;

    /// Resolve the expected service and characteristics.
    async fn discover(&mut self) -> Result<()>;

    /// Enable inbound delivery. Inbound bytes flow into the adapter's ring
    /// from here on.
    async fn subscribe(&mut self) -> Result<()>;

    /// Cheap, non-blocking view of the adapter's link.
    fn is_link_up(&self) -> bool;

    /// Largest single write the link accepts.
    fn max_payload(&self) -> usize;

    /// Write one chunk of at most [`max_payload`](Self::max_payload) bytes.
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Tear the link down. Idempotent.
    fn close(&mut self);

    /// Fresh RSSI reading, if the stack supports one.
    async fn read_rssi(&mut self) -> Option<i8> {
        None
    }
}

/// Runtime choice between a BLE and a serial adapter for the same role.
pub enum TransportChoice<B, S> {
    Ble(B),
    Serial(S),
}

impl<B: Transport, S: Transport> Transport for TransportChoice<B, S> {
    fn kind(&self) -> TransportKind {
        match self {
            TransportChoice::Ble(t) => t.kind(),
            TransportChoice::Serial(t) => t.kind(),
        }
    }

    async fn scan(&mut self, target: &Target) -> Result<Peer> {
        match self {
            TransportChoice::Ble(t) => t.scan(target).await,
            TransportChoice::Serial(t) => t.scan(target).await,
        }
    }

    async fn open(&mut self, peer: &Peer) -> Result<Negotiated> {
        match self {
            TransportChoice::Ble(t) => t.open(peer).await,
            TransportChoice::Serial(t) => t.open(peer).await,
        }
    }

    async fn discover(&mut self) -> Result<()> {
        match self {
            TransportChoice::Ble(t) => t.discover().await,
            TransportChoice::Serial(t) => t.discover().await,
        }
    }

    async fn subscribe(&mut self) -> Result<()> {
        match self {
            TransportChoice::Ble(t) => t.subscribe().await,
            TransportChoice::Serial(t) => t.subscribe().await,
        }
    }

    fn is_link_up(&self) -> bool {
        match self {
            TransportChoice::Ble(t) => t.is_link_up(),
            TransportChoice::Serial(t) => t.is_link_up(),
        }
    }

    fn max_payload(&self) -> usize {
        match self {
            TransportChoice::Ble(t) => t.max_payload(),
            TransportChoice::Serial(t) => t.max_payload(),
        }
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        match self {
            TransportChoice::Ble(t) => t.write(chunk).await,
            TransportChoice::Serial(t) => t.write(chunk).await,
        }
    }

    fn close(&mut self) {
        match self {
            TransportChoice::Ble(t) => t.close(),
            TransportChoice::Serial(t) => t.close(),
        }
    }

    async fn read_rssi(&mut self) -> Option<i8> {
        match self {
            TransportChoice::Ble(t) => t.read_rssi().await,
            TransportChoice::Serial(t) => t.read_rssi().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_indices_are_dense() {
        for (i, role) in Role::ALL.iter().enumerate() {
            assert_eq!(role.index(), i);
        }
    }

    #[test]
    fn peer_name_truncated_to_capacity() {
        let long = "X".repeat(40);
        let peer = Peer::new(&long, [0; 6]);
        assert_eq!(peer.name.len(), 32);
        assert_eq!(peer.rssi, None);
    }

    #[test]
    fn signal_strength_defaults_unknown() {
        assert_eq!(SignalStrength::default(), SignalStrength::Unknown);
    }
}

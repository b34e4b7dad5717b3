//! Local GATT server session facing the control app.
//!
//! One central at a time. The app writes into the inbound characteristic
//! (`0xFFC1`); the adapter's write handler appends those bytes to the
//! server's inbound ring. Outbound bytes are notified on `0xFFC2`,
//! fragmented to the negotiated MTU.

use crate::config::LinkBuffer;
use crate::error::{Error, Result};
use crate::link::{LinkStats, SignalStrength};

/// Advertising / connection state reported by the peripheral adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServerState {
    Stopped,
    Advertising,
    Connected,
}

/// Adapter over the peripheral-role stack.
#[allow(async_fn_in_trait)]
pub trait Peripheral {
    /// Start (or re-arm) connectable advertising.
    async fn advertise(&mut self) -> Result<()>;

    fn state(&self) -> ServerState;

    /// Largest notification payload for the current connection.
    fn max_payload(&self) -> usize;

    /// Push one chunk to the app.
    async fn notify(&mut self, chunk: &[u8]) -> Result<()>;

    async fn read_rssi(&mut self) -> Option<i8> {
        None
    }
}

pub struct LocalServer<'a, P: Peripheral> {
    peripheral: P,
    started: bool,
    was_connected: bool,
    epoch: u32,
    last_rssi: Option<i8>,
    inbound: &'a LinkBuffer,
    outbound: &'a LinkBuffer,
    stats: LinkStats,
}

impl<'a, P: Peripheral> LocalServer<'a, P> {
    pub fn new(peripheral: P, inbound: &'a LinkBuffer, outbound: &'a LinkBuffer) -> Self {
        Self {
            peripheral,
            started: false,
            was_connected: false,
            epoch: 0,
            last_rssi: None,
            inbound,
            outbound,
            stats: LinkStats::default(),
        }
    }

    /// Begin advertising. Calling it again is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.peripheral.advertise().await?;
        self.started = true;
        info!("app server advertising");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_app_connected(&self) -> bool {
        self.peripheral.state() == ServerState::Connected
    }

    /// Track connection changes and re-arm advertising if it stopped.
    pub async fn poll(&mut self) -> ServerState {
        let state = self.peripheral.state();
        let connected = state == ServerState::Connected;

        if connected && !self.was_connected {
            self.epoch = self.epoch.wrapping_add(1);
            self.stats.connects += 1;
            self.last_rssi = None;
            info!("app connected (epoch {})", self.epoch);
        } else if !connected && self.was_connected {
            self.stats.link_losses += 1;
            self.last_rssi = None;
            info!("app disconnected");
        }
        self.was_connected = connected;

        if self.started && state == ServerState::Stopped {
            if let Err(e) = self.peripheral.advertise().await {
                warn!("re-advertise failed: {}", e);
            }
        }
        self.peripheral.state()
    }

    /// Move bytes the app wrote out of the inbound ring.
    pub fn receive_from_app(&self, buf: &mut [u8]) -> usize {
        self.inbound.read(buf)
    }

    /// Notify `bytes` to the app in MTU-sized chunks.
    pub async fn send_to_app(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.is_app_connected() {
            return Err(Error::LinkLost);
        }

        let chunk_len = self.peripheral.max_payload().max(1);
        for chunk in bytes.chunks(chunk_len) {
            if let Err(e) = self.peripheral.notify(chunk).await {
                warn!("notify to app failed: {}", e);
                self.stats.write_failures += 1;
                return Err(Error::WriteFailed);
            }
            self.stats.bytes_sent = self.stats.bytes_sent.wrapping_add(chunk.len() as u32);
            self.stats.fragments_sent = self.stats.fragments_sent.wrapping_add(1);
        }
        Ok(())
    }

    pub async fn signal_strength(&mut self) -> SignalStrength {
        if !self.is_app_connected() {
            return SignalStrength::Unknown;
        }
        if let Some(rssi) = self.peripheral.read_rssi().await {
            self.last_rssi = Some(rssi);
        }
        match self.last_rssi {
            Some(dbm) => SignalStrength::Dbm(dbm),
            None => SignalStrength::Unknown,
        }
    }

    /// Incremented whenever a new app connection is observed by [`poll`](Self::poll).
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

//! BLE central links to the amplifier and the pedal.
//!
//! [`CentralLink`] implements the library's `Transport` trait over the
//! SoftDevice GATT client. Notifications are not read through the link:
//! once subscribed, the connection and discovered client are handed to a
//! [`notify_pump_task`] which runs `gatt_client::run` and appends every
//! notification to the role's inbound ring.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use ampbridge::config::{
    LinkBuffer, ATT_HEADER_LEN, BLE_CONN_INTERVAL_MAX, BLE_CONN_INTERVAL_MIN,
    BLE_DEFAULT_ATT_MTU, BLE_PREFERRED_ATT_MTU, BLE_SLAVE_LATENCY, BLE_SUP_TIMEOUT,
    CONNECT_TIMEOUT_MS, WRITE_TIMEOUT_MS,
};
use ampbridge::discovery::Target;
use ampbridge::link::{Liveness, Negotiated, Peer, Transport, TransportKind};
use ampbridge::{Error, Result};
use defmt::{info, warn};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use heapless::Vec;
use nrf_softdevice::ble::{central, gatt_client, Address, Connection};
use nrf_softdevice::{raw, Softdevice};

use super::scanner;

/// Largest value carried by one client-side characteristic write/notification.
pub const CHAR_LEN: usize = BLE_PREFERRED_ATT_MTU as usize - ATT_HEADER_LEN;

/// Amplifier control service.
#[nrf_softdevice::gatt_client(uuid = "ffc0")]
pub struct AmpClient {
    /// Commands toward the amplifier.
    #[characteristic(uuid = "ffc1", write, write_without_response)]
    pub command: Vec<u8, CHAR_LEN>,

    /// Replies and state changes from the amplifier.
    #[characteristic(uuid = "ffc2", read, notify)]
    pub reply: Vec<u8, CHAR_LEN>,
}

/// Expression pedal MIDI service.
#[nrf_softdevice::gatt_client(uuid = "03b80e5a-ede8-4b33-a751-6ce34ec4c700")]
pub struct PedalClient {
    #[characteristic(
        uuid = "7772e5db-3868-4112-a1a9-f2669d106bf3",
        write_without_response,
        notify
    )]
    pub midi: Vec<u8, CHAR_LEN>,
}

/// Which remote service a link talks to.
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Remote {
    Amplifier,
    Pedal,
}

pub enum RemoteClient {
    Amplifier(AmpClient),
    Pedal(PedalClient),
}

/// State shared between a [`CentralLink`] and its notification pump.
pub struct CentralShared {
    armed: Mutex<NoopRawMutex, RefCell<Option<(Connection, RemoteClient, u32)>>>,
    wake: Signal<NoopRawMutex, ()>,
    liveness: Liveness,
    dropped: AtomicU32,
    inbound: &'static LinkBuffer,
}

impl CentralShared {
    pub const fn new(inbound: &'static LinkBuffer) -> Self {
        Self {
            armed: Mutex::new(RefCell::new(None)),
            wake: Signal::new(),
            liveness: Liveness::new(),
            dropped: AtomicU32::new(0),
            inbound,
        }
    }

    /// Notifications truncated by a full inbound ring.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn deliver(&self, data: &[u8]) {
        if let Err(e) = self.inbound.push(data) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("notification truncated: {}", e);
        }
    }

    fn arm(&self, conn: Connection, client: RemoteClient) {
        let generation = self.liveness.arm();
        self.armed.lock(|slot| *slot.borrow_mut() = Some((conn, client, generation)));
        self.wake.signal(());
    }

    fn disarm(&self) {
        self.liveness.disarm();
        self.armed.lock(|slot| slot.borrow_mut().take());
    }
}

/// Client-role transport over one SoftDevice connection.
pub struct CentralLink {
    sd: &'static Softdevice,
    remote: Remote,
    shared: &'static CentralShared,
    found: Option<Address>,
    conn: Option<Connection>,
    client: Option<RemoteClient>,
    write_handle: u16,
}

impl CentralLink {
    pub fn new(sd: &'static Softdevice, remote: Remote, shared: &'static CentralShared) -> Self {
        Self {
            sd,
            remote,
            shared,
            found: None,
            conn: None,
            client: None,
            write_handle: 0,
        }
    }
}

impl Transport for CentralLink {
    fn kind(&self) -> TransportKind {
        TransportKind::BleCentral
    }

    async fn scan(&mut self, target: &Target) -> Result<Peer> {
        let hit = scanner::find(self.sd, target).await?;
        self.found = Some(hit.address);
        Ok(hit.peer)
    }

    async fn open(&mut self, peer: &Peer) -> Result<Negotiated> {
        let addr = self.found.take().ok_or(Error::DeviceNotFound)?;
        info!("{} connecting to {}", self.remote, peer.name.as_str());

        let whitelist = [&addr];
        let conn_cfg = central::ConnectConfig {
            scan_config: central::ScanConfig {
                whitelist: Some(&whitelist),
                ..Default::default()
            },
            conn_params: raw::ble_gap_conn_params_t {
                min_conn_interval: BLE_CONN_INTERVAL_MIN,
                max_conn_interval: BLE_CONN_INTERVAL_MAX,
                slave_latency: BLE_SLAVE_LATENCY,
                conn_sup_timeout: BLE_SUP_TIMEOUT,
            },
            att_mtu: Some(BLE_PREFERRED_ATT_MTU),
            ..Default::default()
        };

        let conn = match with_timeout(
            Duration::from_millis(CONNECT_TIMEOUT_MS),
            central::connect(self.sd, &conn_cfg),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("{} connect error: {}", self.remote, e);
                return Err(Error::ConnectTimeout);
            }
            Err(_) => return Err(Error::ConnectTimeout),
        };

        conn.start_rssi();
        let mtu = conn.att_mtu();
        self.conn = Some(conn);
        Ok(Negotiated::Mtu(mtu))
    }

    async fn discover(&mut self) -> Result<()> {
        let conn = self.conn.as_ref().ok_or(Error::LinkLost)?;
        let client = match self.remote {
            Remote::Amplifier => {
                let client: AmpClient = gatt_client::discover(conn)
                    .await
                    .map_err(|_| Error::ServiceMissing)?;
                self.write_handle = client.command_value_handle;
                RemoteClient::Amplifier(client)
            }
            Remote::Pedal => {
                let client: PedalClient = gatt_client::discover(conn)
                    .await
                    .map_err(|_| Error::ServiceMissing)?;
                self.write_handle = client.midi_value_handle;
                RemoteClient::Pedal(client)
            }
        };
        info!("{} service discovered", self.remote);
        self.client = Some(client);
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<()> {
        let conn = self.conn.clone().ok_or(Error::LinkLost)?;
        let client = self.client.take().ok_or(Error::ServiceMissing)?;

        let enabled = match &client {
            RemoteClient::Amplifier(c) => c.reply_cccd_write(true).await,
            RemoteClient::Pedal(c) => c.midi_cccd_write(true).await,
        };
        enabled.map_err(|_| Error::SubscriptionFailed)?;

        info!("{} subscribed to notifications", self.remote);
        self.shared.arm(conn, client);
        Ok(())
    }

    fn is_link_up(&self) -> bool {
        self.shared.liveness.is_alive()
            && self.conn.as_ref().is_some_and(|c| c.is_connected())
    }

    fn max_payload(&self) -> usize {
        let mtu = self
            .conn
            .as_ref()
            .map_or(BLE_DEFAULT_ATT_MTU, |c| c.att_mtu());
        (mtu as usize).saturating_sub(ATT_HEADER_LEN).min(CHAR_LEN)
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let conn = self.conn.as_ref().ok_or(Error::LinkLost)?;
        match with_timeout(
            Duration::from_millis(WRITE_TIMEOUT_MS),
            gatt_client::write_without_response(conn, self.write_handle, chunk),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("{} write error: {}", self.remote, e);
                Err(Error::WriteFailed)
            }
            Err(_) => Err(Error::WriteFailed),
        }
    }

    fn close(&mut self) {
        self.shared.disarm();
        self.found = None;
        self.client = None;
        if let Some(conn) = self.conn.take() {
            let _ = conn.disconnect();
        }
    }

    async fn read_rssi(&mut self) -> Option<i8> {
        self.conn.as_ref().and_then(|c| c.rssi())
    }
}

/// Run notifications for whichever connection its link hands over.
#[embassy_executor::task(pool_size = 2)]
pub async fn notify_pump_task(shared: &'static CentralShared) -> ! {
    loop {
        shared.wake.wait().await;
        let Some((conn, client, generation)) = shared.armed.lock(|slot| slot.borrow_mut().take())
        else {
            continue;
        };

        let _reason = match &client {
            RemoteClient::Amplifier(c) => {
                gatt_client::run(&conn, c, |event| match event {
                    AmpClientEvent::ReplyNotification(data) => shared.deliver(&data),
                })
                .await
            }
            RemoteClient::Pedal(c) => {
                gatt_client::run(&conn, c, |event| match event {
                    PedalClientEvent::MidiNotification(data) => shared.deliver(&data),
                })
                .await
            }
        };

        shared.liveness.end(generation);
        info!("notification pump ended (connection closed)");
    }
}

//! App-facing GATT server (peripheral role).
//!
//! The app connects to the advertised `0xFFC0` service, writes commands to
//! `0xFFC1` and subscribes to `0xFFC2`. [`app_server_task`] owns the
//! advertise/serve loop and re-advertises after every disconnect; the
//! bridge talks to it through [`AppPeripheral`].

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use ampbridge::config::{
    LinkBuffer, APP_ADVERTISED_NAME, APP_SERVICE_UUID, ATT_HEADER_LEN, BLE_DEFAULT_ATT_MTU,
    WRITE_TIMEOUT_MS,
};
use ampbridge::discovery::adv_parser::{encode_flags_and_uuid16, encode_local_name};
use ampbridge::server::{Peripheral, ServerState};
use ampbridge::{Error, Result};
use defmt::{info, warn};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;
use nrf_softdevice::ble::gatt_server::{self, NotifyValueError};
use nrf_softdevice::ble::{peripheral, Connection};
use nrf_softdevice::{RawError, Softdevice};

use super::central::CHAR_LEN;

#[nrf_softdevice::gatt_service(uuid = "ffc0")]
pub struct AppService {
    /// Written by the app.
    #[characteristic(uuid = "ffc1", write, write_without_response)]
    pub from_app: Vec<u8, CHAR_LEN>,

    /// Notified toward the app.
    #[characteristic(uuid = "ffc2", read, notify)]
    pub to_app: Vec<u8, CHAR_LEN>,
}

#[nrf_softdevice::gatt_server]
pub struct BridgeServer {
    pub app: AppService,
}

/// State shared between the server task and [`AppPeripheral`].
pub struct ServerShared {
    conn: Mutex<NoopRawMutex, RefCell<Option<Connection>>>,
    state: AtomicU8,
    notifications: AtomicBool,
    start: Signal<NoopRawMutex, ()>,
    dropped: AtomicU32,
    inbound: &'static LinkBuffer,
}

impl ServerShared {
    pub const fn new(inbound: &'static LinkBuffer) -> Self {
        Self {
            conn: Mutex::new(RefCell::new(None)),
            state: AtomicU8::new(STOPPED),
            notifications: AtomicBool::new(false),
            start: Signal::new(),
            dropped: AtomicU32::new(0),
            inbound,
        }
    }

    /// App writes truncated by a full inbound ring, plus notifications
    /// discarded before the app subscribed.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn state(&self) -> ServerState {
        match self.state.load(Ordering::Acquire) {
            CONNECTED => ServerState::Connected,
            ADVERTISING => ServerState::Advertising,
            _ => ServerState::Stopped,
        }
    }

    fn set_state(&self, state: ServerState) {
        let raw = match state {
            ServerState::Stopped => STOPPED,
            ServerState::Advertising => ADVERTISING,
            ServerState::Connected => CONNECTED,
        };
        self.state.store(raw, Ordering::Release);
    }

    /// Clone the live connection out of the lock.
    fn connection(&self) -> Option<Connection> {
        self.conn.lock(|c| c.borrow().clone())
    }

    fn deliver(&self, data: &[u8]) {
        if let Err(e) = self.inbound.push(data) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("app write truncated: {}", e);
        }
    }
}

const STOPPED: u8 = 0;
const ADVERTISING: u8 = 1;
const CONNECTED: u8 = 2;

/// Register the GATT server. Must happen before the SoftDevice task runs.
pub fn init(sd: &mut Softdevice) -> Result<BridgeServer> {
    BridgeServer::new(sd).map_err(|e| {
        warn!("GATT server registration failed: {}", e);
        Error::ServiceMissing
    })
}

/// `Peripheral` over the SoftDevice GATT server.
pub struct AppPeripheral {
    server: &'static BridgeServer,
    shared: &'static ServerShared,
}

impl AppPeripheral {
    pub fn new(server: &'static BridgeServer, shared: &'static ServerShared) -> Self {
        Self { server, shared }
    }
}

impl Peripheral for AppPeripheral {
    async fn advertise(&mut self) -> Result<()> {
        if self.shared.state() == ServerState::Stopped {
            self.shared.set_state(ServerState::Advertising);
        }
        self.shared.start.signal(());
        Ok(())
    }

    fn state(&self) -> ServerState {
        self.shared.state()
    }

    fn max_payload(&self) -> usize {
        let mtu = self
            .shared
            .connection()
            .map_or(BLE_DEFAULT_ATT_MTU, |c| c.att_mtu());
        (mtu as usize).saturating_sub(ATT_HEADER_LEN).min(CHAR_LEN)
    }

    async fn notify(&mut self, chunk: &[u8]) -> Result<()> {
        let conn = self.shared.connection().ok_or(Error::LinkLost)?;
        if !self.shared.notifications.load(Ordering::Acquire) {
            // App has not subscribed yet; nothing can carry the bytes.
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        let value: Vec<u8, CHAR_LEN> = Vec::from_slice(chunk).map_err(|_| Error::WriteFailed)?;

        let deadline = Instant::now() + Duration::from_millis(WRITE_TIMEOUT_MS);
        loop {
            match self.server.app.to_app_notify(&conn, &value) {
                Ok(()) => return Ok(()),
                Err(NotifyValueError::Raw(RawError::Resources)) if Instant::now() < deadline => {
                    Timer::after_millis(1).await;
                }
                Err(e) => {
                    warn!("notify failed: {}", e);
                    return Err(Error::WriteFailed);
                }
            }
        }
    }

    async fn read_rssi(&mut self) -> Option<i8> {
        self.shared.connection().and_then(|c| c.rssi())
    }
}

/// Advertise, serve one central, repeat.
#[embassy_executor::task]
pub async fn app_server_task(
    sd: &'static Softdevice,
    server: &'static BridgeServer,
    shared: &'static ServerShared,
) -> ! {
    let adv_data = encode_flags_and_uuid16(APP_SERVICE_UUID);
    let scan_data = encode_local_name(APP_ADVERTISED_NAME);
    let config = peripheral::Config::default();

    shared.start.wait().await;
    loop {
        shared.set_state(ServerState::Advertising);
        let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
            adv_data: &adv_data,
            scan_data: &scan_data,
        };

        let conn = match peripheral::advertise_connectable(sd, adv, &config).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("advertising error (will retry): {}", e);
                shared.set_state(ServerState::Stopped);
                Timer::after_millis(250).await;
                continue;
            }
        };

        info!("app central connected");
        conn.start_rssi();
        shared.notifications.store(false, Ordering::Release);
        shared.conn.lock(|c| *c.borrow_mut() = Some(conn.clone()));
        shared.set_state(ServerState::Connected);

        let _reason = gatt_server::run(&conn, server, |event| match event {
            BridgeServerEvent::App(AppServiceEvent::FromAppWrite(data)) => shared.deliver(&data),
            BridgeServerEvent::App(AppServiceEvent::ToAppCccdWrite { notifications }) => {
                info!("app notifications: {}", notifications);
                shared.notifications.store(notifications, Ordering::Release);
            }
        })
        .await;

        shared.conn.lock(|c| c.borrow_mut().take());
        shared.set_state(ServerState::Advertising);
        info!("app central disconnected, re-advertising");
    }
}

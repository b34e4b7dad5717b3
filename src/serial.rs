//! Classic-serial amplifier link through a UART SPP module.
//!
//! The nRF52840 has no BR/EDR radio, so the amplifier's classic
//! Bluetooth serial port is reached through an external SPP module wired
//! to UARTE0 at a fixed 1 Mbaud. The module drives its STATE pin high
//! while it holds a link to the paired peer; that pin is our "scan" and
//! link-presence signal. The byte stream is raw, no framing.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ampbridge::config::{
    LinkBuffer, AMP_SERIAL_NAME, BLE_SCAN_WINDOW_MS, SERIAL_BAUD, WRITE_TIMEOUT_MS,
};
use ampbridge::discovery::{DeviceMatch, Target};
use ampbridge::link::{Negotiated, Peer, Transport, TransportKind};
use ampbridge::{Error, Result};
use defmt::{info, warn};
use embassy_nrf::buffered_uarte::{BufferedUarteRx, BufferedUarteTx};
use embassy_nrf::gpio::Input;
use embassy_nrf::peripherals::{TIMER1, UARTE0};
use embassy_time::{with_timeout, Duration};
use embedded_io_async::{Read, Write};

/// State shared between [`SerialLink`] and [`serial_rx_task`].
pub struct SerialShared {
    attached: AtomicBool,
    dropped: AtomicU32,
    inbound: &'static LinkBuffer,
}

impl SerialShared {
    pub const fn new(inbound: &'static LinkBuffer) -> Self {
        Self {
            attached: AtomicBool::new(false),
            dropped: AtomicU32::new(0),
            inbound,
        }
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct SerialLink {
    tx: BufferedUarteTx<'static, UARTE0>,
    link_state: Input<'static>,
    shared: &'static SerialShared,
}

impl SerialLink {
    pub fn new(
        tx: BufferedUarteTx<'static, UARTE0>,
        link_state: Input<'static>,
        shared: &'static SerialShared,
    ) -> Self {
        Self {
            tx,
            link_state,
            shared,
        }
    }
}

impl Transport for SerialLink {
    fn kind(&self) -> TransportKind {
        TransportKind::ClassicSerial
    }

    async fn scan(&mut self, target: &Target) -> Result<Peer> {
        let name = match target.matcher {
            DeviceMatch::Name(name) => name,
            _ => AMP_SERIAL_NAME,
        };
        with_timeout(
            Duration::from_millis(BLE_SCAN_WINDOW_MS),
            self.link_state.wait_for_high(),
        )
        .await
        .map_err(|_| Error::DeviceNotFound)?;
        Ok(Peer::new(name, [0; 6]))
    }

    async fn open(&mut self, peer: &Peer) -> Result<Negotiated> {
        if self.link_state.is_low() {
            return Err(Error::ConnectTimeout);
        }
        info!("serial link to {} at {} baud", peer.name.as_str(), SERIAL_BAUD);
        Ok(Negotiated::Baud(SERIAL_BAUD))
    }

    async fn discover(&mut self) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<()> {
        self.shared.attached.store(true, Ordering::Release);
        Ok(())
    }

    fn is_link_up(&self) -> bool {
        self.shared.attached.load(Ordering::Acquire) && self.link_state.is_high()
    }

    fn max_payload(&self) -> usize {
        usize::MAX
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let tx = &mut self.tx;
        let io = async {
            tx.write_all(chunk).await?;
            tx.flush().await
        };
        match with_timeout(Duration::from_millis(WRITE_TIMEOUT_MS), io).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("serial write error: {}", e);
                Err(Error::WriteFailed)
            }
            Err(_) => Err(Error::WriteFailed),
        }
    }

    fn close(&mut self) {
        self.shared.attached.store(false, Ordering::Release);
    }
}

/// Move received UART bytes into the amplifier's inbound ring.
#[embassy_executor::task]
pub async fn serial_rx_task(
    mut rx: BufferedUarteRx<'static, UARTE0, TIMER1>,
    shared: &'static SerialShared,
) -> ! {
    let mut buf = [0u8; 64];
    loop {
        match rx.read(&mut buf).await {
            Ok(0) => {}
            Ok(n) => {
                // Only forward while a session is attached.
                if !shared.attached.load(Ordering::Acquire) {
                    continue;
                }
                if shared.inbound.push(&buf[..n]).is_err() {
                    shared.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => warn!("serial read error: {}", e),
        }
    }
}

//! ampbridge firmware entry point (nRF52840 + S140).
//!
//! Wires the SoftDevice adapters and the UART serial link to the library's
//! bridge loop, then pumps it every `PUMP_INTERVAL_MS`.

#![no_std]
#![no_main]

mod ble;
mod serial;

use ampbridge::config::{PUMP_INTERVAL_MS, SERIAL_BAUD};
use ampbridge::link::TransportChoice;
use ampbridge::{
    Bridge, BridgeConfig, LinkBuffer, LocalServer, Role, TransportKind, TransportSession,
};
use ble::central::{CentralLink, CentralShared, Remote};
use ble::server::{AppPeripheral, BridgeServer, ServerShared};
use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_nrf::buffered_uarte::{self, BufferedUarte};
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::{bind_interrupts, peripherals, uarte};
use embassy_time::{Duration, Instant, Ticker};
use nrf_softdevice::Softdevice;
use serial::{SerialLink, SerialShared};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    UARTE0_UART0 => buffered_uarte::InterruptHandler<peripherals::UARTE0>;
});

type AmpTransport = TransportChoice<CentralLink, SerialLink>;
type AppBridge = Bridge<'static, AppPeripheral, AmpTransport, CentralLink>;

// One ring per direction per endpoint, reused across reconnects.
static APP_IN: LinkBuffer = LinkBuffer::new();
static APP_OUT: LinkBuffer = LinkBuffer::new();
static AMP_IN: LinkBuffer = LinkBuffer::new();
static AMP_OUT: LinkBuffer = LinkBuffer::new();
static PEDAL_IN: LinkBuffer = LinkBuffer::new();
static PEDAL_OUT: LinkBuffer = LinkBuffer::new();

static SERVER: StaticCell<BridgeServer> = StaticCell::new();
static SERVER_SHARED: StaticCell<ServerShared> = StaticCell::new();
static AMP_CENTRAL: StaticCell<CentralShared> = StaticCell::new();
static PEDAL_CENTRAL: StaticCell<CentralShared> = StaticCell::new();
static AMP_SERIAL: StaticCell<SerialShared> = StaticCell::new();
static UART_RX_BUF: StaticCell<[u8; 1024]> = StaticCell::new();
static UART_TX_BUF: StaticCell<[u8; 1024]> = StaticCell::new();
static BRIDGE: StaticCell<AppBridge> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("ampbridge starting");

    // SoftDevice reserves interrupt priorities 0, 1 and 4.
    let mut nrf_config = embassy_nrf::config::Config::default();
    nrf_config.gpiote_interrupt_priority = Priority::P2;
    nrf_config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(nrf_config);
    interrupt::UARTE0_UART0.set_priority(Priority::P3);

    // Status LED (active low on the DK): lit while app and amplifier are bridged.
    let mut led = Output::new(p.P0_13, Level::High, OutputDrive::Standard);

    let config = BridgeConfig::default();
    info!("config: {}", config);

    let sd = Softdevice::enable(&ble::softdevice_config());
    let server: &'static BridgeServer = SERVER.init(unwrap!(ble::server::init(sd)));
    let sd: &'static Softdevice = sd;
    unwrap!(spawner.spawn(ble::softdevice_task(sd)));

    // App-facing server
    let server_shared: &'static ServerShared = SERVER_SHARED.init(ServerShared::new(&APP_IN));
    unwrap!(spawner.spawn(ble::server::app_server_task(sd, server, server_shared)));
    let app = LocalServer::new(AppPeripheral::new(server, server_shared), &APP_IN, &APP_OUT);

    // Amplifier: BLE central or UART SPP, fixed at startup
    let mut amp_serial: Option<&'static SerialShared> = None;
    let mut amp_central: Option<&'static CentralShared> = None;
    let amp_transport = match config.amp_transport {
        TransportKind::ClassicSerial => {
            let mut uart_config = uarte::Config::default();
            uart_config.baudrate = uarte::Baudrate::BAUD1M;
            uart_config.parity = uarte::Parity::EXCLUDED;
            let uart = BufferedUarte::new(
                p.UARTE0,
                p.TIMER1,
                p.PPI_CH0,
                p.PPI_CH1,
                p.PPI_GROUP0,
                Irqs,
                p.P1_01,
                p.P1_02,
                uart_config,
                UART_RX_BUF.init([0; 1024]),
                UART_TX_BUF.init([0; 1024]),
            );
            let (rx, tx) = uart.split();
            let shared: &'static SerialShared = AMP_SERIAL.init(SerialShared::new(&AMP_IN));
            unwrap!(spawner.spawn(serial::serial_rx_task(rx, shared)));
            amp_serial = Some(shared);
            let link_state = Input::new(p.P1_03, Pull::Down);
            info!("amplifier over serial at {} baud", SERIAL_BAUD);
            TransportChoice::Serial(SerialLink::new(tx, link_state, shared))
        }
        _ => {
            let shared: &'static CentralShared = AMP_CENTRAL.init(CentralShared::new(&AMP_IN));
            unwrap!(spawner.spawn(ble::central::notify_pump_task(shared)));
            amp_central = Some(shared);
            TransportChoice::Ble(CentralLink::new(sd, Remote::Amplifier, shared))
        }
    };
    let amplifier = TransportSession::new(Role::Amplifier, amp_transport, &AMP_IN, &AMP_OUT);

    // Pedal (optional)
    let mut pedal_central: Option<&'static CentralShared> = None;
    let pedal = if config.pedal_enabled {
        let shared: &'static CentralShared = PEDAL_CENTRAL.init(CentralShared::new(&PEDAL_IN));
        unwrap!(spawner.spawn(ble::central::notify_pump_task(shared)));
        pedal_central = Some(shared);
        let link = CentralLink::new(sd, Remote::Pedal, shared);
        Some(TransportSession::new(Role::Pedal, link, &PEDAL_IN, &PEDAL_OUT))
    } else {
        None
    };

    // Inbound bytes lost to full rings, summed over every receive path.
    let inbound_drops = || {
        server_shared
            .dropped()
            .wrapping_add(amp_central.map_or(0, |s| s.dropped()))
            .wrapping_add(amp_serial.map_or(0, |s| s.dropped()))
            .wrapping_add(pedal_central.map_or(0, |s| s.dropped()))
    };

    let bridge = BRIDGE.init(Bridge::new(&config, app, amplifier, pedal));
    if let Err(e) = bridge.start_local_server().await {
        warn!("could not start app server: {}", e);
    }
    bridge.begin_discovery(&config.targets(), Instant::now().as_millis());

    let mut ticker = Ticker::every(Duration::from_millis(PUMP_INTERVAL_MS));
    let mut last = bridge.status();
    let mut last_drops = 0;
    loop {
        bridge.pump_once(Instant::now().as_millis()).await;

        let status = bridge.status();
        if status != last {
            info!("links: {}", status);
            last = status;
        }
        let drops = inbound_drops();
        if drops != last_drops {
            warn!("inbound drops: {} (bridge {})", drops, bridge.stats());
            last_drops = drops;
        }
        if status.is_bridging() {
            led.set_low();
        } else {
            led.set_high();
        }

        ticker.next().await;
    }
}

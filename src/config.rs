//! Application-wide constants and runtime bridge configuration.
//!
//! Identifiers, timing parameters and hardware pin notes live here so they
//! can be tuned in one place. The runtime [`BridgeConfig`] selects the
//! amplifier transport and pedal routing at startup.

use crate::bridge::routing::PedalRoute;
use crate::discovery::backoff::BackoffConfig;
use crate::discovery::{DeviceMatch, Target};
use crate::link::{Role, TransportKind};
use crate::ring_buffer::RingBuffer;
use heapless::Vec;

// Buffers

/// Capacity of every per-direction, per-endpoint ring buffer (bytes).
pub const BLE_BUFSIZE: usize = 5000;

/// Ring buffer type shared between adapters and the bridge.
pub type LinkBuffer = RingBuffer<BLE_BUFSIZE>;

// App-facing GATT service (peripheral role)

pub const APP_SERVICE_UUID: u16 = 0xFFC0;
/// Written by the app.
pub const APP_INBOUND_CHAR_UUID: u16 = 0xFFC1;
/// Notified toward the app.
pub const APP_OUTBOUND_CHAR_UUID: u16 = 0xFFC2;

/// Name advertised toward the app.
pub const APP_ADVERTISED_NAME: &str = "Spark 40 BLE";

// Amplifier (central role / classic serial)

pub const AMP_SERVICE_UUID: u16 = 0xFFC0;
/// Command characteristic (we write).
pub const AMP_COMMAND_CHAR_UUID: u16 = 0xFFC1;
/// Reply characteristic (amplifier notifies).
pub const AMP_REPLY_CHAR_UUID: u16 = 0xFFC2;

/// Amplifier BLE advertised name.
pub const AMP_BLE_NAME: &str = "Spark 40 BLE";

/// Amplifier classic-serial peer name.
pub const AMP_SERIAL_NAME: &str = "Spark 40 Audio";

/// Fixed baud rate of the serial link.
pub const SERIAL_BAUD: u32 = 1_000_000;

// Pedal (BLE MIDI)

pub const PEDAL_SERVICE_UUID: u128 = 0x03b80e5a_ede8_4b33_a751_6ce34ec4c700;
pub const PEDAL_CHAR_UUID: u128 = 0x7772e5db_3868_4112_a1a9_f2669d106bf3;

// BLE

/// ATT header bytes consumed from every MTU-sized PDU.
pub const ATT_HEADER_LEN: usize = 3;

/// ATT MTU before any exchange.
pub const BLE_DEFAULT_ATT_MTU: u16 = 23;

/// ATT MTU we request from peers.
pub const BLE_PREFERRED_ATT_MTU: u16 = 247;

/// Duration of a BLE scan window (ms).
pub const BLE_SCAN_WINDOW_MS: u64 = 4_000;

/// Scan window for the optional pedal (ms).
pub const PEDAL_SCAN_WINDOW_MS: u64 = 1_000;

/// Scan window used when looking for `role`.
pub const fn scan_window_ms(role: Role) -> u64 {
    match role {
        Role::Pedal => PEDAL_SCAN_WINDOW_MS,
        _ => BLE_SCAN_WINDOW_MS,
    }
}

/// BLE connection interval range (in 1.25 ms units).
/// 6 = 7.5 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 6;
pub const BLE_CONN_INTERVAL_MAX: u16 = 12;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

// Timing

/// Upper bound on link-layer connection establishment (ms).
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Upper bound on a single transport write (ms).
pub const WRITE_TIMEOUT_MS: u64 = 200;

/// First reconnect delay after a failure or link loss (ms).
pub const RECONNECT_INITIAL_MS: u64 = 500;

/// Reconnect delay ceiling (ms).
pub const RECONNECT_MAX_MS: u64 = 30_000;

/// Interval between signal-strength refreshes (ms).
pub const RSSI_POLL_INTERVAL_MS: u64 = 2_000;

/// Bridge pump period (ms).
pub const PUMP_INTERVAL_MS: u64 = 1;

// GPIO pin assignments (nRF52840-DK defaults)
//
// Selected in `main.rs`. Adjust for your custom PCB.
//
//   Status LED       → P0.13
//   UART RX (SPP)    → P1.01
//   UART TX (SPP)    → P1.02
//   SPP STATE        → P1.03

/// Number of outward targets the manager can supervise.
pub const MAX_TARGETS: usize = 2;

/// Runtime bridge configuration, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BridgeConfig {
    /// How the amplifier is reached. No automatic fallback between kinds.
    pub amp_transport: TransportKind,
    /// Whether to look for an expression pedal at all.
    pub pedal_enabled: bool,
    /// Where pedal traffic goes.
    pub pedal_route: PedalRoute,
    pub backoff: BackoffConfig,
    pub rssi_poll_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            amp_transport: TransportKind::BleCentral,
            pedal_enabled: true,
            pedal_route: PedalRoute::ToApp,
            backoff: BackoffConfig::default(),
            rssi_poll_interval_ms: RSSI_POLL_INTERVAL_MS,
        }
    }
}

impl BridgeConfig {
    /// Discovery targets implied by this configuration.
    pub fn targets(&self) -> Vec<Target, MAX_TARGETS> {
        let mut targets = Vec::new();

        let amp = match self.amp_transport {
            TransportKind::ClassicSerial => DeviceMatch::Name(AMP_SERIAL_NAME),
            _ => DeviceMatch::Name(AMP_BLE_NAME),
        };
        let _ = targets.push(Target::new(Role::Amplifier, amp));

        if self.pedal_enabled {
            let _ = targets.push(Target::new(
                Role::Pedal,
                DeviceMatch::Service128(PEDAL_SERVICE_UUID),
            ));
        }
        targets
    }
}

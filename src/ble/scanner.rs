//! BLE GAP scanner - finds the peer for one discovery target.
//!
//! Uses the SoftDevice Central-role scanning API with active scanning so
//! names carried in scan responses are seen too. The first report whose
//! AD data satisfies the target's matcher ends the scan.

use ampbridge::config::scan_window_ms;
use ampbridge::discovery::adv_parser::extract_device_name;
use ampbridge::discovery::Target;
use ampbridge::link::Peer;
use ampbridge::Error;
use defmt::{debug, info, warn};
use embassy_time::{with_timeout, Duration};
use nrf_softdevice::ble::{central, Address};
use nrf_softdevice::Softdevice;

/// A matching advertiser.
pub struct ScanHit {
    pub address: Address,
    pub peer: Peer,
}

/// Scan for up to the role's scan window for a peer matching `target`.
pub async fn find(sd: &Softdevice, target: &Target) -> Result<ScanHit, Error> {
    let window_ms = scan_window_ms(target.role);
    info!("BLE scan for {} ({} ms window)", target.matcher, window_ms);

    let config = central::ScanConfig {
        // Active scan to retrieve scan-response data (device names).
        active: true,
        ..Default::default()
    };

    let scan = central::scan(sd, &config, |params| {
        let data =
            unsafe { core::slice::from_raw_parts(params.data.p_data, params.data.len as usize) };

        if !target.matcher.matches_advertisement(data) {
            return None;
        }

        Some(ScanHit {
            address: Address::from_raw(params.peer_addr),
            peer: Peer {
                name: extract_device_name(data),
                address: params.peer_addr.addr,
                rssi: Some(params.rssi),
            },
        })
    });

    match with_timeout(Duration::from_millis(window_ms), scan).await {
        Ok(Ok(hit)) => {
            info!("Found: {} (RSSI {})", hit.peer.name.as_str(), hit.peer.rssi);
            Ok(hit)
        }
        Ok(Err(e)) => {
            warn!("BLE scan ended with error: {}", e);
            Err(Error::DeviceNotFound)
        }
        Err(_) => {
            debug!("BLE scan window closed without a match");
            Err(Error::DeviceNotFound)
        }
    }
}

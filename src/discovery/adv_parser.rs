//! Advertisement / scan-response AD structure parsing.

use heapless::{String, Vec};

const AD_FLAGS: u8 = 0x01;
const AD_UUID16_INCOMPLETE: u8 = 0x02;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_UUID128_INCOMPLETE: u8 = 0x06;
const AD_UUID128_COMPLETE: u8 = 0x07;
const AD_NAME_SHORT: u8 = 0x08;
const AD_NAME_COMPLETE: u8 = 0x09;

/// Maximum legacy advertising payload.
pub const ADV_PAYLOAD_LEN: usize = 31;

/// Iterate `(ad_type, payload)` pairs, stopping at the first malformed entry.
fn ad_structures(data: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    let mut i = 0;
    core::iter::from_fn(move || {
        let len = *data.get(i)? as usize;
        if len == 0 || i + len >= data.len() {
            return None;
        }
        let ad_type = data[i + 1];
        let payload = &data[i + 2..i + 1 + len];
        i += len + 1;
        Some((ad_type, payload))
    })
}

/// Complete or shortened local name, if present and valid UTF-8.
pub fn local_name(data: &[u8]) -> Option<&str> {
    ad_structures(data)
        .find(|(t, _)| *t == AD_NAME_SHORT || *t == AD_NAME_COMPLETE)
        .and_then(|(_, name)| core::str::from_utf8(name).ok())
}

/// Extract complete/shortened local name from advertisement data.
pub fn extract_device_name(data: &[u8]) -> String<32> {
    let mut name = String::new();
    match local_name(data) {
        Some(n) => {
            for c in n.chars() {
                if name.push(c).is_err() {
                    break;
                }
            }
        }
        None => {
            let _ = name.push_str("Unknown");
        }
    }
    name
}

/// Check complete and incomplete 16-bit UUID lists for `uuid`.
pub fn contains_service_uuid16(data: &[u8], uuid: u16) -> bool {
    let le = uuid.to_le_bytes();
    ad_structures(data)
        .filter(|(t, _)| *t == AD_UUID16_INCOMPLETE || *t == AD_UUID16_COMPLETE)
        .any(|(_, list)| list.chunks_exact(2).any(|c| c == le))
}

/// Check complete and incomplete 128-bit UUID lists for `uuid`.
pub fn contains_service_uuid128(data: &[u8], uuid: u128) -> bool {
    let le = uuid.to_le_bytes();
    ad_structures(data)
        .filter(|(t, _)| *t == AD_UUID128_INCOMPLETE || *t == AD_UUID128_COMPLETE)
        .any(|(_, list)| list.chunks_exact(16).any(|c| c == le))
}

/// Build a scan-response payload carrying `name` as Complete Local Name.
///
/// Names that do not fit are sent as a Shortened Local Name.
pub fn encode_local_name(name: &str) -> Vec<u8, ADV_PAYLOAD_LEN> {
    let bytes = name.as_bytes();
    let room = ADV_PAYLOAD_LEN - 2;
    let (ad_type, body) = if bytes.len() <= room {
        (AD_NAME_COMPLETE, bytes)
    } else {
        (AD_NAME_SHORT, &bytes[..room])
    };

    let mut out = Vec::new();
    let _ = out.push(body.len() as u8 + 1);
    let _ = out.push(ad_type);
    let _ = out.extend_from_slice(body);
    out
}

/// Build advertising data: general-discoverable flags plus one 16-bit service.
pub fn encode_flags_and_uuid16(uuid: u16) -> [u8; 7] {
    let le = uuid.to_le_bytes();
    [0x02, AD_FLAGS, 0x06, 0x03, AD_UUID16_COMPLETE, le[0], le[1]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_uuid16_in_advertisement() {
        let ad_data = [0x03, 0x03, 0xC0, 0xFF];
        assert!(contains_service_uuid16(&ad_data, 0xFFC0));
        assert!(!contains_service_uuid16(&ad_data, 0xFFC1));
    }

    #[test]
    fn uuid16_among_multiple_uuids() {
        let ad_data = [
            0x07, 0x03, // len=7, type=0x03 (Complete 16-bit UUIDs)
            0x0F, 0x18, // Battery
            0xC0, 0xFF, // app service
            0x01, 0x18, // GATT
        ];
        assert!(contains_service_uuid16(&ad_data, 0xFFC0));
    }

    #[test]
    fn incomplete_uuid16_list() {
        let ad_data = [0x03, 0x02, 0xC0, 0xFF];
        assert!(contains_service_uuid16(&ad_data, 0xFFC0));
    }

    #[test]
    fn detect_pedal_uuid128() {
        let mut ad_data = [0u8; 18];
        ad_data[0] = 17;
        ad_data[1] = 0x07;
        ad_data[2..].copy_from_slice(&crate::config::PEDAL_SERVICE_UUID.to_le_bytes());
        assert!(contains_service_uuid128(&ad_data, crate::config::PEDAL_SERVICE_UUID));
        assert!(!contains_service_uuid128(&ad_data, crate::config::PEDAL_CHAR_UUID));
        assert!(!contains_service_uuid16(&ad_data, 0xFFC0));
    }

    #[test]
    fn empty_advertisement_data() {
        assert!(!contains_service_uuid16(&[], 0xFFC0));
        assert_eq!(local_name(&[]), None);
    }

    #[test]
    fn malformed_lengths() {
        assert!(!contains_service_uuid16(&[0x00], 0xFFC0));
        assert!(!contains_service_uuid16(&[0x05, 0x03, 0xC0], 0xFFC0));
    }

    #[test]
    fn extract_complete_local_name() {
        let ad_data = [
            0x0D, 0x09, // len=13, type=0x09
            b'S', b'p', b'a', b'r', b'k', b' ', b'4', b'0', b' ', b'B', b'L', b'E',
        ];
        assert_eq!(local_name(&ad_data), Some("Spark 40 BLE"));
        assert_eq!(extract_device_name(&ad_data).as_str(), "Spark 40 BLE");
    }

    #[test]
    fn extract_shortened_local_name() {
        let ad_data = [0x05, 0x08, b'S', b'p', b'r', b'k'];
        assert_eq!(extract_device_name(&ad_data).as_str(), "Sprk");
    }

    #[test]
    fn name_after_flags() {
        let ad_data = [0x02, 0x01, 0x06, 0x03, 0x09, b'A', b'B'];
        assert_eq!(local_name(&ad_data), Some("AB"));
    }

    #[test]
    fn no_name_in_advertisement() {
        let ad_data = [0x02, 0x01, 0x06];
        assert_eq!(extract_device_name(&ad_data).as_str(), "Unknown");
    }

    #[test]
    fn name_truncated_to_32_chars() {
        let mut ad_data = [0u8; 40];
        ad_data[0] = 35;
        ad_data[1] = 0x09;
        for b in &mut ad_data[2..37] {
            *b = b'X';
        }
        assert_eq!(extract_device_name(&ad_data).len(), 32);
    }

    #[test]
    fn encoded_name_parses_back() {
        let sr = encode_local_name("Spark 40 BLE");
        assert_eq!(sr[0] as usize, sr.len() - 1);
        assert_eq!(sr[1], 0x09);
        assert_eq!(local_name(&sr), Some("Spark 40 BLE"));
    }

    #[test]
    fn overlong_name_is_shortened() {
        let long = "0123456789012345678901234567890123456789";
        let sr = encode_local_name(long);
        assert_eq!(sr.len(), ADV_PAYLOAD_LEN);
        assert_eq!(sr[1], 0x08);
        assert_eq!(local_name(&sr), Some(&long[..29]));
    }

    #[test]
    fn flags_and_uuid16_advertisement() {
        let adv = encode_flags_and_uuid16(0xFFC0);
        assert!(contains_service_uuid16(&adv, 0xFFC0));
        assert_eq!(local_name(&adv), None);
    }
}

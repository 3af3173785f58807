//! BLE GATT Service Protocol Constants for Fast Pair
//!
//! This module defines the service and characteristic UUIDs a Fast Pair
//! provider exposes, as seen from the seeker side.

/// 16-bit Fast Pair service UUID, also used as the advertisement service data key
pub const SERVICE_UUID_16: u16 = 0xFE2C;

/// Fast Pair service UUID (16-bit UUID expanded onto the Bluetooth base UUID)
pub const SERVICE_UUID: &str = "0000fe2c-0000-1000-8000-00805f9b34fb";

/// Model ID Characteristic UUID (read)
pub const MODEL_ID_UUID: &str = "fe2c1233-8366-4814-8eb0-01de32100bea";

/// Key-based Pairing Characteristic UUID (write/notify)
pub const KEY_BASED_PAIRING_UUID: &str = "fe2c1234-8366-4814-8eb0-01de32100bea";

/// Passkey Characteristic UUID (write/notify)
pub const PASSKEY_UUID: &str = "fe2c1235-8366-4814-8eb0-01de32100bea";

/// Account Key Characteristic UUID (write)
pub const ACCOUNT_KEY_UUID: &str = "fe2c1236-8366-4814-8eb0-01de32100bea";

/// Additional Data Characteristic UUID (write/notify)
pub const ADDITIONAL_DATA_UUID: &str = "fe2c1237-8366-4814-8eb0-01de32100bea";

/// Length of the service data payload of a discoverable advertisement (the model id)
pub const MODEL_ID_LEN: usize = 3;

/// Parse the model id out of Fast Pair service data.
///
/// Only discoverable advertisements carry a bare 3-byte model id; the longer
/// not-discoverable payloads (account key filters) yield `None`.
pub fn parse_model_id(service_data: &[u8]) -> Option<u32> {
    if service_data.len() != MODEL_ID_LEN {
        return None;
    }
    Some(u32::from_be_bytes([0, service_data[0], service_data[1], service_data[2]]))
}

#[cfg(test)]
mod tests {
    #[test]
    fn model_id_from_discoverable_advertisement() {
        assert_eq!(super::parse_model_id(&[0x71, 0x8c, 0x17]), Some(0x718c17));
    }

    #[test]
    fn model_id_absent_from_account_key_filter() {
        assert_eq!(super::parse_model_id(&[0x00, 0x40, 0x12, 0x34, 0x56]), None);
        assert_eq!(super::parse_model_id(&[]), None);
    }
}

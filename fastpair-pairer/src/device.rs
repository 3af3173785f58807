//! Discovered Fast Pair devices

use parking_lot::RwLock;

use fastpair_proto::{AccountKey, BluetoothAddress, FastPairVersion, Protocol};

/// A Fast Pair provider found by discovery.
///
/// Shared as `Arc<Device>` between discovery and any pairer working on it. The
/// classic address is learned during the handshake and the account key after a
/// successful write, so both sit behind locks.
#[derive(Debug)]
pub struct Device {
    metadata_id: String,
    ble_address: BluetoothAddress,
    protocol: Protocol,
    version: Option<FastPairVersion>,
    classic_address: RwLock<Option<BluetoothAddress>>,
    display_name: RwLock<Option<String>>,
    account_key: RwLock<Option<AccountKey>>,
}

impl Device {
    pub fn new(
        metadata_id: impl Into<String>,
        ble_address: BluetoothAddress,
        protocol: Protocol,
    ) -> Self {
        Self {
            metadata_id: metadata_id.into(),
            ble_address,
            protocol,
            version: None,
            classic_address: RwLock::new(None),
            display_name: RwLock::new(None),
            account_key: RwLock::new(None),
        }
    }

    pub fn with_classic_address(self, address: BluetoothAddress) -> Self {
        *self.classic_address.write() = Some(address);
        self
    }

    /// Attach the version additional data carried by the advertisement
    pub fn with_version_data(mut self, data: &[u8]) -> Self {
        self.version = Some(FastPairVersion::from_additional_data(data));
        self
    }

    pub fn with_account_key(self, key: AccountKey) -> Self {
        *self.account_key.write() = Some(key);
        self
    }

    pub fn with_display_name(self, name: impl Into<String>) -> Self {
        *self.display_name.write() = Some(name.into());
        self
    }

    /// Model id of the provider, hex encoded
    pub fn metadata_id(&self) -> &str {
        &self.metadata_id
    }

    pub fn ble_address(&self) -> BluetoothAddress {
        self.ble_address
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn version(&self) -> Option<FastPairVersion> {
        self.version
    }

    /// Legacy providers hand pairing to the platform dialog
    pub fn is_v1(&self) -> bool {
        self.version == Some(FastPairVersion::V1)
    }

    pub fn classic_address(&self) -> Option<BluetoothAddress> {
        *self.classic_address.read()
    }

    pub fn set_classic_address(&self, address: BluetoothAddress) {
        *self.classic_address.write() = Some(address);
    }

    /// True when `address` is either of this device's addresses
    pub fn has_address(&self, address: &BluetoothAddress) -> bool {
        self.ble_address == *address || self.classic_address() == Some(*address)
    }

    pub fn display_name(&self) -> Option<String> {
        self.display_name.read().clone()
    }

    pub fn account_key(&self) -> Option<AccountKey> {
        *self.account_key.read()
    }

    pub fn set_account_key(&self, key: AccountKey) {
        *self.account_key.write() = Some(key);
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} ble={} protocol={:?}]", self.metadata_id, self.ble_address, self.protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLE: BluetoothAddress = BluetoothAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    const CLASSIC: BluetoothAddress = BluetoothAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    #[test]
    fn v1_only_for_single_flag_byte() {
        let device = || Device::new("718c17", BLE, Protocol::FastPairInitial);
        assert!(!device().is_v1());
        assert!(device().with_version_data(&[1]).is_v1());
        assert!(!device().with_version_data(&[2]).is_v1());
    }

    #[test]
    fn classic_address_learned_later() {
        let device = Device::new("718c17", BLE, Protocol::FastPairInitial);
        assert!(device.has_address(&BLE));
        assert!(!device.has_address(&CLASSIC));

        device.set_classic_address(CLASSIC);
        assert_eq!(device.classic_address(), Some(CLASSIC));
        assert!(device.has_address(&CLASSIC));
    }
}

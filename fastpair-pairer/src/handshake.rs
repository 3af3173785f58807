//! Handshake registry - one Fast Pair handshake per device BLE address

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use fastpair_proto::{BluetoothAddress, PairFailure};

use crate::Device;
use crate::gatt::{DataEncryptor, GattServiceClient};

/// What a successful handshake leaves behind
#[derive(Clone)]
pub struct HandshakeChannel {
    pub gatt_client: Arc<dyn GattServiceClient>,
    pub data_encryptor: Arc<dyn DataEncryptor>,
    /// BR/EDR address the provider disclosed in its key-based pairing response
    pub classic_address: Option<BluetoothAddress>,
}

/// Runs the key-based pairing exchange against a provider
#[async_trait]
pub trait HandshakeFactory: Send + Sync {
    async fn perform_handshake(&self, device: Arc<Device>) -> Result<HandshakeChannel, PairFailure>;
}

/// A handshake that is either still running or finished successfully.
///
/// Failed handshakes are never stored.
pub struct FastPairHandshake {
    channel: Option<HandshakeChannel>,
}

impl FastPairHandshake {
    fn pending() -> Self {
        Self { channel: None }
    }

    pub fn completed(channel: HandshakeChannel) -> Self {
        Self { channel: Some(channel) }
    }

    pub fn completed_successfully(&self) -> bool {
        self.channel.is_some()
    }

    pub fn gatt_client(&self) -> Option<Arc<dyn GattServiceClient>> {
        self.channel.as_ref().map(|c| c.gatt_client.clone())
    }

    pub fn data_encryptor(&self) -> Option<Arc<dyn DataEncryptor>> {
        self.channel.as_ref().map(|c| c.data_encryptor.clone())
    }
}

impl std::fmt::Debug for FastPairHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastPairHandshake")
            .field("completed", &self.completed_successfully())
            .finish()
    }
}

/// Registry of handshakes shared by every pairer in the process
pub struct HandshakeLookup {
    factory: Arc<dyn HandshakeFactory>,
    handshakes: Mutex<HashMap<BluetoothAddress, Arc<FastPairHandshake>>>,
}

impl HandshakeLookup {
    pub fn new(factory: Arc<dyn HandshakeFactory>) -> Self {
        Self { factory, handshakes: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, device: &Device) -> Option<Arc<FastPairHandshake>> {
        self.handshakes.lock().get(&device.ble_address()).cloned()
    }

    /// Returns whether an entry was removed
    pub fn erase(&self, device: &Device) -> bool {
        self.handshakes.lock().remove(&device.ble_address()).is_some()
    }

    /// Store an already completed handshake, replacing any existing entry
    pub fn insert(&self, device: &Device, handshake: FastPairHandshake) {
        self.handshakes.lock().insert(device.ble_address(), Arc::new(handshake));
    }

    /// Run a new handshake for `device`.
    ///
    /// A pending entry is visible to `get` while the handshake runs. On success it
    /// is replaced by the completed handshake and the device learns its classic
    /// address; on failure it is erased. If the entry was erased or replaced
    /// meanwhile, the outcome is returned but not stored.
    pub async fn create(&self, device: Arc<Device>) -> Result<(), PairFailure> {
        let pending = Arc::new(FastPairHandshake::pending());
        self.handshakes.lock().insert(device.ble_address(), pending.clone());

        let result = self.factory.perform_handshake(device.clone()).await;

        let mut handshakes = self.handshakes.lock();
        let still_ours = handshakes
            .get(&device.ble_address())
            .is_some_and(|current| Arc::ptr_eq(current, &pending));

        match result {
            Ok(channel) => {
                if let Some(address) = channel.classic_address {
                    device.set_classic_address(address);
                }
                if still_ours {
                    let completed = Arc::new(FastPairHandshake::completed(channel));
                    handshakes.insert(device.ble_address(), completed);
                } else {
                    log::info!("handshake for {device} finished after its entry was dropped");
                }
                Ok(())
            }
            Err(failure) => {
                if still_ours {
                    handshakes.remove(&device.ble_address());
                }
                Err(failure)
            }
        }
    }
}

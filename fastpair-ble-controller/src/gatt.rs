//! btleplug implementation of the Fast Pair GATT client

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::{Stream, StreamExt};
use uuid::Uuid;

use fastpair_pairer::{DataEncryptor, GattServiceClient};
use fastpair_proto::ble::{
    ACCOUNT_KEY_UUID, ADDITIONAL_DATA_UUID, KEY_BASED_PAIRING_UUID, PASSKEY_UUID,
};
use fastpair_proto::{AccountKey, AccountKeyFailure, DecryptedPasskey, MessageType, PairFailure};

/// How long a provider gets to answer a passkey write
pub const PASSKEY_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Characteristics of the Fast Pair GATT service, by name
pub const FAST_PAIR_CHARACTERISTICS: [(&str, &str); 4] = [
    ("key-based pairing", KEY_BASED_PAIRING_UUID),
    ("passkey", PASSKEY_UUID),
    ("account key", ACCOUNT_KEY_UUID),
    ("additional data", ADDITIONAL_DATA_UUID),
];

pub struct BtleplugGattClient {
    peripheral: Peripheral,
    response_timeout: Duration,
}

impl BtleplugGattClient {
    /// Connect and discover the provider's services
    pub async fn connect(peripheral: Peripheral) -> Result<Self, PairFailure> {
        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral.connect().await.map_err(|e| {
                log::warn!("gatt connection to {} failed: {e}", peripheral.address());
                PairFailure::HandshakeGattConnection
            })?;
        }
        peripheral.discover_services().await.map_err(|e| {
            log::warn!("service discovery on {} failed: {e}", peripheral.address());
            PairFailure::GattServiceDiscovery
        })?;
        Ok(Self { peripheral, response_timeout: PASSKEY_RESPONSE_TIMEOUT })
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    pub fn has_characteristic(&self, uuid: &str) -> bool {
        self.characteristic(uuid).is_some()
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.peripheral.disconnect().await {
            log::debug!("disconnect from {} failed: {e}", self.peripheral.address());
        }
    }

    fn characteristic(&self, uuid: &str) -> Option<Characteristic> {
        let uuid = Uuid::parse_str(uuid).ok()?;
        self.peripheral.characteristics().into_iter().find(|c| c.uuid == uuid)
    }
}

/// First value notified on `uuid`, or `PasskeyResponseTimeout` when none
/// arrives within `timeout` or the stream ends first
async fn await_notification(
    notifications: impl Stream<Item = (Uuid, Vec<u8>)>,
    uuid: Uuid,
    timeout: Duration,
) -> Result<Vec<u8>, PairFailure> {
    let matching = notifications.filter(|(from, _)| futures::future::ready(*from == uuid));
    let mut matching = std::pin::pin!(matching);
    match tokio::time::timeout(timeout, matching.next()).await {
        Ok(Some((_, value))) => Ok(value),
        Ok(None) => {
            log::warn!("notification stream ended before the passkey reply");
            Err(PairFailure::PasskeyResponseTimeout)
        }
        Err(_) => Err(PairFailure::PasskeyResponseTimeout),
    }
}

#[async_trait]
impl GattServiceClient for BtleplugGattClient {
    async fn write_passkey(
        &self,
        message_type: MessageType,
        passkey: u32,
        encryptor: &dyn DataEncryptor,
    ) -> Result<Vec<u8>, PairFailure> {
        let characteristic = self
            .characteristic(PASSKEY_UUID)
            .ok_or(PairFailure::PasskeyCharacteristicDiscovery)?;

        // listen before writing so the reply cannot slip past
        self.peripheral.subscribe(&characteristic).await.map_err(|e| {
            log::warn!("passkey subscribe failed: {e}");
            PairFailure::PasskeyCharacteristicNotifySession
        })?;
        let notifications = self.peripheral.notifications().await.map_err(|e| {
            log::warn!("passkey notification stream failed: {e}");
            PairFailure::PasskeyCharacteristicNotifySession
        })?;

        let block =
            encryptor.encrypt_bytes(&DecryptedPasskey::new(message_type, passkey).to_bytes());
        self.peripheral.write(&characteristic, &block, WriteType::WithResponse).await.map_err(|e| {
            log::warn!("passkey write failed: {e}");
            PairFailure::PasskeyPairingCharacteristicWrite
        })?;

        let reply = await_notification(
            notifications.map(|n| (n.uuid, n.value)),
            characteristic.uuid,
            self.response_timeout,
        )
        .await;

        if let Err(e) = self.peripheral.unsubscribe(&characteristic).await {
            log::debug!("passkey unsubscribe failed: {e}");
        }
        reply
    }

    async fn write_account_key(
        &self,
        account_key: AccountKey,
        encryptor: &dyn DataEncryptor,
    ) -> Result<(), AccountKeyFailure> {
        let characteristic = self
            .characteristic(ACCOUNT_KEY_UUID)
            .ok_or(AccountKeyFailure::AccountKeyCharacteristicDiscovery)?;

        let block = encryptor.encrypt_bytes(account_key.as_bytes());
        self.peripheral.write(&characteristic, &block, WriteType::WithResponse).await.map_err(|e| {
            log::warn!("account key write failed: {e}");
            AccountKeyFailure::AccountKeyCharacteristicWrite
        })
    }
}

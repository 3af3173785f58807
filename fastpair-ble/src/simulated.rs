//! A simulated provider and adapter for `fastpair-ble simulate`

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::broadcast;

use fastpair_pairer::{
    AccountKey, AccountKeyFailure, AdapterEvent, AesDataEncryptor, BluetoothAddress, DataEncryptor,
    Device, FastPairRepository, FixedLogin, GattServiceClient, HandshakeChannel, HandshakeFactory,
    HandshakeLookup, LoginStatus, PairFailure, PairerConfig, PairerContext, PairerId,
    PairingTransport, Protocol, TransportError,
};
use fastpair_proto::{DecryptedPasskey, MessageType};

pub const SIMULATED_BLE: BluetoothAddress =
    BluetoothAddress::new([0xF0, 0x5C, 0x19, 0x00, 0x00, 0x01]);
pub const SIMULATED_CLASSIC: BluetoothAddress =
    BluetoothAddress::new([0xF0, 0x5C, 0x19, 0x00, 0x00, 0x02]);
const SIMULATED_MODEL: &str = "718c17";

#[derive(Debug, Clone, Copy)]
pub struct Simulation {
    pub protocol: Protocol,
    /// Legacy provider that pairs through the platform dialog
    pub v1: bool,
    /// Provider answers with a different passkey
    pub mismatch: bool,
}

impl Simulation {
    pub fn context(
        &self,
        repository: Arc<dyn FastPairRepository>,
        config: PairerConfig,
    ) -> PairerContext {
        let passkey = rand::thread_rng().gen_range(100_000..1_000_000);
        let mut adapter = SimulatedAdapter::new(passkey, self.v1);
        if self.protocol == Protocol::FastPairRetroactive {
            adapter.known.get_mut().insert(SIMULATED_CLASSIC);
        }
        let provider = SimulatedProvider { mismatch: self.mismatch };

        PairerContext {
            handshakes: Arc::new(HandshakeLookup::new(Arc::new(SimulatedHandshake {
                provider: Arc::new(provider),
            }))),
            transport: Arc::new(adapter),
            repository,
            login: Arc::new(FixedLogin(LoginStatus::User)),
            config,
        }
    }

    pub fn device(&self) -> Device {
        let mut device = Device::new(SIMULATED_MODEL, SIMULATED_BLE, self.protocol)
            .with_display_name("Simulated Provider");
        if self.v1 {
            device = device.with_version_data(&[1]);
        }
        match self.protocol {
            Protocol::FastPairSubsequent => device.with_account_key(AccountKey::generate()),
            Protocol::FastPairRetroactive => device.with_classic_address(SIMULATED_CLASSIC),
            Protocol::FastPairInitial => device,
        }
    }
}

/// Platform adapter that asks to confirm `passkey` as soon as a pairing starts
struct SimulatedAdapter {
    known: Mutex<HashSet<BluetoothAddress>>,
    passkey: u32,
    native_pairing: bool,
    events: broadcast::Sender<AdapterEvent>,
}

impl SimulatedAdapter {
    fn new(passkey: u32, native_pairing: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self { known: Mutex::new(HashSet::new()), passkey, native_pairing, events }
    }

    fn emit(&self, event: AdapterEvent) {
        log::debug!("adapter: {event:?}");
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl PairingTransport for SimulatedAdapter {
    fn has_device(&self, address: &BluetoothAddress) -> bool {
        self.known.lock().contains(address)
    }

    async fn pair(&self, address: BluetoothAddress) -> Result<(), TransportError> {
        if !self.has_device(&address) {
            return Err(TransportError::DeviceNotFound(address));
        }
        self.emit(AdapterEvent::ConfirmPasskey { address, passkey: self.passkey });
        Ok(())
    }

    async fn connect_device(&self, address: BluetoothAddress) -> Result<(), TransportError> {
        self.known.lock().insert(address);
        self.emit(AdapterEvent::ConfirmPasskey { address, passkey: self.passkey });
        Ok(())
    }

    fn confirm_pairing(&self, address: &BluetoothAddress) {
        log::info!("adapter: pairing with {address} confirmed");
        self.emit(AdapterEvent::DevicePairedChanged { address: *address, paired: true });
    }

    fn cancel_pairing(&self, address: &BluetoothAddress) {
        log::info!("adapter: pairing with {address} cancelled");
    }

    fn add_pairing_delegate(&self, id: PairerId) {
        log::debug!("adapter: {id} is the pairing delegate");
    }

    fn remove_pairing_delegate(&self, id: PairerId) {
        log::debug!("adapter: {id} is no longer the pairing delegate");
    }

    fn show_pairing_dialog(&self, address: &BluetoothAddress) {
        log::info!("adapter: showing pairing dialog for {address}");
        if self.native_pairing {
            self.emit(AdapterEvent::DevicePairedChanged { address: *address, paired: true });
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

/// Provider GATT server answering passkey writes with its own passkey block
struct SimulatedProvider {
    mismatch: bool,
}

#[async_trait]
impl GattServiceClient for SimulatedProvider {
    async fn write_passkey(
        &self,
        message_type: MessageType,
        passkey: u32,
        encryptor: &dyn DataEncryptor,
    ) -> Result<Vec<u8>, PairFailure> {
        log::info!("provider: got {message_type:?} {passkey:06}");
        let answer = if self.mismatch { passkey ^ 1 } else { passkey };
        let block = DecryptedPasskey::new(MessageType::ProvidersPasskey, answer);
        Ok(encryptor.encrypt_bytes(&block.to_bytes()).to_vec())
    }

    async fn write_account_key(
        &self,
        account_key: AccountKey,
        _encryptor: &dyn DataEncryptor,
    ) -> Result<(), AccountKeyFailure> {
        log::info!("provider: stored account key {account_key:?}");
        Ok(())
    }
}

struct SimulatedHandshake {
    provider: Arc<SimulatedProvider>,
}

#[async_trait]
impl HandshakeFactory for SimulatedHandshake {
    async fn perform_handshake(
        &self,
        device: Arc<Device>,
    ) -> Result<HandshakeChannel, PairFailure> {
        log::info!("provider: key-based pairing with {device}");
        let shared_secret = device.ble_address().to_bytes();
        Ok(HandshakeChannel {
            gatt_client: self.provider.clone(),
            data_encryptor: Arc::new(AesDataEncryptor::from_shared_secret(&shared_secret)),
            classic_address: Some(SIMULATED_CLASSIC),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastpair_pairer::{
        Association, PairerCallbacks, PairerState, PairingDriver, SavedDevicesStore,
    };

    fn simulation(protocol: Protocol) -> Simulation {
        Simulation { protocol, v1: false, mismatch: false }
    }

    async fn run(
        simulation: Simulation,
        home: &std::path::Path,
    ) -> (PairerState, Arc<SavedDevicesStore>) {
        let store = Arc::new(SavedDevicesStore::open(home).unwrap());
        let ctx = simulation.context(store.clone(), PairerConfig::default());
        let driver = PairingDriver::new(ctx, Arc::new(simulation.device()), PairerCallbacks::new());
        let state = driver.run().await.wait_for_background().await;
        (state, store)
    }

    #[tokio::test]
    async fn initial_pairing_saves_account_key() {
        let dir = tempfile::tempdir().unwrap();
        let (state, store) = run(simulation(Protocol::FastPairInitial), dir.path()).await;

        assert_eq!(state, PairerState::Done);
        let (_, record) = store.find_by_address(&SIMULATED_CLASSIC).unwrap();
        assert_eq!(record.association, Association::Account);
    }

    #[tokio::test]
    async fn mismatch_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mismatch = Simulation { mismatch: true, ..simulation(Protocol::FastPairInitial) };

        let (state, store) = run(mismatch, dir.path()).await;

        assert_eq!(state, PairerState::Done);
        assert!(store.devices().is_empty());
    }

    #[tokio::test]
    async fn subsequent_pairing_is_saved_locally() {
        let dir = tempfile::tempdir().unwrap();
        let (_, store) = run(simulation(Protocol::FastPairSubsequent), dir.path()).await;

        let devices = store.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].1.association, Association::Local);
    }

    #[tokio::test]
    async fn v1_provider_pairs_through_dialog() {
        let dir = tempfile::tempdir().unwrap();
        let v1 = Simulation { v1: true, ..simulation(Protocol::FastPairInitial) };

        let (state, store) = run(v1, dir.path()).await;

        assert_eq!(state, PairerState::Done);
        assert!(store.devices().is_empty());
    }
}

//! In-memory collaborators for tests
//!
//! Every fake records what it was asked to do so tests can assert on the
//! interaction, and most of them can be told how to answer.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use fastpair_proto::{
    AccountKey, AccountKeyFailure, BluetoothAddress, DecryptedPasskey, MessageType, PairFailure,
};

use crate::gatt::{DataEncryptor, GattServiceClient};
use crate::{
    AdapterEvent, Device, FastPairRepository, HandshakeChannel, HandshakeFactory, OptInStatus,
    PairerCallbacks, PairerId, PairingTransport, RepositoryError, TransportError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Pair(BluetoothAddress),
    ConnectDevice(BluetoothAddress),
    ConfirmPairing(BluetoothAddress),
    CancelPairing(BluetoothAddress),
    AddPairingDelegate(PairerId),
    RemovePairingDelegate(PairerId),
    ShowPairingDialog(BluetoothAddress),
}

/// A Bluetooth adapter that answers instantly
pub struct FakeTransport {
    known: Mutex<HashSet<BluetoothAddress>>,
    calls: Mutex<Vec<TransportCall>>,
    pair_result: Result<(), TransportError>,
    connect_result: Result<(), TransportError>,
    auto_passkey: Option<u32>,
    native_pairing: bool,
    events: broadcast::Sender<AdapterEvent>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            known: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            pair_result: Ok(()),
            connect_result: Ok(()),
            auto_passkey: None,
            native_pairing: false,
            events,
        }
    }

    pub fn with_known_device(self, address: BluetoothAddress) -> Self {
        self.known.lock().insert(address);
        self
    }

    pub fn with_pair_result(mut self, result: Result<(), TransportError>) -> Self {
        self.pair_result = result;
        self
    }

    pub fn with_connect_result(mut self, result: Result<(), TransportError>) -> Self {
        self.connect_result = result;
        self
    }

    /// Raise a passkey confirmation whenever a pair or connect succeeds
    pub fn with_auto_passkey(mut self, passkey: u32) -> Self {
        self.auto_passkey = Some(passkey);
        self
    }

    /// Report the device as paired once the platform dialog is shown
    pub fn with_native_pairing(mut self) -> Self {
        self.native_pairing = true;
        self
    }

    pub fn forget_device(&self, address: BluetoothAddress) {
        self.known.lock().remove(&address);
    }

    pub fn emit(&self, event: AdapterEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }

    fn raise_passkey(&self, address: BluetoothAddress) {
        if let Some(passkey) = self.auto_passkey {
            self.emit(AdapterEvent::ConfirmPasskey { address, passkey });
        }
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PairingTransport for FakeTransport {
    fn has_device(&self, address: &BluetoothAddress) -> bool {
        self.known.lock().contains(address)
    }

    async fn pair(&self, address: BluetoothAddress) -> Result<(), TransportError> {
        self.record(TransportCall::Pair(address));
        if self.pair_result.is_ok() {
            self.raise_passkey(address);
        }
        self.pair_result.clone()
    }

    async fn connect_device(&self, address: BluetoothAddress) -> Result<(), TransportError> {
        self.record(TransportCall::ConnectDevice(address));
        if self.connect_result.is_ok() {
            self.known.lock().insert(address);
            self.raise_passkey(address);
        }
        self.connect_result.clone()
    }

    fn confirm_pairing(&self, address: &BluetoothAddress) {
        self.record(TransportCall::ConfirmPairing(*address));
        self.emit(AdapterEvent::DevicePairedChanged { address: *address, paired: true });
    }

    fn cancel_pairing(&self, address: &BluetoothAddress) {
        self.record(TransportCall::CancelPairing(*address));
    }

    fn add_pairing_delegate(&self, id: PairerId) {
        self.record(TransportCall::AddPairingDelegate(id));
    }

    fn remove_pairing_delegate(&self, id: PairerId) {
        self.record(TransportCall::RemovePairingDelegate(id));
    }

    fn show_pairing_dialog(&self, address: &BluetoothAddress) {
        self.record(TransportCall::ShowPairingDialog(*address));
        if self.native_pairing {
            self.emit(AdapterEvent::DevicePairedChanged { address: *address, paired: true });
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

/// How a [`FakeGattClient`] answers a passkey write
#[derive(Debug, Clone)]
pub enum PasskeyReply {
    /// The provider's passkey block carrying the same passkey
    Echo,
    /// A provider's passkey block carrying a different passkey
    Passkey(u32),
    /// The written passkey under another message type
    MessageType(MessageType),
    Raw(Vec<u8>),
    Fail(PairFailure),
}

/// A provider's GATT server
pub struct FakeGattClient {
    passkey_reply: PasskeyReply,
    account_key_result: Result<(), AccountKeyFailure>,
    passkey_writes: Mutex<Vec<(MessageType, u32)>>,
    account_keys: Mutex<Vec<AccountKey>>,
}

impl FakeGattClient {
    pub fn new() -> Self {
        Self {
            passkey_reply: PasskeyReply::Echo,
            account_key_result: Ok(()),
            passkey_writes: Mutex::new(Vec::new()),
            account_keys: Mutex::new(Vec::new()),
        }
    }

    pub fn with_passkey_reply(mut self, reply: PasskeyReply) -> Self {
        self.passkey_reply = reply;
        self
    }

    pub fn with_account_key_result(mut self, result: Result<(), AccountKeyFailure>) -> Self {
        self.account_key_result = result;
        self
    }

    pub fn passkey_writes(&self) -> Vec<(MessageType, u32)> {
        self.passkey_writes.lock().clone()
    }

    pub fn account_keys(&self) -> Vec<AccountKey> {
        self.account_keys.lock().clone()
    }
}

impl Default for FakeGattClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GattServiceClient for FakeGattClient {
    async fn write_passkey(
        &self,
        message_type: MessageType,
        passkey: u32,
        encryptor: &dyn DataEncryptor,
    ) -> Result<Vec<u8>, PairFailure> {
        self.passkey_writes.lock().push((message_type, passkey));
        let block = match &self.passkey_reply {
            PasskeyReply::Echo => DecryptedPasskey::new(MessageType::ProvidersPasskey, passkey),
            PasskeyReply::Passkey(other) => {
                DecryptedPasskey::new(MessageType::ProvidersPasskey, *other)
            }
            PasskeyReply::MessageType(reply_type) => DecryptedPasskey::new(*reply_type, passkey),
            PasskeyReply::Raw(bytes) => return Ok(bytes.clone()),
            PasskeyReply::Fail(failure) => return Err(*failure),
        };
        Ok(encryptor.encrypt_bytes(&block.to_bytes()).to_vec())
    }

    async fn write_account_key(
        &self,
        account_key: AccountKey,
        _encryptor: &dyn DataEncryptor,
    ) -> Result<(), AccountKeyFailure> {
        self.account_keys.lock().push(account_key);
        self.account_key_result
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryCall {
    AssociateAccountKeyLocally(BluetoothAddress),
    WriteAccountAssociation(BluetoothAddress, AccountKey),
    CheckOptInStatus,
    UpdateOptInStatus(OptInStatus),
    FetchDeviceImages(BluetoothAddress),
}

pub struct FakeRepository {
    opt_in_status: Mutex<OptInStatus>,
    calls: Mutex<Vec<RepositoryCall>>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self { opt_in_status: Mutex::new(OptInStatus::Unknown), calls: Mutex::new(Vec::new()) }
    }

    pub fn with_opt_in_status(self, status: OptInStatus) -> Self {
        *self.opt_in_status.lock() = status;
        self
    }

    pub fn calls(&self) -> Vec<RepositoryCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: RepositoryCall) {
        self.calls.lock().push(call);
    }
}

impl Default for FakeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FastPairRepository for FakeRepository {
    async fn associate_account_key_locally(
        &self,
        device: Arc<Device>,
    ) -> Result<(), RepositoryError> {
        self.record(RepositoryCall::AssociateAccountKeyLocally(device.ble_address()));
        Ok(())
    }

    async fn write_account_association(
        &self,
        device: Arc<Device>,
        account_key: AccountKey,
    ) -> Result<(), RepositoryError> {
        self.record(RepositoryCall::WriteAccountAssociation(device.ble_address(), account_key));
        Ok(())
    }

    async fn check_opt_in_status(&self) -> Result<OptInStatus, RepositoryError> {
        self.record(RepositoryCall::CheckOptInStatus);
        Ok(*self.opt_in_status.lock())
    }

    async fn update_opt_in_status(&self, status: OptInStatus) -> Result<(), RepositoryError> {
        self.record(RepositoryCall::UpdateOptInStatus(status));
        *self.opt_in_status.lock() = status;
        Ok(())
    }

    async fn fetch_device_images(&self, device: Arc<Device>) -> Result<(), RepositoryError> {
        self.record(RepositoryCall::FetchDeviceImages(device.ble_address()));
        Ok(())
    }
}

/// Handshakes that succeed, fail, or wait to be released
pub struct FakeHandshakeFactory {
    result: Result<HandshakeChannel, PairFailure>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    attempts: Mutex<usize>,
}

impl FakeHandshakeFactory {
    pub fn succeeding(channel: HandshakeChannel) -> Self {
        Self { result: Ok(channel), gate: Mutex::new(None), attempts: Mutex::new(0) }
    }

    pub fn failing(failure: PairFailure) -> Self {
        Self { result: Err(failure), gate: Mutex::new(None), attempts: Mutex::new(0) }
    }

    /// Succeeds once the returned sender fires. A dropped sender fails the
    /// handshake with `HandshakeGattConnection`.
    pub fn gated(channel: HandshakeChannel) -> (Self, oneshot::Sender<()>) {
        let (release, gate) = oneshot::channel();
        let factory =
            Self { result: Ok(channel), gate: Mutex::new(Some(gate)), attempts: Mutex::new(0) };
        (factory, release)
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl HandshakeFactory for FakeHandshakeFactory {
    async fn perform_handshake(
        &self,
        _device: Arc<Device>,
    ) -> Result<HandshakeChannel, PairFailure> {
        *self.attempts.lock() += 1;
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.await.map_err(|_| PairFailure::HandshakeGattConnection)?;
        }
        self.result.clone()
    }
}

/// A callback invocation, as seen by [`OutcomeLog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Paired,
    PairFailed(PairFailure),
    AccountKeyFailure(AccountKeyFailure),
    ProcedureComplete,
}

/// Collects callback invocations in order
#[derive(Debug, Clone, Default)]
pub struct OutcomeLog(Arc<Mutex<Vec<Outcome>>>);

impl OutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks that append to this log
    pub fn callbacks(&self) -> PairerCallbacks {
        let paired = self.0.clone();
        let failed = self.0.clone();
        let account_key = self.0.clone();
        let complete = self.0.clone();
        PairerCallbacks::new()
            .on_paired(move |_| paired.lock().push(Outcome::Paired))
            .on_pair_failed(move |_, failure| failed.lock().push(Outcome::PairFailed(failure)))
            .on_account_key_failure(move |_, failure| {
                account_key.lock().push(Outcome::AccountKeyFailure(failure))
            })
            .on_pairing_procedure_complete(move |_| {
                complete.lock().push(Outcome::ProcedureComplete)
            })
    }

    pub fn outcomes(&self) -> Vec<Outcome> {
        self.0.lock().clone()
    }
}

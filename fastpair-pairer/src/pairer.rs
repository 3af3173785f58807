//! Fast Pair pairing state machine
//!
//! A [`Pairer`] never performs I/O of its own. Every asynchronous step is
//! queued as a [`Request`] stamped with the pairer's current [`Generation`];
//! whoever executes it feeds the outcome back through [`Pairer::advance`] as a
//! [`Completion`]. Cancelling (or dropping) the pairer bumps the generation, so
//! completions of work issued before the cancel are rejected as stale instead
//! of touching a pairer that has moved on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use fastpair_proto::{
    AccountKey, AccountKeyFailure, BluetoothAddress, DecryptedPasskey, MAX_PASSKEY, MessageType,
    PairFailure, Protocol,
};

use crate::gatt::{DataEncryptor, GattServiceClient};
use crate::{
    AdapterEvent, Device, FastPairHandshake, OptInStatus, PairerContext, PairerId, TransportError,
};

static NEXT_PAIRER_ID: AtomicU64 = AtomicU64::new(1);

/// Epoch of a pairer's outstanding work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairerState {
    AwaitingHandshake,
    AwaitingConnect,
    AwaitingPasskeyConfirmation,
    AwaitingPasskeyWrite,
    AwaitingPasskeyDecrypt,
    AwaitingOptInStatus,
    AwaitingAccountKeyWrite,
    /// Legacy devices: the platform dialog owns pairing
    AwaitingNativePairing,
    Done,
    Cancelled,
}

impl PairerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

/// Asynchronous work the pairer wants done
pub enum Operation {
    CreateHandshake {
        device: Arc<Device>,
    },
    Pair {
        address: BluetoothAddress,
    },
    ConnectByAddress {
        address: BluetoothAddress,
    },
    WritePasskey {
        gatt_client: Arc<dyn GattServiceClient>,
        data_encryptor: Arc<dyn DataEncryptor>,
        message_type: MessageType,
        passkey: u32,
    },
    ParseDecryptedPasskey {
        data_encryptor: Arc<dyn DataEncryptor>,
        response: Vec<u8>,
    },
    CheckOptInStatus,
    WriteAccountKey {
        gatt_client: Arc<dyn GattServiceClient>,
        data_encryptor: Arc<dyn DataEncryptor>,
        account_key: AccountKey,
    },
    // Fire and forget: nothing is fed back.
    FetchDeviceImages {
        device: Arc<Device>,
    },
    AssociateAccountKeyLocally {
        device: Arc<Device>,
    },
    WriteAccountAssociation {
        device: Arc<Device>,
        account_key: AccountKey,
    },
    UpdateOptInStatus {
        status: OptInStatus,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateHandshake { .. } => "CreateHandshake",
            Self::Pair { .. } => "Pair",
            Self::ConnectByAddress { .. } => "ConnectByAddress",
            Self::WritePasskey { .. } => "WritePasskey",
            Self::ParseDecryptedPasskey { .. } => "ParseDecryptedPasskey",
            Self::CheckOptInStatus => "CheckOptInStatus",
            Self::WriteAccountKey { .. } => "WriteAccountKey",
            Self::FetchDeviceImages { .. } => "FetchDeviceImages",
            Self::AssociateAccountKeyLocally { .. } => "AssociateAccountKeyLocally",
            Self::WriteAccountAssociation { .. } => "WriteAccountAssociation",
            Self::UpdateOptInStatus { .. } => "UpdateOptInStatus",
        }
    }

    /// Whether the pairer expects a [`Completion`] for this operation
    pub fn is_fire_and_forget(&self) -> bool {
        matches!(
            self,
            Self::FetchDeviceImages { .. }
                | Self::AssociateAccountKeyLocally { .. }
                | Self::WriteAccountAssociation { .. }
                | Self::UpdateOptInStatus { .. }
        )
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateHandshake { device }
            | Self::FetchDeviceImages { device }
            | Self::AssociateAccountKeyLocally { device } => {
                f.debug_struct(self.name()).field("device", &device.ble_address()).finish()
            }
            Self::Pair { address } | Self::ConnectByAddress { address } => {
                f.debug_struct(self.name()).field("address", address).finish()
            }
            Self::WritePasskey { message_type, passkey, .. } => f
                .debug_struct(self.name())
                .field("message_type", message_type)
                .field("passkey", passkey)
                .finish(),
            Self::ParseDecryptedPasskey { response, .. } => {
                f.debug_struct(self.name()).field("response_len", &response.len()).finish()
            }
            Self::WriteAccountKey { account_key, .. } => {
                f.debug_struct(self.name()).field("account_key", account_key).finish()
            }
            Self::WriteAccountAssociation { device, account_key } => f
                .debug_struct(self.name())
                .field("device", &device.ble_address())
                .field("account_key", account_key)
                .finish(),
            Self::UpdateOptInStatus { status } => {
                f.debug_struct(self.name()).field("status", status).finish()
            }
            Self::CheckOptInStatus => f.write_str(self.name()),
        }
    }
}

#[derive(Debug)]
pub struct Request {
    pub generation: Generation,
    pub operation: Operation,
}

/// Outcome of an [`Operation`] that is not fire and forget
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Handshake(Result<(), PairFailure>),
    Pair(Result<(), TransportError>),
    ConnectByAddress(Result<(), TransportError>),
    PasskeyWritten(Result<Vec<u8>, PairFailure>),
    PasskeyParsed(Option<DecryptedPasskey>),
    OptInStatus(OptInStatus),
    AccountKeyWritten {
        account_key: AccountKey,
        result: Result<(), AccountKeyFailure>,
    },
}

impl OperationResult {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "Handshake",
            Self::Pair(_) => "Pair",
            Self::ConnectByAddress(_) => "ConnectByAddress",
            Self::PasskeyWritten(_) => "PasskeyWritten",
            Self::PasskeyParsed(_) => "PasskeyParsed",
            Self::OptInStatus(_) => "OptInStatus",
            Self::AccountKeyWritten { .. } => "AccountKeyWritten",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub generation: Generation,
    pub result: OperationResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairerEvent {
    Completed(Completion),
    Adapter(AdapterEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("stale completion from {issued}, pairer is at {current}")]
    Stale { issued: Generation, current: Generation },
    #[error("{event} is not expected in state {state:?}")]
    Unexpected { state: PairerState, event: &'static str },
    #[error("event for foreign device {0}")]
    ForeignDevice(BluetoothAddress),
    #[error("pairer already finished")]
    Finished,
}

type DeviceCallback = Box<dyn FnOnce(&Arc<Device>) + Send>;
type PairFailedCallback = Box<dyn FnOnce(&Arc<Device>, PairFailure) + Send>;
type AccountKeyFailureCallback = Box<dyn FnOnce(&Arc<Device>, AccountKeyFailure) + Send>;

/// Result callbacks, each invoked at most once
#[derive(Default)]
pub struct PairerCallbacks {
    paired: Option<DeviceCallback>,
    pair_failed: Option<PairFailedCallback>,
    account_key_failure: Option<AccountKeyFailureCallback>,
    pairing_procedure_complete: Option<DeviceCallback>,
}

impl PairerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_paired(mut self, f: impl FnOnce(&Arc<Device>) + Send + 'static) -> Self {
        self.paired = Some(Box::new(f));
        self
    }

    pub fn on_pair_failed(
        mut self,
        f: impl FnOnce(&Arc<Device>, PairFailure) + Send + 'static,
    ) -> Self {
        self.pair_failed = Some(Box::new(f));
        self
    }

    pub fn on_account_key_failure(
        mut self,
        f: impl FnOnce(&Arc<Device>, AccountKeyFailure) + Send + 'static,
    ) -> Self {
        self.account_key_failure = Some(Box::new(f));
        self
    }

    pub fn on_pairing_procedure_complete(
        mut self,
        f: impl FnOnce(&Arc<Device>) + Send + 'static,
    ) -> Self {
        self.pairing_procedure_complete = Some(Box::new(f));
        self
    }

    fn is_empty(&self) -> bool {
        self.paired.is_none()
            && self.pair_failed.is_none()
            && self.account_key_failure.is_none()
            && self.pairing_procedure_complete.is_none()
    }
}

impl std::fmt::Debug for PairerCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairerCallbacks")
            .field("paired", &self.paired.is_some())
            .field("pair_failed", &self.pair_failed.is_some())
            .field("account_key_failure", &self.account_key_failure.is_some())
            .field("pairing_procedure_complete", &self.pairing_procedure_complete.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectKind {
    Pair,
    Address,
}

/// Drives one pairing attempt with one device
pub struct Pairer {
    id: PairerId,
    ctx: PairerContext,
    device: Arc<Device>,
    state: PairerState,
    generation: Generation,
    callbacks: PairerCallbacks,
    handshake: Option<Arc<FastPairHandshake>>,
    /// Outstanding Pair or ConnectByAddress
    connecting: Option<ConnectKind>,
    /// The platform has a pairing for this device that we have not confirmed
    platform_pairing: bool,
    delegate_registered: bool,
    pair_result_reported: bool,
    pairing_device_address: Option<BluetoothAddress>,
    expected_passkey: Option<u32>,
    connected_at: Option<Instant>,
    requests: Vec<Request>,
}

impl Pairer {
    /// Start pairing with `device`. Initial requests are queued immediately.
    pub fn new(ctx: PairerContext, device: Arc<Device>, callbacks: PairerCallbacks) -> Self {
        let mut pairer = Self {
            id: PairerId(NEXT_PAIRER_ID.fetch_add(1, Ordering::Relaxed)),
            ctx,
            device,
            state: PairerState::AwaitingHandshake,
            generation: Generation(0),
            callbacks,
            handshake: None,
            connecting: None,
            platform_pairing: false,
            delegate_registered: false,
            pair_result_reported: false,
            pairing_device_address: None,
            expected_passkey: None,
            connected_at: None,
            requests: Vec::new(),
        };
        pairer.start();
        pairer
    }

    pub fn id(&self) -> PairerId {
        self.id
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn state(&self) -> PairerState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Drain the operations queued since the last call
    pub fn take_requests(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }

    /// Feed one event to the state machine.
    ///
    /// Rejected events leave the pairer untouched.
    pub fn advance(&mut self, event: PairerEvent) -> Result<(), TransitionError> {
        if let PairerEvent::Completed(completion) = &event {
            if completion.generation != self.generation {
                return Err(TransitionError::Stale {
                    issued: completion.generation,
                    current: self.generation,
                });
            }
        }
        if self.state.is_terminal() {
            return Err(TransitionError::Finished);
        }
        match event {
            PairerEvent::Completed(completion) => self.on_completion(completion.result),
            PairerEvent::Adapter(event) => self.on_adapter_event(event),
        }
    }

    /// Abandon the attempt.
    ///
    /// Cancels an unconfirmed platform pairing, unregisters the pairing delegate
    /// and makes every outstanding completion stale. A pairer that already
    /// finished keeps its `Done` state.
    pub fn cancel(&mut self) {
        if self.platform_pairing {
            self.platform_pairing = false;
            let address = self.pairing_device_address.or_else(|| self.device.classic_address());
            if let Some(address) = address {
                log::info!("{}: cancelling platform pairing with {address}", self.id);
                self.ctx.transport.cancel_pairing(&address);
            }
        }
        self.unregister_delegate();
        self.generation = Generation(self.generation.0 + 1);
        self.requests.clear();
        if !self.state.is_terminal() {
            log::info!("{}: cancelled {} in {:?}", self.id, self.device, self.state);
            self.state = PairerState::Cancelled;
        }
    }

    fn start(&mut self) {
        if self.device.is_v1() {
            let address =
                self.device.classic_address().unwrap_or_else(|| self.device.ble_address());
            log::info!("{}: {} is a v1 device, showing the pairing dialog", self.id, self.device);
            self.ctx.transport.show_pairing_dialog(&address);
            self.state = PairerState::AwaitingNativePairing;
            return;
        }

        match self.ctx.handshakes.get(&self.device) {
            Some(handshake) if handshake.completed_successfully() => {
                log::info!("{}: reusing completed handshake for {}", self.id, self.device);
                self.handshake = Some(handshake);
                self.start_pairing();
                return;
            }
            Some(_) => {
                log::info!("{}: discarding stale handshake for {}", self.id, self.device);
                self.ctx.handshakes.erase(&self.device);
            }
            None => {}
        }

        log::info!("{}: creating handshake with {}", self.id, self.device);
        self.state = PairerState::AwaitingHandshake;
        self.request(Operation::CreateHandshake { device: self.device.clone() });
    }

    fn on_completion(&mut self, result: OperationResult) -> Result<(), TransitionError> {
        use OperationResult as R;
        use PairerState as S;

        match (self.state, result) {
            (S::AwaitingHandshake, R::Handshake(result)) => self.on_handshake_complete(result),
            (_, R::Pair(result)) if self.connecting == Some(ConnectKind::Pair) => {
                self.on_connect_complete(ConnectKind::Pair, result)
            }
            (_, R::ConnectByAddress(result)) if self.connecting == Some(ConnectKind::Address) => {
                self.on_connect_complete(ConnectKind::Address, result)
            }
            (S::AwaitingPasskeyWrite, R::PasskeyWritten(result)) => self.on_passkey_written(result),
            (S::AwaitingPasskeyDecrypt, R::PasskeyParsed(passkey)) => {
                self.on_passkey_parsed(passkey)
            }
            (S::AwaitingOptInStatus, R::OptInStatus(status)) => self.on_opt_in_status(status),
            (S::AwaitingAccountKeyWrite, R::AccountKeyWritten { account_key, result }) => {
                self.on_account_key_written(account_key, result)
            }
            (state, result) => {
                return Err(TransitionError::Unexpected { state, event: result.name() });
            }
        }
        Ok(())
    }

    fn on_adapter_event(&mut self, event: AdapterEvent) -> Result<(), TransitionError> {
        match event {
            AdapterEvent::ConfirmPasskey { address, passkey } => {
                let awaiting = matches!(
                    self.state,
                    PairerState::AwaitingConnect | PairerState::AwaitingPasskeyConfirmation
                );
                if !awaiting {
                    let state = self.state;
                    return Err(TransitionError::Unexpected { state, event: "ConfirmPasskey" });
                }
                if self.device.classic_address() != Some(address) {
                    return Err(TransitionError::ForeignDevice(address));
                }
                self.on_confirm_passkey(address, passkey);
            }
            AdapterEvent::DevicePairedChanged { address, paired } => {
                if self.state != PairerState::AwaitingNativePairing {
                    let state = self.state;
                    return Err(TransitionError::Unexpected { state, event: "DevicePairedChanged" });
                }
                if !self.device.has_address(&address) {
                    return Err(TransitionError::ForeignDevice(address));
                }
                if paired {
                    log::info!("{}: platform paired {}", self.id, self.device);
                    self.report_paired();
                    self.complete_procedure();
                }
            }
        }
        Ok(())
    }

    fn on_handshake_complete(&mut self, result: Result<(), PairFailure>) {
        if let Err(failure) = result {
            self.fail(failure);
            return;
        }

        let handshake =
            self.ctx.handshakes.get(&self.device).filter(|h| h.completed_successfully());
        let Some(handshake) = handshake else {
            log::warn!("{}: handshake for {} vanished after completing", self.id, self.device);
            self.fail(PairFailure::PairingDeviceLost);
            return;
        };
        if self.device.classic_address().is_none() {
            log::warn!("{}: handshake with {} disclosed no classic address", self.id, self.device);
            self.fail(PairFailure::PairingDeviceLost);
            return;
        }

        log::info!("{}: handshake with {} complete", self.id, self.device);
        self.handshake = Some(handshake);
        self.start_pairing();
    }

    fn start_pairing(&mut self) {
        if self.device.protocol() == Protocol::FastPairRetroactive {
            log::info!("{}: {} is already bonded, provisioning account key", self.id, self.device);
            self.attempt_send_account_key();
            return;
        }

        let Some(address) = self.device.classic_address() else {
            self.fail(PairFailure::PairingDeviceLost);
            return;
        };

        self.state = PairerState::AwaitingConnect;
        self.platform_pairing = true;
        if self.ctx.transport.has_device(&address) {
            log::info!("{}: pairing with known device {address}", self.id);
            self.connecting = Some(ConnectKind::Pair);
            self.request(Operation::Pair { address });
        } else {
            log::info!("{}: connecting to {address} by address", self.id);
            self.ctx.transport.add_pairing_delegate(self.id);
            self.delegate_registered = true;
            self.connecting = Some(ConnectKind::Address);
            self.request(Operation::ConnectByAddress { address });
        }
    }

    fn on_connect_complete(&mut self, kind: ConnectKind, result: Result<(), TransportError>) {
        self.connecting = None;
        if let Err(e) = result {
            log::warn!("{}: {kind:?} with {} failed: {e}", self.id, self.device);
            self.platform_pairing = false;
            self.fail(match kind {
                ConnectKind::Pair => PairFailure::PairingConnect,
                ConnectKind::Address => PairFailure::AddressConnect,
            });
            return;
        }

        self.connected_at = Some(Instant::now());
        if kind == ConnectKind::Address {
            self.request(Operation::FetchDeviceImages { device: self.device.clone() });
        }
        if self.state == PairerState::AwaitingConnect {
            log::info!("{}: connected to {}, awaiting passkey confirmation", self.id, self.device);
            self.state = PairerState::AwaitingPasskeyConfirmation;
        }
    }

    fn on_confirm_passkey(&mut self, address: BluetoothAddress, passkey: u32) {
        log::info!("{}: passkey confirmation requested for {address}", self.id);

        // The BLE instance can disappear between connecting and the passkey exchange.
        if self.ctx.handshakes.get(&self.device).is_none() {
            log::warn!("{}: handshake for {} is gone, aborting passkey", self.id, self.device);
            self.platform_pairing = false;
            self.ctx.transport.cancel_pairing(&address);
            self.fail(PairFailure::BleDeviceLostMidPair);
            return;
        }
        // the provider could never echo a passkey the block cannot carry
        if passkey > MAX_PASSKEY {
            log::warn!("{}: passkey {passkey} for {address} does not fit a passkey block", self.id);
            self.platform_pairing = false;
            self.ctx.transport.cancel_pairing(&address);
            self.fail(PairFailure::PasskeyMismatch);
            return;
        }
        let Some((gatt_client, data_encryptor)) = self.channel() else {
            self.fail(PairFailure::DataEncryptorRetrieval);
            return;
        };

        self.pairing_device_address = Some(address);
        self.expected_passkey = Some(passkey);
        self.state = PairerState::AwaitingPasskeyWrite;
        self.request(Operation::WritePasskey {
            gatt_client,
            data_encryptor,
            message_type: MessageType::SeekersPasskey,
            passkey,
        });
    }

    fn on_passkey_written(&mut self, result: Result<Vec<u8>, PairFailure>) {
        let response = match result {
            Ok(response) => response,
            Err(failure) => {
                self.fail(failure);
                return;
            }
        };
        let Some((_, data_encryptor)) = self.channel() else {
            self.fail(PairFailure::DataEncryptorRetrieval);
            return;
        };
        self.state = PairerState::AwaitingPasskeyDecrypt;
        self.request(Operation::ParseDecryptedPasskey { data_encryptor, response });
    }

    fn on_passkey_parsed(&mut self, passkey: Option<DecryptedPasskey>) {
        let Some(decrypted) = passkey else {
            self.fail(PairFailure::PasskeyDecryptFailure);
            return;
        };
        if decrypted.message_type != MessageType::ProvidersPasskey {
            self.fail(PairFailure::IncorrectPasskeyResponseType);
            return;
        }
        if Some(decrypted.passkey) != self.expected_passkey {
            self.fail(PairFailure::PasskeyMismatch);
            return;
        }
        let address = self.pairing_device_address.filter(|a| self.ctx.transport.has_device(a));
        let Some(address) = address else {
            self.fail(PairFailure::PairingDeviceLost);
            return;
        };

        log::info!("{}: passkeys match, confirming pairing with {address}", self.id);
        self.ctx.transport.confirm_pairing(&address);
        self.platform_pairing = false;
        self.report_paired();
        self.unregister_delegate();
        self.attempt_send_account_key();
    }

    /// Provision an account key once pairing succeeded.
    ///
    /// When provisioning is skipped (the login cannot save devices, or strict
    /// opt-in finds the account not opted in) `pairing_procedure_complete`
    /// still fires, so the caller always learns that the procedure ended.
    fn attempt_send_account_key(&mut self) {
        if self.device.protocol() == Protocol::FastPairSubsequent {
            log::info!("{}: {} already has an account key, saving locally", self.id, self.device);
            self.request(Operation::AssociateAccountKeyLocally { device: self.device.clone() });
            self.request_opt_in_update();
            self.complete_procedure();
            return;
        }

        let login = self.ctx.login.login_status();
        if !login.can_save_devices() {
            log::info!("{}: {login:?} cannot save devices, skipping account key", self.id);
            self.complete_procedure();
            return;
        }

        if self.ctx.config.strict_opt_in {
            self.state = PairerState::AwaitingOptInStatus;
            self.request(Operation::CheckOptInStatus);
            return;
        }
        self.write_account_key();
    }

    fn on_opt_in_status(&mut self, status: OptInStatus) {
        if status != OptInStatus::OptedIn {
            log::info!("{}: opt-in status is {status:?}, not writing account key", self.id);
            self.complete_procedure();
            return;
        }
        self.write_account_key();
    }

    fn write_account_key(&mut self) {
        let Some((gatt_client, data_encryptor)) = self.channel() else {
            self.fail_account_key(AccountKeyFailure::AccountKeyCharacteristicDiscovery);
            return;
        };
        let account_key = AccountKey::generate();
        log::info!("{}: writing account key to {}", self.id, self.device);
        self.state = PairerState::AwaitingAccountKeyWrite;
        self.request(Operation::WriteAccountKey { gatt_client, data_encryptor, account_key });
    }

    fn on_account_key_written(
        &mut self,
        account_key: AccountKey,
        result: Result<(), AccountKeyFailure>,
    ) {
        if let Err(failure) = result {
            self.fail_account_key(failure);
            return;
        }
        log::info!("{}: account key written to {}", self.id, self.device);
        self.device.set_account_key(account_key);
        let device = self.device.clone();
        self.request(Operation::WriteAccountAssociation { device, account_key });
        self.request_opt_in_update();
        self.complete_procedure();
    }

    fn request_opt_in_update(&mut self) {
        if self.ctx.config.saved_devices_enabled {
            self.request(Operation::UpdateOptInStatus { status: OptInStatus::OptedIn });
        }
    }

    fn channel(&self) -> Option<(Arc<dyn GattServiceClient>, Arc<dyn DataEncryptor>)> {
        let handshake = self.handshake.as_ref()?;
        Some((handshake.gatt_client()?, handshake.data_encryptor()?))
    }

    fn request(&mut self, operation: Operation) {
        log::debug!("{}: requesting {operation:?}", self.id);
        self.requests.push(Request { generation: self.generation, operation });
    }

    fn report_paired(&mut self) {
        if self.pair_result_reported {
            return;
        }
        self.pair_result_reported = true;
        self.callbacks.pair_failed = None;
        match self.connected_at {
            Some(at) => log::info!("{}: paired {} in {:?}", self.id, self.device, at.elapsed()),
            None => log::info!("{}: paired {}", self.id, self.device),
        }
        if let Some(paired) = self.callbacks.paired.take() {
            paired(&self.device);
        }
    }

    fn fail(&mut self, failure: PairFailure) {
        if self.pair_result_reported {
            log::warn!("{}: ignoring {failure} for {}, already reported", self.id, self.device);
            return;
        }
        log::warn!("{}: pairing {} failed: {failure}", self.id, self.device);
        self.pair_result_reported = true;
        self.callbacks.paired = None;
        self.finish();
        if let Some(pair_failed) = self.callbacks.pair_failed.take() {
            pair_failed(&self.device, failure);
        }
    }

    fn fail_account_key(&mut self, failure: AccountKeyFailure) {
        log::warn!("{}: account key provisioning for {} failed: {failure}", self.id, self.device);
        self.finish();
        if let Some(account_key_failure) = self.callbacks.account_key_failure.take() {
            account_key_failure(&self.device, failure);
        }
    }

    fn complete_procedure(&mut self) {
        log::info!("{}: pairing procedure for {} complete", self.id, self.device);
        self.finish();
        if let Some(complete) = self.callbacks.pairing_procedure_complete.take() {
            complete(&self.device);
        }
    }

    fn finish(&mut self) {
        self.state = PairerState::Done;
        self.unregister_delegate();
    }

    fn unregister_delegate(&mut self) {
        if self.delegate_registered {
            self.delegate_registered = false;
            self.ctx.transport.remove_pairing_delegate(self.id);
        }
    }
}

impl Drop for Pairer {
    fn drop(&mut self) {
        self.cancel();
        if !self.callbacks.is_empty() {
            log::debug!("{}: dropped with {:?} unused", self.id, self.callbacks);
        }
    }
}

impl std::fmt::Debug for Pairer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pairer")
            .field("id", &self.id)
            .field("device", &self.device.ble_address())
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish()
    }
}

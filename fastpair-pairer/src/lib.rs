//! Fast Pair seeker-side pairing engine
//!
//! [`Pairer`] is a pure state machine: it takes a device, the collaborators in a
//! [`PairerContext`] and a set of [`PairerCallbacks`], and walks the device
//! through handshake, platform pairing, passkey verification and account-key
//! provisioning. [`PairingDriver`] runs it on tokio.

mod config;
mod context;
mod device;
mod driver;
mod gatt;
mod handshake;
mod pairer;
mod repository;
mod state;
mod transport;

#[cfg(test)]
pub mod testing;

pub use config::{fastpair_home, ConfigError, PairerConfig, CONFIG_FILE};
pub use context::PairerContext;
pub use device::Device;
pub use driver::{PairingDriver, PairingReport};
pub use gatt::{AesDataEncryptor, DataEncryptor, GattServiceClient};
pub use handshake::{FastPairHandshake, HandshakeChannel, HandshakeFactory, HandshakeLookup};
pub use pairer::{
    Completion, Generation, Operation, OperationResult, Pairer, PairerCallbacks, PairerEvent,
    PairerState, Request, TransitionError,
};
pub use repository::{
    FastPairRepository, FixedLogin, LoginState, LoginStatus, OptInStatus, RepositoryError,
};
pub use state::{
    Association, SavedDeviceRecord, SavedDevices, SavedDevicesStore, SAVED_DEVICES_FILE,
};
pub use transport::{AdapterEvent, PairerId, PairingTransport, TransportError};

pub use fastpair_proto::{AccountKey, AccountKeyFailure, BluetoothAddress, PairFailure, Protocol};

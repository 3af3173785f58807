//! Platform Bluetooth adapter seam

use async_trait::async_trait;
use tokio::sync::broadcast;

use fastpair_proto::BluetoothAddress;

/// Identifies a pairer when it registers itself as the adapter's pairing delegate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairerId(pub u64);

impl std::fmt::Display for PairerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pairer#{}", self.0)
    }
}

/// Out-of-band notifications raised by the platform Bluetooth stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// The stack asks the pairing delegate to confirm a numeric comparison passkey
    ConfirmPasskey {
        address: BluetoothAddress,
        passkey: u32,
    },
    /// Some device's bonded state flipped
    DevicePairedChanged {
        address: BluetoothAddress,
        paired: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("device {0} not found")]
    DeviceNotFound(BluetoothAddress),
    #[error("operation failed: {0}")]
    Failed(String),
    #[error("authentication rejected")]
    AuthRejected,
    #[error("pairing cancelled")]
    Cancelled,
}

/// What the pairer needs from the platform Bluetooth adapter.
///
/// Synchronous methods mirror calls that return immediately on real stacks;
/// `pair` and `connect_device` resolve once the platform reports back.
#[async_trait]
pub trait PairingTransport: Send + Sync {
    /// Whether the platform already has a device object for `address`
    fn has_device(&self, address: &BluetoothAddress) -> bool;

    /// Pair with a device the platform already knows
    async fn pair(&self, address: BluetoothAddress) -> Result<(), TransportError>;

    /// Create a device object by connecting to `address`
    async fn connect_device(&self, address: BluetoothAddress) -> Result<(), TransportError>;

    fn confirm_pairing(&self, address: &BluetoothAddress);

    fn cancel_pairing(&self, address: &BluetoothAddress);

    fn add_pairing_delegate(&self, id: PairerId);

    fn remove_pairing_delegate(&self, id: PairerId);

    /// Hand a legacy device to the platform's own pairing dialog
    fn show_pairing_dialog(&self, address: &BluetoothAddress);

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent>;
}

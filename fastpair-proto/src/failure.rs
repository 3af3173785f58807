//! Terminal failure kinds reported by a pairing attempt

/// Everything that can end a pairing attempt before `paired` fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum PairFailure {
    /// Could not open the GATT connection used for the handshake
    #[error("failed to create gatt connection for the handshake")]
    HandshakeGattConnection,
    #[error("fast pair gatt service discovery failed")]
    GattServiceDiscovery,
    #[error("could not derive the data encryptor")]
    DataEncryptorRetrieval,
    #[error("key-based pairing characteristic not found")]
    KeyBasedPairingCharacteristicDiscovery,
    #[error("passkey characteristic not found")]
    PasskeyCharacteristicDiscovery,
    #[error("write to key-based pairing characteristic failed")]
    KeyBasedPairingCharacteristicWrite,
    #[error("timed out waiting for key-based pairing response")]
    KeyBasedPairingResponseTimeout,
    #[error("failed to decrypt key-based pairing response")]
    KeyBasedPairingResponseDecryptFailure,
    #[error("key-based pairing response has the wrong message type")]
    IncorrectKeyBasedPairingResponseType,
    #[error("could not start notify session on passkey characteristic")]
    PasskeyCharacteristicNotifySession,
    #[error("write to passkey characteristic failed")]
    PasskeyPairingCharacteristicWrite,
    #[error("timed out waiting for passkey response")]
    PasskeyResponseTimeout,
    #[error("failed to decrypt passkey response")]
    PasskeyDecryptFailure,
    #[error("passkey response has the wrong message type")]
    IncorrectPasskeyResponseType,
    #[error("provider passkey does not match the expected passkey")]
    PasskeyMismatch,
    /// The platform no longer knows the device being paired
    #[error("pairing device lost")]
    PairingDeviceLost,
    #[error("pairing with known device failed")]
    PairingConnect,
    #[error("connecting to device by address failed")]
    AddressConnect,
    /// The BLE handshake went away while the passkey exchange was in progress
    #[error("ble device lost mid pair")]
    BleDeviceLostMidPair,
}

/// Everything that can go wrong writing the account key after `paired`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum AccountKeyFailure {
    #[error("account key characteristic not found")]
    AccountKeyCharacteristicDiscovery,
    #[error("write to account key characteristic failed")]
    AccountKeyCharacteristicWrite,
}

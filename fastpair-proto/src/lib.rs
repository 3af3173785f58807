//! Fast Pair protocol - message types, passkey blocks and shared vocabulary
//!
//! Everything here is plain data: no I/O, no async. The pairing engine lives in
//! `fastpair-pairer`; this crate is what both it and the BLE controller agree on.

pub mod ble;

mod account_key;
mod address;
mod failure;

pub use account_key::{AccountKey, AccountKeyError, ACCOUNT_KEY_LEN, ACCOUNT_KEY_TAG};
pub use address::{AddressParseError, BluetoothAddress};
pub use failure::{AccountKeyFailure, PairFailure};

/// Length of every encrypted Fast Pair block
pub const BLOCK_LEN: usize = 16;

/// Length of the random salt padding a passkey block
pub const PASSKEY_SALT_LEN: usize = 12;

/// Largest passkey a passkey block can carry
pub const MAX_PASSKEY: u32 = 0x00FF_FFFF;

/// Which Fast Pair flow a discovered device goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// First pairing of a discoverable provider
    FastPairInitial,
    /// Provider already carries one of the user's account keys
    FastPairSubsequent,
    /// Provider was bonded through the regular OS flow; only the account key is written
    FastPairRetroactive,
}

/// Fast Pair version advertised by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPairVersion {
    /// Legacy providers: pairing is handed to the platform dialog
    V1,
    HigherThanV1,
}

impl FastPairVersion {
    /// Interpret the version additional data attached to a device.
    ///
    /// A single flag byte of `1` marks a v1 provider.
    pub fn from_additional_data(data: &[u8]) -> Self {
        match data {
            [1] => Self::V1,
            _ => Self::HigherThanV1,
        }
    }
}

/// Message type byte at the start of every decrypted block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    KeyBasedPairingRequest = 0x00,
    KeyBasedPairingResponse = 0x01,
    SeekersPasskey = 0x02,
    ProvidersPasskey = 0x03,
}

impl TryFrom<u8> for MessageType {
    type Error = PasskeyBlockError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::KeyBasedPairingRequest),
            0x01 => Ok(Self::KeyBasedPairingResponse),
            0x02 => Ok(Self::SeekersPasskey),
            0x03 => Ok(Self::ProvidersPasskey),
            other => Err(PasskeyBlockError::MessageType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasskeyBlockError {
    #[error("passkey block must be 16 bytes, got {0}")]
    Length(usize),
    #[error("unknown message type 0x{0:02x}")]
    MessageType(u8),
}

/// Plaintext passkey block exchanged over the passkey characteristic
///
/// Layout: `[type][passkey: 3 bytes big-endian][salt: 12 bytes]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptedPasskey {
    pub message_type: MessageType,
    /// Six digit passkey; only the low 24 bits travel on the wire
    pub passkey: u32,
    pub salt: [u8; PASSKEY_SALT_LEN],
}

impl DecryptedPasskey {
    pub fn new(message_type: MessageType, passkey: u32) -> Self {
        use rand::RngCore;
        let mut salt = [0u8; PASSKEY_SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self { message_type, passkey, salt }
    }

    /// Bits above [`MAX_PASSKEY`] are not encoded.
    pub fn to_bytes(&self) -> [u8; BLOCK_LEN] {
        let mut buf = [0u8; BLOCK_LEN];
        buf[0] = self.message_type as u8;
        buf[1..4].copy_from_slice(&self.passkey.to_be_bytes()[1..4]);
        buf[4..].copy_from_slice(&self.salt);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PasskeyBlockError> {
        if data.len() != BLOCK_LEN {
            return Err(PasskeyBlockError::Length(data.len()));
        }
        let message_type = MessageType::try_from(data[0])?;
        let passkey = u32::from_be_bytes([0, data[1], data[2], data[3]]);
        let mut salt = [0u8; PASSKEY_SALT_LEN];
        salt.copy_from_slice(&data[4..]);
        Ok(Self { message_type, passkey, salt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passkey_block_layout() {
        let block = DecryptedPasskey {
            message_type: MessageType::SeekersPasskey,
            passkey: 123456,
            salt: [0xAB; PASSKEY_SALT_LEN],
        };
        let bytes = block.to_bytes();
        assert_eq!(&bytes[..4], &[0x02, 0x01, 0xE2, 0x40]);
        assert!(bytes[4..].iter().all(|b| *b == 0xAB));
        assert_eq!(DecryptedPasskey::from_bytes(&bytes), Ok(block));
    }

    #[test]
    fn passkey_block_rejects_bad_input() {
        assert_eq!(DecryptedPasskey::from_bytes(&[0x03; 15]), Err(PasskeyBlockError::Length(15)));
        let mut bytes = [0u8; BLOCK_LEN];
        bytes[0] = 0x7f;
        assert_eq!(DecryptedPasskey::from_bytes(&bytes), Err(PasskeyBlockError::MessageType(0x7f)));
    }

    #[test]
    fn new_block_gets_random_salt() {
        let a = DecryptedPasskey::new(MessageType::ProvidersPasskey, 42);
        let b = DecryptedPasskey::new(MessageType::ProvidersPasskey, 42);
        assert_ne!(a.salt, b.salt);
    }

    #[test]
    fn version_flag() {
        assert_eq!(FastPairVersion::from_additional_data(&[1]), FastPairVersion::V1);
        assert_eq!(FastPairVersion::from_additional_data(&[2]), FastPairVersion::HigherThanV1);
        assert_eq!(FastPairVersion::from_additional_data(&[1, 0]), FastPairVersion::HigherThanV1);
    }
}

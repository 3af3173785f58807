//! Account keys written to providers after an initial or retroactive pairing

use std::fmt;

/// First byte of every account key
pub const ACCOUNT_KEY_TAG: u8 = 0x04;

/// Length of an account key in bytes
pub const ACCOUNT_KEY_LEN: usize = 16;

/// A 16-byte account key: the tag byte followed by 15 random bytes
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct AccountKey([u8; ACCOUNT_KEY_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountKeyError {
    #[error("account key must be 16 bytes, got {0}")]
    Length(usize),
    #[error("account key must start with 0x04, got 0x{0:02x}")]
    Tag(u8),
    #[error("invalid hex: {0}")]
    Hex(String),
}

impl AccountKey {
    /// Generate a fresh account key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; ACCOUNT_KEY_LEN];
        bytes[0] = ACCOUNT_KEY_TAG;
        rand::thread_rng().fill_bytes(&mut bytes[1..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AccountKeyError> {
        let bytes: [u8; ACCOUNT_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| AccountKeyError::Length(bytes.len()))?;
        if bytes[0] != ACCOUNT_KEY_TAG {
            return Err(AccountKeyError::Tag(bytes[0]));
        }
        Ok(Self(bytes))
    }

    pub fn from_hex(hex: &str) -> Result<Self, AccountKeyError> {
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|e| AccountKeyError::Hex(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0)
    }
}

// Keys are secrets; keep them out of logs.
impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountKey(0x{:02x}..)", self.0[0])
    }
}

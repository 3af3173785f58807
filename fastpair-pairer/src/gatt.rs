//! GATT service client and data encryptor seams
//!
//! A completed handshake hands the pairer one of each. The BLE controller crate
//! provides a btleplug-backed [`GattServiceClient`]; [`AesDataEncryptor`] is the
//! encryptor every real handshake ends up with.

use aes_gcm::aes::Aes128;
use aes_gcm::aes::cipher::generic_array::GenericArray;
use aes_gcm::aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use async_trait::async_trait;

use fastpair_proto::{
    AccountKey, AccountKeyFailure, DecryptedPasskey, MessageType, PairFailure, BLOCK_LEN,
};

/// Writes to the provider's Fast Pair characteristics
#[async_trait]
pub trait GattServiceClient: Send + Sync {
    /// Encrypt and write a passkey block, returning the provider's encrypted reply
    async fn write_passkey(
        &self,
        message_type: MessageType,
        passkey: u32,
        encryptor: &dyn DataEncryptor,
    ) -> Result<Vec<u8>, PairFailure>;

    /// Encrypt and write an account key
    async fn write_account_key(
        &self,
        account_key: AccountKey,
        encryptor: &dyn DataEncryptor,
    ) -> Result<(), AccountKeyFailure>;
}

/// Encrypts outgoing blocks and decodes the provider's replies
#[async_trait]
pub trait DataEncryptor: Send + Sync {
    fn encrypt_bytes(&self, block: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN];

    /// `None` when the bytes do not decrypt to a well formed passkey block
    async fn parse_decrypted_passkey(&self, encrypted: &[u8]) -> Option<DecryptedPasskey>;
}

/// AES-128, one block at a time, keyed with the handshake's shared secret
pub struct AesDataEncryptor {
    cipher: Aes128,
}

impl AesDataEncryptor {
    pub fn new(key: [u8; 16]) -> Self {
        Self { cipher: Aes128::new(GenericArray::from_slice(&key)) }
    }

    /// Key derivation used by the handshake: first 16 bytes of SHA-256(secret)
    pub fn from_shared_secret(secret: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(secret);
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);
        Self::new(key)
    }

    pub fn decrypt_bytes(&self, block: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut buf = GenericArray::clone_from_slice(block);
        self.cipher.decrypt_block(&mut buf);
        let mut out = [0u8; BLOCK_LEN];
        out.copy_from_slice(&buf);
        out
    }
}

#[async_trait]
impl DataEncryptor for AesDataEncryptor {
    fn encrypt_bytes(&self, block: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut buf = GenericArray::clone_from_slice(block);
        self.cipher.encrypt_block(&mut buf);
        let mut out = [0u8; BLOCK_LEN];
        out.copy_from_slice(&buf);
        out
    }

    async fn parse_decrypted_passkey(&self, encrypted: &[u8]) -> Option<DecryptedPasskey> {
        let block: &[u8; BLOCK_LEN] = encrypted.try_into().ok()?;
        let plain = self.decrypt_bytes(block);
        match DecryptedPasskey::from_bytes(&plain) {
            Ok(passkey) => Some(passkey),
            Err(e) => {
                log::warn!("failed to parse decrypted passkey: {e}");
                None
            }
        }
    }
}

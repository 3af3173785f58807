//! Account-backed storage of saved devices

use std::sync::Arc;

use async_trait::async_trait;

use fastpair_proto::{AccountKey, BluetoothAddress};

use crate::Device;

/// Whether the signed-in account agreed to save devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptInStatus {
    #[default]
    Unknown,
    OptedIn,
    OptedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("device {0} carries no account key")]
    MissingAccountKey(BluetoothAddress),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid repository data: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Account-key associations and opt-in state for the signed-in user
#[async_trait]
pub trait FastPairRepository: Send + Sync {
    /// Remember the key a subsequent-pairing device already carries
    async fn associate_account_key_locally(
        &self,
        device: Arc<Device>,
    ) -> Result<(), RepositoryError>;

    /// Persist a freshly written account key against the user's account
    async fn write_account_association(
        &self,
        device: Arc<Device>,
        account_key: AccountKey,
    ) -> Result<(), RepositoryError>;

    async fn check_opt_in_status(&self) -> Result<OptInStatus, RepositoryError>;

    async fn update_opt_in_status(&self, status: OptInStatus) -> Result<(), RepositoryError>;

    /// Warm the image cache for the device's model
    async fn fetch_device_images(&self, device: Arc<Device>) -> Result<(), RepositoryError>;
}

/// Who is signed in on this machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    NotLoggedIn,
    Locked,
    User,
    ChildUser,
    Guest,
    PublicAccount,
    KioskApp,
}

impl LoginStatus {
    /// Only regular and supervised accounts have somewhere to save devices
    pub fn can_save_devices(self) -> bool {
        matches!(self, Self::User | Self::ChildUser)
    }
}

pub trait LoginState: Send + Sync {
    fn login_status(&self) -> LoginStatus;
}

/// A login state that never changes
#[derive(Debug, Clone, Copy)]
pub struct FixedLogin(pub LoginStatus);

impl LoginState for FixedLogin {
    fn login_status(&self) -> LoginStatus {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_accounts_save_devices() {
        assert!(LoginStatus::User.can_save_devices());
        assert!(LoginStatus::ChildUser.can_save_devices());
        for status in [
            LoginStatus::NotLoggedIn,
            LoginStatus::Locked,
            LoginStatus::Guest,
            LoginStatus::PublicAccount,
            LoginStatus::KioskApp,
        ] {
            assert!(!status.can_save_devices(), "{status:?}");
        }
    }
}

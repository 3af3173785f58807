//! Saved devices - account keys and opt-in status persisted to disk

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use fastpair_proto::{AccountKey, BluetoothAddress};

use crate::{Device, FastPairRepository, OptInStatus, RepositoryError};

pub const SAVED_DEVICES_FILE: &str = "saved_devices.json";

/// How an account key reached the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Association {
    /// Key already on the provider, remembered on this machine only
    Local,
    /// Freshly written key, associated with the signed-in account
    Account,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedDeviceRecord {
    pub model_id: String,
    pub ble_address: BluetoothAddress,
    pub classic_address: Option<BluetoothAddress>,
    pub display_name: Option<String>,
    pub association: Association,
    pub saved_at: u64,
}

impl SavedDeviceRecord {
    fn new(device: &Device, association: Association) -> Self {
        Self {
            model_id: device.metadata_id().to_string(),
            ble_address: device.ble_address(),
            classic_address: device.classic_address(),
            display_name: device.display_name(),
            association,
            saved_at: current_timestamp(),
        }
    }

    pub fn has_address(&self, address: &BluetoothAddress) -> bool {
        self.ble_address == *address || self.classic_address == Some(*address)
    }
}

/// On-disk form, keyed by hex account key
#[derive(Debug, Default, Serialize, Deserialize)]
struct SerializableState {
    #[serde(default)]
    opt_in_status: OptInStatus,
    #[serde(default)]
    devices: BTreeMap<String, SavedDeviceRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct SavedDevices {
    pub opt_in_status: OptInStatus,
    pub devices: HashMap<AccountKey, SavedDeviceRecord>,
}

impl SavedDevices {
    /// Load from file, or start empty when there is none
    pub fn load(path: &Path) -> Result<Self, RepositoryError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        let ser: SerializableState = serde_json::from_str(&data)?;

        let devices = ser
            .devices
            .into_iter()
            .filter_map(|(k, v)| match AccountKey::from_hex(&k) {
                Ok(key) => Some((key, v)),
                Err(e) => {
                    log::warn!("skipping saved device with bad account key {k:?}: {e}");
                    None
                }
            })
            .collect();

        Ok(Self { opt_in_status: ser.opt_in_status, devices })
    }

    pub fn save(&self, path: &Path) -> Result<(), RepositoryError> {
        let ser = SerializableState {
            opt_in_status: self.opt_in_status,
            devices: self.devices.iter().map(|(k, v)| (k.to_hex(), v.clone())).collect(),
        };
        let data = serde_json::to_string_pretty(&ser)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Find the key saved for a device by either of its addresses
    pub fn find_by_address(
        &self,
        address: &BluetoothAddress,
    ) -> Option<(AccountKey, &SavedDeviceRecord)> {
        self.devices.iter().find(|(_, r)| r.has_address(address)).map(|(k, r)| (*k, r))
    }
}

/// [`FastPairRepository`] backed by a JSON file in the fastpair home
pub struct SavedDevicesStore {
    path: PathBuf,
    state: Arc<Mutex<SavedDevices>>,
}

impl SavedDevicesStore {
    pub fn open(home: &Path) -> Result<Self, RepositoryError> {
        fs::create_dir_all(home)?;
        let path = home.join(SAVED_DEVICES_FILE);
        let state = SavedDevices::load(&path)?;
        log::debug!("loaded {} saved devices from {}", state.devices.len(), path.display());
        Ok(Self { path, state: Arc::new(Mutex::new(state)) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn opt_in_status(&self) -> OptInStatus {
        self.state.lock().opt_in_status
    }

    /// Saved devices, oldest first
    pub fn devices(&self) -> Vec<(AccountKey, SavedDeviceRecord)> {
        let mut devices: Vec<_> =
            self.state.lock().devices.iter().map(|(k, v)| (*k, v.clone())).collect();
        devices.sort_by_key(|(_, r)| r.saved_at);
        devices
    }

    pub fn find_by_address(
        &self,
        address: &BluetoothAddress,
    ) -> Option<(AccountKey, SavedDeviceRecord)> {
        self.state.lock().find_by_address(address).map(|(k, r)| (k, r.clone()))
    }

    /// Apply `f` to a copy of the state, write the copy, then swap it in.
    ///
    /// The in-memory state only changes once the file is written. The write
    /// runs on the blocking pool, under the lock so updates land in order.
    async fn update(
        &self,
        f: impl FnOnce(&mut SavedDevices) + Send + 'static,
    ) -> Result<(), RepositoryError> {
        let path = self.path.clone();
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || {
            let mut state = state.lock();
            let mut next = state.clone();
            f(&mut next);
            next.save(&path)?;
            *state = next;
            Ok(())
        })
        .await?
    }

    async fn save_device(
        &self,
        account_key: AccountKey,
        device: &Device,
        association: Association,
    ) -> Result<(), RepositoryError> {
        log::info!("saving {device} ({association:?})");
        let record = SavedDeviceRecord::new(device, association);
        self.update(move |state| {
            state.devices.insert(account_key, record);
        })
        .await
    }
}

#[async_trait]
impl FastPairRepository for SavedDevicesStore {
    async fn associate_account_key_locally(
        &self,
        device: Arc<Device>,
    ) -> Result<(), RepositoryError> {
        let account_key = device
            .account_key()
            .ok_or(RepositoryError::MissingAccountKey(device.ble_address()))?;
        self.save_device(account_key, &device, Association::Local).await
    }

    async fn write_account_association(
        &self,
        device: Arc<Device>,
        account_key: AccountKey,
    ) -> Result<(), RepositoryError> {
        self.save_device(account_key, &device, Association::Account).await
    }

    async fn check_opt_in_status(&self) -> Result<OptInStatus, RepositoryError> {
        Ok(self.opt_in_status())
    }

    async fn update_opt_in_status(&self, status: OptInStatus) -> Result<(), RepositoryError> {
        self.update(move |state| state.opt_in_status = status).await
    }

    async fn fetch_device_images(&self, device: Arc<Device>) -> Result<(), RepositoryError> {
        let reason = format!("no image source for model {}", device.metadata_id());
        Err(RepositoryError::Unavailable(reason))
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastpair_proto::Protocol;

    const BLE: BluetoothAddress = BluetoothAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    const CLASSIC: BluetoothAddress = BluetoothAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    fn device() -> Arc<Device> {
        Arc::new(
            Device::new("718c17", BLE, Protocol::FastPairInitial)
                .with_classic_address(CLASSIC)
                .with_display_name("Pixel Buds"),
        )
    }

    #[tokio::test]
    async fn account_association_persists() {
        let dir = tempfile::tempdir().unwrap();
        let key = AccountKey::generate();

        let store = SavedDevicesStore::open(dir.path()).unwrap();
        store.write_account_association(device(), key).await.unwrap();
        store.update_opt_in_status(OptInStatus::OptedIn).await.unwrap();

        let reopened = SavedDevicesStore::open(dir.path()).unwrap();
        assert_eq!(reopened.opt_in_status(), OptInStatus::OptedIn);
        let (found, record) = reopened.find_by_address(&CLASSIC).unwrap();
        assert_eq!(found, key);
        assert_eq!(record.model_id, "718c17");
        assert_eq!(record.display_name.as_deref(), Some("Pixel Buds"));
        assert_eq!(record.association, Association::Account);

        let raw = fs::read_to_string(dir.path().join(SAVED_DEVICES_FILE)).unwrap();
        assert!(raw.contains(&key.to_hex()));
    }

    #[tokio::test]
    async fn local_association_needs_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = SavedDevicesStore::open(dir.path()).unwrap();

        let err = store.associate_account_key_locally(device()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::MissingAccountKey(address) if address == BLE));

        let key = AccountKey::generate();
        let keyed = device();
        keyed.set_account_key(key);
        store.associate_account_key_locally(keyed).await.unwrap();
        assert_eq!(store.devices()[0].0, key);
        assert_eq!(store.devices()[0].1.association, Association::Local);
    }

    #[tokio::test]
    async fn images_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = SavedDevicesStore::open(dir.path()).unwrap();
        let result = store.fetch_device_images(device()).await;
        assert!(matches!(result, Err(RepositoryError::Unavailable(_))));
    }

    #[test]
    fn bad_keys_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SAVED_DEVICES_FILE);
        let good = AccountKey::generate();
        let record = r#"{
            "model_id": "718c17",
            "ble_address": "11:22:33:44:55:66",
            "classic_address": null,
            "display_name": null,
            "association": "local",
            "saved_at": 1
        }"#;
        fs::write(
            &path,
            format!(
                r#"{{"opt_in_status":"opted_out","devices":{{"{}":{record},"zz":{record}}}}}"#,
                good.to_hex()
            ),
        )
        .unwrap();

        let state = SavedDevices::load(&path).unwrap();
        assert_eq!(state.opt_in_status, OptInStatus::OptedOut);
        assert_eq!(state.devices.len(), 1);
        assert!(state.devices.contains_key(&good));
    }

    #[tokio::test]
    async fn failed_write_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = SavedDevicesStore::open(dir.path()).unwrap();
        store.update_opt_in_status(OptInStatus::OptedOut).await.unwrap();

        // a directory where the file should be makes every write fail
        fs::remove_file(store.path()).unwrap();
        fs::create_dir(store.path()).unwrap();

        let err = store.update_opt_in_status(OptInStatus::OptedIn).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Io(_)));
        assert_eq!(store.opt_in_status(), OptInStatus::OptedOut);

        assert!(store.write_account_association(device(), AccountKey::generate()).await.is_err());
        assert!(store.devices().is_empty());
        assert!(store.find_by_address(&BLE).is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SAVED_DEVICES_FILE), "{not json").unwrap();
        let result = SavedDevicesStore::open(dir.path());
        assert!(matches!(result, Err(RepositoryError::Serialization(_))));
    }
}

//! Scanning for Fast Pair providers
//!
//! Providers advertise service data under the 16-bit Fast Pair UUID. A
//! discoverable provider puts its 3-byte model id there.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{BDAddr, Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use uuid::Uuid;

use fastpair_proto::BluetoothAddress;
use fastpair_proto::ble::{SERVICE_UUID_16, parse_model_id};

/// A provider seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPairAdvertisement {
    pub name: Option<String>,
    pub address: BluetoothAddress,
    pub rssi: Option<i16>,
    /// `None` for not-discoverable advertisements
    pub model_id: Option<u32>,
}

impl FastPairAdvertisement {
    /// Build from raw advertisement fields, `None` unless Fast Pair service data is present
    pub fn parse(
        address: BluetoothAddress,
        name: Option<String>,
        rssi: Option<i16>,
        service_data: &HashMap<Uuid, Vec<u8>>,
    ) -> Option<Self> {
        let data = service_data.get(&service_uuid())?;
        Some(Self { name, address, rssi, model_id: parse_model_id(data) })
    }

    /// Model id in the hex form used as device metadata id
    pub fn metadata_id(&self) -> Option<String> {
        self.model_id.map(|id| format!("{id:06x}"))
    }
}

pub fn service_uuid() -> Uuid {
    uuid_from_u16(SERVICE_UUID_16)
}

pub fn to_address(address: BDAddr) -> BluetoothAddress {
    BluetoothAddress::new(address.into_inner())
}

pub fn to_bdaddr(address: BluetoothAddress) -> BDAddr {
    BDAddr::from(address.to_bytes())
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, Box<dyn std::error::Error>> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or_else(|| "No Bluetooth adapter found".into())
}

/// Scan for Fast Pair providers
pub async fn scan(
    adapter: &Adapter,
    duration_secs: u64,
) -> Result<Vec<FastPairAdvertisement>, Box<dyn std::error::Error>> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(duration_secs)).await;

    let peripherals = adapter.peripherals().await?;
    let mut found = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let address = to_address(peripheral.address());
            let ad = FastPairAdvertisement::parse(
                address,
                props.local_name,
                props.rssi,
                &props.service_data,
            );
            if let Some(ad) = ad {
                log::debug!("fast pair advertisement from {address}: {ad:?}");
                found.push(ad);
            }
        }
    }

    adapter.stop_scan().await?;
    Ok(found)
}

/// Scan until a peripheral with `address` shows up
pub async fn find_peripheral(
    adapter: &Adapter,
    address: BluetoothAddress,
    duration_secs: u64,
) -> Result<Peripheral, Box<dyn std::error::Error>> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(Duration::from_secs(duration_secs)).await;

    let target = to_bdaddr(address);
    let peripherals = adapter.peripherals().await?;
    adapter.stop_scan().await?;

    peripherals
        .into_iter()
        .find(|p| p.address() == target)
        .ok_or_else(|| format!("No peripheral with address {address}").into())
}

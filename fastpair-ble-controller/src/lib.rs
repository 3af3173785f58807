//! Fast Pair BLE Controller
//!
//! Scans for Fast Pair providers and talks to their GATT service through
//! btleplug.
//!
//! # Example
//!
//! ```ignore
//! use fastpair_ble_controller::{ble, gatt::BtleplugGattClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = ble::get_adapter().await?;
//!     for ad in ble::scan(&adapter, 5).await? {
//!         println!("{} {:06X?}", ad.address, ad.model_id);
//!     }
//!
//!     let peripheral = ble::find_peripheral(&adapter, "11:22:33:44:55:66".parse()?, 5).await?;
//!     let client = BtleplugGattClient::connect(peripheral).await?;
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod gatt;

//! Fast Pair seeker tool
//!
//! Scans for Fast Pair providers, inspects their GATT service, and runs
//! pairing attempts against a simulated provider, saving account keys to the
//! fastpair home.

mod simulated;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use fastpair_ble_controller::ble;
use fastpair_ble_controller::gatt::{BtleplugGattClient, FAST_PAIR_CHARACTERISTICS};
use fastpair_pairer::{
    BluetoothAddress, PairerCallbacks, PairerConfig, PairingDriver, Protocol, SavedDevicesStore,
    fastpair_home,
};

use crate::simulated::{SIMULATED_BLE, Simulation};

#[derive(Parser)]
#[command(name = "fastpair-ble")]
#[command(about = "Fast Pair seeker tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for Fast Pair providers
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Connect to a provider and list its Fast Pair characteristics
    Inspect {
        /// BLE address of the provider
        address: BluetoothAddress,
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Pair with a simulated provider
    Simulate {
        #[arg(short, long, value_enum, default_value = "initial")]
        protocol: SimulatedProtocol,
        /// Simulate a legacy provider that pairs through the platform dialog
        #[arg(long)]
        v1: bool,
        /// Provider answers with a different passkey
        #[arg(long)]
        mismatch: bool,
        /// Check the opt-in status before writing the account key
        #[arg(long)]
        strict_opt_in: bool,
        /// Give up after this many seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },
    /// List saved devices
    Devices,
    /// Show the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum SimulatedProtocol {
    Initial,
    Subsequent,
    Retroactive,
}

impl From<SimulatedProtocol> for Protocol {
    fn from(p: SimulatedProtocol) -> Self {
        match p {
            SimulatedProtocol::Initial => Protocol::FastPairInitial,
            SimulatedProtocol::Subsequent => Protocol::FastPairSubsequent,
            SimulatedProtocol::Retroactive => Protocol::FastPairRetroactive,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let home = fastpair_home()?;
    let config = PairerConfig::load_or_create(&home)?;

    match cli.command {
        Commands::Scan { duration } => {
            scan_devices(duration).await?;
        }
        Commands::Inspect { address, duration } => {
            inspect(address, duration).await?;
        }
        Commands::Simulate { protocol, v1, mismatch, strict_opt_in, timeout } => {
            let strict_opt_in = config.strict_opt_in || strict_opt_in;
            let config = PairerConfig { strict_opt_in, ..config };
            let simulation = Simulation { protocol: protocol.into(), v1, mismatch };
            simulate(&home, config, simulation, timeout).await?;
        }
        Commands::Devices => {
            list_devices(&home)?;
        }
        Commands::Config => {
            println!("# {}", PairerConfig::path(&home).display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn scan_devices(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for Fast Pair providers ({} seconds)...", duration);

    let adapter = ble::get_adapter().await?;
    let found = ble::scan(&adapter, duration).await?;

    println!("\nFound {} providers:", found.len());
    for ad in found {
        let name = ad.name.as_deref().unwrap_or("Unknown");
        let rssi = ad.rssi.map(|r| format!("{} dBm", r)).unwrap_or_else(|| "N/A".to_string());
        let model = ad.metadata_id().unwrap_or_else(|| "not discoverable".to_string());
        println!("  {} ({}) RSSI: {} model: {}", name, ad.address, rssi, model);
    }
    Ok(())
}

async fn inspect(
    address: BluetoothAddress,
    duration: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Looking for {} ({} seconds)...", address, duration);

    let adapter = ble::get_adapter().await?;
    let peripheral = ble::find_peripheral(&adapter, address, duration).await?;
    let client = BtleplugGattClient::connect(peripheral).await?;

    println!("Fast Pair characteristics on {}:", address);
    for (name, uuid) in FAST_PAIR_CHARACTERISTICS {
        let status = if client.has_characteristic(uuid) { "present" } else { "missing" };
        println!("  {:<18} {} {}", name, uuid, status);
    }
    client.disconnect().await;
    Ok(())
}

async fn simulate(
    home: &Path,
    config: PairerConfig,
    simulation: Simulation,
    timeout: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = simulation.context(Arc::new(SavedDevicesStore::open(home)?), config);

    let callbacks = PairerCallbacks::new()
        .on_paired(|device| println!("Paired with {device}"))
        .on_pair_failed(|device, failure| println!("Pairing with {device} failed: {failure}"))
        .on_account_key_failure(|device, failure| {
            println!("Account key for {device} failed: {failure}")
        })
        .on_pairing_procedure_complete(|device| {
            println!("Pairing procedure for {device} complete")
        });

    println!("Simulating {:?} pairing with {}...", simulation.protocol, SIMULATED_BLE);
    let driver = PairingDriver::new(ctx, Arc::new(simulation.device()), callbacks);
    let state = driver
        .run_until(tokio::time::sleep(Duration::from_secs(timeout)))
        .await
        .wait_for_background()
        .await;
    println!("Finished in state {:?}", state);
    Ok(())
}

fn list_devices(home: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = SavedDevicesStore::open(home)?;
    let devices = store.devices();

    println!("Opt-in status: {:?}", store.opt_in_status());
    println!("{} saved devices:", devices.len());
    for (key, record) in devices {
        let name = record.display_name.as_deref().unwrap_or("Unknown");
        let classic =
            record.classic_address.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "  {} model {} ble {} classic {} ({:?}) key {}",
            name,
            record.model_id,
            record.ble_address,
            classic,
            record.association,
            key.to_hex()
        );
    }
    Ok(())
}

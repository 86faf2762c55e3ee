//! Tapayoka BLE Controller
//!
//! App-side client for discovering, attesting and provisioning Tapayoka vendor
//! devices. The same three operations run over BLE or, without radio hardware,
//! over a WebSocket to a device or simulator.
//!
//! # Example
//!
//! ```ignore
//! use tapayoka_ble_controller::{Config, select, provision_and_confirm};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let transport = select(&config);
//!
//!     let devices = transport.scan(config.scan_timeout).await;
//!     for device in &devices {
//!         println!("{} ({}) {} dBm", device.name, device.id, device.rssi);
//!     }
//!
//!     if let Some(device) = devices.first() {
//!         let info = transport.read_device_info(&device.id).await;
//!         println!("{info:?}");
//!
//!         let outcome = provision_and_confirm(
//!             transport.as_ref(),
//!             &device.id,
//!             "0x742d35cc6634c0532925a3b844bc454e4438f44e",
//!             None,
//!         )
//!         .await;
//!         println!("{outcome:?}");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod attestation;
pub mod ble;
pub mod config;
pub mod connection;
mod error;
mod provision;
pub mod registry;
pub mod scan;
mod transport;
pub mod ws;

pub use attestation::{AttestationError, AttestationVerifier, VerifiedDeviceInfo};
pub use config::{Config, TransportKind};
pub use error::{Error, Result};
pub use provision::{ProvisionOutcome, UnconfirmedReason, provision_and_confirm};
pub use transport::{DeviceTransport, select};

pub use tapayoka_proto::{CommandStatus, DeviceInfo, DiscoveredDevice, ProvisionCommand};

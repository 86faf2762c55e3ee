//! BLE transport for Tapayoka devices
//!
//! Scans for advertisements, reads the device info characteristic and writes
//! the command characteristic. Operations against one device are serialized,
//! most radio stacks allow a single GATT transaction per link.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

use tapayoka_proto::ble::{decode_device_info, encode_command};
use tapayoka_proto::{DeviceInfo, DiscoveredDevice, ProvisionCommand};

use crate::config::DEFAULT_TIMEOUT;
use crate::scan::{Advertisement, SESSION_TTL, ScanSession, collect_devices};
use crate::{DeviceTransport, Error, Result};

// Same values as tapayoka_proto::ble, as typed UUIDs
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x000088f4_0000_1000_8000_00805f9b34fb);
pub const DEVICE_INFO_UUID: Uuid = Uuid::from_u128(0x00000e32_0000_1000_8000_00805f9b34fb);
pub const COMMAND_UUID: Uuid = Uuid::from_u128(0x00000e33_0000_1000_8000_00805f9b34fb);

pub struct BleTransport {
    adapter: OnceCell<Adapter>,
    session: Mutex<ScanSession<Peripheral>>,
    device_locks: Mutex<DeviceLocks>,
    scan_timeout: Duration,
    request_timeout: Duration,
}

impl Default for BleTransport {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_TIMEOUT)
    }
}

impl BleTransport {
    /// The adapter is acquired on first use, so construction never touches the radio
    ///
    /// `scan_timeout` bounds the scan run when an operation names a device the
    /// current session does not know; `request_timeout` bounds each GATT
    /// transaction (connect, discovery and the read or write).
    pub fn new(scan_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            adapter: OnceCell::new(),
            session: Mutex::new(ScanSession::new(SESSION_TTL)),
            device_locks: Mutex::new(HashMap::new()),
            scan_timeout,
            request_timeout,
        }
    }

    /// Get the default Bluetooth adapter
    async fn adapter(&self) -> Result<&Adapter> {
        self.adapter
            .get_or_try_init(|| async {
                let manager = Manager::new().await?;
                let adapters = manager.adapters().await?;
                adapters.into_iter().next().ok_or(Error::NoAdapter)
            })
            .await
    }

    async fn try_scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let adapter = self.adapter().await?;
        let mut events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;

        let mut ads = Vec::new();
        let mut peripherals: HashMap<String, Peripheral> = HashMap::new();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let event = match tokio::time::timeout_at(deadline, events.next()).await {
                Ok(Some(event)) => event,
                Ok(None) | Err(_) => break,
            };
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            match adapter.peripheral(&id).await {
                Ok(peripheral) => observe(peripheral, &mut ads, &mut peripherals).await,
                Err(e) => tracing::debug!("advertisement from unknown peripheral: {e}"),
            }
        }

        // Devices the OS already knew about may not raise discovery events
        let known = adapter.peripherals().await;
        let stopped = adapter.stop_scan().await;
        for peripheral in known? {
            observe(peripheral, &mut ads, &mut peripherals).await;
        }
        stopped?;

        let devices = collect_devices(ads);
        let mut session = ScanSession::new(SESSION_TTL);
        for device in &devices {
            if let Some(peripheral) = peripherals.remove(&device.id) {
                session.insert(device, peripheral);
            }
        }
        prune_device_locks(&mut *self.device_locks.lock().await, &session);
        *self.session.lock().await = session;

        Ok(devices)
    }

    /// Resolve an id or name, scanning first if the current session lacks it
    ///
    /// Each process starts with an empty session, so a device id remembered
    /// from an earlier run is found again by scanning.
    async fn peripheral(&self, device_id: &str) -> Result<Peripheral> {
        if let Some(peripheral) = self.session.lock().await.resolve(device_id).cloned() {
            return Ok(peripheral);
        }

        tracing::info!(device_id, "device not in the current scan session, scanning");
        self.try_scan(self.scan_timeout).await?;
        self.session
            .lock()
            .await
            .resolve(device_id)
            .cloned()
            .ok_or_else(|| Error::UnknownDevice(device_id.to_string()))
    }

    async fn device_lock(&self, device: &Peripheral) -> Arc<Mutex<()>> {
        self.device_locks
            .lock()
            .await
            .entry(device.address().to_string())
            .or_default()
            .clone()
    }

    async fn try_read_device_info(&self, device_id: &str) -> Result<DeviceInfo> {
        let device = self.peripheral(device_id).await?;
        let lock = self.device_lock(&device).await;
        let _guard = lock.lock().await;

        let read = bounded(self.request_timeout, async {
            let characteristic = find_characteristic(&device, DEVICE_INFO_UUID).await?;
            Ok::<_, Error>(device.read(&characteristic).await?)
        })
        .await;
        self.release(&device).await;

        parse_device_info(&read?)
    }

    async fn try_setup_server_wallet(&self, device_id: &str, address: &str) -> Result<()> {
        let data = encode_command(&ProvisionCommand::setup_server(address))?;
        let device = self.peripheral(device_id).await?;
        let lock = self.device_lock(&device).await;
        let _guard = lock.lock().await;

        let written = bounded(self.request_timeout, async {
            let characteristic = find_characteristic(&device, COMMAND_UUID).await?;
            device
                .write(&characteristic, &data, WriteType::WithResponse)
                .await?;
            Ok::<_, Error>(())
        })
        .await;
        self.release(&device).await;

        written
    }

    /// Disconnect after an operation, including one that timed out
    async fn release(&self, device: &Peripheral) {
        match tokio::time::timeout(self.request_timeout, device.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("disconnect failed: {e}"),
            Err(_) => tracing::debug!("disconnect timed out"),
        }
    }
}

type DeviceLocks = HashMap<String, Arc<Mutex<()>>>;

/// Forget locks of devices the new session no longer holds
///
/// A lock taken by a running operation stays alive through its `Arc`.
fn prune_device_locks<P>(locks: &mut DeviceLocks, session: &ScanSession<P>) {
    locks.retain(|id, _| session.contains(id));
}

/// Run one GATT transaction, failing with [`Error::Timeout`] past `timeout`
async fn bounded<T>(timeout: Duration, op: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, op)
        .await
        .map_err(|_| Error::Timeout(timeout))?
}

/// Decode a device info value; one without attestation is rejected
fn parse_device_info(value: &[u8]) -> Result<DeviceInfo> {
    let info = decode_device_info(value)?;
    info.validate()?;
    Ok(info)
}

async fn observe(
    peripheral: Peripheral,
    ads: &mut Vec<Advertisement>,
    peripherals: &mut HashMap<String, Peripheral>,
) {
    let props = match peripheral.properties().await {
        Ok(Some(props)) => props,
        Ok(None) => return,
        Err(e) => {
            tracing::debug!("failed to read advertisement properties: {e}");
            return;
        }
    };
    let id = peripheral.address().to_string();
    ads.push(Advertisement {
        id: id.clone(),
        name: props.local_name,
        rssi: props.rssi,
    });
    peripherals.insert(id, peripheral);
}

/// Connect if needed and find a characteristic of the Tapayoka service
async fn find_characteristic(device: &Peripheral, uuid: Uuid) -> Result<Characteristic> {
    if !device.is_connected().await? {
        device.connect().await?;
    }
    device.discover_services().await?;

    device
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid && c.service_uuid == SERVICE_UUID)
        .ok_or(Error::CharacteristicNotFound(uuid))
}

#[async_trait]
impl DeviceTransport for BleTransport {
    fn name(&self) -> &'static str {
        "ble"
    }

    async fn scan(&self, timeout: Duration) -> Vec<DiscoveredDevice> {
        match self.try_scan(timeout).await {
            Ok(devices) => {
                tracing::info!(count = devices.len(), "ble scan finished");
                devices
            }
            Err(e) => {
                tracing::warn!("ble scan failed: {e}");
                Vec::new()
            }
        }
    }

    async fn read_device_info(&self, device_id: &str) -> Option<DeviceInfo> {
        self.try_read_device_info(device_id)
            .await
            .inspect_err(|e| tracing::warn!(device_id, "ble read device info failed: {e}"))
            .ok()
    }

    async fn setup_server_wallet(&self, device_id: &str, server_wallet_address: &str) -> bool {
        match self.try_setup_server_wallet(device_id, server_wallet_address).await {
            Ok(()) => {
                tracing::info!(device_id, "SETUP_SERVER written");
                true
            }
            Err(e) => {
                tracing::warn!(device_id, "ble setup server wallet failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapayoka_proto::ble::encode_device_info;

    #[test]
    fn uuids_match_proto() {
        assert_eq!(SERVICE_UUID, Uuid::parse_str(tapayoka_proto::ble::SERVICE_UUID).unwrap());
        assert_eq!(
            DEVICE_INFO_UUID,
            Uuid::parse_str(tapayoka_proto::ble::DEVICE_INFO_UUID).unwrap()
        );
        assert_eq!(COMMAND_UUID, Uuid::parse_str(tapayoka_proto::ble::COMMAND_UUID).unwrap());
    }

    #[test]
    fn device_info_without_attestation_is_rejected() {
        // version, wallet, flags, then zero-length firmware, payload and signature
        let mut value = vec![0x01];
        value.extend_from_slice(&[0xab; 20]);
        value.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(value.len(), 26);
        assert!(decode_device_info(&value).is_ok());

        assert!(matches!(parse_device_info(&value), Err(Error::Decode(_))));
    }

    #[test]
    fn attested_device_info_is_accepted() {
        let info = DeviceInfo {
            wallet_address: format!("0x{}", "ab".repeat(20)),
            firmware_version: "1.0.0".to_string(),
            has_server_wallet: false,
            signed_payload: r#"{"v":1}"#.to_string(),
            signature: "abcd".to_string(),
        };
        let value = encode_device_info(&info).unwrap();
        assert_eq!(parse_device_info(&value).unwrap(), info);
    }

    #[tokio::test]
    async fn stalled_transaction_times_out() {
        let stalled = bounded(Duration::from_millis(20), std::future::pending::<Result<()>>());
        let stalled = stalled.await;
        assert!(matches!(stalled, Err(Error::Timeout(_))));

        let done = bounded(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(done.unwrap(), 7);
    }

    #[tokio::test]
    async fn rescan_prunes_locks_of_vanished_devices() {
        let devices = collect_devices([Advertisement {
            id: "AA:BB:CC:DD:EE:01".to_string(),
            name: Some("tapayoka-ab12cd34".to_string()),
            rssi: Some(-40),
        }]);
        let mut session = ScanSession::new(SESSION_TTL);
        session.insert(&devices[0], ());

        let held = Arc::new(Mutex::new(()));
        let mut locks = DeviceLocks::new();
        locks.insert("AA:BB:CC:DD:EE:01".to_string(), Arc::default());
        locks.insert("AA:BB:CC:DD:EE:02".to_string(), held.clone());

        let _guard = held.lock().await;
        prune_device_locks(&mut locks, &session);

        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key("AA:BB:CC:DD:EE:01"));
        assert!(held.try_lock().is_err());
    }
}

//! The three device operations and the startup-time transport choice

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tapayoka_proto::{DeviceInfo, DiscoveredDevice};

use crate::ble::BleTransport;
use crate::config::{Config, TransportKind};
use crate::ws::WsTransport;

/// Discovery, attestation read and provisioning over one physical channel
///
/// None of the operations fail: errors are logged and reported as an empty
/// list, `None` or `false`.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Short name for logs ("ble" or "ws")
    fn name(&self) -> &'static str;

    /// Devices advertising the Tapayoka name prefix, in discovery order
    async fn scan(&self, timeout: Duration) -> Vec<DiscoveredDevice>;

    /// Device info of a scanned device, `None` on any failure
    async fn read_device_info(&self, device_id: &str) -> Option<DeviceInfo>;

    /// Send `SETUP_SERVER`; `true` only on an explicit acknowledgement
    ///
    /// This only certifies the transport-level ack. Read the device info again
    /// to confirm `has_server_wallet` flipped, see [`crate::provision_and_confirm`].
    async fn setup_server_wallet(&self, device_id: &str, server_wallet_address: &str) -> bool;
}

/// Build the transport named by `config`
///
/// Call once at startup and share the result; the choice holds for the whole
/// process.
pub fn select(config: &Config) -> Arc<dyn DeviceTransport> {
    let transport: Arc<dyn DeviceTransport> = match config.transport {
        TransportKind::Ble => Arc::new(BleTransport::new(
            config.scan_timeout,
            config.request_timeout,
        )),
        TransportKind::Ws => Arc::new(WsTransport::new(
            config.ws_device_url.clone(),
            config.request_timeout,
        )),
    };
    tracing::info!(transport = transport.name(), "device transport selected");
    transport
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_follows_config() {
        let mut config = Config::default();
        assert_eq!(select(&config).name(), "ble");

        config.transport = TransportKind::Ws;
        assert_eq!(select(&config).name(), "ws");
    }
}

//! WebSocket transport for development without radio hardware
//!
//! The device (or `tapayoka-sim`) is reached at an endpoint URL, which doubles
//! as the device id. All three operations share one cached connection per
//! endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tapayoka_proto::ws::{Envelope, TYPE_DEVICE_INFO, TYPE_RESPONSE};
use tapayoka_proto::{CommandResponse, DeviceInfo, DiscoveredDevice, ProvisionCommand, device_name};

use crate::connection::Connection;
use crate::registry::ConnectionRegistry;
use crate::scan::{Advertisement, collect_devices};
use crate::{DeviceTransport, Error, Result};

/// Signal strength reported for WebSocket devices, which have none
pub const WS_RSSI: i16 = -30;

pub struct WsTransport {
    endpoint: String,
    registry: Arc<ConnectionRegistry>,
    request_timeout: Duration,
}

impl WsTransport {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Self {
        Self::with_registry(endpoint, request_timeout, Arc::new(ConnectionRegistry::new()))
    }

    pub fn with_registry(
        endpoint: impl Into<String>,
        request_timeout: Duration,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            registry,
            request_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    async fn connection(&self, endpoint: &str, timeout: Duration) -> Result<Arc<Connection>> {
        tokio::time::timeout(timeout, self.registry.get_or_create(endpoint))
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    async fn fetch_device_info(&self, endpoint: &str, timeout: Duration) -> Result<DeviceInfo> {
        let connection = self.connection(endpoint, timeout).await?;
        let info: DeviceInfo = connection
            .request(&Envelope::ReadDeviceInfo, TYPE_DEVICE_INFO, timeout)
            .await?;
        info.validate()?;
        Ok(info)
    }

    async fn try_scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
        let info = self.fetch_device_info(&self.endpoint, timeout).await?;
        let name = device_name(&info.wallet_address)
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, "bad wallet address")
            })?;
        Ok(collect_devices([Advertisement {
            id: self.endpoint.clone(),
            name: Some(name),
            rssi: Some(WS_RSSI),
        }]))
    }

    async fn try_setup_server_wallet(
        &self,
        endpoint: &str,
        address: &str,
    ) -> Result<CommandResponse> {
        let connection = self.connection(endpoint, self.request_timeout).await?;
        connection
            .request(
                &Envelope::Command(ProvisionCommand::setup_server(address)),
                TYPE_RESPONSE,
                self.request_timeout,
            )
            .await
    }
}

#[async_trait]
impl DeviceTransport for WsTransport {
    fn name(&self) -> &'static str {
        "ws"
    }

    async fn scan(&self, timeout: Duration) -> Vec<DiscoveredDevice> {
        match self.try_scan(timeout).await {
            Ok(devices) => {
                tracing::info!(
                    endpoint = %self.endpoint,
                    count = devices.len(),
                    "ws scan finished"
                );
                devices
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, "ws scan failed: {e}");
                Vec::new()
            }
        }
    }

    async fn read_device_info(&self, device_id: &str) -> Option<DeviceInfo> {
        self.fetch_device_info(device_id, self.request_timeout)
            .await
            .inspect_err(|e| tracing::warn!(device_id, "ws read device info failed: {e}"))
            .ok()
    }

    async fn setup_server_wallet(&self, device_id: &str, server_wallet_address: &str) -> bool {
        match self.try_setup_server_wallet(device_id, server_wallet_address).await {
            Ok(response) if response.status.is_success() => {
                tracing::info!(device_id, "SETUP_SERVER acknowledged");
                true
            }
            Ok(response) => {
                tracing::warn!(
                    device_id,
                    status = %response.status,
                    message = response.message.as_deref().unwrap_or(""),
                    "SETUP_SERVER rejected"
                );
                false
            }
            Err(e) => {
                tracing::warn!(device_id, "ws setup server wallet failed: {e}");
                false
            }
        }
    }
}

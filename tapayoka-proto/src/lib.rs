//! Tapayoka vendor device protocol - data model and encodings
//!
//! Shared by the app-side transports (BLE and WebSocket) and by the device
//! simulator. The BLE attribute layout lives in [`ble`], the WebSocket JSON
//! envelope in [`ws`] and the attestation claims document in [`attestation`].

use std::io;

use serde::{Deserialize, Serialize};

pub mod attestation;
pub mod ble;
pub mod ws;

/// Advertised name prefix of every Tapayoka device
pub const DEVICE_NAME_PREFIX: &str = "tapayoka-";

/// Wallet addresses are 20 bytes
pub const WALLET_ADDRESS_LEN: usize = 20;

/// Number of hex chars of the wallet address carried in the advertised name
pub const WALLET_PREFIX_LEN: usize = 8;

/// Command tag for binding a device to a server wallet
pub const CMD_SETUP_SERVER: &str = "SETUP_SERVER";

/// A device seen during one scan session
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    /// Transport-scoped handle: peripheral address (BLE) or endpoint URL (WebSocket)
    pub id: String,
    pub name: String,
    pub wallet_address_prefix: String,
    pub rssi: i16,
}

/// Self-reported device identity plus its attestation
///
/// `wallet_address` and `has_server_wallet` are claims. They are not to be
/// trusted before `signature` has been checked over `signed_payload`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub wallet_address: String,
    pub firmware_version: String,
    pub has_server_wallet: bool,
    pub signed_payload: String,
    pub signature: String,
}

impl DeviceInfo {
    /// Check the fields that have a fixed shape
    pub fn validate(&self) -> io::Result<()> {
        parse_wallet_address(&self.wallet_address)?;
        if self.signed_payload.is_empty() || self.signature.is_empty() {
            return Err(invalid_data("device info without attestation"));
        }
        Ok(())
    }

    pub fn wallet_address_prefix(&self) -> Option<String> {
        wallet_address_prefix(&self.wallet_address)
    }
}

/// Kind of command accepted by the command attribute
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    #[serde(rename = "SETUP_SERVER")]
    SetupServer,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetupServer => CMD_SETUP_SERVER,
        }
    }
}

/// Provisioning command sent once by the app
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProvisionCommand {
    pub command: CommandKind,
    pub payload: String,
}

impl ProvisionCommand {
    pub fn setup_server(server_wallet_address: impl Into<String>) -> Self {
        Self {
            command: CommandKind::SetupServer,
            payload: server_wallet_address.into(),
        }
    }
}

/// Status carried by a command acknowledgement
///
/// Only [`CommandStatus::Ok`] means the device accepted the command. Values are
/// matched case-sensitively; anything unrecognised is kept in `Other`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum CommandStatus {
    Ok,
    Error,
    Busy,
    InvalidAddress,
    AlreadyProvisioned,
    Unauthorized,
    Other(String),
}

impl CommandStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Busy => "BUSY",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::AlreadyProvisioned => "ALREADY_PROVISIONED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Other(s) => s,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl From<String> for CommandStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "OK" => Self::Ok,
            "ERROR" => Self::Error,
            "BUSY" => Self::Busy,
            "INVALID_ADDRESS" => Self::InvalidAddress,
            "ALREADY_PROVISIONED" => Self::AlreadyProvisioned,
            "UNAUTHORIZED" => Self::Unauthorized,
            _ => Self::Other(s),
        }
    }
}

impl From<CommandStatus> for String {
    fn from(status: CommandStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acknowledgement of a [`ProvisionCommand`]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn new(status: CommandStatus) -> Self {
        Self { status, message: None }
    }
}

/// Render wallet bytes as "0x" + 40 lowercase hex chars
pub fn format_wallet_address(bytes: &[u8; WALLET_ADDRESS_LEN]) -> String {
    format!("0x{}", data_encoding::HEXLOWER.encode(bytes))
}

/// Parse a "0x"-prefixed wallet address in either case
pub fn parse_wallet_address(address: &str) -> io::Result<[u8; WALLET_ADDRESS_LEN]> {
    let hex = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| invalid_data("wallet address must start with 0x"))?;
    if hex.len() != WALLET_ADDRESS_LEN * 2 {
        return Err(invalid_data("wallet address must have 40 hex chars"));
    }
    let bytes = data_encoding::HEXLOWER_PERMISSIVE
        .decode(hex.as_bytes())
        .map_err(|e| invalid_data(format!("wallet address is not hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| invalid_data("wallet address must be 20 bytes"))
}

/// First 8 hex chars of a wallet address, lowercase
pub fn wallet_address_prefix(address: &str) -> Option<String> {
    let bytes = parse_wallet_address(address).ok()?;
    let hex = data_encoding::HEXLOWER.encode(&bytes);
    Some(hex[..WALLET_PREFIX_LEN].to_string())
}

/// Name a device advertises for a given wallet address
pub fn device_name(address: &str) -> Option<String> {
    wallet_address_prefix(address).map(|prefix| format!("{DEVICE_NAME_PREFIX}{prefix}"))
}

/// Wallet prefix encoded in an advertised name, if the name is a Tapayoka one
///
/// The suffix after [`DEVICE_NAME_PREFIX`] must start with 8 hex chars.
pub fn wallet_prefix_from_name(name: &str) -> Option<String> {
    let suffix = name.strip_prefix(DEVICE_NAME_PREFIX)?;
    let prefix = suffix.get(..WALLET_PREFIX_LEN)?;
    if !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(prefix.to_ascii_lowercase())
}

pub(crate) fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

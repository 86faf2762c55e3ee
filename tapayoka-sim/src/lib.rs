//! Tapayoka device simulator
//!
//! Plays the device side of the WebSocket protocol so the app can be developed
//! and tested without radio hardware. Device info is signed with the
//! simulator's Ed25519 key exactly as real firmware signs it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ed25519_dalek::{Signer, SigningKey};
use tapayoka_proto::attestation::AttestationClaims;
use tapayoka_proto::ws::{Envelope, TYPE_DEVICE_INFO, TYPE_RESPONSE};
use tapayoka_proto::{
    CommandKind, CommandResponse, CommandStatus, DeviceInfo, ProvisionCommand, WALLET_ADDRESS_LEN,
    format_wallet_address, parse_wallet_address,
};

pub mod server;

pub use server::Server;

#[derive(thiserror::Error, Debug)]
pub enum SimError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Knobs for exercising app-side error handling
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Never reply
    pub silent: bool,
    /// Send unrelated frames before every reply
    pub noise: bool,
    /// Reply to every command with this status and leave state untouched
    pub forced_status: Option<CommandStatus>,
    /// Close the connection after each reply
    pub close_after_reply: bool,
}

pub struct Device {
    signing_key: SigningKey,
    wallet_address: String,
    firmware_version: String,
    server_wallet: Mutex<Option<String>>,
    behavior: Mutex<Behavior>,
    connections: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Device {
    pub fn new(
        signing_key: SigningKey,
        wallet: [u8; WALLET_ADDRESS_LEN],
        firmware_version: impl Into<String>,
    ) -> Self {
        Self {
            signing_key,
            wallet_address: format_wallet_address(&wallet),
            firmware_version: firmware_version.into(),
            server_wallet: Mutex::new(None),
            behavior: Mutex::new(Behavior::default()),
            connections: AtomicUsize::new(0),
        }
    }

    /// A device with a fresh random key and wallet
    pub fn generate(firmware_version: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::new(signing_key, rand::random(), firmware_version)
    }

    pub fn wallet_address(&self) -> &str {
        &self.wallet_address
    }

    /// Hex encoded public key apps must trust to verify this device
    pub fn public_key_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(self.signing_key.verifying_key().as_bytes())
    }

    pub fn server_wallet(&self) -> Option<String> {
        lock(&self.server_wallet).clone()
    }

    pub fn behavior(&self) -> Behavior {
        lock(&self.behavior).clone()
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *lock(&self.behavior) = behavior;
    }

    /// WebSocket connections accepted so far
    pub fn connections_accepted(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn connection_accepted(&self) {
        self.connections.fetch_add(1, Ordering::SeqCst);
    }

    /// Current device info with a fresh attestation
    pub fn device_info(&self) -> DeviceInfo {
        let has_server_wallet = self.server_wallet().is_some();
        let payload =
            AttestationClaims::new(&self.wallet_address, &self.firmware_version, has_server_wallet)
                .to_payload();
        let signature = self.signing_key.sign(payload.as_bytes());

        DeviceInfo {
            wallet_address: self.wallet_address.clone(),
            firmware_version: self.firmware_version.clone(),
            has_server_wallet,
            signed_payload: payload,
            signature: data_encoding::HEXLOWER.encode(&signature.to_bytes()),
        }
    }

    pub fn apply_command(&self, command: &ProvisionCommand) -> CommandStatus {
        if let Some(status) = self.behavior().forced_status {
            return status;
        }

        match command.command {
            CommandKind::SetupServer => {
                if parse_wallet_address(&command.payload).is_err() {
                    return CommandStatus::InvalidAddress;
                }
                let mut server_wallet = lock(&self.server_wallet);
                match server_wallet.as_deref() {
                    Some(existing) if !existing.eq_ignore_ascii_case(&command.payload) => {
                        CommandStatus::AlreadyProvisioned
                    }
                    _ => {
                        *server_wallet = Some(command.payload.clone());
                        CommandStatus::Ok
                    }
                }
            }
        }
    }

    /// Reply to a request, `None` for messages that are not requests
    pub fn handle(&self, request: &Envelope) -> Option<Envelope> {
        match request {
            Envelope::ReadDeviceInfo => Some(Envelope::DeviceInfo(self.device_info())),
            Envelope::Command(command) => {
                let status = self.apply_command(command);
                tracing::info!(command = command.command.as_str(), %status, "command handled");
                Some(Envelope::Response(CommandResponse::new(status)))
            }
            Envelope::DeviceInfo(_) | Envelope::Response(_) => None,
        }
    }

    /// Frames a noisy link sends ahead of the reply to `request`
    ///
    /// Includes a well-formed message of the reply type the request does not
    /// expect, so a correlator that ignores the tag would be fooled.
    pub fn noise(&self, request: &Envelope) -> Vec<String> {
        let mut frames = vec![
            "{not json".to_string(),
            r#"{"type":"heartbeat","data":{}}"#.to_string(),
        ];
        let decoy = match request.reply_kind() {
            Some(TYPE_DEVICE_INFO) => {
                Some(Envelope::Response(CommandResponse::new(CommandStatus::Error)))
            }
            Some(TYPE_RESPONSE) => Some(Envelope::DeviceInfo(self.device_info())),
            _ => None,
        };
        if let Some(decoy) = decoy
            && let Ok(text) = serde_json::to_string(&decoy)
        {
            frames.push(text);
        }
        frames
    }
}

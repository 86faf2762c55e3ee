use std::time::Duration;

use uuid::Uuid;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures inside a transport
///
/// These never reach callers of [`crate::DeviceTransport`]; they are logged and
/// collapsed into the operation's empty result.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("no bluetooth adapter found")]
    NoAdapter,

    #[error("device {0} is not part of the current scan session")]
    UnknownDevice(String),

    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed device data: {0}")]
    Decode(#[from] std::io::Error),

    #[error("no matching response within {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

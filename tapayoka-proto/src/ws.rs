//! WebSocket envelope: JSON messages tagged by `type`, body in `data`

use serde::{Deserialize, Serialize};

use crate::{CommandResponse, DeviceInfo, ProvisionCommand};

pub const TYPE_READ_DEVICE_INFO: &str = "read_device_info";
pub const TYPE_DEVICE_INFO: &str = "device_info";
pub const TYPE_COMMAND: &str = "command";
pub const TYPE_RESPONSE: &str = "response";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    ReadDeviceInfo,
    DeviceInfo(DeviceInfo),
    Command(ProvisionCommand),
    Response(CommandResponse),
}

impl Envelope {
    /// The `type` tag this envelope is sent with
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReadDeviceInfo => TYPE_READ_DEVICE_INFO,
            Self::DeviceInfo(_) => TYPE_DEVICE_INFO,
            Self::Command(_) => TYPE_COMMAND,
            Self::Response(_) => TYPE_RESPONSE,
        }
    }

    /// The `type` tag of the reply a request expects, if it is a request
    pub fn reply_kind(&self) -> Option<&'static str> {
        match self {
            Self::ReadDeviceInfo => Some(TYPE_DEVICE_INFO),
            Self::Command(_) => Some(TYPE_RESPONSE),
            Self::DeviceInfo(_) | Self::Response(_) => None,
        }
    }
}

//! BLE GATT Service Protocol for Tapayoka Vendor Devices
//!
//! This module defines the service/characteristic UUIDs and the byte layouts of
//! the two characteristics: device info (read) and command (write). Any change
//! to a UUID or layout must bump [`FORMAT_VERSION`].

use std::io;

use crate::{
    CommandKind, DeviceInfo, ProvisionCommand, WALLET_ADDRESS_LEN, format_wallet_address,
    invalid_data,
};

/// BLE Service UUID
pub const SERVICE_UUID: &str = "000088F4-0000-1000-8000-00805f9b34fb";

/// Device Info Characteristic UUID (read)
pub const DEVICE_INFO_UUID: &str = "00000E32-0000-1000-8000-00805f9b34fb";

/// Command Characteristic UUID (write)
pub const COMMAND_UUID: &str = "00000E33-0000-1000-8000-00805f9b34fb";

/// Version byte leading both characteristic values
pub const FORMAT_VERSION: u8 = 0x01;

/// Device info flag: device already holds a server wallet
pub const FLAG_HAS_SERVER_WALLET: u8 = 0x01;

/// Command opcodes
pub mod opcodes {
    /// Bind the device to a server wallet address
    pub const SETUP_SERVER: u8 = 0x01;
}

/// Fixed header: version + address + flags + firmware length
const DEVICE_INFO_HEADER: usize = 1 + WALLET_ADDRESS_LEN + 1 + 1;

/// Decode the device info characteristic value
///
/// Fails on truncation, trailing bytes, unknown version or invalid UTF-8.
pub fn decode_device_info(data: &[u8]) -> io::Result<DeviceInfo> {
    let mut reader = Reader::new(data);

    let version = reader.u8("version")?;
    if version != FORMAT_VERSION {
        return Err(invalid_data(format!("unsupported device info version {version}")));
    }

    let address: [u8; WALLET_ADDRESS_LEN] = reader
        .take(WALLET_ADDRESS_LEN, "wallet address")?
        .try_into()
        .map_err(|_| invalid_data("wallet address truncated"))?;
    let flags = reader.u8("flags")?;

    let firmware_len = reader.u8("firmware length")? as usize;
    let firmware_version = reader.utf8(firmware_len, "firmware version")?;

    let payload_len = reader.u16("signed payload length")? as usize;
    let signed_payload = reader.utf8(payload_len, "signed payload")?;

    let signature_len = reader.u8("signature length")? as usize;
    let signature = reader.take(signature_len, "signature")?;

    if !reader.is_empty() {
        return Err(invalid_data("trailing bytes after device info"));
    }

    Ok(DeviceInfo {
        wallet_address: format_wallet_address(&address),
        firmware_version,
        has_server_wallet: flags & FLAG_HAS_SERVER_WALLET != 0,
        signed_payload,
        signature: data_encoding::HEXLOWER.encode(signature),
    })
}

/// Encode a device info characteristic value (device side)
pub fn encode_device_info(info: &DeviceInfo) -> io::Result<Vec<u8>> {
    let address = crate::parse_wallet_address(&info.wallet_address)?;
    let signature = decode_hex(&info.signature)?;

    let firmware = info.firmware_version.as_bytes();
    let payload = info.signed_payload.as_bytes();
    let firmware_len = u8::try_from(firmware.len())
        .map_err(|_| invalid_data("firmware version too long"))?;
    let payload_len = u16::try_from(payload.len())
        .map_err(|_| invalid_data("signed payload too long"))?;
    let signature_len = u8::try_from(signature.len())
        .map_err(|_| invalid_data("signature too long"))?;

    let capacity = DEVICE_INFO_HEADER + firmware.len() + 2 + payload.len() + 1 + signature.len();
    let mut buf = Vec::with_capacity(capacity);
    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(&address);
    buf.push(if info.has_server_wallet { FLAG_HAS_SERVER_WALLET } else { 0 });
    buf.push(firmware_len);
    buf.extend_from_slice(firmware);
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(payload);
    buf.push(signature_len);
    buf.extend_from_slice(&signature);
    Ok(buf)
}

/// Encode a command characteristic value
pub fn encode_command(command: &ProvisionCommand) -> io::Result<Vec<u8>> {
    let opcode = match command.command {
        CommandKind::SetupServer => opcodes::SETUP_SERVER,
    };
    let payload = command.payload.as_bytes();
    let payload_len =
        u8::try_from(payload.len()).map_err(|_| invalid_data("command payload too long"))?;

    let mut buf = Vec::with_capacity(3 + payload.len());
    buf.push(FORMAT_VERSION);
    buf.push(opcode);
    buf.push(payload_len);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode a command characteristic value (device side)
pub fn decode_command(data: &[u8]) -> io::Result<ProvisionCommand> {
    let mut reader = Reader::new(data);

    let version = reader.u8("version")?;
    if version != FORMAT_VERSION {
        return Err(invalid_data(format!("unsupported command version {version}")));
    }
    let command = match reader.u8("opcode")? {
        opcodes::SETUP_SERVER => CommandKind::SetupServer,
        other => return Err(invalid_data(format!("unknown command opcode 0x{other:02x}"))),
    };
    let payload_len = reader.u8("payload length")? as usize;
    let payload = reader.utf8(payload_len, "payload")?;

    if !reader.is_empty() {
        return Err(invalid_data("trailing bytes after command"));
    }

    Ok(ProvisionCommand { command, payload })
}

fn decode_hex(s: &str) -> io::Result<Vec<u8>> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    data_encoding::HEXLOWER_PERMISSIVE
        .decode(hex.as_bytes())
        .map_err(|e| invalid_data(format!("signature is not hex: {e}")))
}

/// Bounds-checked cursor over a characteristic value
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, field: &str) -> io::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| invalid_data(format!("{field} truncated")))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, field: &str) -> io::Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &str) -> io::Result<u16> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn utf8(&mut self, len: usize, field: &str) -> io::Result<String> {
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid_data(format!("{field} is not UTF-8")))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeviceInfo {
        DeviceInfo {
            wallet_address: "0xab12cd34000000000000000000000000000000ff".to_string(),
            firmware_version: "2.1.0".to_string(),
            has_server_wallet: false,
            signed_payload: "{\"v\":1}".to_string(),
            signature: "a1b2c3d4".to_string(),
        }
    }

    #[test]
    fn uuids_match_wire_contract() {
        assert_eq!(SERVICE_UUID, "000088F4-0000-1000-8000-00805f9b34fb");
        assert_eq!(DEVICE_INFO_UUID, "00000E32-0000-1000-8000-00805f9b34fb");
        assert_eq!(COMMAND_UUID, "00000E33-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn device_info_layout() {
        let bytes = encode_device_info(&sample()).unwrap();
        assert_eq!(bytes[0], FORMAT_VERSION);
        assert_eq!(&bytes[1..5], &[0xab, 0x12, 0xcd, 0x34]);
        assert_eq!(bytes[21], 0);
        assert_eq!(bytes[22], 5);
        assert_eq!(&bytes[23..28], b"2.1.0");
        assert_eq!(&bytes[28..30], &[0, 7]);
        assert_eq!(bytes[37], 4);
        assert_eq!(bytes.len(), 42);

        assert_eq!(decode_device_info(&bytes).unwrap(), sample());
    }

    #[test]
    fn device_info_flag() {
        let mut info = sample();
        info.has_server_wallet = true;
        let bytes = encode_device_info(&info).unwrap();
        assert_eq!(bytes[21], FLAG_HAS_SERVER_WALLET);
        assert!(decode_device_info(&bytes).unwrap().has_server_wallet);
    }

    #[test]
    fn truncated_device_info_is_rejected() {
        let bytes = encode_device_info(&sample()).unwrap();
        for len in 0..bytes.len() {
            assert!(decode_device_info(&bytes[..len]).is_err(), "accepted {len} bytes");
        }
    }

    #[test]
    fn trailing_and_versioned_device_info_is_rejected() {
        let mut bytes = encode_device_info(&sample()).unwrap();
        bytes.push(0);
        assert!(decode_device_info(&bytes).is_err());

        let mut bytes = encode_device_info(&sample()).unwrap();
        bytes[0] = 0x02;
        assert!(decode_device_info(&bytes).is_err());
    }

    #[test]
    fn non_utf8_firmware_is_rejected() {
        let mut bytes = encode_device_info(&sample()).unwrap();
        bytes[23] = 0xff;
        let err = decode_device_info(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn command_layout() {
        let command = ProvisionCommand::setup_server("0x742d35cc6634c0532925a3b844bc454e4438f44e");
        let bytes = encode_command(&command).unwrap();
        assert_eq!(&bytes[..3], &[FORMAT_VERSION, opcodes::SETUP_SERVER, 42]);
        assert_eq!(decode_command(&bytes).unwrap(), command);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        assert!(decode_command(&[FORMAT_VERSION, 0x7f, 0]).is_err());
        assert!(decode_command(&[FORMAT_VERSION, opcodes::SETUP_SERVER, 3, b'0']).is_err());
    }
}

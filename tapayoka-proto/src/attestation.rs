//! Attestation claims document
//!
//! `DeviceInfo::signed_payload` holds this document serialized as JSON. The
//! device signs those exact bytes with Ed25519; `DeviceInfo::signature` is the
//! hex encoded signature.

use serde::{Deserialize, Serialize};

use crate::DeviceInfo;

/// Version of the claims document
pub const CLAIMS_VERSION: u8 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttestationClaims {
    pub v: u8,
    pub wallet_address: String,
    pub firmware_version: String,
    pub has_server_wallet: bool,
}

/// Reported field that disagrees with the signed claims
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimField {
    Version,
    WalletAddress,
    FirmwareVersion,
    HasServerWallet,
}

impl std::fmt::Display for ClaimField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Version => "v",
            Self::WalletAddress => "walletAddress",
            Self::FirmwareVersion => "firmwareVersion",
            Self::HasServerWallet => "hasServerWallet",
        })
    }
}

impl AttestationClaims {
    pub fn new(wallet_address: &str, firmware_version: &str, has_server_wallet: bool) -> Self {
        Self {
            v: CLAIMS_VERSION,
            wallet_address: wallet_address.to_string(),
            firmware_version: firmware_version.to_string(),
            has_server_wallet,
        }
    }

    pub fn to_payload(&self) -> String {
        // Serializing a struct of strings and scalars cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_payload(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    /// First reported field that differs from the claims
    ///
    /// Wallet addresses compare case-insensitively.
    pub fn mismatch(&self, info: &DeviceInfo) -> Option<ClaimField> {
        if self.v != CLAIMS_VERSION {
            Some(ClaimField::Version)
        } else if !self.wallet_address.eq_ignore_ascii_case(&info.wallet_address) {
            Some(ClaimField::WalletAddress)
        } else if self.firmware_version != info.firmware_version {
            Some(ClaimField::FirmwareVersion)
        } else if self.has_server_wallet != info.has_server_wallet {
            Some(ClaimField::HasServerWallet)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_stable_json() {
        let claims = AttestationClaims::new("0xab12", "1.0.0", false);
        assert_eq!(
            claims.to_payload(),
            r#"{"v":1,"walletAddress":"0xab12","firmwareVersion":"1.0.0","hasServerWallet":false}"#
        );
        assert_eq!(AttestationClaims::from_payload(&claims.to_payload()).unwrap(), claims);
    }

    #[test]
    fn mismatch_detection() {
        let claims = AttestationClaims::new("0xAB12", "1.0.0", false);
        let mut info = DeviceInfo {
            wallet_address: "0xab12".to_string(),
            firmware_version: "1.0.0".to_string(),
            has_server_wallet: false,
            signed_payload: claims.to_payload(),
            signature: String::new(),
        };
        assert_eq!(claims.mismatch(&info), None);

        info.has_server_wallet = true;
        assert_eq!(claims.mismatch(&info), Some(ClaimField::HasServerWallet));

        info.wallet_address = "0xab13".to_string();
        assert_eq!(claims.mismatch(&info), Some(ClaimField::WalletAddress));
    }
}

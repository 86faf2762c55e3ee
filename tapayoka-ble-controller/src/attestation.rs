//! Device info attestation
//!
//! A device signs `signed_payload` (an [`AttestationClaims`] JSON document)
//! with its Ed25519 key. Only after the signature checks out against a trusted
//! key and the claims match the reported fields do we hand out a
//! [`VerifiedDeviceInfo`].

use ed25519_dalek::{Signature, VerifyingKey};
use tapayoka_proto::DeviceInfo;
use tapayoka_proto::attestation::{AttestationClaims, ClaimField};

#[derive(thiserror::Error, Debug)]
pub enum AttestationError {
    #[error("no trusted device keys configured")]
    NoTrustedKeys,

    #[error("invalid public key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("signature is not a hex encoded Ed25519 signature")]
    MalformedSignature,

    #[error("signature does not verify against any trusted key")]
    Untrusted,

    #[error("signed payload is not a claims document: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("reported {0} differs from the signed claims")]
    ClaimMismatch(ClaimField),
}

/// Device info whose wallet address and server wallet flag were attested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedDeviceInfo {
    info: DeviceInfo,
    key: VerifyingKey,
}

impl VerifiedDeviceInfo {
    pub fn wallet_address(&self) -> &str {
        &self.info.wallet_address
    }

    pub fn firmware_version(&self) -> &str {
        &self.info.firmware_version
    }

    pub fn has_server_wallet(&self) -> bool {
        self.info.has_server_wallet
    }

    /// Key that signed the payload
    pub fn signer(&self) -> &VerifyingKey {
        &self.key
    }

    pub fn into_inner(self) -> DeviceInfo {
        self.info
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttestationVerifier {
    trusted_keys: Vec<VerifyingKey>,
}

impl AttestationVerifier {
    pub fn new(trusted_keys: Vec<VerifyingKey>) -> Self {
        Self { trusted_keys }
    }

    /// Parse hex encoded 32-byte public keys
    pub fn from_hex_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self, AttestationError> {
        let trusted_keys = keys
            .iter()
            .map(|key| parse_key(key.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { trusted_keys })
    }

    pub fn is_empty(&self) -> bool {
        self.trusted_keys.is_empty()
    }

    pub fn verify(&self, info: &DeviceInfo) -> Result<VerifiedDeviceInfo, AttestationError> {
        if self.trusted_keys.is_empty() {
            return Err(AttestationError::NoTrustedKeys);
        }

        let signature = parse_signature(&info.signature)?;
        let payload = info.signed_payload.as_bytes();
        let key = self
            .trusted_keys
            .iter()
            .find(|key| key.verify_strict(payload, &signature).is_ok())
            .ok_or(AttestationError::Untrusted)?;

        let claims = AttestationClaims::from_payload(&info.signed_payload)?;
        if let Some(field) = claims.mismatch(info) {
            return Err(AttestationError::ClaimMismatch(field));
        }

        Ok(VerifiedDeviceInfo {
            info: info.clone(),
            key: *key,
        })
    }
}

fn parse_key(hex: &str) -> Result<VerifyingKey, AttestationError> {
    let invalid = |reason: String| AttestationError::InvalidKey {
        key: hex.to_string(),
        reason,
    };
    let bytes = decode_hex(hex).ok_or_else(|| invalid("not hex".to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| invalid("expected 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| invalid(e.to_string()))
}

fn parse_signature(hex: &str) -> Result<Signature, AttestationError> {
    let bytes = decode_hex(hex).ok_or(AttestationError::MalformedSignature)?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|_| AttestationError::MalformedSignature)?;
    Ok(Signature::from_bytes(&bytes))
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    let hex = s.strip_prefix("0x").unwrap_or(s);
    data_encoding::HEXLOWER_PERMISSIVE.decode(hex.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    const WALLET: &str = "0xab12cd34000000000000000000000000000000ff";

    fn signed_info(key: &SigningKey, has_server_wallet: bool) -> DeviceInfo {
        let payload = AttestationClaims::new(WALLET, "1.4.2", has_server_wallet).to_payload();
        let signature = key.sign(payload.as_bytes());
        DeviceInfo {
            wallet_address: WALLET.to_string(),
            firmware_version: "1.4.2".to_string(),
            has_server_wallet,
            signed_payload: payload,
            signature: data_encoding::HEXLOWER.encode(&signature.to_bytes()),
        }
    }

    fn verifier_for(key: &SigningKey) -> AttestationVerifier {
        let hex = data_encoding::HEXLOWER.encode(key.verifying_key().as_bytes());
        AttestationVerifier::from_hex_keys(&[hex]).unwrap()
    }

    #[test]
    fn accepts_signed_device_info() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let info = signed_info(&key, false);

        let verified = verifier_for(&key).verify(&info).unwrap();
        assert_eq!(verified.wallet_address(), WALLET);
        assert!(!verified.has_server_wallet());
        assert_eq!(verified.signer(), &key.verifying_key());
    }

    #[test]
    fn rejects_untrusted_signer() {
        let device = SigningKey::from_bytes(&[7u8; 32]);
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let info = signed_info(&device, false);

        assert!(matches!(verifier_for(&other).verify(&info), Err(AttestationError::Untrusted)));
    }

    #[test]
    fn rejects_flag_not_covered_by_signature() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let mut info = signed_info(&key, false);
        info.has_server_wallet = true;

        assert!(matches!(
            verifier_for(&key).verify(&info),
            Err(AttestationError::ClaimMismatch(ClaimField::HasServerWallet))
        ));
    }

    #[test]
    fn rejects_tampered_payload() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let mut info = signed_info(&key, false);
        info.signed_payload = info.signed_payload.replace("false", "true");
        info.has_server_wallet = true;

        assert!(matches!(verifier_for(&key).verify(&info), Err(AttestationError::Untrusted)));
    }

    #[test]
    fn rejects_malformed_signature_and_empty_key_set() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let mut info = signed_info(&key, false);

        assert!(matches!(
            AttestationVerifier::default().verify(&info),
            Err(AttestationError::NoTrustedKeys)
        ));

        info.signature = "abcd".to_string();
        assert!(matches!(
            verifier_for(&key).verify(&info),
            Err(AttestationError::MalformedSignature)
        ));
    }

    #[test]
    fn bad_keys_are_reported() {
        assert!(AttestationVerifier::from_hex_keys(&["zz"]).is_err());
        assert!(AttestationVerifier::from_hex_keys(&["abcd"]).is_err());
    }
}

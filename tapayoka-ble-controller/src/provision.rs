//! Provisioning with read-after-write confirmation

use tapayoka_proto::DeviceInfo;

use crate::DeviceTransport;
use crate::attestation::{AttestationError, AttestationVerifier};

#[derive(Debug)]
pub enum ProvisionOutcome {
    /// Acknowledged, and the device now reports a server wallet
    Confirmed(DeviceInfo),
    /// The device did not acknowledge the command
    NotAcknowledged,
    /// Acknowledged, but the follow-up read did not confirm it
    Unconfirmed(UnconfirmedReason),
}

#[derive(Debug)]
pub enum UnconfirmedReason {
    ReadFailed,
    FlagNotSet(DeviceInfo),
    Attestation(AttestationError),
}

impl ProvisionOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Send `SETUP_SERVER`, then read device info back to confirm the flag flipped
///
/// With a verifier the re-read info must also carry a valid attestation.
pub async fn provision_and_confirm(
    transport: &dyn DeviceTransport,
    device_id: &str,
    server_wallet_address: &str,
    verifier: Option<&AttestationVerifier>,
) -> ProvisionOutcome {
    if !transport
        .setup_server_wallet(device_id, server_wallet_address)
        .await
    {
        return ProvisionOutcome::NotAcknowledged;
    }

    let Some(info) = transport.read_device_info(device_id).await else {
        return ProvisionOutcome::Unconfirmed(UnconfirmedReason::ReadFailed);
    };

    if let Some(verifier) = verifier
        && let Err(e) = verifier.verify(&info)
    {
        tracing::warn!(device_id, "attestation after provisioning failed: {e}");
        return ProvisionOutcome::Unconfirmed(UnconfirmedReason::Attestation(e));
    }

    if info.has_server_wallet {
        ProvisionOutcome::Confirmed(info)
    } else {
        ProvisionOutcome::Unconfirmed(UnconfirmedReason::FlagNotSet(info))
    }
}

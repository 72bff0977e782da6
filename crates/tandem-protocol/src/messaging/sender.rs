use async_trait::async_trait;
use futures::future::join_all;
use tandem_crypto::PairingAuthorisation;

use crate::error::ProtocolError;
use crate::messaging::content::{
    AddressMessage, Content, DataMessage, PairingAuthorisationMessage, Profile, SyncMessage,
};
use crate::pairing::resolver::PairingResolver;

/// Outbound delivery of one [`Content`] to one device pubkey.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, recipient: &str, content: &Content) -> Result<(), ProtocolError>;
}

/// Per-recipient outcome of a multi-device send.
#[derive(Debug, Default)]
pub struct SendReport {
    pub delivered: Vec<String>,
    pub failures: Vec<(String, ProtocolError)>,
}

impl SendReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Ok` only if every recipient got the message; otherwise the first
    /// failure in recipient order.
    pub fn into_result(self) -> Result<(), ProtocolError> {
        match self.failures.into_iter().next() {
            None => Ok(()),
            Some((recipient, e)) => Err(ProtocolError::SendFailed(format!("{recipient}: {e}"))),
        }
    }
}

/// Send a pairing request or grant to `recipient`.
///
/// When we are the authorisation's primary this is a grant, and our profile
/// rides along so the new secondary can show it straight away.
pub async fn send_pairing_authorisation(
    transport: &dyn Transport,
    our_pub_key: &str,
    authorisation: &PairingAuthorisation,
    recipient: &str,
    profile: Option<&Profile>,
    profile_key: Option<&[u8]>,
) -> Result<(), ProtocolError> {
    let is_grant = authorisation.primary_device_pub_key == our_pub_key;
    let data_message = profile.filter(|_| is_grant).map(|profile| DataMessage {
        profile: Some(profile.clone()),
        profile_key: profile_key.map(<[u8]>::to_vec),
        ..DataMessage::default()
    });

    let content = Content {
        pairing_authorisation: Some(PairingAuthorisationMessage::from(authorisation)),
        data_message,
        ..Content::default()
    };
    transport.send(recipient, &content).await?;
    tracing::debug!(recipient, is_grant, "pairing authorisation sent");
    Ok(())
}

/// Ask `recipient` (one of our secondaries) to drop its pairing.
pub async fn send_unpairing_request(
    transport: &dyn Transport,
    recipient: &str,
) -> Result<(), ProtocolError> {
    let content = Content {
        data_message: Some(DataMessage::unpairing_request()),
        ..Content::default()
    };
    transport.send(recipient, &content).await?;
    tracing::info!(recipient, "unpairing request sent");
    Ok(())
}

/// Tell `pub_key` we are online. A secondary device is skipped in favour of
/// its primary; the primary is not redirected again.
///
/// Only one redirect is followed, so a cycle of grants cannot loop.
pub async fn send_online_broadcast(
    transport: &dyn Transport,
    resolver: &PairingResolver,
    pub_key: &str,
) -> Result<(), ProtocolError> {
    let recipient = match resolver.get_grant_authorisation_for(pub_key).await? {
        Some(grant) if grant.primary_device_pub_key != pub_key => grant.primary_device_pub_key,
        _ => pub_key.to_string(),
    };

    let content = Content {
        address_message: Some(AddressMessage::HostUnreachable),
        ..Content::default()
    };
    transport.send(&recipient, &content).await?;
    tracing::debug!(pub_key, %recipient, "online broadcast sent");
    Ok(())
}

/// Send `sync` to each of `devices` concurrently.
pub async fn send_sync_to_devices(
    transport: &dyn Transport,
    sync: &SyncMessage,
    devices: &[String],
) -> SendReport {
    let content = &Content {
        sync_message: Some(sync.clone()),
        ..Content::default()
    };
    let outcomes = join_all(
        devices
            .iter()
            .map(|device| async move { (device, transport.send(device, content).await) }),
    )
    .await;

    let mut report = SendReport::default();
    for (device, outcome) in outcomes {
        match outcome {
            Ok(()) => report.delivered.push(device.clone()),
            Err(e) => {
                tracing::warn!(device = %device, error = %e, "sync send failed");
                report.failures.push((device.clone(), e));
            }
        }
    }
    report
}

//! Pairing authorisation lifecycle: `Requested → Finalized → (removed)`.

use std::sync::Arc;

use tandem_crypto::pairing::{verify_grant, verify_request};
use tandem_crypto::{IdentityProvider, KeyStore, PairingAuthorisation, PairingState, SignatureVerifier};

use crate::error::ProtocolError;

/// Enforces the signature contract before anything reaches the [`KeyStore`].
pub struct AuthorisationLedger {
    store: Arc<dyn KeyStore>,
    verifier: Arc<dyn SignatureVerifier>,
    identity: Arc<dyn IdentityProvider>,
}

impl AuthorisationLedger {
    pub fn new(
        store: Arc<dyn KeyStore>,
        verifier: Arc<dyn SignatureVerifier>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            verifier,
            identity,
        }
    }

    /// Record a pending request from `secondary` to be linked to `primary`.
    pub async fn request_pairing(
        &self,
        primary: &str,
        secondary: &str,
        request_signature: Vec<u8>,
    ) -> Result<PairingAuthorisation, ProtocolError> {
        let authorisation = PairingAuthorisation::requested(primary, secondary, request_signature);
        self.check_request(&authorisation)?;

        let finalized = self
            .stored_pair(&authorisation)
            .await?
            .is_some_and(|existing| existing.state() == PairingState::Finalized);
        if finalized {
            return Err(ProtocolError::InvalidState(format!(
                "{secondary} is already paired with {primary}"
            )));
        }

        self.store
            .create_or_update_pairing_authorisation(authorisation.clone())
            .await?;
        tracing::info!(primary, secondary, "pairing requested");
        Ok(authorisation)
    }

    /// Approve a pending request. Only the record's primary may do this.
    pub async fn grant_pairing(
        &self,
        authorisation: &PairingAuthorisation,
        grant_signature: Vec<u8>,
    ) -> Result<PairingAuthorisation, ProtocolError> {
        let primary = &authorisation.primary_device_pub_key;
        let secondary = &authorisation.secondary_device_pub_key;

        if *primary != self.identity.public_key_hex() {
            return Err(ProtocolError::InvalidState(format!(
                "cannot grant a pairing for primary {primary}: not this device"
            )));
        }

        let stored = self.stored_pair(authorisation).await?.ok_or_else(|| {
            ProtocolError::InvalidState(format!("no pairing request from {secondary}"))
        })?;
        if stored.state() == PairingState::Finalized {
            return Err(ProtocolError::InvalidState(format!(
                "{secondary} is already paired"
            )));
        }

        let granted = PairingAuthorisation {
            grant_signature: Some(grant_signature),
            ..stored
        };
        self.check_grant(&granted)?;

        self.store
            .create_or_update_pairing_authorisation(granted.clone())
            .await?;
        tracing::info!(primary = %primary, secondary = %secondary, "pairing granted");
        Ok(granted)
    }

    /// Remove any pairing for `secondary`. Removing nothing is fine.
    pub async fn revoke(&self, secondary: &str) -> Result<(), ProtocolError> {
        self.store
            .remove_pairing_authorisation_for_secondary(secondary)
            .await?;
        tracing::info!(secondary, "pairing revoked");
        Ok(())
    }

    /// The finalized record for `secondary`; pending requests are not returned.
    pub async fn get_finalized(
        &self,
        secondary: &str,
    ) -> Result<Option<PairingAuthorisation>, ProtocolError> {
        Ok(self
            .store
            .get_grant_authorisation_for_secondary(secondary)
            .await?)
    }

    /// Store an authorisation learned from elsewhere (the directory or a
    /// pairing message). Applying the same record twice is a no-op, and a
    /// pending record never replaces a finalized one for the same pair.
    pub async fn upsert(&self, authorisation: PairingAuthorisation) -> Result<(), ProtocolError> {
        self.check_request(&authorisation)?;
        if authorisation.is_granted() {
            self.check_grant(&authorisation)?;
        } else if self
            .stored_pair(&authorisation)
            .await?
            .is_some_and(|existing| existing.state() == PairingState::Finalized)
        {
            tracing::debug!(
                primary = %authorisation.primary_device_pub_key,
                secondary = %authorisation.secondary_device_pub_key,
                "stale pairing request ignored, pair already finalized"
            );
            return Ok(());
        }
        self.store
            .create_or_update_pairing_authorisation(authorisation)
            .await?;
        Ok(())
    }

    async fn stored_pair(
        &self,
        authorisation: &PairingAuthorisation,
    ) -> Result<Option<PairingAuthorisation>, ProtocolError> {
        Ok(self
            .store
            .get_pairing_authorisation(
                &authorisation.primary_device_pub_key,
                &authorisation.secondary_device_pub_key,
            )
            .await?)
    }

    fn check_request(&self, authorisation: &PairingAuthorisation) -> Result<(), ProtocolError> {
        verify_request(self.verifier.as_ref(), authorisation)
            .map_err(|e| ProtocolError::InvalidSignature(format!("pairing request: {e}")))
    }

    fn check_grant(&self, authorisation: &PairingAuthorisation) -> Result<(), ProtocolError> {
        verify_grant(self.verifier.as_ref(), authorisation)
            .map_err(|e| ProtocolError::InvalidSignature(format!("pairing grant: {e}")))
    }
}

//! Directory service client: pubkey → device mapping.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use tandem_crypto::PairingAuthorisation;

use crate::config::PairingConfig;
use crate::error::ProtocolError;

/// What the directory knows about a pubkey's devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMapping {
    #[serde(default)]
    pub authorisations: Vec<PairingAuthorisation>,
    /// The directory reports this as `"0"`/`"1"`.
    #[serde(deserialize_with = "flag_from_str_or_bool")]
    pub is_primary: bool,
}

fn flag_from_str_or_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Str(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Str(s) => match s.as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid isPrimary flag {other:?}"
            ))),
        },
    }
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Fetch the device mapping for `pub_key`; `None` when the directory has
    /// no entry.
    async fn get_user_device_mapping(
        &self,
        pub_key: &str,
    ) -> Result<Option<DeviceMapping>, ProtocolError>;
}

/// [`DirectoryClient`] over the file server's HTTP API.
pub struct HttpDirectoryClient {
    client: Client,
    base_url: String,
}

impl HttpDirectoryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProtocolError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProtocolError::Directory(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build from config. `None` when no directory URL is configured.
    pub fn from_config(config: &PairingConfig) -> Result<Option<Self>, ProtocolError> {
        config
            .directory_url
            .as_deref()
            .map(|url| Self::new(url, config.directory_timeout()))
            .transpose()
    }

    fn mapping_url(&self, pub_key: &str) -> String {
        format!("{}/loki/v1/users/{pub_key}/device-mapping", self.base_url)
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn get_user_device_mapping(
        &self,
        pub_key: &str,
    ) -> Result<Option<DeviceMapping>, ProtocolError> {
        let response = self
            .client
            .get(self.mapping_url(pub_key))
            .send()
            .await
            .map_err(|e| ProtocolError::Directory(format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ProtocolError::Directory(format!(
                "directory returned {status}"
            )));
        }

        let mapping = response
            .json::<DeviceMapping>()
            .await
            .map_err(|e| ProtocolError::Directory(format!("malformed device mapping: {e}")))?;

        tracing::debug!(
            pub_key,
            authorisations = mapping.authorisations.len(),
            is_primary = mapping.is_primary,
            "device mapping fetched"
        );
        Ok(Some(mapping))
    }
}

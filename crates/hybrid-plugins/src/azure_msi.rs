//! Azure managed service identity (`azure_msi`).

use hybrid_core::{AttestationStream, NodeAttestor, PayloadOrChallengeResponse, PluginError};
use serde::{Deserialize, Serialize};

use crate::error::{EvidenceError, parse_fragment};
use crate::metadata::{DEFAULT_TIMEOUT_SECS, MetadataClient};

/// Plugin name.
pub const NAME: &str = "azure_msi";

const TOKEN_PATH: &str = "/metadata/identity/oauth2/token";
const API_VERSION: &str = "2018-02-01";

/// Configuration fragment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AzureMsiConfig {
    /// Instance metadata service base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Resource the access token is requested for.
    #[serde(default = "default_resource")]
    pub resource: String,
    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://169.254.169.254".to_string()
}

fn default_resource() -> String {
    "https://management.azure.com/".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Payload sent to the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsiPayload {
    /// The managed identity access token.
    pub token: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug)]
struct Configured {
    config: AzureMsiConfig,
    client: MetadataClient,
}

/// Azure managed service identity attestor.
#[derive(Debug, Default)]
pub struct AzureMsiAttestor {
    configured: Option<Configured>,
}

impl AzureMsiAttestor {
    /// Creates an unconfigured attestor.
    pub fn new() -> Self {
        Self::default()
    }

    /// The applied configuration, if any.
    pub fn config(&self) -> Option<&AzureMsiConfig> {
        self.configured.as_ref().map(|c| &c.config)
    }
}

impl NodeAttestor for AzureMsiAttestor {
    fn configure(&mut self, fragment: &str) -> Result<(), PluginError> {
        let config: AzureMsiConfig = parse_fragment(NAME, fragment)?;
        if config.resource.is_empty() {
            return Err(PluginError::invalid_config("azure_msi: resource cannot be empty"));
        }
        let client = MetadataClient::new(&config.endpoint, config.timeout_secs)?;
        self.configured = Some(Configured { config, client });
        Ok(())
    }

    async fn aid_attestation<S: AttestationStream>(&self, stream: &mut S) -> Result<(), PluginError> {
        let Configured { config, client } =
            self.configured.as_ref().ok_or(PluginError::NotConfigured)?;

        let body = client
            .get(
                "managed identity token",
                TOKEN_PATH,
                &[("api-version", API_VERSION), ("resource", config.resource.as_str())],
                &[("Metadata", "true")],
            )
            .await?;
        let response: TokenResponse =
            serde_json::from_str(&body).map_err(|e| EvidenceError::MalformedResponse {
                what: "managed identity token",
                reason: e.to_string(),
            })?;

        let payload = serde_json::to_vec(&MsiPayload {
            token: response.access_token,
        })
        .map_err(EvidenceError::from)?;
        stream.send(PayloadOrChallengeResponse::Payload(payload)).await?;
        Ok(())
    }
}

//! GCP instance identity token (`gcp_iit`).
//!
//! Requests a full-format identity token for the instance's service account
//! from the metadata server; the raw JWT is the attestation payload.

use hybrid_core::{AttestationStream, NodeAttestor, PayloadOrChallengeResponse, PluginError};
use serde::Deserialize;

use crate::error::{EvidenceError, parse_fragment};
use crate::metadata::{DEFAULT_TIMEOUT_SECS, MetadataClient};

/// Plugin name.
pub const NAME: &str = "gcp_iit";

/// Configuration fragment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcpIitConfig {
    /// Metadata server base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Service account whose identity is requested.
    #[serde(default = "default_service_account")]
    pub service_account: String,
    /// Audience claim the verifier expects.
    #[serde(default = "default_audience")]
    pub audience: String,
    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://metadata.google.internal".to_string()
}

fn default_service_account() -> String {
    "default".to_string()
}

fn default_audience() -> String {
    "spire-gcp-node-attestor".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl GcpIitConfig {
    fn identity_path(&self) -> String {
        format!(
            "/computeMetadata/v1/instance/service-accounts/{}/identity",
            self.service_account
        )
    }
}

#[derive(Debug)]
struct Configured {
    config: GcpIitConfig,
    client: MetadataClient,
}

/// GCP instance identity token attestor.
#[derive(Debug, Default)]
pub struct GcpIitAttestor {
    configured: Option<Configured>,
}

impl GcpIitAttestor {
    /// Creates an unconfigured attestor.
    pub fn new() -> Self {
        Self::default()
    }

    /// The applied configuration, if any.
    pub fn config(&self) -> Option<&GcpIitConfig> {
        self.configured.as_ref().map(|c| &c.config)
    }
}

impl NodeAttestor for GcpIitAttestor {
    fn configure(&mut self, fragment: &str) -> Result<(), PluginError> {
        let config: GcpIitConfig = parse_fragment(NAME, fragment)?;
        if config.audience.is_empty() {
            return Err(PluginError::invalid_config("gcp_iit: audience cannot be empty"));
        }
        let valid_account = |c: char| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_');
        if config.service_account.is_empty() || !config.service_account.chars().all(valid_account) {
            return Err(PluginError::invalid_config(
                "gcp_iit: service_account must be a non-empty account name",
            ));
        }
        let client = MetadataClient::new(&config.endpoint, config.timeout_secs)?;
        self.configured = Some(Configured { config, client });
        Ok(())
    }

    async fn aid_attestation<S: AttestationStream>(&self, stream: &mut S) -> Result<(), PluginError> {
        let Configured { config, client } =
            self.configured.as_ref().ok_or(PluginError::NotConfigured)?;

        let token = client
            .get(
                "instance identity token",
                &config.identity_path(),
                &[("audience", config.audience.as_str()), ("format", "full")],
                &[("Metadata-Flavor", "Google")],
            )
            .await?;
        let token = token.trim();
        if token.split('.').count() != 3 {
            return Err(EvidenceError::MalformedResponse {
                what: "instance identity token",
                reason: "not a JWT".to_string(),
            }
            .into());
        }

        stream
            .send(PayloadOrChallengeResponse::Payload(token.as_bytes().to_vec()))
            .await?;
        Ok(())
    }
}

//! Kubernetes projected service account token (`k8s_psat`).
//!
//! Reads the projected token from disk and sends `{"cluster", "token"}`.

use std::path::PathBuf;

use hybrid_core::{AttestationStream, NodeAttestor, PayloadOrChallengeResponse, PluginError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EvidenceError, parse_fragment};

/// Plugin name.
pub const NAME: &str = "k8s_psat";

/// Default location of the projected token.
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/tokens/spire-agent";

/// Configuration fragment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct K8sPsatConfig {
    /// Name of the cluster, matched by the verifier.
    pub cluster: String,
    /// Path of the projected service account token.
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
}

fn default_token_path() -> PathBuf {
    PathBuf::from(DEFAULT_TOKEN_PATH)
}

/// Payload sent to the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsatPayload {
    /// Cluster name.
    pub cluster: String,
    /// Projected service account token.
    pub token: String,
}

/// Kubernetes PSAT attestor.
#[derive(Debug, Default)]
pub struct K8sPsatAttestor {
    config: Option<K8sPsatConfig>,
}

impl K8sPsatAttestor {
    /// Creates an unconfigured attestor.
    pub fn new() -> Self {
        Self::default()
    }

    /// The applied configuration, if any.
    pub fn config(&self) -> Option<&K8sPsatConfig> {
        self.config.as_ref()
    }
}

impl NodeAttestor for K8sPsatAttestor {
    fn configure(&mut self, fragment: &str) -> Result<(), PluginError> {
        let config: K8sPsatConfig = parse_fragment(NAME, fragment)?;
        if config.cluster.trim().is_empty() {
            return Err(PluginError::invalid_config(
                "k8s_psat: cluster cannot be empty",
            ));
        }
        self.config = Some(config);
        Ok(())
    }

    async fn aid_attestation<S: AttestationStream>(&self, stream: &mut S) -> Result<(), PluginError> {
        let config = self.config.as_ref().ok_or(PluginError::NotConfigured)?;

        let token = tokio::fs::read_to_string(&config.token_path)
            .await
            .map_err(|source| EvidenceError::Io {
                path: config.token_path.display().to_string(),
                source,
            })?;
        let token = token.trim();
        if token.is_empty() {
            return Err(EvidenceError::MalformedResponse {
                what: "service account token",
                reason: format!("{} is empty", config.token_path.display()),
            }
            .into());
        }
        debug!(cluster = %config.cluster, "loaded projected service account token");

        let payload = serde_json::to_vec(&PsatPayload {
            cluster: config.cluster.clone(),
            token: token.to_string(),
        })
        .map_err(EvidenceError::from)?;
        stream.send(PayloadOrChallengeResponse::Payload(payload)).await?;
        Ok(())
    }
}

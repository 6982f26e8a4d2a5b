//! Error types for hybrid-plugins.

use hybrid_core::PluginError;
use thiserror::Error;

/// Failures while gathering attestation evidence.
#[derive(Debug, Error)]
pub enum EvidenceError {
    /// The metadata service request failed.
    #[error("{what}: {source}")]
    Http {
        /// What was being fetched.
        what: &'static str,
        /// Underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },

    /// The metadata service answered with something unusable.
    #[error("{what}: malformed response: {reason}")]
    MalformedResponse {
        /// What was being fetched.
        what: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Reading evidence from disk failed.
    #[error("reading {path}: {source}")]
    Io {
        /// File that was being read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Encoding the payload failed.
    #[error("encoding payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<EvidenceError> for PluginError {
    fn from(err: EvidenceError) -> Self {
        PluginError::evidence(err.to_string())
    }
}

/// Parse a TOML configuration fragment into a plugin's config struct.
pub(crate) fn parse_fragment<T: serde::de::DeserializeOwned>(
    plugin: &str,
    fragment: &str,
) -> Result<T, PluginError> {
    toml::from_str(fragment)
        .map_err(|e| PluginError::invalid_config(format!("{plugin}: {}", e.message())))
}

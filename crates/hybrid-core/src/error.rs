//! Error types for hybrid-core.
//!
//! Three layers of errors exist:
//!
//! - [`StreamError`]: what a stream (physical or intercepted) can fail with.
//! - [`PluginError`]: what a plugin reports back from `configure` or
//!   `aid_attestation`.
//! - [`HybridError`]: what the orchestrator surfaces to the host runtime.
//!   Every variant is fatal to the current session.

use thiserror::Error;

use crate::registry::PluginName;

/// Result type alias for hybrid attestation operations.
pub type Result<T> = std::result::Result<T, HybridError>;

/// Errors raised by an attestation stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The peer closed the stream.
    #[error("stream closed by peer")]
    Closed,

    /// The session call context was cancelled while waiting on the stream.
    #[error("session cancelled")]
    Cancelled,

    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A plugin tried to send a second payload through its interceptor.
    #[error("plugin '{plugin}' already captured a payload for this session")]
    PayloadAlreadyCaptured {
        /// The plugin that sent twice.
        plugin: PluginName,
    },
}

/// Errors reported by an individual attestation plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The configuration fragment was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `aid_attestation` was called before a successful `configure`.
    #[error("plugin not configured")]
    NotConfigured,

    /// Gathering attestation evidence failed.
    #[error("evidence collection failed: {0}")]
    Evidence(String),

    /// Stream failure during the exchange.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl PluginError {
    /// Creates an `InvalidConfig` error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Creates an `Evidence` error.
    pub fn evidence(message: impl Into<String>) -> Self {
        Self::Evidence(message.into())
    }
}

/// Status classification handed to the host RPC layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// The caller supplied something unusable.
    InvalidArgument,
    /// The session is not in a state where the call can proceed.
    FailedPrecondition,
    /// The call conflicts with another in-flight operation.
    Aborted,
    /// Something failed while executing the call.
    Internal,
}

/// Errors surfaced by the hybrid orchestrator.
#[derive(Debug, Error)]
pub enum HybridError {
    /// The composite configuration (or one of its blocks) could not be decoded.
    #[error("configure: invalid composite configuration: {0}")]
    ConfigParse(String),

    /// A requested plugin is unknown or could not be instantiated.
    #[error("configure: unsupported plugin '{name}'")]
    UnsupportedPlugin {
        /// The name as it appeared in the configuration.
        name: String,
    },

    /// The configuration declared no plugins.
    #[error("configure: no plugins supplied")]
    NoPlugins,

    /// A plugin rejected its configuration fragment.
    #[error("configure: plugin '{plugin}' failed: {source}")]
    PluginConfigure {
        /// The plugin that failed.
        plugin: PluginName,
        /// The plugin's error.
        #[source]
        source: PluginError,
    },

    /// A plugin's attestation exchange failed.
    #[error("attestation: plugin '{plugin}' failed: {source}")]
    PluginAttestation {
        /// The plugin that failed.
        plugin: PluginName,
        /// The plugin's error.
        #[source]
        source: PluginError,
    },

    /// The combined message could not be serialized.
    #[error("attestation: unable to marshal combined message: {0}")]
    CombineMarshal(String),

    /// The call is not valid in the current state.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// The call conflicts with an operation already in progress.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Writing the combined message to the physical stream failed.
    #[error("attestation: sending combined message failed: {0}")]
    Transport(#[source] StreamError),
}

impl HybridError {
    /// Classify this error for the host runtime.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigParse(_) => StatusCode::InvalidArgument,
            Self::UnsupportedPlugin { .. } | Self::NoPlugins | Self::Precondition(_) => {
                StatusCode::FailedPrecondition
            }
            Self::Conflict(_) => StatusCode::Aborted,
            Self::PluginConfigure { .. }
            | Self::PluginAttestation { .. }
            | Self::CombineMarshal(_)
            | Self::Transport(_) => StatusCode::Internal,
        }
    }

    /// Name of the plugin responsible for this error, when there is one.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Self::UnsupportedPlugin { name } => Some(name),
            Self::PluginConfigure { plugin, .. } | Self::PluginAttestation { plugin, .. } => {
                Some(plugin.as_str())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_plugin_display_names_plugin() {
        let err = HybridError::UnsupportedPlugin {
            name: "tpm_devid".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "configure: unsupported plugin 'tpm_devid'"
        );
        assert_eq!(err.plugin(), Some("tpm_devid"));
    }

    #[test]
    fn test_plugin_attestation_display_includes_source() {
        let err = HybridError::PluginAttestation {
            plugin: PluginName::new("k8s_psat"),
            source: PluginError::Stream(StreamError::Cancelled),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("attestation: plugin 'k8s_psat' failed"));
        assert!(msg.contains("session cancelled"));
        assert_eq!(err.plugin(), Some("k8s_psat"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            HybridError::ConfigParse("bad".into()).status_code(),
            StatusCode::InvalidArgument
        );
        assert_eq!(HybridError::NoPlugins.status_code(), StatusCode::FailedPrecondition);
        assert_eq!(
            HybridError::Precondition("x".into()).status_code(),
            StatusCode::FailedPrecondition
        );
        assert_eq!(
            HybridError::Conflict("busy".into()).status_code(),
            StatusCode::Aborted
        );
        assert_eq!(
            HybridError::Transport(StreamError::Closed).status_code(),
            StatusCode::Internal
        );
    }

    #[test]
    fn test_plugin_error_from_stream_error() {
        let err: PluginError = StreamError::Closed.into();
        assert!(matches!(err, PluginError::Stream(StreamError::Closed)));
        assert_eq!(err.to_string(), "stream closed by peer");
    }

    #[test]
    fn test_no_plugin_for_generic_errors() {
        assert!(HybridError::NoPlugins.plugin().is_none());
        assert!(HybridError::CombineMarshal("x".into()).plugin().is_none());
    }
}

//! AWS instance identity document (`aws_iid`).
//!
//! Fetches the signed instance identity document through IMDSv2 and sends
//! `{"document": ..., "signature": ...}` as the attestation payload.

use hybrid_core::{AttestationStream, NodeAttestor, PayloadOrChallengeResponse, PluginError};
use serde::{Deserialize, Serialize};

use crate::error::parse_fragment;
use crate::metadata::{DEFAULT_TIMEOUT_SECS, MetadataClient};

/// Plugin name.
pub const NAME: &str = "aws_iid";

const TOKEN_PATH: &str = "/latest/api/token";
const DOCUMENT_PATH: &str = "/latest/dynamic/instance-identity/document";
const SIGNATURE_PATH: &str = "/latest/dynamic/instance-identity/signature";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Configuration fragment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsIidConfig {
    /// IMDS base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Lifetime requested for the IMDSv2 session token.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u32,
}

fn default_endpoint() -> String {
    "http://169.254.169.254".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_token_ttl() -> u32 {
    21_600
}

/// Payload sent to the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IidPayload {
    /// The instance identity document, as returned by IMDS.
    pub document: String,
    /// PKCS#7 signature over the document.
    pub signature: String,
}

#[derive(Debug)]
struct Configured {
    config: AwsIidConfig,
    client: MetadataClient,
}

/// AWS instance identity document attestor.
#[derive(Debug, Default)]
pub struct AwsIidAttestor {
    configured: Option<Configured>,
}

impl AwsIidAttestor {
    /// Creates an unconfigured attestor.
    pub fn new() -> Self {
        Self::default()
    }

    /// The applied configuration, if any.
    pub fn config(&self) -> Option<&AwsIidConfig> {
        self.configured.as_ref().map(|c| &c.config)
    }

    async fn fetch(&self) -> Result<IidPayload, PluginError> {
        let Configured { config, client } =
            self.configured.as_ref().ok_or(PluginError::NotConfigured)?;

        let ttl = config.token_ttl_secs.to_string();
        let token = client
            .put("IMDSv2 session token", TOKEN_PATH, &[(TOKEN_TTL_HEADER, ttl.as_str())])
            .await?;
        let auth = [(TOKEN_HEADER, token.trim())];

        let document = client
            .get("instance identity document", DOCUMENT_PATH, &[], &auth)
            .await?;
        let signature = client
            .get("instance identity signature", SIGNATURE_PATH, &[], &auth)
            .await?;

        Ok(IidPayload {
            document,
            signature,
        })
    }
}

impl NodeAttestor for AwsIidAttestor {
    fn configure(&mut self, fragment: &str) -> Result<(), PluginError> {
        let config: AwsIidConfig = parse_fragment(NAME, fragment)?;
        let client = MetadataClient::new(&config.endpoint, config.timeout_secs)?;
        self.configured = Some(Configured { config, client });
        Ok(())
    }

    async fn aid_attestation<S: AttestationStream>(&self, stream: &mut S) -> Result<(), PluginError> {
        let payload = self.fetch().await?;
        let bytes = serde_json::to_vec(&payload).map_err(crate::error::EvidenceError::from)?;
        stream.send(PayloadOrChallengeResponse::Payload(bytes)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::testing::serve;
    use crate::testing::CaptureStream;

    #[test]
    fn test_defaults() {
        let mut attestor = AwsIidAttestor::new();
        attestor.configure("").unwrap();

        let config = attestor.config().unwrap();
        assert_eq!(config.endpoint, "http://169.254.169.254");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.token_ttl_secs, 21_600);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = AwsIidAttestor::new()
            .configure("account_allowlist = [\"123\"]\n")
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_unconfigured() {
        let mut stream = CaptureStream::default();
        let err = AwsIidAttestor::new()
            .aid_attestation(&mut stream)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NotConfigured));
    }

    #[tokio::test]
    async fn test_fetches_document_with_session_token() {
        let (url, mut seen) = serve(vec![
            ("PUT /latest/api/token", 200, "session-token"),
            ("GET /latest/dynamic/instance-identity/document", 200, "{\"instanceId\":\"i-0abc\"}"),
            ("GET /latest/dynamic/instance-identity/signature", 200, "c2lnbmF0dXJl"),
        ])
        .await;
        let mut attestor = AwsIidAttestor::new();
        attestor
            .configure(&format!("endpoint = \"{url}\"\n"))
            .unwrap();

        let mut stream = CaptureStream::default();
        attestor.aid_attestation(&mut stream).await.unwrap();

        let payload: IidPayload = serde_json::from_slice(&stream.payloads[0]).unwrap();
        assert_eq!(payload.document, "{\"instanceId\":\"i-0abc\"}");
        assert_eq!(payload.signature, "c2lnbmF0dXJl");

        let token_request = seen.recv().await.unwrap().to_lowercase();
        assert!(token_request.contains("x-aws-ec2-metadata-token-ttl-seconds: 21600"));
        let document_request = seen.recv().await.unwrap().to_lowercase();
        assert!(document_request.contains("x-aws-ec2-metadata-token: session-token"));
    }

    #[tokio::test]
    async fn test_missing_signature_fails() {
        let (url, _seen) = serve(vec![
            ("PUT /latest/api/token", 200, "t"),
            ("GET /latest/dynamic/instance-identity/document", 200, "{}"),
        ])
        .await;
        let mut attestor = AwsIidAttestor::new();
        attestor
            .configure(&format!("endpoint = \"{url}\"\n"))
            .unwrap();

        let mut stream = CaptureStream::default();
        let err = attestor.aid_attestation(&mut stream).await.unwrap_err();

        assert!(matches!(err, PluginError::Evidence(_)));
        assert!(err.to_string().contains("instance identity signature"));
        assert!(stream.payloads.is_empty());
    }
}

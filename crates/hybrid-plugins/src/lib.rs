//! # hybrid-plugins
//!
//! Built-in node attestation plugins for the hybrid attestor:
//!
//! | Name | Evidence |
//! |------|----------|
//! | `aws_iid` | EC2 instance identity document + signature (IMDSv2) |
//! | `k8s_psat` | Kubernetes projected service account token |
//! | `azure_msi` | Azure managed identity access token |
//! | `gcp_iit` | GCE instance identity token |
//!
//! Each plugin reads its own TOML fragment and sends exactly one payload.
//! [`BuiltinRegistry`] maps names to plugins for
//! [`hybrid_core::Orchestrator`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aws_iid;
pub mod azure_msi;
pub mod error;
pub mod gcp_iit;
pub mod k8s_psat;
pub mod metadata;
pub mod registry;

pub use aws_iid::AwsIidAttestor;
pub use azure_msi::AzureMsiAttestor;
pub use error::EvidenceError;
pub use gcp_iit::GcpIitAttestor;
pub use k8s_psat::K8sPsatAttestor;
pub use registry::{Attestor, BuiltinRegistry};

#[cfg(test)]
pub(crate) mod testing {
    use hybrid_core::{
        AttestationStream, CallContext, Challenge, PayloadOrChallengeResponse, StreamError,
    };

    /// Stream that records payloads and never delivers challenges.
    #[derive(Debug, Default)]
    pub struct CaptureStream {
        pub payloads: Vec<Vec<u8>>,
        context: CallContext,
    }

    impl AttestationStream for CaptureStream {
        async fn recv(&mut self) -> Result<Challenge, StreamError> {
            Err(StreamError::Closed)
        }

        async fn send(&mut self, response: PayloadOrChallengeResponse) -> Result<(), StreamError> {
            if let PayloadOrChallengeResponse::Payload(bytes) = response {
                self.payloads.push(bytes);
            }
            Ok(())
        }

        fn context(&self) -> &CallContext {
            &self.context
        }
    }
}

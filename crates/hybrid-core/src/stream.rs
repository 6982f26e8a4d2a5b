//! The bidirectional attestation stream capability.
//!
//! A node attestation exchange runs over a stream that receives challenges
//! from the verifier and sends either the initial payload or challenge
//! responses back. The physical transport implements [`AttestationStream`];
//! so does [`PluginInterceptor`](crate::interceptor::PluginInterceptor), which
//! is what plugins actually talk to.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::StreamError;

/// A challenge sent by the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Challenge {
    /// Opaque challenge bytes, owned by the plugin's protocol.
    pub challenge: Vec<u8>,
}

impl Challenge {
    /// Creates a challenge from raw bytes.
    pub fn new(challenge: impl Into<Vec<u8>>) -> Self {
        Self {
            challenge: challenge.into(),
        }
    }
}

/// Something the attestor sends to the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadOrChallengeResponse {
    /// The attestation payload that opens the exchange.
    Payload(Vec<u8>),
    /// A response to a verifier challenge.
    ChallengeResponse(Vec<u8>),
}

impl PayloadOrChallengeResponse {
    /// Returns the payload bytes, if this is a payload.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Payload(bytes) => Some(bytes),
            Self::ChallengeResponse(_) => None,
        }
    }
}

/// Per-session call context, shared read-only by every interceptor.
#[derive(Debug, Clone)]
pub struct CallContext {
    session_id: Uuid,
    cancellation: CancellationToken,
}

impl CallContext {
    /// Creates a context with a fresh session id.
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            cancellation,
        }
    }

    /// Session identifier, used to correlate logs.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Cancellation signal for the whole session.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the session was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// Bidirectional attestation stream.
#[allow(async_fn_in_trait)]
pub trait AttestationStream: Send {
    /// Receive the next challenge from the verifier.
    fn recv(&mut self) -> impl Future<Output = Result<Challenge, StreamError>> + Send;

    /// Send a payload or challenge response to the verifier.
    fn send(
        &mut self,
        response: PayloadOrChallengeResponse,
    ) -> impl Future<Output = Result<(), StreamError>> + Send;

    /// The call context of the session this stream belongs to.
    fn context(&self) -> &CallContext;
}

impl<S: AttestationStream + ?Sized> AttestationStream for &mut S {
    fn recv(&mut self) -> impl Future<Output = Result<Challenge, StreamError>> + Send {
        (**self).recv()
    }

    fn send(
        &mut self,
        response: PayloadOrChallengeResponse,
    ) -> impl Future<Output = Result<(), StreamError>> + Send {
        (**self).send(response)
    }

    fn context(&self) -> &CallContext {
        (**self).context()
    }
}

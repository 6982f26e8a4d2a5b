//! Stream interception: N logical plugin exchanges over one physical stream.
//!
//! [`StreamInterceptor`] is the per-session template. It owns the physical
//! stream and the call context. [`StreamInterceptor::spawn`] hands out a
//! [`PluginInterceptor`] for one plugin; that interceptor forwards `recv` to
//! the physical stream and captures `send` locally instead of writing it.
//! Once every plugin is done, [`StreamInterceptor::send_combined`] performs
//! the only write of the session.
//!
//! Receives across plugins must never interleave: the physical stream has a
//! single receive cursor. `spawn` mutably borrows the template, so at most
//! one plugin interceptor can be alive at a time. Running plugins in parallel
//! would need a receive-routing demultiplexer at the transport boundary.

use tracing::debug;

use crate::error::{HybridError, Result, StreamError};
use crate::message::{CombinedMessage, PluginMessage};
use crate::registry::PluginName;
use crate::stream::{AttestationStream, CallContext, Challenge, PayloadOrChallengeResponse};

/// Session-level template wrapping the physical stream.
#[derive(Debug)]
pub struct StreamInterceptor<S> {
    stream: S,
    context: CallContext,
}

impl<S: AttestationStream> StreamInterceptor<S> {
    /// Wrap the physical stream of a session.
    pub fn new(stream: S) -> Self {
        let context = stream.context().clone();
        Self { stream, context }
    }

    /// The session call context.
    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// Create the interceptor for one plugin's exchange.
    pub fn spawn(&mut self, plugin: PluginName) -> PluginInterceptor<'_, S> {
        PluginInterceptor {
            stream: &mut self.stream,
            context: &self.context,
            plugin,
            payload: None,
        }
    }

    /// Serialize `message` and write it to the physical stream.
    ///
    /// Consumes the template: a session writes exactly once.
    pub async fn send_combined(mut self, message: &CombinedMessage) -> Result<()> {
        let payload = message.to_payload()?;
        debug!(
            plugins = message.messages.len(),
            bytes = payload.len(),
            "sending combined attestation payload"
        );
        self.stream
            .send(PayloadOrChallengeResponse::Payload(payload))
            .await
            .map_err(HybridError::Transport)
    }

    /// Recover the physical stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// The stream a single plugin sees during its exchange.
#[derive(Debug)]
pub struct PluginInterceptor<'a, S> {
    stream: &'a mut S,
    context: &'a CallContext,
    plugin: PluginName,
    payload: Option<Vec<u8>>,
}

impl<S> PluginInterceptor<'_, S> {
    /// The plugin this interceptor is bound to.
    pub fn plugin_name(&self) -> &PluginName {
        &self.plugin
    }

    /// The payload captured so far, if any.
    pub fn captured_payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Finish the exchange, yielding this plugin's combined-message entry.
    pub fn into_message(self) -> PluginMessage {
        PluginMessage::new(self.plugin.as_str(), self.payload.unwrap_or_default())
    }
}

impl<S: AttestationStream> AttestationStream for PluginInterceptor<'_, S> {
    async fn recv(&mut self) -> std::result::Result<Challenge, StreamError> {
        let cancellation = self.context.cancellation().clone();
        tokio::select! {
            biased;
            () = cancellation.cancelled() => Err(StreamError::Cancelled),
            challenge = self.stream.recv() => challenge,
        }
    }

    async fn send(
        &mut self,
        response: PayloadOrChallengeResponse,
    ) -> std::result::Result<(), StreamError> {
        match response {
            PayloadOrChallengeResponse::Payload(bytes) => {
                if self.payload.is_some() {
                    return Err(StreamError::PayloadAlreadyCaptured {
                        plugin: self.plugin.clone(),
                    });
                }
                debug!(plugin = %self.plugin, bytes = bytes.len(), "captured plugin payload");
                self.payload = Some(bytes);
                Ok(())
            }
            PayloadOrChallengeResponse::ChallengeResponse(bytes) => {
                // Only the combined payload reaches the verifier.
                debug!(plugin = %self.plugin, bytes = bytes.len(), "dropped plugin challenge response");
                Ok(())
            }
        }
    }

    fn context(&self) -> &CallContext {
        self.context
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedStream;
    use super::*;

    #[tokio::test]
    async fn test_recv_forwards_to_physical_stream() {
        let mut template = StreamInterceptor::new(ScriptedStream::with_challenges(&[b"c1", b"c2"]));

        let mut first = template.spawn(PluginName::new("a"));
        assert_eq!(first.recv().await.unwrap(), Challenge::new(b"c1".to_vec()));
        drop(first);

        let mut second = template.spawn(PluginName::new("b"));
        assert_eq!(second.recv().await.unwrap(), Challenge::new(b"c2".to_vec()));
        drop(second);

        assert_eq!(template.into_inner().recv_calls, 2);
    }

    #[tokio::test]
    async fn test_send_captures_without_writing() {
        let mut template = StreamInterceptor::new(ScriptedStream::default());

        let mut child = template.spawn(PluginName::new("aws_iid"));
        child
            .send(PayloadOrChallengeResponse::Payload(b"doc".to_vec()))
            .await
            .unwrap();

        assert_eq!(child.captured_payload(), Some(&b"doc"[..]));
        assert_eq!(child.plugin_name(), "aws_iid");
        let message = child.into_message();
        assert_eq!(message, PluginMessage::new("aws_iid", b"doc".to_vec()));

        assert!(template.into_inner().sent.is_empty());
    }

    #[tokio::test]
    async fn test_second_send_is_rejected() {
        let mut template = StreamInterceptor::new(ScriptedStream::default());
        let mut child = template.spawn(PluginName::new("gcp_iit"));

        child
            .send(PayloadOrChallengeResponse::Payload(b"first".to_vec()))
            .await
            .unwrap();
        let err = child
            .send(PayloadOrChallengeResponse::Payload(b"second".to_vec()))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StreamError::PayloadAlreadyCaptured {
                plugin: PluginName::new("gcp_iit")
            }
        );
        assert_eq!(child.captured_payload(), Some(&b"first"[..]));
    }

    #[tokio::test]
    async fn test_challenge_response_round_trip_keeps_payload() {
        let mut template = StreamInterceptor::new(ScriptedStream::with_challenges(&[b"nonce"]));
        let mut child = template.spawn(PluginName::new("tpm"));

        child
            .send(PayloadOrChallengeResponse::Payload(b"ek-cert".to_vec()))
            .await
            .unwrap();
        assert_eq!(child.recv().await.unwrap(), Challenge::new(b"nonce".to_vec()));
        child
            .send(PayloadOrChallengeResponse::ChallengeResponse(b"signed-nonce".to_vec()))
            .await
            .unwrap();

        assert_eq!(child.captured_payload(), Some(&b"ek-cert"[..]));
        drop(child);
        assert!(template.into_inner().sent.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_instances_have_independent_buffers() {
        let mut template = StreamInterceptor::new(ScriptedStream::default());

        let mut a = template.spawn(PluginName::new("a"));
        a.send(PayloadOrChallengeResponse::Payload(b"x".to_vec()))
            .await
            .unwrap();
        let a = a.into_message();

        let b = template.spawn(PluginName::new("b"));
        assert!(b.captured_payload().is_none());
        let b = b.into_message();

        assert_eq!(a.data, b"x");
        assert!(b.data.is_empty());
    }

    #[tokio::test]
    async fn test_context_is_shared() {
        let stream = ScriptedStream::default();
        let session = stream.context.session_id();
        let mut template = StreamInterceptor::new(stream);

        let child = template.spawn(PluginName::new("a"));
        assert_eq!(child.context().session_id(), session);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_blocked_recv() {
        let stream = ScriptedStream::default();
        let token = stream.context.cancellation().clone();
        let mut template = StreamInterceptor::new(stream);
        let mut child = template.spawn(PluginName::new("a"));

        token.cancel();

        assert_eq!(child.recv().await.unwrap_err(), StreamError::Cancelled);
    }

    #[tokio::test]
    async fn test_send_combined_writes_once() {
        let message = CombinedMessage {
            messages: vec![PluginMessage::new("a", b"x".to_vec())],
        };
        let mut stream = ScriptedStream::default();

        StreamInterceptor::new(&mut stream)
            .send_combined(&message)
            .await
            .unwrap();

        assert_eq!(stream.sent.len(), 1);
        let sent = stream.sent[0].payload().unwrap();
        assert_eq!(CombinedMessage::from_payload(sent).unwrap(), message);
    }

    #[tokio::test]
    async fn test_send_combined_transport_failure() {
        let stream = ScriptedStream {
            fail_send: true,
            ..ScriptedStream::default()
        };

        let err = StreamInterceptor::new(stream)
            .send_combined(&CombinedMessage::default())
            .await
            .unwrap_err();

        assert!(matches!(err, HybridError::Transport(StreamError::Transport(_))));
    }
}

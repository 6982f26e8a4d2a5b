//! JSON-lines attestation stream.
//!
//! Inbound frames: `{"challenge":"<base64>"}`, one per line.
//! Outbound frames: `{"payload":"<base64>"}` or
//! `{"challenge_response":"<base64>"}`, one per line.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hybrid_core::{AttestationStream, CallContext, Challenge, PayloadOrChallengeResponse, StreamError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InboundFrame {
    challenge: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum OutboundFrame {
    Payload(String),
    ChallengeResponse(String),
}

/// Attestation stream over a line-oriented reader/writer pair.
#[derive(Debug)]
pub struct LineStream<R, W> {
    lines: Lines<R>,
    writer: W,
    context: CallContext,
}

impl LineStream<BufReader<Stdin>, Stdout> {
    /// Stream over the process's stdin/stdout.
    pub fn stdio(context: CallContext) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), context)
    }
}

impl<R, W> LineStream<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Stream over an arbitrary reader/writer pair.
    pub fn new(reader: R, writer: W, context: CallContext) -> Self {
        Self {
            lines: reader.lines(),
            writer,
            context,
        }
    }

    /// Recover the writer.
    #[cfg(test)]
    pub fn into_writer(self) -> W {
        self.writer
    }
}

impl<R, W> AttestationStream for LineStream<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Challenge, StreamError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| StreamError::Transport(e.to_string()))?
                .ok_or(StreamError::Closed)?;
            if line.trim().is_empty() {
                continue;
            }

            let frame: InboundFrame = serde_json::from_str(&line)
                .map_err(|e| StreamError::Transport(format!("invalid inbound frame: {e}")))?;
            let challenge = STANDARD
                .decode(frame.challenge.as_bytes())
                .map_err(|e| StreamError::Transport(format!("invalid challenge encoding: {e}")))?;
            debug!(bytes = challenge.len(), "received challenge");
            return Ok(Challenge::new(challenge));
        }
    }

    async fn send(&mut self, response: PayloadOrChallengeResponse) -> Result<(), StreamError> {
        let frame = match response {
            PayloadOrChallengeResponse::Payload(bytes) => OutboundFrame::Payload(STANDARD.encode(bytes)),
            PayloadOrChallengeResponse::ChallengeResponse(bytes) => {
                OutboundFrame::ChallengeResponse(STANDARD.encode(bytes))
            }
        };
        let mut line =
            serde_json::to_vec(&frame).map_err(|e| StreamError::Transport(e.to_string()))?;
        line.push(b'\n');

        self.writer
            .write_all(&line)
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))
    }

    fn context(&self) -> &CallContext {
        &self.context
    }
}

//! Session orchestration: configure every plugin, then run their exchanges
//! one after another and send a single combined message.
//!
//! ## Phases
//!
//! ```text
//! Uninitialized ──configure──▶ Configuring ──ok──▶ Configured ◀──┐
//!                                   │                  │         │ session ends
//!                                   └──err──▶ Failed   └──run──▶ Attesting
//! ```
//!
//! `Failed` only blocks attestation; a new `configure` is accepted from any
//! phase except `Configuring` and `Attesting`.
//!
//! Plugins run strictly sequentially, in declaration order. They share one
//! physical stream and therefore one receive cursor; do not parallelize this
//! loop without a demultiplexing layer in front of the transport.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config;
use crate::error::{HybridError, Result};
use crate::interceptor::StreamInterceptor;
use crate::message::CombinedMessage;
use crate::registry::{ConfiguredPlugin, NodeAttestor, PluginName, PluginRegistry, instantiate};
use crate::stream::AttestationStream;

/// Observable orchestrator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No configuration has been applied yet.
    Uninitialized,
    /// A configure call is in progress.
    Configuring,
    /// Plugins are configured and ready to attest.
    Configured,
    /// At least one attestation session is running.
    Attesting,
    /// The last configure call failed.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Configuring => "configuring",
            Self::Configured => "configured",
            Self::Attesting => "attesting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Returned by a successful [`Orchestrator::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureResponse {
    /// Configured plugins in declaration order.
    pub plugins: Vec<PluginName>,
}

enum Slot<P> {
    Uninitialized,
    Configuring,
    Configured(Arc<[ConfiguredPlugin<P>]>),
    Failed,
}

struct State<P> {
    slot: Slot<P>,
    sessions_in_flight: usize,
}

/// Drives configuration and attestation sessions for a set of plugins.
pub struct Orchestrator<R: PluginRegistry> {
    registry: R,
    state: Mutex<State<R::Plugin>>,
}

impl<R: PluginRegistry> fmt::Debug for Orchestrator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("phase", &self.phase())
            .field("plugins", &self.plugins())
            .finish_non_exhaustive()
    }
}

impl<R: PluginRegistry> Orchestrator<R> {
    /// Creates an unconfigured orchestrator.
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            state: Mutex::new(State {
                slot: Slot::Uninitialized,
                sessions_in_flight: 0,
            }),
        }
    }

    /// The plugin registry.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        let state = self.state.lock();
        match &state.slot {
            _ if state.sessions_in_flight > 0 => Phase::Attesting,
            Slot::Uninitialized => Phase::Uninitialized,
            Slot::Configuring => Phase::Configuring,
            Slot::Configured(_) => Phase::Configured,
            Slot::Failed => Phase::Failed,
        }
    }

    /// Names of the configured plugins, in declaration order.
    pub fn plugins(&self) -> Vec<PluginName> {
        match &self.state.lock().slot {
            Slot::Configured(plugins) => plugins.iter().map(|p| p.name.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Apply a composite configuration document.
    ///
    /// On success the previous plugin list is replaced wholesale. On failure
    /// nothing stays configured.
    pub fn configure(&self, document: &str) -> Result<ConfigureResponse> {
        {
            let mut state = self.state.lock();
            if state.sessions_in_flight > 0 {
                return Err(HybridError::Conflict(format!(
                    "{} attestation session(s) in flight",
                    state.sessions_in_flight
                )));
            }
            if matches!(state.slot, Slot::Configuring) {
                return Err(HybridError::Conflict(
                    "another configuration is being applied".to_string(),
                ));
            }
            state.slot = Slot::Configuring;
        }

        let _reset = ConfigureGuard { state: &self.state };
        let result = self.build(document);

        let mut state = self.state.lock();
        match result {
            Ok(plugins) => {
                let names: Vec<PluginName> = plugins.iter().map(|p| p.name.clone()).collect();
                let listed: Vec<&str> = names.iter().map(PluginName::as_str).collect();
                info!(plugins = ?listed, "hybrid attestor configured");
                state.slot = Slot::Configured(plugins.into());
                Ok(ConfigureResponse { plugins: names })
            }
            Err(err) => {
                warn!(error = %err, "hybrid attestor configuration failed");
                state.slot = Slot::Failed;
                Err(err)
            }
        }
    }

    fn build(&self, document: &str) -> Result<Vec<ConfiguredPlugin<R::Plugin>>> {
        let configs = config::split(document)?;
        let mut plugins = instantiate(&self.registry, &configs.names())?;

        for configured in &mut plugins {
            let fragment = configs.fragment(configured.name.as_str()).unwrap_or_default();
            configured
                .plugin
                .configure(fragment)
                .map_err(|source| HybridError::PluginConfigure {
                    plugin: configured.name.clone(),
                    source,
                })?;
            debug!(plugin = %configured.name, "plugin configured");
        }

        Ok(plugins)
    }

    /// Run one attestation session over `stream`.
    ///
    /// Every configured plugin runs its exchange in declaration order. Only
    /// when all succeed is the combined message written, exactly once.
    pub async fn run_attestation<S: AttestationStream>(&self, stream: S) -> Result<()> {
        let plugins = self.begin_session()?;
        let _guard = SessionGuard { state: &self.state };

        let session = stream.context().session_id();
        let span = info_span!("attestation", session = %session);

        let result = run_session(&plugins, stream).instrument(span.clone()).await;
        span.in_scope(|| match &result {
            Ok(()) => info!("attestation session completed"),
            Err(err) => warn!(error = %err, "attestation session aborted"),
        });
        result
    }

    fn begin_session(&self) -> Result<Arc<[ConfiguredPlugin<R::Plugin>]>> {
        let mut state = self.state.lock();
        let plugins = match &state.slot {
            Slot::Configured(plugins) if !plugins.is_empty() => Arc::clone(plugins),
            Slot::Configured(_) => {
                return Err(HybridError::Precondition(
                    "no plugins configured".to_string(),
                ));
            }
            Slot::Uninitialized => {
                return Err(HybridError::Precondition(
                    "attestation requested before configuration".to_string(),
                ));
            }
            Slot::Configuring => {
                return Err(HybridError::Precondition(
                    "configuration still in progress".to_string(),
                ));
            }
            Slot::Failed => {
                return Err(HybridError::Precondition(
                    "plugin initialization error".to_string(),
                ));
            }
        };
        state.sessions_in_flight += 1;
        Ok(plugins)
    }
}

async fn run_session<P: NodeAttestor, S: AttestationStream>(
    plugins: &[ConfiguredPlugin<P>],
    stream: S,
) -> Result<()> {
    let mut template = StreamInterceptor::new(stream);
    let mut combined = CombinedMessage::default();

    for configured in plugins {
        let mut interceptor = template.spawn(configured.name.clone());
        configured
            .plugin
            .aid_attestation(&mut interceptor)
            .instrument(info_span!("plugin", plugin = %configured.name))
            .await
            .map_err(|source| HybridError::PluginAttestation {
                plugin: configured.name.clone(),
                source,
            })?;
        combined.messages.push(interceptor.into_message());
    }

    template.send_combined(&combined).await
}

/// Marks the slot `Failed` if `configure` unwinds before settling it.
struct ConfigureGuard<'a, P> {
    state: &'a Mutex<State<P>>,
}

impl<P> Drop for ConfigureGuard<'_, P> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if matches!(state.slot, Slot::Configuring) {
            state.slot = Slot::Failed;
        }
    }
}

struct SessionGuard<'a, P> {
    state: &'a Mutex<State<P>>,
}

impl<P> Drop for SessionGuard<'_, P> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.sessions_in_flight = state.sessions_in_flight.saturating_sub(1);
    }
}

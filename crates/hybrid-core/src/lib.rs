//! # hybrid-core
//!
//! Composite node attestation: several independent attestation plugins run
//! over one physical attestation stream and answer with one combined message.
//!
//! This crate provides:
//!
//! - [`config`]: splits a composite TOML document into per-plugin fragments
//! - [`registry`]: the plugin capability and name-to-plugin instantiation
//! - [`interceptor`]: gives each plugin an apparent private stream
//! - [`orchestrator`]: configures plugins and drives attestation sessions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hybrid_core::Orchestrator;
//! use hybrid_plugins::BuiltinRegistry;
//!
//! let orchestrator = Orchestrator::new(BuiltinRegistry);
//! orchestrator.configure(r#"
//!     [plugins.k8s_psat]
//!     cluster = "prod"
//!
//!     [plugins.aws_iid]
//! "#)?;
//!
//! // `stream` is the transport's AttestationStream for this session.
//! orchestrator.run_attestation(stream).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod interceptor;
pub mod message;
pub mod orchestrator;
pub mod registry;
pub mod stream;

pub use config::{PluginConfigs, split};
pub use error::{HybridError, PluginError, Result, StatusCode, StreamError};
pub use interceptor::{PluginInterceptor, StreamInterceptor};
pub use message::{CombinedMessage, PluginMessage};
pub use orchestrator::{ConfigureResponse, Orchestrator, Phase};
pub use registry::{ConfiguredPlugin, NodeAttestor, PluginName, PluginRegistry, instantiate};
pub use stream::{AttestationStream, CallContext, Challenge, PayloadOrChallengeResponse};

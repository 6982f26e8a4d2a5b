//! Plugin capability, plugin names, and registry lookup.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::{HybridError, PluginError, Result};
use crate::stream::AttestationStream;

/// Name of an attestation plugin, e.g. `aws_iid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginName(Arc<str>);

impl PluginName {
    /// Creates a plugin name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PluginName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl PartialEq<str> for PluginName {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for PluginName {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// A node attestation plugin.
///
/// `aid_attestation` is handed an [`AttestationStream`] that looks exactly
/// like the physical transport. Plugins may call `recv` any number of times;
/// the payload they send is captured rather than written to the wire.
#[allow(async_fn_in_trait)]
pub trait NodeAttestor: Send + Sync {
    /// Apply this plugin's configuration fragment.
    fn configure(&mut self, fragment: &str) -> std::result::Result<(), PluginError>;

    /// Run the attestation exchange over `stream`.
    fn aid_attestation<S: AttestationStream>(
        &self,
        stream: &mut S,
    ) -> impl Future<Output = std::result::Result<(), PluginError>> + Send;
}

/// A fixed table of constructible plugins.
pub trait PluginRegistry: Send + Sync {
    /// The plugin type this registry produces.
    type Plugin: NodeAttestor;

    /// Names this registry can construct.
    fn supported(&self) -> Vec<&'static str>;

    /// Construct a fresh, unconfigured plugin, or `None` if the name is unknown.
    fn construct(&self, name: &str) -> Option<Self::Plugin>;
}

/// A plugin paired with the name it was configured under.
#[derive(Debug)]
pub struct ConfiguredPlugin<P> {
    /// Name from the composite configuration.
    pub name: PluginName,
    /// The plugin instance.
    pub plugin: P,
}

/// Instantiate the named plugins, preserving order.
///
/// Fails on the first unknown name, or if no names were supplied.
pub fn instantiate<R: PluginRegistry>(
    registry: &R,
    names: &[PluginName],
) -> Result<Vec<ConfiguredPlugin<R::Plugin>>> {
    let plugins = names
        .iter()
        .map(|name| {
            registry
                .construct(name.as_str())
                .map(|plugin| ConfiguredPlugin {
                    name: name.clone(),
                    plugin,
                })
                .ok_or_else(|| HybridError::UnsupportedPlugin {
                    name: name.to_string(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    if plugins.is_empty() {
        return Err(HybridError::NoPlugins);
    }

    Ok(plugins)
}

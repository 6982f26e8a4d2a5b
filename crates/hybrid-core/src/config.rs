//! Composite configuration splitting.
//!
//! The composite document holds one `plugins` table with one named block per
//! plugin. Each block is extracted from the parsed tree and rendered back as
//! standalone TOML, so the owning plugin parses it as if it were its own file:
//!
//! ```toml
//! [plugins.k8s_psat]
//! cluster = "prod"
//!
//! [plugins.aws_iid]
//! ```
//!
//! Declaration order is significant: it becomes configuration order and the
//! order of entries in the combined message.

use toml::{Table, Value};
use tracing::warn;

use crate::error::{HybridError, Result};
use crate::registry::PluginName;

/// Name of the top-level container table.
pub const PLUGINS_TABLE: &str = "plugins";

/// Per-plugin configuration fragments in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginConfigs {
    entries: Vec<(PluginName, String)>,
}

impl PluginConfigs {
    /// Plugin names in declaration order.
    pub fn names(&self) -> Vec<PluginName> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Fragment text for `name`.
    pub fn fragment(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, fragment)| fragment.as_str())
    }

    /// Iterate `(name, fragment)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&PluginName, &str)> {
        self.entries.iter().map(|(n, f)| (n, f.as_str()))
    }

    /// Number of declared plugins.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no plugins were declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split a composite document into per-plugin fragments.
pub fn split(document: &str) -> Result<PluginConfigs> {
    let mut root: Table = document
        .parse()
        .map_err(|e: toml::de::Error| HybridError::ConfigParse(e.message().to_string()))?;

    for key in root.keys().filter(|k| *k != PLUGINS_TABLE) {
        warn!(key = %key, "ignoring unknown top-level configuration key");
    }

    let plugins = match root.remove(PLUGINS_TABLE) {
        None => return Ok(PluginConfigs::default()),
        Some(Value::Table(plugins)) => plugins,
        Some(other) => {
            return Err(HybridError::ConfigParse(format!(
                "'{PLUGINS_TABLE}' must be a table, found {}",
                other.type_str()
            )));
        }
    };

    let entries = plugins
        .into_iter()
        .map(|(name, block)| {
            let fragment = render_block(&name, block)?;
            Ok((PluginName::new(name), fragment))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PluginConfigs { entries })
}

fn render_block(name: &str, block: Value) -> Result<String> {
    let Value::Table(table) = block else {
        return Err(HybridError::ConfigParse(format!(
            "plugin block '{name}' must be a table, found {}",
            block.type_str()
        )));
    };

    toml::to_string(&table).map_err(|e| {
        HybridError::ConfigParse(format!("plugin block '{name}' cannot be rendered: {e}"))
    })
}

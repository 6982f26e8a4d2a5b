//! The combined message sent once per attestation session.
//!
//! Wire shape (JSON, carried in a single payload frame):
//!
//! ```text
//! {"messages":[{"name":"k8s_psat","data":"<base64>"},{"name":"aws_iid","data":"<base64>"}]}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{HybridError, Result};

/// One plugin's captured payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMessage {
    /// Plugin that produced the payload.
    pub name: String,
    /// Payload bytes; empty if the plugin never sent one.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl PluginMessage {
    /// Creates a plugin message.
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// All plugin payloads of a session, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CombinedMessage {
    /// Per-plugin payloads.
    pub messages: Vec<PluginMessage>,
}

impl CombinedMessage {
    /// Serialize into the bytes of the outbound payload frame.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| HybridError::CombineMarshal(e.to_string()))
    }

    /// Decode a combined payload frame.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| HybridError::CombineMarshal(e.to_string()))
    }

    /// Payload of the named plugin.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.messages
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.data.as_slice())
    }

    /// Plugin names in message order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(|m| m.name.as_str())
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let message = CombinedMessage {
            messages: vec![
                PluginMessage::new("aws_iid", b"x".to_vec()),
                PluginMessage::new("k8s_psat", Vec::new()),
            ],
        };

        let payload = message.to_payload().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "messages": [
                    {"name": "aws_iid", "data": "eA=="},
                    {"name": "k8s_psat", "data": ""}
                ]
            })
        );
    }

    #[test]
    fn test_decode_preserves_order_and_bytes() {
        let payload = br#"{"messages":[{"name":"b","data":"AAEC"},{"name":"a","data":"/w=="}]}"#;

        let message = CombinedMessage::from_payload(payload).unwrap();

        assert_eq!(message.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(message.get("b"), Some(&[0u8, 1, 2][..]));
        assert_eq!(message.get("a"), Some(&[0xffu8][..]));
        assert_eq!(message.get("c"), None);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let payload = br#"{"messages":[{"name":"a","data":"not base64!"}]}"#;

        let err = CombinedMessage::from_payload(payload).unwrap_err();
        assert!(matches!(err, HybridError::CombineMarshal(_)));
    }
}

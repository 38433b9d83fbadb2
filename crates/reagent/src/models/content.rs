use serde::{Deserialize, Serialize};

/// Binary content inlined into a message for multi-modal input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    /// Base64 encoded payload
    pub data: String,
    pub mime_type: String,
}

impl MediaAttachment {
    pub fn new<S: Into<String>, T: Into<String>>(data: S, mime_type: T) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Opaque provider-specific payload attached to an assistant message.
///
/// The agent never looks inside `payload`; only the client whose name matches
/// `provider` reads it back when rebuilding a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMeta {
    pub provider: String,
    pub payload: serde_json::Value,
}

impl ProviderMeta {
    pub fn new<S: Into<String>>(provider: S, payload: serde_json::Value) -> Self {
        Self {
            provider: provider.into(),
            payload,
        }
    }

    /// Payload for `provider`, if this metadata was produced by it
    pub fn payload_for(&self, provider: &str) -> Option<&serde_json::Value> {
        (self.provider == provider).then_some(&self.payload)
    }
}

//! Broker-issued session descriptor.

use serde::Serialize;

use crate::TargetDescriptor;

/// Short-lived, signed descriptor for one interactive session.
///
/// Deliberately not `Clone`: a descriptor is handed to exactly one transport,
/// which consumes it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionDescriptor {
    /// Broker session id.
    pub session_id: String,

    /// Websocket URL of the session's data stream.
    pub stream_url: String,

    /// Signed token authorising the stream.
    pub token_value: String,

    /// Target the session was opened against.
    #[serde(skip)]
    pub target: TargetDescriptor,
}

impl SessionDescriptor {
    /// Serialize in the shape the session-manager plugin expects as its first argument.
    pub fn to_plugin_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

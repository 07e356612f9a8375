//! Session Opener: exchanges a target for a signed session descriptor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ecs_provider_core::{SessionDescriptor, TargetDescriptor};
use serde_json::json;
use tracing::{info, warn};

use crate::error::SessionError;

/// Pre-registered session document that forwards a port to an SSH server.
pub const SSH_SESSION_DOCUMENT: &str = "AWS-StartSSHSession";

/// Port the in-container SSH server listens on.
pub const DEFAULT_SSH_PORT: u16 = 19583;

/// A request for one interactive session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub target: TargetDescriptor,
    pub document_name: String,
    pub parameters: HashMap<String, Vec<String>>,
}

impl SessionRequest {
    /// Request an SSH port-forwarding session to `port` on `target`.
    pub fn ssh(target: TargetDescriptor, port: u16) -> Self {
        Self {
            target,
            document_name: SSH_SESSION_DOCUMENT.to_string(),
            parameters: HashMap::from([("portNumber".to_string(), vec![port.to_string()])]),
        }
    }

    /// The request as the session-manager plugin expects it (`StartSession` input shape).
    pub fn to_plugin_json(&self) -> String {
        json!({
            "Target": self.target.as_str(),
            "DocumentName": self.document_name,
            "Parameters": self.parameters,
        })
        .to_string()
    }
}

/// The cloud session broker.
#[async_trait]
pub trait SessionBroker: Send + Sync {
    /// Start a session and return its descriptor.
    async fn start_session(&self, request: &SessionRequest) -> Result<SessionDescriptor, SessionError>;
}

/// Opens sessions against a fixed port. Failures are returned as-is; callers
/// re-request if they want to retry.
#[derive(Clone)]
pub struct SessionOpener {
    broker: Arc<dyn SessionBroker>,
    port: u16,
}

impl SessionOpener {
    pub fn new(broker: Arc<dyn SessionBroker>, port: u16) -> Self {
        Self { broker, port }
    }

    /// Build the request `open` sends for `target`.
    pub fn request(&self, target: &TargetDescriptor) -> SessionRequest {
        SessionRequest::ssh(target.clone(), self.port)
    }

    /// Open a session to `target`.
    pub async fn open(&self, target: &TargetDescriptor) -> Result<SessionDescriptor, SessionError> {
        let request = self.request(target);
        match self.broker.start_session(&request).await {
            Ok(descriptor) => {
                info!(target = %target, session_id = %descriptor.session_id, "Session started");
                Ok(descriptor)
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Session broker refused session");
                Err(e)
            }
        }
    }
}

use thiserror::Error;

/// Failure taxonomy for tool dispatch and upstream mediation.
///
/// Display strings are user-visible (they become the MCP error content) and
/// are asserted on by tests; keep the wording stable.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("Tenant '{tenant}' is not configured: {missing} is empty")]
    TenantNotConfigured {
        tenant: String,
        missing: &'static str,
    },

    /// Token endpoint rejected the grant, or a resource call kept returning
    /// 401 after a fresh token.
    #[error("Authentication failed ({status}): {body}")]
    AuthenticationFailure { status: u16, body: String },

    #[error("Permission denied (403): {body}")]
    PermissionDenied { body: String },

    #[error("Resource not found (404): {body}")]
    NotFound { body: String },

    #[error("Upstream request failed ({status} {status_text}): {body}")]
    UpstreamFailure {
        status: u16,
        status_text: String,
        body: String,
    },

    /// DNS, TCP, TLS or read failure before a complete upstream response.
    #[error("Upstream transport error: {0}")]
    Transport(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// Render the message shown to the MCP caller for a failed tool call.
    ///
    /// Upstream failures carry the tool name so the caller can tell which
    /// operation hit the upstream; every other kind renders as-is.
    pub fn tool_message(&self, tool: &str) -> String {
        match self {
            Self::UpstreamFailure {
                status,
                status_text,
                body,
            } => format!("Error executing {tool}: {status} {status_text} - {body}"),
            other => other.to_string(),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Cancelled(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

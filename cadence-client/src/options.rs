//! Client options.

/// Client configuration options
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Identity reported in logs
    pub identity: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            identity: format!(
                "cadence-client-{}-{}-{}",
                std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
                std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
                std::process::id(),
            ),
        }
    }
}

impl ClientOptions {
    pub fn with_identity(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

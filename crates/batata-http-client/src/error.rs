//! Client error types for the Batata HTTP SDK

/// Error type for Batata HTTP client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("auth failed: {0}")]
    AuthFailed(String),

    #[error("bind failed: {0}")]
    Bind(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    /// Whether the error came from the network or a non-success response.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::RequestFailed { .. }
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::AuthFailed("bad credentials".to_string());
        assert_eq!(err.to_string(), "auth failed: bad credentials");

        let err = ClientError::RequestFailed {
            status: 500,
            body: "internal error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "request failed with status 500: internal error"
        );

        let err = ClientError::Bind("no port".to_string());
        assert_eq!(err.to_string(), "bind failed: no port");
    }

    #[test]
    fn test_is_transport() {
        assert!(ClientError::Transport("reset".to_string()).is_transport());
        assert!(
            ClientError::RequestFailed {
                status: 404,
                body: String::new()
            }
            .is_transport()
        );
        assert!(!ClientError::Protocol("bad json".to_string()).is_transport());
        assert!(!ClientError::AuthFailed("x".to_string()).is_transport());
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: ClientError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}

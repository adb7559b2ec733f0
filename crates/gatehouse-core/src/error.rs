use thiserror::Error;

/// Errors produced by the gatehouse admission layer.
#[derive(Debug, Error)]
pub enum GateError {
    /// Opaque rejection handed back to a peer. Never carries the username,
    /// password or the underlying cause.
    #[error("invalid authentication")]
    AuthenticationFailure,

    #[error("config error: {0}")]
    Config(String),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("trust error: {0}")]
    Trust(String),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<regex::Error> for GateError {
    fn from(e: regex::Error) -> Self {
        GateError::Config(format!("invalid address pattern: {e}"))
    }
}

impl From<ciborium::de::Error<std::io::Error>> for GateError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        GateError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for GateError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        GateError::Codec(e.to_string())
    }
}

pub type GateResult<T> = Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_text_is_opaque() {
        let msg = GateError::AuthenticationFailure.to_string();
        assert_eq!(msg, "invalid authentication");
        assert!(!msg.contains('%'));
        assert!(!msg.contains("{}"));
    }

    #[test]
    fn regex_errors_are_config_errors() {
        let err: GateError = regex::Regex::new("(").unwrap_err().into();
        assert!(matches!(err, GateError::Config(_)));
    }
}

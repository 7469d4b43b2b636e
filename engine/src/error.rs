use derive_more::derive::Display;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Display)]
pub enum EngineError {
    #[display("upstream call failed: {_0}")]
    Upstream(anyhow::Error),
    #[display("request failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[display("http error: {_0}")]
    Http(reqwest::Error),
    #[display("invalid upstream response: {_0}")]
    InvalidResponse(String),
    #[display("configuration error: {_0}")]
    Config(config::ConfigError),
    #[display("io error: {_0}")]
    Io(std::io::Error),
    #[display("json error: {_0}")]
    Json(serde_json::Error),
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(error: anyhow::Error) -> Self {
        EngineError::Upstream(error)
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        tracing::error!("Reqwest error: {:?}", error);
        EngineError::Http(error)
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(error: config::ConfigError) -> Self {
        EngineError::Config(error)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::Io(error)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::Json(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_display_messages() {
        let err = EngineError::RetriesExhausted { attempts: 3 };
        assert_eq!(err.to_string(), "request failed after 3 attempts");

        let err: EngineError = anyhow!("connection reset").into();
        assert_eq!(err.to_string(), "upstream call failed: connection reset");
    }

    #[test]
    fn test_io_error_converts() {
        let err: EngineError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, EngineError::Io(_)));
        assert_eq!(err.to_string(), "io error: missing");
    }
}

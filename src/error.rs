use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("No data for {0}")]
    NotFound(String),

    #[error("Filesystem error at {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Result arrived for a superseded query. Internal signal, not a failure.
    #[error("Result belongs to a superseded query")]
    StaleGeneration,

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("'{0}' is already being installed")]
    AlreadyInstalling(String),

    #[error("No install destination succeeded")]
    NoDestinations,
}

impl Error {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// Timeouts, refused connections and non-2xx responses.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_) | Error::HttpStatus { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Errors that should advance a fallback chain rather than abort it.
    pub fn is_recoverable(&self) -> bool {
        self.is_network() || self.is_not_found() || matches!(self, Error::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let nf = Error::NotFound("570000".to_string());
        assert!(nf.is_not_found());
        assert!(!nf.is_network());
        assert!(nf.is_recoverable());

        let status = Error::HttpStatus {
            status: 503,
            url: "https://example.invalid".to_string(),
        };
        assert!(status.is_network());
        assert!(status.is_recoverable());

        let fs = Error::fs("/nope", std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!fs.is_recoverable());
        assert!(fs.to_string().contains("/nope"));
        assert!(!Error::StaleGeneration.is_recoverable());
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipewatchError {
    #[error("Not signed in. Run `pipewatch login` first")]
    Unauthenticated,

    #[error("Session expired or was rejected by the server. Run `pipewatch login` again")]
    Unauthorized,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid pipeline: {0}")]
    Validation(String),

    #[error("Event channel error: {0}")]
    Channel(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipewatchError {
    /// Errors after which the user has to sign in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Unauthorized)
    }
}

pub type Result<T> = std::result::Result<T, PipewatchError>;

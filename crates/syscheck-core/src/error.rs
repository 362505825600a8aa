use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyscheckError {
    /// The config file or an env override could not be read or decoded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyscheckError {
    /// Short error code used in structured log fields.
    pub fn code(&self) -> &'static str {
        match self {
            SyscheckError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SyscheckError>;

use fedpeg_primitives::errors::ParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid federation parameters: {0}")]
    Federation(#[from] ParseError),
}

use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, MockMetadataError>;

#[derive(Debug, Error)]
pub enum MockMetadataError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

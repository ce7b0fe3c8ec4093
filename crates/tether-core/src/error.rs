use thiserror::Error;

/// Top-level error type for Tether's ambient concerns.
#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

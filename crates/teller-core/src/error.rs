use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown coin type: {0}")]
    UnknownCoinType(String),

    #[error("invalid buy method: {0}")]
    InvalidBuyMethod(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid configuration:\n{0}")]
    ConfigInvalid(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

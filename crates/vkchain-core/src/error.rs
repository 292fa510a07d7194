#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("unknown setting: {0}")]
    UnknownSetting(String),

    #[error("configuration error: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaiaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings file error ({path}): {reason}")]
    Settings { path: String, reason: String },

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DaiaError {
    /// Short error code used in operator-facing logs.
    pub fn code(&self) -> &'static str {
        match self {
            DaiaError::Config(_) => "CONFIG_ERROR",
            DaiaError::Settings { .. } => "SETTINGS_ERROR",
            DaiaError::InvalidSetting { .. } => "INVALID_SETTING",
            DaiaError::Yaml(_) => "YAML_ERROR",
            DaiaError::Serialization(_) => "SERIALIZATION_ERROR",
            DaiaError::Io(_) => "IO_ERROR",
            DaiaError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, DaiaError>;

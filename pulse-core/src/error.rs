use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

/// Errors reported by the external fetch capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Rate limited by remote platform")]
    RateLimited { retry_after: Option<u64> },

    #[error("Transient failure: {reason}")]
    Transient { reason: String },

    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Resource not accessible: {resource}")]
    NotAccessible { resource: String },

    #[error("Credentials rejected: {reason}")]
    Unauthorized { reason: String },

    #[error("Invalid response: {details}")]
    InvalidResponse { details: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Migration failed: {migration}")]
    MigrationFailed { migration: String },

    #[error("Corrupt cache entry for {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("Report archive failure at {path}: {reason}")]
    Archive { path: String, reason: String },

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Resource list is empty")]
    EmptyResourceList,

    #[error("Duplicate resource name: {name}")]
    DuplicateResource { name: String },

    #[error("Environment variable not set: {var_name}")]
    MissingEnvironmentVariable { var_name: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}

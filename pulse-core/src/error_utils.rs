use crate::error::*;
use std::time::Duration;
use tracing::{error, info, warn};

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> String;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!("CoreError: {}", self);
        match self {
            CoreError::Fetch(e) => {
                error!("Fetch error details: {:?}", e);
            }
            CoreError::Storage(e) => {
                error!("Storage error details: {:?}", e);
            }
            CoreError::Config(e) => {
                error!("Configuration error details: {:?}", e);
            }
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("CoreError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Fetch(e) => e.is_retryable(),
            CoreError::Storage(e) => e.is_retryable(),
            CoreError::Network(_) => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Fetch(e) => e.retry_after(),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::Fetch(e) => e.user_friendly_message(),
            CoreError::Storage(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::InvalidInput { .. } => {
                "Invalid input provided. Please check your input and try again.".to_string()
            }
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            CoreError::Fetch(_) => "FETCH".to_string(),
            CoreError::Storage(_) => "STORAGE".to_string(),
            CoreError::Config(_) => "CONFIG".to_string(),
            CoreError::Serialization(_) => "SERIALIZATION".to_string(),
            CoreError::Network(_) => "NETWORK".to_string(),
            CoreError::InvalidInput { .. } => "INVALID_INPUT".to_string(),
        }
    }
}

impl ErrorExt for FetchError {
    fn log_error(&self) -> &Self {
        error!("FetchError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("FetchError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. }
                | FetchError::Transient { .. }
                | FetchError::Timeout { .. }
                | FetchError::InvalidResponse { .. }
        )
    }

    /// The wait the platform asked for, if it named one.
    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited {
                retry_after: Some(seconds),
            } => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            FetchError::RateLimited { .. } => {
                "Too many requests. Collection is slowing down.".to_string()
            }
            FetchError::NotAccessible { resource } => {
                format!("Forum '{}' is private, banned or does not exist.", resource)
            }
            FetchError::Unauthorized { .. } => {
                "Forum credentials were rejected. Please check your configuration.".to_string()
            }
            FetchError::Timeout { .. } => {
                "Request to the forum timed out. Please try again.".to_string()
            }
            _ => "Forum API error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            FetchError::RateLimited { .. } => "FETCH_RATE_LIMIT".to_string(),
            FetchError::Transient { .. } => "FETCH_TRANSIENT".to_string(),
            FetchError::Timeout { .. } => "FETCH_TIMEOUT".to_string(),
            FetchError::NotAccessible { .. } => "FETCH_NOT_ACCESSIBLE".to_string(),
            FetchError::Unauthorized { .. } => "FETCH_UNAUTHORIZED".to_string(),
            FetchError::InvalidResponse { .. } => "FETCH_INVALID_RESPONSE".to_string(),
        }
    }
}

impl ErrorExt for StorageError {
    fn log_error(&self) -> &Self {
        error!("StorageError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("StorageError (warning): {}", self);
        self
    }

    // Cache storage is assumed reliable; any failure aborts the run.
    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            StorageError::ConnectionFailed { .. } => {
                "Could not open the local cache database.".to_string()
            }
            StorageError::CorruptEntry { key, .. } => {
                format!("Cached data for '{}' is corrupted.", key)
            }
            StorageError::Archive { path, .. } => {
                format!("Could not access report archive at {}.", path)
            }
            _ => "Local storage error occurred.".to_string(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            StorageError::ConnectionFailed { .. } => "STORAGE_CONNECTION_FAILED".to_string(),
            StorageError::MigrationFailed { .. } => "STORAGE_MIGRATION_FAILED".to_string(),
            StorageError::CorruptEntry { .. } => "STORAGE_CORRUPT_ENTRY".to_string(),
            StorageError::Archive { .. } => "STORAGE_ARCHIVE".to_string(),
            StorageError::Sql(_) => "STORAGE_SQL_ERROR".to_string(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!("ConfigError: {}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!("ConfigError (warning): {}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => {
                format!("Configuration file '{}' not found.", path)
            }
            ConfigError::InvalidValue { field, .. } => {
                format!("Invalid value for configuration field '{}'.", field)
            }
            ConfigError::EmptyResourceList => {
                "No forums are configured. Add at least one [[resources]] entry.".to_string()
            }
            ConfigError::DuplicateResource { name } => {
                format!("Forum '{}' is configured more than once.", name)
            }
            ConfigError::MissingEnvironmentVariable { var_name } => format!(
                "Environment variable '{}' is required but not set.",
                var_name
            ),
            ConfigError::Parse(_) => {
                "Configuration file format is invalid. Please check the settings.".to_string()
            }
        }
    }

    fn error_code(&self) -> String {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND".to_string(),
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE".to_string(),
            ConfigError::EmptyResourceList => "CONFIG_EMPTY_RESOURCES".to_string(),
            ConfigError::DuplicateResource { .. } => "CONFIG_DUPLICATE_RESOURCE".to_string(),
            ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV_VAR".to_string(),
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR".to_string(),
        }
    }
}

pub struct ErrorReporter {
    report_errors: bool,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self {
            report_errors: true,
        }
    }

    pub fn with_error_reporting(mut self, enabled: bool) -> Self {
        self.report_errors = enabled;
        self
    }

    pub fn report_error(&self, error: &CoreError) {
        if self.report_errors {
            error.log_error();
            info!("Error code: {}", error.error_code());
            info!("User message: {}", error.user_friendly_message());
        }
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}

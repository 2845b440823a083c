//! Error types for the CaseyOS core library.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors.

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration field is absent.
    #[error("missing required config field: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// TOML deserialization failed.
    #[error("failed to parse config file: {source}")]
    ParseError {
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A production guard rejected the configuration at startup.
    #[error("unsafe production config: {message}")]
    UnsafeProduction {
        /// Which guard tripped and why.
        message: String,
    },
}

/// Errors from SQLite storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to SQLite database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// A stored value could not be decoded into its domain type.
    #[error("corrupt stored value in {table}.{column}: {message}")]
    Corrupt {
        /// The table holding the bad value.
        table: String,
        /// The column holding the bad value.
        column: String,
        /// What failed to decode.
        message: String,
    },
}

/// Errors from the APS scoring engine.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    /// Candidate action data is missing or malformed for scoring.
    #[error("invalid action data for scoring: {message}")]
    InvalidActionData {
        /// Details about what is missing or malformed.
        message: String,
    },
}

/// Errors from draft safety post-processing.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    /// Draft body contains personally identifiable information.
    #[error("draft contains PII ({pattern}), rejected")]
    PiiDetected {
        /// Which pattern class matched (ssn, card, phone).
        pattern: String,
    },

    /// Draft body is outside the permitted length bounds.
    #[error("draft length {length} outside bounds {min}..{max}")]
    LengthOutOfBounds {
        /// Actual character count.
        length: usize,
        /// Minimum permitted characters.
        min: usize,
        /// Maximum permitted characters.
        max: usize,
    },

    /// Draft contains a configured banned phrase.
    #[error("draft contains banned phrase: \"{phrase}\"")]
    BannedPhrase {
        /// The banned phrase that was found.
        phrase: String,
    },
}

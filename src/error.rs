//! Error types for the migration pipeline

use thiserror::Error;

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Migration pipeline errors
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Could not connect to the API when calling {path}")]
    Connection { path: String },

    #[error("Timeout while calling {path}")]
    Timeout { path: String },

    #[error("HTTP error {status} while calling {path}: {message}")]
    Http {
        path: String,
        status: u16,
        message: String,
    },

    #[error("Request to {path} failed: {message}")]
    Request { path: String, message: String },

    #[error("Unexpected API response from {path}: {message}")]
    UnexpectedResponse { path: String, message: String },

    #[error("Unresolved relationship: {collection}.{relation} references unknown id '{source_id}'")]
    UnresolvedRelationship {
        collection: String,
        relation: String,
        source_id: String,
    },

    #[error("Unknown VCS provider: {0}")]
    UnknownVcsProvider(String),

    #[error("Invalid VCS repository identifier: {0}")]
    InvalidRepositoryIdentifier(String),

    #[error("Cannot derive a migration id for {collection} record '{source_id}'")]
    InvalidMigrationId { collection: String, source_id: String },

    #[error("Migration id collision in {collection}: '{migration_id}' is used by both '{first}' and '{second}'")]
    MigrationIdCollision {
        collection: String,
        migration_id: String,
        first: String,
        second: String,
    },

    #[error("Duplicate source id in {collection}: {source_id}")]
    DuplicateSourceId { collection: String, source_id: String },

    #[error("Collection dependency cycle involving {0}")]
    CollectionCycle(String),

    #[error("Enrichment failed: {0}")]
    Enrichment(String),

    #[error("Plan {plan_id} did not reach a terminal status within {seconds}s")]
    PlanTimeout { plan_id: String, seconds: u64 },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] config_crate::ConfigError),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Semver error: {0}")]
    Semver(#[from] semver::Error),
}

impl MigrationError {
    /// Whether the error came from the transport layer (connection, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

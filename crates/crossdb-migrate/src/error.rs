//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A native type has no canonical mapping.
    #[error("Unsupported data type '{native}'{}", location_suffix(.location))]
    UnsupportedType {
        native: String,
        location: Option<String>,
    },

    /// A default-value expression could not be translated.
    #[error("Unsupported default expression '{expression}'{}", location_suffix(.location))]
    UnsupportedExpression {
        expression: String,
        location: Option<String>,
    },

    /// A structural condition the orchestrator cannot resolve.
    #[error("Unsupported schema: {0}")]
    UnsupportedSchema(String),

    /// A runtime value has no literal form in the target engine.
    #[error("Cannot render value {value} as {target}")]
    UnsupportedValue { value: String, target: String },

    /// The script tokenizer stopped making progress.
    #[error("Script reader made no progress at line {line}")]
    StuckScript { line: usize },

    /// Script dump or replay failure.
    #[error("Script error: {0}")]
    Script(String),

    /// Dependency scheduler failure (starvation, worker panic).
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// SQL Server driver error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

fn location_suffix(location: &Option<String>) -> String {
    match location {
        Some(loc) => format!(" at {}", loc),
        None => String::new(),
    }
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Unsupported native type without location.
    pub fn unsupported_type(native: impl Into<String>) -> Self {
        MigrateError::UnsupportedType {
            native: native.into(),
            location: None,
        }
    }

    /// Unsupported default expression without location.
    pub fn unsupported_expression(expression: impl Into<String>) -> Self {
        MigrateError::UnsupportedExpression {
            expression: expression.into(),
            location: None,
        }
    }

    pub fn unsupported_value(value: impl Into<String>, target: impl Into<String>) -> Self {
        MigrateError::UnsupportedValue {
            value: value.into(),
            target: target.into(),
        }
    }

    /// Attach a `schema.table.column` location to translator errors.
    ///
    /// Errors that already carry a location, and variants without one, pass
    /// through unchanged.
    pub fn at(self, location: impl Into<String>) -> Self {
        match self {
            MigrateError::UnsupportedType {
                native,
                location: None,
            } => MigrateError::UnsupportedType {
                native,
                location: Some(location.into()),
            },
            MigrateError::UnsupportedExpression {
                expression,
                location: None,
            } => MigrateError::UnsupportedExpression {
                expression,
                location: Some(location.into()),
            },
            other => other,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 1,
            MigrateError::Mssql(_) | MigrateError::Postgres(_) | MigrateError::Pool { .. } => 2,
            MigrateError::Transfer { .. } => 3,
            MigrateError::UnsupportedType { .. }
            | MigrateError::UnsupportedExpression { .. }
            | MigrateError::UnsupportedSchema(_)
            | MigrateError::UnsupportedValue { .. } => 4,
            MigrateError::Scheduler(_) => 5,
            MigrateError::StuckScript { .. } | MigrateError::Script(_) => 6,
            MigrateError::Io(_) => 7,
            MigrateError::Json(_) => 8,
            MigrateError::Cancelled => 130,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_attaches_location_once() {
        let err = MigrateError::unsupported_type("geography")
            .at("dbo.places.shape")
            .at("ignored");
        assert_eq!(
            err.to_string(),
            "Unsupported data type 'geography' at dbo.places.shape"
        );
    }

    #[test]
    fn test_at_leaves_other_variants() {
        let err = MigrateError::Config("bad".into()).at("dbo.t.c");
        assert_eq!(err.to_string(), "Configuration error: bad");
    }

    #[test]
    fn test_stuck_script_names_line() {
        let err = MigrateError::StuckScript { line: 42 };
        assert!(err.to_string().contains("line 42"));
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 1);
        assert_eq!(MigrateError::transfer("t", "m").exit_code(), 3);
        assert_eq!(MigrateError::UnsupportedSchema("x".into()).exit_code(), 4);
        assert_eq!(
            MigrateError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "x")).exit_code(),
            7
        );
        assert_eq!(MigrateError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = MigrateError::Io(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error: disk full"));
    }
}

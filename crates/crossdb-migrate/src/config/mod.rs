//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA-256 of the serialized configuration.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Canonical engine name for a configured engine or alias.
pub fn canonical_engine(name: &str) -> Option<&'static str> {
    match name.to_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => Some("postgres"),
        "mssql" | "sqlserver" => Some("mssql"),
        _ => None,
    }
}

/// Quote a libpq keyword value when it is empty or contains spaces, quotes
/// or backslashes.
fn pg_value(value: &str) -> String {
    if !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == '\'' || c == '\\') {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Brace an ADO value that contains a separator or brace.
fn ado_value(value: &str) -> String {
    if value.contains(|c: char| c == ';' || c == '{' || c == '}') || value.trim() != value {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

impl EndpointConfig {
    /// Connection string in the engine's native format.
    pub fn connection_string(&self) -> Result<String> {
        if let Some(cs) = &self.connection_string {
            return Ok(cs.clone());
        }
        match canonical_engine(&self.engine) {
            Some("postgres") => {
                let mut parts = vec![
                    format!("host={}", pg_value(&self.host)),
                    format!("port={}", self.port.unwrap_or(5432)),
                ];
                if !self.database.is_empty() {
                    parts.push(format!("dbname={}", pg_value(&self.database)));
                }
                parts.push(format!("user={}", pg_value(&self.user)));
                if !self.password.is_empty() {
                    parts.push(format!("password={}", pg_value(&self.password)));
                }
                parts.push(format!("sslmode={}", self.ssl_mode));
                Ok(parts.join(" "))
            }
            Some(_) => {
                let mut cs = format!("Server=tcp:{},{}", self.host, self.port.unwrap_or(1433));
                if !self.database.is_empty() {
                    cs.push_str(&format!(";Database={}", ado_value(&self.database)));
                }
                cs.push_str(&format!(
                    ";User Id={};Password={};Encrypt={};TrustServerCertificate={}",
                    ado_value(&self.user),
                    ado_value(&self.password),
                    self.encrypt,
                    self.trust_server_cert
                ));
                Ok(cs)
            }
            None => Err(MigrateError::Config(format!(
                "Unknown engine '{}'. Valid values: postgres, mssql",
                self.engine
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
source:
  engine: mssql
  host: sql.local
  database: shop
  user: sa
  password: "p;w"
  trust_server_cert: true
  schemas: [dbo]
target:
  engine: pg
  host: localhost
  database: shop_copy
  user: app
  password: "it's secret"
  schema: public
migration:
  insert_strategy: batch_row
  batch_rows: 500
  include_tables: ["dbo.*"]
dump:
  separator: ";"
"#;

    #[test]
    fn test_from_yaml_with_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.migration.batch_rows, 500);
        assert_eq!(config.migration.fetch_growth, 2.0);
        assert_eq!(config.migration.scheduler_max_retries, 2400);
        assert!(config.migration.migrate_data);
        assert_eq!(config.dump.separator.as_deref(), Some(";"));

        let transfer = config.transfer_options();
        assert_eq!(transfer.strategy, crate::core::traits::InsertStrategy::BatchRow);
        let metadata = config.metadata_options();
        assert_eq!(metadata.read.schemas, vec!["dbo".to_string()]);
        assert_eq!(metadata.scheduler.workers, 6);
    }

    #[test]
    fn test_connection_strings() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(
            config.source.connection_string().unwrap(),
            "Server=tcp:sql.local,1433;Database=shop;User Id=sa;Password={p;w};Encrypt=true;TrustServerCertificate=true"
        );
        assert_eq!(
            config.target.connection_string().unwrap(),
            "host=localhost port=5432 dbname=shop_copy user=app password='it\\'s secret' sslmode=require"
        );
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = Config::from_yaml(YAML).unwrap();
        let mut b = a.clone();
        assert_eq!(a.hash(), b.hash());
        b.migration.batch_rows = 10;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_auto_tuning_keeps_explicit_workers() {
        let resources = SystemResources {
            total_memory_gb: 16.0,
            cpu_cores: 32,
        };
        let tuned = MigrationConfig::default().with_auto_tuning(&resources);
        assert_eq!(tuned.workers, Some(8));

        let explicit = MigrationConfig {
            workers: Some(3),
            ..Default::default()
        };
        assert_eq!(explicit.with_auto_tuning(&resources).workers, Some(3));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = Config::from_yaml(YAML).unwrap();
        let debug_output = format!("{:?}", config);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("it's secret"));
    }
}

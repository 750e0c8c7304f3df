//! Configuration validation.

use super::{canonical_engine, Config, EndpointConfig};
use crate::error::{MigrateError, Result};
use crate::script::Separator;

fn validate_endpoint(side: &str, endpoint: &EndpointConfig) -> Result<()> {
    if canonical_engine(&endpoint.engine).is_none() {
        return Err(MigrateError::Config(format!(
            "{}.engine must be one of postgres, mssql; got '{}'",
            side, endpoint.engine
        )));
    }
    if endpoint.connection_string.is_none() {
        if endpoint.host.is_empty() {
            return Err(MigrateError::Config(format!(
                "{}.host is required without a connection_string",
                side
            )));
        }
        if endpoint.user.is_empty() {
            return Err(MigrateError::Config(format!(
                "{}.user is required without a connection_string",
                side
            )));
        }
    }
    if let Some(schema) = &endpoint.schema {
        if schema.trim().is_empty() {
            return Err(MigrateError::Config(format!("{}.schema must not be empty", side)));
        }
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    validate_endpoint("source", &config.source)?;
    validate_endpoint("target", &config.target)?;

    // Cannot migrate to the same database
    if canonical_engine(&config.source.engine) == canonical_engine(&config.target.engine)
        && config.source.connection_string()? == config.target.connection_string()?
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    let migration = &config.migration;
    if migration.batch_rows == 0 {
        return Err(MigrateError::Config(
            "migration.batch_rows must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if migration.max_fetch_bytes == 0 {
        return Err(MigrateError::Config(
            "migration.max_fetch_bytes must be at least 1".into(),
        ));
    }
    if !migration.fetch_growth.is_finite() || migration.fetch_growth <= 0.0 {
        return Err(MigrateError::Config(format!(
            "migration.fetch_growth must be a positive number, got {}",
            migration.fetch_growth
        )));
    }
    if let Some(separator) = &config.dump.separator {
        Separator::parse(separator)
            .map_err(|_| MigrateError::Config("dump.separator must not be empty".into()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DumpConfig, MigrationConfig};

    fn endpoint(engine: &str, database: &str) -> EndpointConfig {
        EndpointConfig {
            engine: engine.to_string(),
            connection_string: None,
            host: "localhost".to_string(),
            port: None,
            database: database.to_string(),
            user: "app".to_string(),
            password: "password".to_string(),
            ssl_mode: "disable".to_string(),
            encrypt: false,
            trust_server_cert: true,
            schemas: Vec::new(),
            schema: None,
        }
    }

    fn valid_config() -> Config {
        Config {
            source: endpoint("mssql", "source_db"),
            target: endpoint("postgres", "target_db"),
            migration: MigrationConfig::default(),
            dump: DumpConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_unknown_engine() {
        let mut config = valid_config();
        config.source.engine = "oracle".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("source.engine"));
    }

    #[test]
    fn test_missing_host_without_connection_string() {
        let mut config = valid_config();
        config.target.host = String::new();
        assert!(validate(&config).is_err());
        config.target.connection_string = Some("host=db user=app".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.target = endpoint("pg", "db");
        config.source = endpoint("postgresql", "db");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_numeric_limits() {
        let mut config = valid_config();
        config.migration.batch_rows = 0;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.migration.workers = Some(0);
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.migration.max_fetch_bytes = 0;
        assert!(validate(&config).is_err());

        for growth in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut config = valid_config();
            config.migration.fetch_growth = growth;
            assert!(validate(&config).is_err(), "growth {}", growth);
        }
    }

    #[test]
    fn test_empty_separator_rejected() {
        let mut config = valid_config();
        config.dump.separator = Some("  ".to_string());
        assert!(validate(&config).is_err());
        config.dump.separator = Some(";".to_string());
        assert!(validate(&config).is_ok());
    }
}

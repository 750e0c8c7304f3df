//! Driver catalog for explicit dependency injection.
//!
//! Every engine contributes one [`DbAgent`]: the bundle of collaborators the
//! engine needs (translators, repr, dialect, schema reader, connections). The
//! [`DriverCatalog`] is constructed explicitly and passed to the orchestrator;
//! there are no global singletons. Agents hold no per-run state, so one
//! catalog can serve several runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{MigrateError, Result};

use super::traits::{
    ConnectionProvider, DatabaseLifecycle, Dialect, ExpressionTranslator, SchemaReader,
    SqlExecutor, TypeTranslator, ValueRepr,
};

/// Per-engine collaborator bundle.
#[derive(Clone)]
pub struct DbAgent {
    pub engine: String,
    pub types: Arc<dyn TypeTranslator>,
    pub expressions: Arc<dyn ExpressionTranslator>,
    pub repr: Arc<dyn ValueRepr>,
    pub dialect: Arc<dyn Dialect>,
    pub schema_reader: Arc<dyn SchemaReader>,
    pub connections: Arc<dyn ConnectionProvider>,
    pub lifecycle: Arc<dyn DatabaseLifecycle>,
}

impl fmt::Debug for DbAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbAgent")
            .field("engine", &self.engine)
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

/// One side of a migration: an engine agent and where to connect.
///
/// `connections` defaults to the agent's provider; a dump swaps in a script
/// sink so every statement lands in the script instead of a server.
#[derive(Clone)]
pub struct Endpoint {
    pub agent: DbAgent,
    pub connections: Arc<dyn ConnectionProvider>,
    pub connection_string: String,
}

impl Endpoint {
    pub fn new(agent: DbAgent, connection_string: impl Into<String>) -> Self {
        Self {
            connections: agent.connections.clone(),
            agent,
            connection_string: connection_string.into(),
        }
    }

    pub fn with_connections(mut self, connections: Arc<dyn ConnectionProvider>) -> Self {
        self.connections = connections;
        self
    }

    /// Open a connection owned by the caller.
    pub async fn connect(&self) -> Result<Box<dyn SqlExecutor>> {
        self.connections.connect(&self.connection_string).await
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.agent.dialect.as_ref()
    }

    pub fn engine(&self) -> &str {
        &self.agent.engine
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("engine", &self.agent.engine)
            .finish_non_exhaustive()
    }
}

/// Registry of engine agents keyed by engine name.
#[derive(Default, Clone)]
pub struct DriverCatalog {
    agents: HashMap<String, DbAgent>,
    aliases: HashMap<String, String>,
}

impl DriverCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with the PostgreSQL and SQL Server drivers registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(crate::drivers::postgres::agent());
        catalog.register_alias("postgresql", "postgres");
        catalog.register_alias("pg", "postgres");
        catalog.register(crate::drivers::mssql::agent());
        catalog.register_alias("sqlserver", "mssql");
        catalog
    }

    /// Register an agent under its engine name, replacing any previous one.
    pub fn register(&mut self, agent: DbAgent) {
        self.agents.insert(agent.engine.clone(), agent);
    }

    pub fn register_alias(&mut self, alias: impl Into<String>, engine: impl Into<String>) {
        self.aliases.insert(alias.into(), engine.into());
    }

    /// Look up an agent by engine name or alias (case-insensitive).
    pub fn agent(&self, engine: &str) -> Result<DbAgent> {
        let key = engine.to_lowercase();
        let key = self.aliases.get(&key).cloned().unwrap_or(key);
        self.agents.get(&key).cloned().ok_or_else(|| {
            MigrateError::Config(format!(
                "Unknown database engine '{}'. Available: {}",
                engine,
                self.engines().join(", ")
            ))
        })
    }

    pub fn has_engine(&self, engine: &str) -> bool {
        self.agent(engine).is_ok()
    }

    /// Registered engine names, sorted.
    pub fn engines(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }
}

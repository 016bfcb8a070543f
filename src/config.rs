use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::dialect::{DatabaseVersion, DialectKind, Renderer};
use crate::driver::IsolationLevel;
use crate::error::{SqlError, SqlResult};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub dialect: DialectKind,
    /// Server version used for feature gating, e.g. "8.0.36".
    pub server_version: Option<String>,
    /// Schema (database, for MySQL) owned by the engine.
    pub schema: Option<String>,
    pub migration_table: String,
    /// Rows folded between cooperative yields during reconstruction.
    pub reconstruct_chunk_size: usize,
    pub default_isolation: Option<IsolationLevel>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            dialect: DialectKind::Postgres,
            server_version: None,
            schema: None,
            migration_table: "_catena_migrations".to_string(),
            reconstruct_chunk_size: 1000,
            default_isolation: None,
        }
    }
}

impl EngineConfig {
    pub fn for_dialect(dialect: DialectKind) -> Self {
        EngineConfig {
            dialect,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> SqlResult<()> {
        if self.migration_table.trim().is_empty() {
            return Err(SqlError::config_error("migration table name must not be empty"));
        }

        if self.reconstruct_chunk_size == 0 {
            return Err(SqlError::config_error("reconstruction chunk size must be greater than 0"));
        }

        if let Some(schema) = &self.schema {
            if schema.trim().is_empty() {
                return Err(SqlError::config_error("schema name must not be empty"));
            }
        }

        if self.dialect == DialectKind::MySql && self.default_isolation == Some(IsolationLevel::Snapshot) {
            return Err(SqlError::config_error("MySQL has no SNAPSHOT isolation level"));
        }

        self.version()?;
        Ok(())
    }

    pub fn version(&self) -> SqlResult<Option<DatabaseVersion>> {
        self.server_version.as_deref().map(str::parse).transpose()
    }

    /// Configured schema, or the dialect's usual one.
    pub fn schema_name(&self) -> &str {
        self.schema
            .as_deref()
            .unwrap_or_else(|| self.dialect.default_schema())
    }

    pub fn renderer(&self) -> SqlResult<Box<dyn Renderer>> {
        Ok(self.dialect.renderer(self.version()?))
    }

    pub fn from_toml_str(text: &str) -> SqlResult<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| SqlError::config_error(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SqlResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SqlError::config_error(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Apply `CATENA_*` environment overrides
    pub fn apply_environment_overrides(&mut self) -> SqlResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> SqlResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dialect) = lookup("CATENA_DIALECT") {
            self.dialect = dialect.parse()?;
        }

        if let Some(version) = lookup("CATENA_SERVER_VERSION") {
            self.server_version = Some(version);
        }

        if let Some(schema) = lookup("CATENA_SCHEMA") {
            self.schema = Some(schema);
        }

        if let Some(table) = lookup("CATENA_MIGRATION_TABLE") {
            self.migration_table = table;
        }

        if let Some(size) = lookup("CATENA_CHUNK_SIZE") {
            self.reconstruct_chunk_size = size
                .parse()
                .map_err(|_| SqlError::config_error(format!("invalid CATENA_CHUNK_SIZE '{}'", size)))?;
        }

        self.validate()
    }

    /// Create a builder for fluent configuration
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

/// Configuration builder for fluent API
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        EngineConfigBuilder {
            config: EngineConfig::default(),
        }
    }

    pub fn dialect(mut self, dialect: DialectKind) -> Self {
        self.config.dialect = dialect;
        self
    }

    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.config.server_version = Some(version.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.schema = Some(schema.into());
        self
    }

    pub fn migration_table(mut self, table: impl Into<String>) -> Self {
        self.config.migration_table = table.into();
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.reconstruct_chunk_size = size;
        self
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.config.default_isolation = Some(level);
        self
    }

    pub fn build(self) -> SqlResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_validation() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.schema_name(), "public");
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::builder()
            .dialect(DialectKind::MySql)
            .server_version("8.0.13")
            .schema("shop")
            .chunk_size(250)
            .build()
            .unwrap();

        assert_eq!(config.schema_name(), "shop");
        assert_eq!(config.version().unwrap(), Some(DatabaseVersion::new(8, 0, 13)));
        assert_eq!(config.renderer().unwrap().kind(), DialectKind::MySql);
    }

    #[test]
    fn test_invalid_config() {
        assert!(EngineConfig::builder().chunk_size(0).build().is_err());
        assert!(EngineConfig::builder().migration_table(" ").build().is_err());
        assert!(EngineConfig::builder().server_version("eight").build().is_err());
        assert!(EngineConfig::builder()
            .dialect(DialectKind::MySql)
            .isolation(IsolationLevel::Snapshot)
            .build()
            .is_err());
    }

    #[test]
    fn test_toml_file_loading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "dialect = \"sqlserver\"\nschema = \"sales\"\ndefault_isolation = \"snapshot\""
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.dialect, DialectKind::SqlServer);
        assert_eq!(config.schema_name(), "sales");
        assert_eq!(config.default_isolation, Some(IsolationLevel::Snapshot));
        assert_eq!(config.migration_table, "_catena_migrations");
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let err = EngineConfig::from_file("/nonexistent/catena.toml").unwrap_err();
        assert!(matches!(err, SqlError::Config { .. }));
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("CATENA_DIALECT", "mysql"),
            ("CATENA_CHUNK_SIZE", "64"),
            ("CATENA_MIGRATION_TABLE", "schema_history"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.dialect, DialectKind::MySql);
        assert_eq!(config.reconstruct_chunk_size, 64);
        assert_eq!(config.migration_table, "schema_history");
        assert_eq!(config.schema_name(), "catena");

        let mut bad = EngineConfig::default();
        assert!(bad
            .apply_overrides(|key| (key == "CATENA_CHUNK_SIZE").then(|| "lots".to_string()))
            .is_err());
    }
}

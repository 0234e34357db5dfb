use crate::database::materializer::Atomicity;
use crate::database::materializer::MaterializeOptions;
use crate::schema::TypePolicy;
use crate::spreadsheet::ReadOptions;
use serde::Deserialize;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Reading config file {path:?} failed: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parsing config file {path:?} failed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings of one ingestion service. Every field is optional in the JSON file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// DuckDB file, or `:memory:`.
    pub database_path: PathBuf,
    pub sheet_index: usize,
    /// Rows per transaction batch and per progress log line.
    pub batch_size: usize,
    /// Larger uploads are rejected, in bytes.
    pub max_file_size: u64,
    pub type_policy: TypePolicy,
    pub atomicity: Atomicity,
    pub strict_column_count: bool,
    pub skip_empty_rows: bool,
    pub read_back_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            database_path: PathBuf::from("sheet_ingest.duckdb"),
            sheet_index: 0,
            batch_size: 1000,
            max_file_size: 50 * 1024 * 1024,
            type_policy: TypePolicy::default(),
            atomicity: Atomicity::default(),
            strict_column_count: true,
            skip_empty_rows: true,
            read_back_limit: 1000,
        }
    }
}

impl IngestConfig {
    pub fn load(path: &Path) -> Result<IngestConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: IngestConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            Err(ConfigError::Invalid("batch_size must be at least 1".to_owned()))?
        }
        if self.max_file_size == 0 {
            Err(ConfigError::Invalid("max_file_size must be at least 1".to_owned()))?
        }
        if self.read_back_limit == 0 {
            Err(ConfigError::Invalid("read_back_limit must be at least 1".to_owned()))?
        }
        Ok(())
    }

    pub fn read_options(&self, sheet_index: Option<usize>) -> ReadOptions {
        ReadOptions {
            sheet_index: sheet_index.unwrap_or(self.sheet_index),
            skip_empty_rows: self.skip_empty_rows,
        }
    }

    pub fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            batch_size: self.batch_size,
            atomicity: self.atomicity,
            strict_column_count: self.strict_column_count,
        }
    }
}

use crate::error::IngestError;
use duckdb::Connection;
use std::path::Path;
use std::sync::Mutex;
use std::sync::PoisonError;

/// Source of database sessions. The ingestion service asks for one per call and
/// drops it when the call ends.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> Result<Connection, IngestError>;
}

/// Opens DuckDB sessions against one database, on disk or in memory.
///
/// Every session is a clone of a root connection, so all of them see the same
/// database even when it lives in memory.
pub struct DuckDbConnector {
    root: Mutex<Connection>,
}

impl DuckDbConnector {
    /// Opens (or creates) a database file. `:memory:` gives a private in-memory database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DuckDbConnector, IngestError> {
        let path = path.as_ref();
        let connection = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        log::debug!("Opened database '{}'", path.display());
        Ok(DuckDbConnector {
            root: Mutex::new(connection),
        })
    }

    pub fn in_memory() -> Result<DuckDbConnector, IngestError> {
        Self::open(":memory:")
    }
}

impl ConnectionFactory for DuckDbConnector {
    fn connect(&self) -> Result<Connection, IngestError> {
        let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(root.try_clone()?)
    }
}

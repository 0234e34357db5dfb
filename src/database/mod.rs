//! # Storage
//!
//! Everything that talks to DuckDB: sessions ([`connection`]), value conversion
//! ([`convert`]), SQL text ([`ddl`]), per-table serialization ([`locks`]), loading rows
//! into dynamic tables ([`materializer`]) and the descriptor catalog ([`catalog`]).

pub mod catalog;
pub mod connection;
pub mod convert;
pub mod ddl;
pub mod locks;
pub mod materializer;

pub use catalog::Catalog;
pub use catalog::TableData;
pub use catalog::TableDescriptor;
pub use catalog::DESCRIPTOR_TABLE;
pub use connection::ConnectionFactory;
pub use connection::DuckDbConnector;
pub use convert::SqlValue;
pub use locks::TableLocks;
pub use materializer::Atomicity;
pub use materializer::MaterializeOptions;
pub use materializer::Materializer;

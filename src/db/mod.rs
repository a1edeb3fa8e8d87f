//! The uniform database contract and the factory that selects a dialect.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::config::{ConnectionConfig, DriverKind};
use crate::errors::DbError;
use crate::filter::Filter;
use crate::metadata::SchemaDetails;
use crate::rows::{DataPage, Row};

pub mod mariadb;
pub mod mongodb;
pub mod mssql;
pub mod mysql;
pub mod postgres;

/// One capability contract, implemented once per dialect. All
/// dialect-specific SQL and BSON text lives inside the implementations;
/// callers never see it.
///
/// A driver owns its live connection for the duration of one logical
/// operation: callers connect, perform the operation, and close. Handles
/// are never pooled across operations.
#[async_trait]
pub trait Database: Send + Sync {
    /// Opens and health-checks a connection. Bad credentials, an
    /// unreachable host, or a timeout surface as a connection error.
    async fn connect(&mut self) -> Result<(), DbError>;

    /// Releases the connection. Idempotent; a no-op when never connected.
    async fn close(&mut self) -> Result<(), DbError>;

    /// Lists the catalogs/databases visible to the credential.
    async fn databases(&self) -> Result<Vec<String>, DbError>;

    /// Lists base tables (or collections) in the configured database.
    async fn tables(&self) -> Result<Vec<String>, DbError>;

    /// Full column/index/foreign-key profile for one table, keyed by
    /// column name.
    async fn metadata(&self, table: &str) -> Result<BTreeMap<String, SchemaDetails>, DbError>;

    /// Filtered, sorted, paginated fetch with the total match count.
    async fn data(&self, table: &str, filter: &Filter) -> Result<DataPage, DbError>;

    /// Runs an arbitrary read statement, injecting the dialect's
    /// pagination only when the text does not already carry its own.
    async fn query(&self, raw: &str, page: u32, size: u32) -> Result<Vec<Row>, DbError>;

    /// Runs all statements inside one transaction. Any failure rolls the
    /// whole batch back and is returned; there is no partial application.
    async fn execute(&self, statements: &[String]) -> Result<(), DbError>;
}

impl std::fmt::Debug for dyn Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Database")
    }
}

/// Builds the dialect implementation matching the configured driver kind.
/// An unknown kind is a configuration error, never a panic.
pub fn new_database(config: ConnectionConfig) -> Result<Box<dyn Database>, DbError> {
    match config.driver.parse::<DriverKind>()? {
        DriverKind::Postgres => Ok(Box::new(postgres::PostgresDatabase::new(config))),
        DriverKind::MySql => Ok(Box::new(mysql::MySqlDatabase::new(config))),
        DriverKind::MariaDb => Ok(Box::new(mariadb::MariaDbDatabase::new(config))),
        DriverKind::MsSql => Ok(Box::new(mssql::MsSqlDatabase::new(config))),
        DriverKind::MongoDb => Ok(Box::new(mongodb::MongoDatabase::new(config))),
    }
}

/// Whether a raw statement already carries a LIMIT keyword. Detection is
/// keyword presence, not a parse; statements mentioning the word anywhere
/// are left untouched.
pub(crate) fn has_limit_clause(raw: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\blimit\b").expect("limit pattern is valid"))
        .is_match(raw)
}

pub(crate) fn has_offset_clause(raw: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\boffset\b").expect("offset pattern is valid"))
        .is_match(raw)
}

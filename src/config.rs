use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DbError;

/// The database engines the gateway can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Postgres,
    MySql,
    MariaDb,
    MsSql,
    MongoDb,
}

impl FromStr for DriverKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(DriverKind::Postgres),
            "mysql" => Ok(DriverKind::MySql),
            "mariadb" => Ok(DriverKind::MariaDb),
            "mssql" => Ok(DriverKind::MsSql),
            "mongodb" => Ok(DriverKind::MongoDb),
            other => Err(DbError::Config(format!(
                "unsupported database driver: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverKind::Postgres => "postgres",
            DriverKind::MySql => "mysql",
            DriverKind::MariaDb => "mariadb",
            DriverKind::MsSql => "mssql",
            DriverKind::MongoDb => "mongodb",
        };
        f.write_str(name)
    }
}

/// Connection coordinates for one target cluster. Constructed per request
/// from the routing layer's parameters and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver kind in wire form (`postgres`, `mysql`, `mariadb`, `mssql`,
    /// `mongodb`). Parsed by the factory; anything else is a
    /// configuration error.
    pub driver: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
}

impl ConnectionConfig {
    /// The configured database name, or an error when the operation
    /// requires one.
    pub(crate) fn database_name(&self) -> Result<&str, DbError> {
        self.database
            .as_deref()
            .ok_or_else(|| DbError::Validation("database name is required".into()))
    }
}

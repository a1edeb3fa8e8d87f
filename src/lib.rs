pub mod cache;
pub mod commits;
pub mod config;
pub mod db;
pub mod errors;
pub mod filter;
pub mod metadata;
pub mod rows;

pub use cache::{CacheStore, DATA_TTL, SCHEMA_TTL};
pub use commits::{Commit, CommitService, CommitStore, QueryKind, QueryRecord};
pub use config::{ConnectionConfig, DriverKind};
pub use db::{new_database, Database};
pub use errors::DbError;
pub use filter::{Combinator, Filter};
pub use metadata::SchemaDetails;
pub use rows::{DataPage, Row};

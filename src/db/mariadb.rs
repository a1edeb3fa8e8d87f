//! MariaDB dialect driver.
//!
//! Rides the MySQL wire protocol and catalog helpers; differs only in the
//! count expression, since MariaDB has had window functions since 10.2.

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::info;
use sqlx::MySqlPool;

use crate::config::ConnectionConfig;
use crate::errors::DbError;
use crate::filter::{self, Filter, SqlDialect};
use crate::metadata::{self, SchemaDetails};
use crate::rows::{DataPage, Row};

use super::mysql;
use super::Database;

pub struct MariaDbDatabase {
    config: ConnectionConfig,
    pool: Option<MySqlPool>,
}

struct MariaDbDialect;

impl SqlDialect for MariaDbDialect {
    fn quote_table(&self, table: &str) -> String {
        format!("`{}`", table.replace('`', "``"))
    }

    fn count_expression(&self, _table: &str) -> String {
        "COUNT(*) OVER()".into()
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".into()
    }

    fn contains_ci(&self, column: &str, placeholder: &str, negated: bool) -> String {
        if negated {
            format!("LOWER({}) NOT LIKE LOWER({})", column, placeholder)
        } else {
            format!("LOWER({}) LIKE LOWER({})", column, placeholder)
        }
    }

    fn pagination(&self, size: u32, offset: u64, _has_sort: bool) -> String {
        format!(" LIMIT {} OFFSET {}", size, offset)
    }
}

impl MariaDbDatabase {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, pool: None }
    }

    fn pool(&self) -> Result<&MySqlPool, DbError> {
        self.pool
            .as_ref()
            .ok_or_else(|| DbError::Connection("not connected to MariaDB".into()))
    }
}

#[async_trait]
impl Database for MariaDbDatabase {
    async fn connect(&mut self) -> Result<(), DbError> {
        self.pool = Some(mysql::connect_pool(&self.config).await?);
        info!("connected to MariaDB at {}", self.config.hostname);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DbError> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            info!("closed MariaDB connection to {}", self.config.hostname);
        }
        Ok(())
    }

    async fn databases(&self) -> Result<Vec<String>, DbError> {
        mysql::list_databases(self.pool()?).await
    }

    async fn tables(&self) -> Result<Vec<String>, DbError> {
        mysql::list_tables(self.pool()?, self.config.database_name()?).await
    }

    async fn metadata(&self, table: &str) -> Result<BTreeMap<String, SchemaDetails>, DbError> {
        let pool = self.pool()?;
        let schema = self.config.database_name()?;
        let (columns, indexes, foreign_keys) = tokio::join!(
            mysql::fetch_columns(pool, schema, table),
            mysql::fetch_indexes(pool, schema, table),
            mysql::fetch_foreign_keys(pool, schema, table)
        );
        Ok(metadata::merge_metadata(columns?, &indexes?, &foreign_keys?))
    }

    async fn data(&self, table: &str, filter: &Filter) -> Result<DataPage, DbError> {
        let built = filter::build_select(&MariaDbDialect, table, filter)?;
        let mut query = sqlx::query(&built.sql);
        for param in &built.params {
            query = query.bind(param.as_str());
        }
        let raw = query.fetch_all(self.pool()?).await?;
        let (data, count) = mysql::parse_rows(&raw)?;
        Ok(DataPage { data, count })
    }

    async fn query(&self, raw: &str, page: u32, size: u32) -> Result<Vec<Row>, DbError> {
        mysql::run_query(self.pool()?, raw, page, size).await
    }

    async fn execute(&self, statements: &[String]) -> Result<(), DbError> {
        mysql::run_execute(self.pool()?, statements).await
    }
}

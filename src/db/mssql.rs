//! Microsoft SQL Server dialect driver.
//!
//! Built on tiberius over a tokio TcpStream. The TDS client wants `&mut`
//! for every round trip, so the connection sits behind a tokio Mutex and
//! each operation holds it for the duration of its statements.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use log::info;
use regex::Regex;
use serde_json::Value;
use tiberius::{AuthMethod, ColumnType, Config, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::config::ConnectionConfig;
use crate::errors::DbError;
use crate::filter::{self, Filter, SqlDialect};
use crate::metadata::{self, ForeignKeyDetails, IndexDetails, SchemaDetails};
use crate::rows::{self, DataPage, Row};

use super::{has_offset_clause, Database};

type TdsClient = tiberius::Client<Compat<TcpStream>>;

pub struct MsSqlDatabase {
    config: ConnectionConfig,
    client: Option<Mutex<TdsClient>>,
}

struct MsSqlDialect;

impl SqlDialect for MsSqlDialect {
    fn quote_table(&self, table: &str) -> String {
        format!("[{}]", table.replace(']', "]]"))
    }

    fn count_expression(&self, _table: &str) -> String {
        "COUNT(*) OVER()".into()
    }

    fn placeholder(&self, n: usize) -> String {
        format!("@P{}", n)
    }

    fn contains_ci(&self, column: &str, placeholder: &str, negated: bool) -> String {
        if negated {
            format!("LOWER({}) NOT LIKE LOWER({})", column, placeholder)
        } else {
            format!("LOWER({}) LIKE LOWER({})", column, placeholder)
        }
    }

    // OFFSET/FETCH is only legal after an ORDER BY, so a neutral one is
    // injected when the caller did not sort.
    fn pagination(&self, size: u32, offset: u64, has_sort: bool) -> String {
        let order = if has_sort { "" } else { " ORDER BY (SELECT NULL)" };
        format!(
            "{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            order, offset, size
        )
    }
}

fn has_order_by(raw: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\border\s+by\b").expect("order by pattern is valid"))
        .is_match(raw)
}

fn has_top_clause(raw: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\btop\b").expect("top pattern is valid"))
        .is_match(raw)
}

fn decode_int(row: &tiberius::Row, index: usize, name: &str) -> Result<Option<i64>, DbError> {
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<i32, _>(index) {
        return Ok(value.map(i64::from));
    }
    if let Ok(value) = row.try_get::<i16, _>(index) {
        return Ok(value.map(i64::from));
    }
    row.try_get::<u8, _>(index)
        .map(|value| value.map(i64::from))
        .map_err(|err| DbError::Decode(format!("column {}: {}", name, err)))
}

fn decode_value(
    row: &tiberius::Row,
    index: usize,
    name: &str,
    column_type: ColumnType,
) -> Result<Value, DbError> {
    let decode_err =
        |err: tiberius::error::Error| DbError::Decode(format!("column {}: {}", name, err));
    let value = match column_type {
        ColumnType::Null => None,
        ColumnType::Bit | ColumnType::Bitn => {
            row.try_get::<bool, _>(index).map_err(decode_err)?.map(Value::Bool)
        }
        ColumnType::Int1
        | ColumnType::Int2
        | ColumnType::Int4
        | ColumnType::Int8
        | ColumnType::Intn => decode_int(row, index, name)?.map(Value::from),
        ColumnType::Float4 => row
            .try_get::<f32, _>(index)
            .map_err(decode_err)?
            .map(|v| Value::from(f64::from(v))),
        ColumnType::Float8 | ColumnType::Floatn => match row.try_get::<f64, _>(index) {
            Ok(value) => value.map(Value::from),
            Err(_) => row
                .try_get::<f32, _>(index)
                .map_err(decode_err)?
                .map(|v| Value::from(f64::from(v))),
        },
        ColumnType::Decimaln | ColumnType::Numericn | ColumnType::Money | ColumnType::Money4 => row
            .try_get::<tiberius::numeric::Numeric, _>(index)
            .map_err(decode_err)?
            .map(|n| Value::from(f64::from(n))),
        ColumnType::Guid => row
            .try_get::<uuid::Uuid, _>(index)
            .map_err(decode_err)?
            .map(|g| Value::String(g.to_string())),
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
            .try_get::<&[u8], _>(index)
            .map_err(decode_err)?
            .map(|bytes| rows::decode_bytes(name, "varbinary", bytes))
            .transpose()?,
        ColumnType::Daten => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map_err(decode_err)?
            .map(|v| Value::String(v.to_string())),
        ColumnType::Timen => row
            .try_get::<chrono::NaiveTime, _>(index)
            .map_err(decode_err)?
            .map(|v| Value::String(v.to_string())),
        ColumnType::Datetime
        | ColumnType::Datetime4
        | ColumnType::Datetimen
        | ColumnType::Datetime2 => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .map_err(decode_err)?
            .map(|v| Value::String(v.to_string())),
        ColumnType::DatetimeOffsetn => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map_err(decode_err)?
            .map(|v| Value::String(v.to_rfc3339())),
        _ => row
            .try_get::<&str, _>(index)
            .map_err(decode_err)?
            .map(|s| Value::String(s.to_string())),
    };
    Ok(value.unwrap_or(Value::Null))
}

fn parse_rows(raw: &[tiberius::Row]) -> Result<(Vec<Row>, Option<i64>), DbError> {
    let mut data = Vec::with_capacity(raw.len());
    let mut total = None;
    for row in raw {
        let mut decoded = Row::new();
        let columns: Vec<(String, ColumnType)> = row
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.column_type()))
            .collect();
        for (index, (name, column_type)) in columns.iter().enumerate() {
            decoded.insert(name.clone(), decode_value(row, index, name, *column_type)?);
        }
        if let Some(count) = rows::take_total_count(&mut decoded) {
            total = Some(count);
        }
        data.push(decoded);
    }
    Ok((data, total))
}

impl MsSqlDatabase {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn client(&self) -> Result<&Mutex<TdsClient>, DbError> {
        self.client
            .as_ref()
            .ok_or_else(|| DbError::Connection("not connected to SQL Server".into()))
    }

    async fn fetch_rows(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<tiberius::Row>, DbError> {
        let mut client = self.client()?.lock().await;
        let stream = client.query(query, params).await?;
        Ok(stream.into_first_result().await?)
    }

    async fn fetch_columns(&self, table: &str) -> Result<BTreeMap<String, SchemaDetails>, DbError> {
        let query = r#"
            SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH,
                   IS_NULLABLE, COLUMN_DEFAULT, ORDINAL_POSITION
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_NAME = @P1
        "#;
        let fetched = self.fetch_rows(query, &[&table]).await?;

        let mut columns = BTreeMap::new();
        for row in &fetched {
            let name = row
                .try_get::<&str, _>("COLUMN_NAME")?
                .unwrap_or_default()
                .to_string();
            let is_nullable = row.try_get::<&str, _>("IS_NULLABLE")?.unwrap_or_default();
            columns.insert(
                name,
                SchemaDetails {
                    data_type: row
                        .try_get::<&str, _>("DATA_TYPE")?
                        .unwrap_or_default()
                        .to_string(),
                    max_length: row
                        .try_get::<i32, _>("CHARACTER_MAXIMUM_LENGTH")?
                        .map(i64::from),
                    is_nullable: is_nullable == "YES",
                    ordinal_position: row.try_get::<i32, _>("ORDINAL_POSITION")?.unwrap_or(0),
                    column_default: row
                        .try_get::<&str, _>("COLUMN_DEFAULT")?
                        .map(str::to_string),
                    ..SchemaDetails::default()
                },
            );
        }
        Ok(columns)
    }

    async fn fetch_indexes(&self, table: &str) -> Result<Vec<IndexDetails>, DbError> {
        // Primary-key indexes are reported under the name PRIMARY, the
        // same convention the MySQL catalog uses, so the shared merge
        // recognizes them.
        let query = r#"
            SELECT CASE WHEN i.is_primary_key = 1 THEN 'PRIMARY' ELSE i.name END AS index_name,
                   LOWER(i.type_desc) AS algorithm,
                   i.is_unique,
                   c.name AS column_name
            FROM sys.indexes AS i
            JOIN sys.index_columns AS ic
              ON ic.object_id = i.object_id AND ic.index_id = i.index_id
            JOIN sys.columns AS c
              ON c.object_id = ic.object_id AND c.column_id = ic.column_id
            WHERE i.object_id = OBJECT_ID(@P1) AND i.name IS NOT NULL
        "#;
        let fetched = self.fetch_rows(query, &[&table]).await?;

        let mut indexes = Vec::with_capacity(fetched.len());
        for row in &fetched {
            indexes.push(IndexDetails {
                index_name: row
                    .try_get::<&str, _>("index_name")?
                    .unwrap_or_default()
                    .to_string(),
                definition: String::new(),
                algorithm: row
                    .try_get::<&str, _>("algorithm")?
                    .unwrap_or_default()
                    .to_string(),
                is_unique: row.try_get::<bool, _>("is_unique")?.unwrap_or(false),
                column_name: row
                    .try_get::<&str, _>("column_name")?
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        Ok(indexes)
    }

    async fn fetch_foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyDetails>, DbError> {
        let query = r#"
            SELECT fk.name AS constraint_name,
                   OBJECT_NAME(fk.parent_object_id) AS table_name,
                   pc.name AS column_name,
                   OBJECT_NAME(fk.referenced_object_id) AS foreign_table_name,
                   rc.name AS foreign_column_name
            FROM sys.foreign_keys AS fk
            JOIN sys.foreign_key_columns AS fkc
              ON fkc.constraint_object_id = fk.object_id
            JOIN sys.columns AS pc
              ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id
            JOIN sys.columns AS rc
              ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id
            WHERE OBJECT_NAME(fk.parent_object_id) = @P1
        "#;
        let fetched = self.fetch_rows(query, &[&table]).await?;

        let mut foreign_keys = Vec::with_capacity(fetched.len());
        for row in &fetched {
            foreign_keys.push(ForeignKeyDetails {
                constraint_name: row
                    .try_get::<&str, _>("constraint_name")?
                    .unwrap_or_default()
                    .to_string(),
                table_name: row
                    .try_get::<&str, _>("table_name")?
                    .unwrap_or_default()
                    .to_string(),
                column_name: row
                    .try_get::<&str, _>("column_name")?
                    .unwrap_or_default()
                    .to_string(),
                foreign_table_name: row
                    .try_get::<&str, _>("foreign_table_name")?
                    .unwrap_or_default()
                    .to_string(),
                foreign_column_name: row
                    .try_get::<&str, _>("foreign_column_name")?
                    .unwrap_or_default()
                    .to_string(),
            });
        }
        Ok(foreign_keys)
    }
}

#[async_trait]
impl Database for MsSqlDatabase {
    async fn connect(&mut self) -> Result<(), DbError> {
        let mut tds_config = Config::new();
        tds_config.host(&self.config.hostname);
        tds_config.port(self.config.port);
        tds_config.authentication(AuthMethod::sql_server(
            &self.config.username,
            &self.config.password,
        ));
        if let Some(database) = self.config.database.as_deref() {
            tds_config.database(database);
        }
        tds_config.trust_cert();

        let tcp = TcpStream::connect(tds_config.get_addr())
            .await
            .map_err(|err| DbError::Connection(err.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|err| DbError::Connection(err.to_string()))?;
        let client = tiberius::Client::connect(tds_config, tcp.compat_write())
            .await
            .map_err(|err| DbError::Connection(err.to_string()))?;
        self.client = Some(Mutex::new(client));
        info!("connected to SQL Server at {}", self.config.hostname);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DbError> {
        if let Some(client) = self.client.take() {
            client
                .into_inner()
                .close()
                .await
                .map_err(|err| DbError::Connection(err.to_string()))?;
            info!("closed SQL Server connection to {}", self.config.hostname);
        }
        Ok(())
    }

    async fn databases(&self) -> Result<Vec<String>, DbError> {
        let fetched = self.fetch_rows("SELECT name FROM sys.databases", &[]).await?;
        fetched
            .iter()
            .map(|row| {
                row.try_get::<&str, _>(0)
                    .map(|name| name.unwrap_or_default().to_string())
                    .map_err(DbError::from)
            })
            .collect()
    }

    async fn tables(&self) -> Result<Vec<String>, DbError> {
        let query = "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'BASE TABLE'";
        let fetched = self.fetch_rows(query, &[]).await?;
        fetched
            .iter()
            .map(|row| {
                row.try_get::<&str, _>(0)
                    .map(|name| name.unwrap_or_default().to_string())
                    .map_err(DbError::from)
            })
            .collect()
    }

    async fn metadata(&self, table: &str) -> Result<BTreeMap<String, SchemaDetails>, DbError> {
        let (columns, indexes, foreign_keys) = tokio::join!(
            self.fetch_columns(table),
            self.fetch_indexes(table),
            self.fetch_foreign_keys(table)
        );
        Ok(metadata::merge_metadata(columns?, &indexes?, &foreign_keys?))
    }

    async fn data(&self, table: &str, filter: &Filter) -> Result<DataPage, DbError> {
        let built = filter::build_select(&MsSqlDialect, table, filter)?;
        let params: Vec<&dyn ToSql> = built.params.iter().map(|p| p as &dyn ToSql).collect();
        let raw = self.fetch_rows(&built.sql, &params).await?;
        let (data, count) = parse_rows(&raw)?;
        Ok(DataPage { data, count })
    }

    async fn query(&self, raw: &str, page: u32, size: u32) -> Result<Vec<Row>, DbError> {
        let mut text = raw.trim().trim_end_matches(';').to_string();
        if !has_offset_clause(&text) && !has_top_clause(&text) {
            if !has_order_by(&text) {
                text.push_str(" ORDER BY (SELECT NULL)");
            }
            text.push_str(&format!(
                " OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                u64::from(page) * u64::from(size),
                size
            ));
        }
        let fetched = self.fetch_rows(&text, &[]).await?;
        let (data, _) = parse_rows(&fetched)?;
        Ok(data)
    }

    async fn execute(&self, statements: &[String]) -> Result<(), DbError> {
        let mut client = self.client()?.lock().await;
        client
            .simple_query("BEGIN TRANSACTION")
            .await
            .map_err(|err| DbError::Transaction(err.to_string()))?
            .into_results()
            .await
            .map_err(|err| DbError::Transaction(err.to_string()))?;

        for statement in statements {
            if let Err(err) = client.execute(statement.as_str(), &[]).await {
                // Best-effort rollback; the original failure is what the
                // caller needs to see.
                if let Ok(stream) = client.simple_query("ROLLBACK TRANSACTION").await {
                    let _ = stream.into_results().await;
                }
                return Err(DbError::Transaction(err.to_string()));
            }
        }

        client
            .simple_query("COMMIT TRANSACTION")
            .await
            .map_err(|err| DbError::Transaction(err.to_string()))?
            .into_results()
            .await
            .map_err(|err| DbError::Transaction(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{build_select, Combinator};

    #[test]
    fn dialect_injects_neutral_order_by_when_unsorted() {
        let filter = Filter {
            filter: Some("age:>=:21".into()),
            combinator: Combinator::And,
            ..Filter::default()
        };
        let built = build_select(&MsSqlDialect, "users", &filter).unwrap();
        assert_eq!(
            built.sql,
            "SELECT *, COUNT(*) OVER() AS total_count FROM [users] \
             WHERE age >= @P1 ORDER BY (SELECT NULL) \
             OFFSET 0 ROWS FETCH NEXT 50 ROWS ONLY"
        );
        assert_eq!(built.params, vec!["21"]);
    }

    #[test]
    fn dialect_keeps_caller_sort_for_pagination() {
        let filter = Filter {
            page: 2,
            size: 10,
            sort: Some("id".into()),
            ..Filter::default()
        };
        let built = build_select(&MsSqlDialect, "users", &filter).unwrap();
        assert!(built
            .sql
            .ends_with("ORDER BY id asc OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"));
        assert!(!built.sql.contains("(SELECT NULL)"));
    }

    #[test]
    fn raw_query_probes_detect_existing_pagination() {
        assert!(has_top_clause("SELECT TOP 5 * FROM t"));
        assert!(!has_top_clause("SELECT topic FROM t"));
        assert!(has_order_by("SELECT * FROM t ORDER BY id"));
        assert!(!has_order_by("SELECT orders FROM t"));
    }

    #[tokio::test]
    async fn operations_without_connect_fail_cleanly() {
        let db = MsSqlDatabase::new(ConnectionConfig {
            driver: "mssql".into(),
            hostname: "localhost".into(),
            port: 1433,
            username: "sa".into(),
            password: "p".into(),
            database: Some("app".into()),
        });
        assert!(matches!(db.databases().await, Err(DbError::Connection(_))));
    }
}

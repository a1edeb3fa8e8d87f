//! MongoDB driver.
//!
//! Documents are schemaless, so the metadata operation reports an empty
//! profile and raw SQL text has nothing to run against; those contract
//! slots degrade to harmless no-ops instead of errors. The filter
//! language, paging and sorting all map onto find options.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::TryStreamExt;
use log::info;
use mongodb::bson::{doc, Bson, Document};
use mongodb::Client;
use serde_json::Value;

use crate::config::ConnectionConfig;
use crate::errors::DbError;
use crate::filter::{parse_filter_expression, Combinator, Filter, FilterClause};
use crate::metadata::SchemaDetails;
use crate::rows::{DataPage, Row};

use super::Database;

const DEFAULT_PAGE_SIZE: i64 = 10;

pub struct MongoDatabase {
    config: ConnectionConfig,
    client: Option<Client>,
}

impl MongoDatabase {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn connection_uri(&self) -> String {
        format!(
            "mongodb://{}:{}@{}:{}",
            self.config.username, self.config.password, self.config.hostname, self.config.port
        )
    }

    fn client(&self) -> Result<&Client, DbError> {
        self.client
            .as_ref()
            .ok_or_else(|| DbError::Connection("not connected to MongoDB".into()))
    }
}

/// Filter values arrive in wire form; comparisons against numeric and
/// boolean fields only match when the value is coerced to the BSON type
/// the documents actually hold.
fn coerce(value: &str) -> Bson {
    if let Ok(n) = value.parse::<i64>() {
        return Bson::Int64(n);
    }
    if let Ok(n) = value.parse::<f64>() {
        return Bson::Double(n);
    }
    match value {
        "true" => Bson::Boolean(true),
        "false" => Bson::Boolean(false),
        _ => Bson::String(value.to_string()),
    }
}

fn regex_clause(pattern: String, case_insensitive: bool, negated: bool) -> Bson {
    let regex = Bson::RegularExpression(mongodb::bson::Regex {
        pattern,
        options: if case_insensitive { "i".into() } else { String::new() },
    });
    if negated {
        Bson::Document(doc! { "$not": regex })
    } else {
        regex
    }
}

fn clause_to_document(clause: &FilterClause) -> Option<Document> {
    let column = clause.column.as_str();
    let value = clause.value.as_str();
    let condition: Bson = match clause.operator.as_str() {
        "=" => doc! { "$eq": coerce(value) }.into(),
        "!=" => doc! { "$ne": coerce(value) }.into(),
        "<" => doc! { "$lt": coerce(value) }.into(),
        ">" => doc! { "$gt": coerce(value) }.into(),
        ">=" => doc! { "$gte": coerce(value) }.into(),
        "<=" => doc! { "$lte": coerce(value) }.into(),
        "in" => doc! { "$in": value.split(',').map(coerce).collect::<Vec<_>>() }.into(),
        "not in" => doc! { "$nin": value.split(',').map(coerce).collect::<Vec<_>>() }.into(),
        "is null" => doc! { "$eq": Bson::Null }.into(),
        "is not null" => doc! { "$ne": Bson::Null }.into(),
        "between" | "not between" => {
            let bounds: Vec<&str> = value.split(',').collect();
            if bounds.len() != 2 {
                return None;
            }
            let range = doc! { "$gte": coerce(bounds[0]), "$lte": coerce(bounds[1]) };
            if clause.operator == "between" {
                range.into()
            } else {
                doc! { "$not": range }.into()
            }
        }
        "contains" => regex_clause(regex::escape(value), false, false),
        "not contains" => regex_clause(regex::escape(value), false, true),
        "contains_ci" => regex_clause(regex::escape(value), true, false),
        "not contains_ci" => regex_clause(regex::escape(value), true, true),
        "has prefix" => regex_clause(format!("^{}", regex::escape(value)), false, false),
        "has suffix" => regex_clause(format!("{}$", regex::escape(value)), false, false),
        _ => return None,
    };
    Some(doc! { column: condition })
}

/// Builds the find filter. The Unspecified combinator keeps only the
/// first clause, matching the relational builder.
fn build_filter_document(filter: &Filter) -> Document {
    let clauses = filter
        .filter
        .as_deref()
        .map(parse_filter_expression)
        .unwrap_or_default();
    let mut conditions: Vec<Document> = clauses.iter().filter_map(clause_to_document).collect();
    if conditions.is_empty() {
        return Document::new();
    }
    match filter.combinator {
        Combinator::And => doc! { "$and": conditions },
        Combinator::Or => doc! { "$or": conditions },
        Combinator::Unspecified => conditions.swap_remove(0),
    }
}

fn document_to_row(document: Document) -> Row {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

#[async_trait]
impl Database for MongoDatabase {
    async fn connect(&mut self) -> Result<(), DbError> {
        let client = Client::with_uri_str(self.connection_uri())
            .await
            .map_err(|err| DbError::Connection(err.to_string()))?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|err| DbError::Connection(err.to_string()))?;
        self.client = Some(client);
        info!("connected to MongoDB at {}", self.config.hostname);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DbError> {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
            info!("closed MongoDB connection to {}", self.config.hostname);
        }
        Ok(())
    }

    async fn databases(&self) -> Result<Vec<String>, DbError> {
        Ok(self.client()?.list_database_names().await?)
    }

    async fn tables(&self) -> Result<Vec<String>, DbError> {
        let database = self.config.database_name()?;
        Ok(self
            .client()?
            .database(database)
            .list_collection_names()
            .await?)
    }

    async fn metadata(&self, _table: &str) -> Result<BTreeMap<String, SchemaDetails>, DbError> {
        Ok(BTreeMap::new())
    }

    async fn data(&self, table: &str, filter: &Filter) -> Result<DataPage, DbError> {
        filter.validate_order()?;
        let database = self.config.database_name()?;
        let collection = self
            .client()?
            .database(database)
            .collection::<Document>(table);

        let filter_document = build_filter_document(filter);
        let limit = if filter.size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            i64::from(filter.size)
        };

        let mut find = collection
            .find(filter_document.clone())
            .skip(filter.offset())
            .limit(limit);
        if let Some(sort) = filter.sort.as_deref() {
            let direction = if filter.order == "desc" { -1 } else { 1 };
            find = find.sort(doc! { sort: direction });
        }

        let mut cursor = find.await?;
        let mut data = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            data.push(document_to_row(document));
        }

        let count = collection.count_documents(filter_document).await?;
        Ok(DataPage {
            data,
            count: Some(count as i64),
        })
    }

    async fn query(&self, _raw: &str, _page: u32, _size: u32) -> Result<Vec<Row>, DbError> {
        Ok(Vec::new())
    }

    async fn execute(&self, _statements: &[String]) -> Result<(), DbError> {
        Ok(())
    }
}

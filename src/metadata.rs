//! Table schema models and the column/index/foreign-key merge.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Full per-column profile, assembled from three independently fetched
/// catalog facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDetails {
    pub data_type: String,
    pub max_length: Option<i64>,
    pub is_nullable: bool,
    pub ordinal_position: i32,
    pub column_default: Option<String>,
    pub has_index: bool,
    pub is_primary_key: bool,
    /// `"table.column"` of the referenced side, when this column carries a
    /// foreign key.
    pub foreign_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDetails {
    pub index_name: String,
    pub definition: String,
    pub algorithm: String,
    pub is_unique: bool,
    pub column_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDetails {
    pub constraint_name: String,
    pub table_name: String,
    pub column_name: String,
    pub foreign_table_name: String,
    pub foreign_column_name: String,
}

/// Folds index and foreign-key facts into the column map.
///
/// Primary keys are recognized by naming convention only: an index whose
/// name contains `pkey` or `PRIMARY`. Indexes and foreign keys touch
/// disjoint fields, so application order does not matter and the merge is
/// idempotent.
pub fn merge_metadata(
    mut schema: BTreeMap<String, SchemaDetails>,
    indexes: &[IndexDetails],
    foreign_keys: &[ForeignKeyDetails],
) -> BTreeMap<String, SchemaDetails> {
    for index in indexes {
        let details = schema.entry(index.column_name.clone()).or_default();
        if index.index_name.contains("pkey") || index.index_name.contains("PRIMARY") {
            details.is_primary_key = true;
        }
        details.has_index = true;
    }
    for fk in foreign_keys {
        let details = schema.entry(fk.column_name.clone()).or_default();
        details.foreign_key = Some(format!(
            "{}.{}",
            fk.foreign_table_name, fk.foreign_column_name
        ));
    }
    schema
}

fn index_def_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^CREATE\s+(?:(UNIQUE)\s+)?INDEX\s+(\w+)\s+ON\s+(?:\w+\.)?(\w+)\s+USING\s+(\w+)\s+\((\w+)\)")
            .expect("index definition pattern is valid")
    })
}

/// Parses a `pg_indexes.indexdef` statement into its interesting parts.
/// Returns `None` for definitions that do not follow the single-column
/// `CREATE [UNIQUE] INDEX ... USING alg (col)` shape.
pub(crate) fn parse_index_definition(definition: &str) -> Option<IndexDetails> {
    let captures = index_def_pattern().captures(definition)?;
    Some(IndexDetails {
        index_name: captures[2].to_string(),
        definition: definition.to_string(),
        algorithm: captures[4].to_string(),
        is_unique: captures.get(1).is_some(),
        column_name: captures[5].to_string(),
    })
}

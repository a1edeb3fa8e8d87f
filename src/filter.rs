//! Compact textual filter language and the dialect-aware SQL builder.
//!
//! A filter expression is a `|`-separated list of `column:operator:value`
//! clauses. Malformed clauses are dropped on a best-effort basis rather
//! than rejected, so a sloppy client still gets its valid clauses applied.

use crate::errors::DbError;

/// How multiple filter clauses combine in the WHERE clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
    /// Neither `and` nor `or` was supplied. With more than one clause only
    /// the first predicate is applied (long-standing quirk, kept on
    /// purpose).
    Unspecified,
}

impl Combinator {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "and" => Combinator::And,
            "or" => Combinator::Or,
            _ => Combinator::Unspecified,
        }
    }

    fn joiner(self) -> Option<&'static str> {
        match self {
            Combinator::And => Some(" AND "),
            Combinator::Or => Some(" OR "),
            Combinator::Unspecified => None,
        }
    }
}

/// Paging, sorting and filtering parameters for a table data fetch.
///
/// `order` stays in wire form; drivers validate it against `asc`/`desc`
/// before issuing any query.
#[derive(Debug, Clone)]
pub struct Filter {
    pub page: u32,
    pub size: u32,
    pub sort: Option<String>,
    pub order: String,
    pub filter: Option<String>,
    pub combinator: Combinator,
}

impl Default for Filter {
    fn default() -> Self {
        Filter {
            page: 0,
            size: 50,
            sort: None,
            order: "asc".into(),
            filter: None,
            combinator: Combinator::Unspecified,
        }
    }
}

impl Filter {
    /// Fails unless `order` is exactly `asc` or `desc`.
    pub(crate) fn validate_order(&self) -> Result<(), DbError> {
        if self.order != "asc" && self.order != "desc" {
            return Err(DbError::Validation(format!(
                "invalid order parameter: {}",
                self.order
            )));
        }
        Ok(())
    }

    pub(crate) fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }
}

/// One parsed `column:operator:value` unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterClause {
    pub column: String,
    pub operator: String,
    pub value: String,
}

/// Splits a filter expression into clauses, dropping anything malformed:
/// wrong arity, an empty column, or an empty operator+value pair. Clause
/// order is preserved.
pub fn parse_filter_expression(expression: &str) -> Vec<FilterClause> {
    if expression.is_empty() {
        return Vec::new();
    }
    expression
        .split('|')
        .filter_map(|clause| {
            let parts: Vec<&str> = clause.split(':').collect();
            if parts.len() != 3 || parts[0].is_empty() {
                return None;
            }
            if parts[1].is_empty() && parts[2].is_empty() {
                return None;
            }
            Some(FilterClause {
                column: parts[0].to_string(),
                operator: parts[1].to_string(),
                value: parts[2].to_string(),
            })
        })
        .collect()
}

/// The per-dialect pieces of SQL the shared builder cannot know. Each
/// relational driver keeps its own implementation next to its catalog
/// queries, so dialect text never leaks into shared code.
pub(crate) trait SqlDialect {
    fn quote_table(&self, table: &str) -> String;
    /// Expression selected alongside `*` to recover the total match count.
    fn count_expression(&self, table: &str) -> String;
    /// Positional placeholder, 1-based.
    fn placeholder(&self, n: usize) -> String;
    /// Case-insensitive LIKE predicate.
    fn contains_ci(&self, column: &str, placeholder: &str, negated: bool) -> String;
    /// Trailing pagination clause. `has_sort` lets dialects that require
    /// an ORDER BY before OFFSET inject a neutral one.
    fn pagination(&self, size: u32, offset: u64, has_sort: bool) -> String;
}

/// A rendered SELECT with its positional parameters in bind order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BuiltQuery {
    pub sql: String,
    pub params: Vec<String>,
}

/// Builds the filtered, sorted, paginated SELECT for one table.
///
/// Shape: `SELECT *, <count> AS total_count FROM <table> [WHERE ...]
/// [ORDER BY ...] <pagination>`. The sort column is passed through
/// unvalidated; a bad column surfaces as a downstream query error.
pub(crate) fn build_select(
    dialect: &dyn SqlDialect,
    table: &str,
    filter: &Filter,
) -> Result<BuiltQuery, DbError> {
    filter.validate_order()?;

    let quoted = dialect.quote_table(table);
    let mut sql = format!(
        "SELECT *, {} AS total_count FROM {}",
        dialect.count_expression(table),
        quoted
    );
    let mut params = Vec::new();

    let clauses = filter
        .filter
        .as_deref()
        .map(parse_filter_expression)
        .unwrap_or_default();
    let predicates: Vec<String> = clauses
        .iter()
        .filter_map(|clause| build_predicate(dialect, clause, &mut params))
        .collect();

    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        match filter.combinator.joiner() {
            Some(joiner) => sql.push_str(&predicates.join(joiner)),
            None => sql.push_str(&predicates[0]),
        }
    }

    if let Some(sort) = filter.sort.as_deref() {
        sql.push_str(&format!(" ORDER BY {} {}", sort, filter.order));
    }
    sql.push_str(&dialect.pagination(filter.size, filter.offset(), filter.sort.is_some()));

    Ok(BuiltQuery { sql, params })
}

/// Maps one clause to a templated predicate, pushing its bind values.
/// Returns `None` for operators the dialect grammar does not know and for
/// `between` clauses without exactly two bounds; those clauses are dropped
/// like any other malformed input.
fn build_predicate(
    dialect: &dyn SqlDialect,
    clause: &FilterClause,
    params: &mut Vec<String>,
) -> Option<String> {
    let column = clause.column.as_str();
    let value = clause.value.as_str();
    let next = |params: &Vec<String>| dialect.placeholder(params.len() + 1);

    match clause.operator.as_str() {
        op @ ("=" | "!=" | "<" | ">" | ">=" | "<=") => {
            let ph = next(params);
            params.push(value.to_string());
            Some(format!("{} {} {}", column, op, ph))
        }
        op @ ("in" | "not in") => {
            let mut placeholders = Vec::new();
            for item in value.split(',') {
                placeholders.push(next(params));
                params.push(item.to_string());
            }
            let keyword = if op == "in" { "IN" } else { "NOT IN" };
            Some(format!("{} {} ({})", column, keyword, placeholders.join(", ")))
        }
        "is null" => Some(format!("{} IS NULL", column)),
        "is not null" => Some(format!("{} IS NOT NULL", column)),
        op @ ("between" | "not between") => {
            let bounds: Vec<&str> = value.split(',').collect();
            if bounds.len() != 2 {
                return None;
            }
            let low = next(params);
            params.push(bounds[0].to_string());
            let high = next(params);
            params.push(bounds[1].to_string());
            let keyword = if op == "between" { "BETWEEN" } else { "NOT BETWEEN" };
            Some(format!("{} {} {} AND {}", column, keyword, low, high))
        }
        op @ ("contains" | "not contains" | "has prefix" | "has suffix") => {
            let ph = next(params);
            params.push(value.to_string());
            let keyword = if op == "not contains" { "NOT LIKE" } else { "LIKE" };
            Some(format!("{} {} {}", column, keyword, ph))
        }
        op @ ("contains_ci" | "not contains_ci") => {
            let ph = next(params);
            params.push(value.to_string());
            Some(dialect.contains_ci(column, &ph, op == "not contains_ci"))
        }
        _ => None,
    }
}

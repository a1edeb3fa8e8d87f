//! Target-table extraction for saved statements.

use sqlparser::ast::{SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::errors::DbError;

fn table_from_factor(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table { name, .. } => {
            name.0.last().map(|ident| ident.value.clone())
        }
        _ => None,
    }
}

fn table_from_joins(from: &[TableWithJoins]) -> Option<String> {
    from.first().and_then(|t| table_from_factor(&t.relation))
}

/// Parses one statement and names the table it targets: the INSERT/UPDATE/
/// DELETE subject, or the first FROM entry of a SELECT. Quoted identifiers
/// are stripped of their double quotes up front so the grouping key is the
/// bare table name regardless of how the client quoted it.
pub fn extract_table_name(statement: &str) -> Result<String, DbError> {
    let normalized = statement.replace('"', "");
    let parsed = Parser::parse_sql(&GenericDialect {}, &normalized)
        .map_err(|err| DbError::Query(format!("unparseable statement: {}", err)))?;
    let first = parsed
        .first()
        .ok_or_else(|| DbError::Query("empty statement".into()))?;

    let table = match first {
        Statement::Insert { table_name, .. } => {
            table_name.0.last().map(|ident| ident.value.clone())
        }
        Statement::Update { table, .. } => table_from_factor(&table.relation),
        Statement::Delete { from, .. } => table_from_joins(from),
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_from_joins(&select.from),
            _ => None,
        },
        _ => None,
    };
    table.ok_or_else(|| {
        DbError::Query(format!("no target table in statement: {}", statement))
    })
}

/// Groups statements by their target table, preserving both the order in
/// which tables first appear and the statement order within each table.
/// Any unparseable statement fails the whole batch.
pub fn group_by_table(statements: &[String]) -> Result<Vec<(String, Vec<String>)>, DbError> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for statement in statements {
        let table = extract_table_name(statement)?;
        match groups.iter_mut().find(|(name, _)| *name == table) {
            Some((_, members)) => members.push(statement.clone()),
            None => groups.push((table, vec![statement.clone()])),
        }
    }
    Ok(groups)
}

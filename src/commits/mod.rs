//! Commit persistence and replay.
//!
//! A commit is a titled batch of statements captured against one database,
//! stored together with the revert statements that undo it. Saving groups
//! the statements by target table; executing replays a chosen side of the
//! batch in one transaction and stamps the commits as executed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::errors::DbError;

pub mod sql;

/// Which side of a commit a statement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// The forward statement the user asked to apply.
    Default,
    /// The compensating statement that undoes the forward one.
    Revert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: i64,
    pub title: String,
    pub cluster_id: String,
    pub database_id: String,
    pub is_executed: bool,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub id: i64,
    pub commit_id: i64,
    pub text: String,
    pub kind: QueryKind,
    pub table_id: String,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

/// A commit as handed to the store, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitDraft {
    pub title: String,
    pub cluster_id: String,
    pub database_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryDraft {
    pub text: String,
    pub kind: QueryKind,
    pub table_id: String,
}

/// A commit paired with every statement it owns, for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitWithQueries {
    pub commit: Commit,
    pub queries: Vec<QueryRecord>,
}

/// Relational persistence boundary for commits. `save_commit_with_queries`
/// writes the commit and all of its query rows in one transaction.
#[async_trait]
pub trait CommitStore: Send + Sync {
    async fn save_commit_with_queries(
        &self,
        commit: CommitDraft,
        queries: Vec<QueryDraft>,
    ) -> Result<i64, DbError>;

    async fn commits(&self, cluster_id: &str, database_id: &str) -> Result<Vec<Commit>, DbError>;

    /// Every query row owned by the given commits, both kinds.
    async fn queries_for_commits(&self, commit_ids: &[i64]) -> Result<Vec<QueryRecord>, DbError>;

    async fn mark_executed(
        &self,
        commit_ids: &[i64],
        executed_at: DateTime<Utc>,
    ) -> Result<(), DbError>;
}

pub struct CommitService<S> {
    store: S,
}

impl<S: CommitStore> CommitService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Saves one commit with its forward and revert statements. Each
    /// statement is attributed to its target table; an unparseable
    /// statement fails the whole save before anything is persisted.
    pub async fn save(
        &self,
        title: &str,
        cluster_id: &str,
        database_id: &str,
        forward: &[String],
        revert: &[String],
    ) -> Result<i64, DbError> {
        let mut queries = Vec::with_capacity(forward.len() + revert.len());
        for (statements, kind) in [(forward, QueryKind::Default), (revert, QueryKind::Revert)] {
            for (table, members) in sql::group_by_table(statements)? {
                for text in members {
                    queries.push(QueryDraft {
                        text,
                        kind,
                        table_id: table.clone(),
                    });
                }
            }
        }

        let commit = CommitDraft {
            title: title.to_string(),
            cluster_id: cluster_id.to_string(),
            database_id: database_id.to_string(),
        };
        self.store.save_commit_with_queries(commit, queries).await
    }

    /// Replays one side of the given commits against a live database.
    ///
    /// Ids are applied in ascending order regardless of the order the
    /// caller passed them; within a commit, statements keep their stored
    /// order. Commits are stamped executed only after the whole batch
    /// succeeds; a replay failure leaves every commit untouched.
    pub async fn execute(
        &self,
        db: &dyn Database,
        commit_ids: &[i64],
        kind: QueryKind,
    ) -> Result<(), DbError> {
        let mut ids = commit_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut queries = self.store.queries_for_commits(&ids).await?;
        queries.retain(|query| query.kind == kind);
        queries.sort_by_key(|query| (query.commit_id, query.id));
        let statements: Vec<String> = queries.into_iter().map(|query| query.text).collect();

        db.execute(&statements).await?;
        self.store.mark_executed(&ids, Utc::now()).await
    }

    /// Commits for one database, each with its full query history.
    pub async fn list(
        &self,
        cluster_id: &str,
        database_id: &str,
    ) -> Result<Vec<CommitWithQueries>, DbError> {
        let commits = self.store.commits(cluster_id, database_id).await?;
        let ids: Vec<i64> = commits.iter().map(|commit| commit.id).collect();
        let queries = self.store.queries_for_commits(&ids).await?;

        Ok(commits
            .into_iter()
            .map(|commit| {
                let owned = queries
                    .iter()
                    .filter(|query| query.commit_id == commit.id)
                    .cloned()
                    .collect();
                CommitWithQueries {
                    commit,
                    queries: owned,
                }
            })
            .collect())
    }
}

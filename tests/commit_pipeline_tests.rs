use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;
use mockall::predicate::eq;

use dbgateway::commits::{
    Commit, CommitDraft, CommitService, CommitStore, QueryDraft, QueryKind, QueryRecord,
};
use dbgateway::{Database, DataPage, DbError, Filter, Row, SchemaDetails};

mock! {
    Store {}

    #[async_trait]
    impl CommitStore for Store {
        async fn save_commit_with_queries(
            &self,
            commit: CommitDraft,
            queries: Vec<QueryDraft>,
        ) -> Result<i64, DbError>;
        async fn commits(
            &self,
            cluster_id: &str,
            database_id: &str,
        ) -> Result<Vec<Commit>, DbError>;
        async fn queries_for_commits(
            &self,
            commit_ids: &[i64],
        ) -> Result<Vec<QueryRecord>, DbError>;
        async fn mark_executed(
            &self,
            commit_ids: &[i64],
            executed_at: DateTime<Utc>,
        ) -> Result<(), DbError>;
    }
}

mock! {
    Db {}

    #[async_trait]
    impl Database for Db {
        async fn connect(&mut self) -> Result<(), DbError>;
        async fn close(&mut self) -> Result<(), DbError>;
        async fn databases(&self) -> Result<Vec<String>, DbError>;
        async fn tables(&self) -> Result<Vec<String>, DbError>;
        async fn metadata(
            &self,
            table: &str,
        ) -> Result<BTreeMap<String, SchemaDetails>, DbError>;
        async fn data(&self, table: &str, filter: &Filter) -> Result<DataPage, DbError>;
        async fn query(&self, raw: &str, page: u32, size: u32) -> Result<Vec<Row>, DbError>;
        async fn execute(&self, statements: &[String]) -> Result<(), DbError>;
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn query(id: i64, commit_id: i64, kind: QueryKind, text: &str) -> QueryRecord {
    QueryRecord {
        id,
        commit_id,
        text: text.to_string(),
        kind,
        table_id: "users".into(),
        created_at: Utc::now(),
        executed_at: None,
    }
}

fn commit(id: i64) -> Commit {
    Commit {
        id,
        title: format!("commit {}", id),
        cluster_id: "c1".into(),
        database_id: "app".into(),
        is_executed: false,
        created_at: Utc::now(),
        executed_at: None,
    }
}

#[tokio::test]
async fn execute_replays_commits_in_ascending_id_order() {
    init_logging();
    let mut store = MockStore::new();
    store
        .expect_queries_for_commits()
        .withf(|ids| ids == [1, 2, 3])
        .return_once(|_| {
            Ok(vec![
                query(30, 3, QueryKind::Default, "UPDATE users SET n = 3"),
                query(10, 1, QueryKind::Default, "UPDATE users SET n = 1"),
                query(21, 2, QueryKind::Default, "UPDATE users SET m = 2"),
                query(20, 2, QueryKind::Default, "UPDATE users SET n = 2"),
            ])
        });
    store
        .expect_mark_executed()
        .withf(|ids, _| ids == [1, 2, 3])
        .return_once(|_, _| Ok(()));

    let mut db = MockDb::new();
    db.expect_execute()
        .withf(|statements| {
            statements
                == [
                    "UPDATE users SET n = 1",
                    "UPDATE users SET n = 2",
                    "UPDATE users SET m = 2",
                    "UPDATE users SET n = 3",
                ]
        })
        .return_once(|_| Ok(()));

    let service = CommitService::new(store);
    // Caller order and duplicates are both normalized away.
    service
        .execute(&db, &[3, 1, 2, 1], QueryKind::Default)
        .await
        .unwrap();
}

#[tokio::test]
async fn execute_filters_to_the_requested_kind() {
    init_logging();
    let mut store = MockStore::new();
    store.expect_queries_for_commits().return_once(|_| {
        Ok(vec![
            query(1, 1, QueryKind::Default, "INSERT INTO users (id) VALUES (1)"),
            query(2, 1, QueryKind::Revert, "DELETE FROM users WHERE id = 1"),
        ])
    });
    store.expect_mark_executed().return_once(|_, _| Ok(()));

    let mut db = MockDb::new();
    db.expect_execute()
        .withf(|statements| statements == ["DELETE FROM users WHERE id = 1"])
        .return_once(|_| Ok(()));

    let service = CommitService::new(store);
    service.execute(&db, &[1], QueryKind::Revert).await.unwrap();
}

#[tokio::test]
async fn failed_replay_marks_nothing_executed() {
    init_logging();
    let mut store = MockStore::new();
    store
        .expect_queries_for_commits()
        .return_once(|_| Ok(vec![query(1, 1, QueryKind::Default, "UPDATE users SET n = 1")]));
    store.expect_mark_executed().never();

    let mut db = MockDb::new();
    db.expect_execute()
        .return_once(|_| Err(DbError::Transaction("deadlock".into())));

    let service = CommitService::new(store);
    let err = service
        .execute(&db, &[1], QueryKind::Default)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Transaction(_)));
}

#[tokio::test]
async fn list_pairs_each_commit_with_its_own_queries() {
    init_logging();
    let mut store = MockStore::new();
    store
        .expect_commits()
        .with(eq("c1"), eq("app"))
        .return_once(|_, _| Ok(vec![commit(1), commit(2)]));
    store
        .expect_queries_for_commits()
        .withf(|ids| ids == [1, 2])
        .return_once(|_| {
            Ok(vec![
                query(1, 1, QueryKind::Default, "INSERT INTO users (id) VALUES (1)"),
                query(2, 1, QueryKind::Revert, "DELETE FROM users WHERE id = 1"),
                query(3, 2, QueryKind::Default, "UPDATE users SET n = 2"),
            ])
        });

    let service = CommitService::new(store);
    let listed = service.list("c1", "app").await.unwrap();

    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].commit.id, 1);
    assert_eq!(listed[0].queries.len(), 2);
    assert_eq!(listed[1].commit.id, 2);
    assert_eq!(listed[1].queries.len(), 1);
}

#[tokio::test]
async fn save_splits_forward_and_revert_sides_by_table() {
    init_logging();
    let mut store = MockStore::new();
    store
        .expect_save_commit_with_queries()
        .withf(|commit, queries| {
            let kinds: Vec<QueryKind> = queries.iter().map(|q| q.kind).collect();
            let tables: Vec<&str> = queries.iter().map(|q| q.table_id.as_str()).collect();
            commit.cluster_id == "c1"
                && kinds
                    == [
                        QueryKind::Default,
                        QueryKind::Default,
                        QueryKind::Revert,
                        QueryKind::Revert,
                    ]
                && tables == ["users", "orders", "users", "orders"]
        })
        .return_once(|_, _| Ok(11));

    let service = CommitService::new(store);
    let id = service
        .save(
            "two tables",
            "c1",
            "app",
            &[
                "INSERT INTO users (id) VALUES (1)".to_string(),
                "INSERT INTO orders (id) VALUES (9)".to_string(),
            ],
            &[
                "DELETE FROM users WHERE id = 1".to_string(),
                "DELETE FROM orders WHERE id = 9".to_string(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(id, 11);
}

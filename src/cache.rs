//! Cache-aside policy: deterministic keys, TTL tiers and the read-through
//! helper. The backing store is a collaborator behind a trait; a broken or
//! absent cache degrades to live fetches and never fails a request.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::DbError;

/// Topology and schema answers change rarely.
pub const SCHEMA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Row data goes stale quickly.
pub const DATA_TTL: Duration = Duration::from_secs(60 * 60);

/// String key/value cache boundary. Implementations are expected to be
/// shared (`Arc`) across request workers.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, DbError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DbError>;
}

pub fn databases_key(cluster_id: &str) -> String {
    format!("Database:{}", cluster_id)
}

pub fn tables_key(cluster_id: &str, database: &str) -> String {
    format!("Tables:{}~{}", cluster_id, database)
}

pub fn metadata_key(cluster_id: &str, database: &str, table: &str) -> String {
    format!("Metadata:{}~{}~{}", cluster_id, database, table)
}

/// Data pages are keyed by the raw request query string, so any change in
/// paging, sorting or filtering is a distinct entry.
pub fn data_key(raw_query: &str) -> String {
    format!("Data:{}", raw_query)
}

/// Read-through fetch. A cache hit that deserializes wins; a miss, an
/// unreadable entry or a store error falls through to the live fetch, whose
/// result is written back best-effort. Only the live fetch can fail the
/// caller; `DbError::Cache` never escapes here.
pub async fn cached_fetch<T, F, Fut>(
    cache: &dyn CacheStore,
    key: &str,
    ttl: Duration,
    fetch: F,
) -> Result<T, DbError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => return Ok(value),
            Err(err) => warn!("cache entry {} is unreadable, refetching: {}", key, err),
        },
        Ok(None) => {}
        Err(err) => warn!("cache read for {} failed: {}", key, err),
    }

    let value = fetch().await?;
    match serde_json::to_string(&value) {
        Ok(serialized) => {
            if let Err(err) = cache.set(key, &serialized, ttl).await {
                warn!("cache write for {} failed: {}", key, err);
            }
        }
        Err(err) => warn!("cache serialize for {} failed: {}", key, err),
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::predicate::{always, eq};

    mock! {
        Cache {}

        #[async_trait]
        impl CacheStore for Cache {
            async fn get(&self, key: &str) -> Result<Option<String>, DbError>;
            async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DbError>;
        }
    }

    #[test]
    fn keys_follow_the_documented_shapes() {
        assert_eq!(databases_key("c1"), "Database:c1");
        assert_eq!(tables_key("c1", "app"), "Tables:c1~app");
        assert_eq!(metadata_key("c1", "app", "users"), "Metadata:c1~app~users");
        assert_eq!(data_key("page=0&size=50"), "Data:page=0&size=50");
    }

    #[test]
    fn schema_ttl_outlives_data_ttl() {
        assert_eq!(SCHEMA_TTL, Duration::from_secs(86_400));
        assert_eq!(DATA_TTL, Duration::from_secs(3_600));
    }

    #[tokio::test]
    async fn hit_short_circuits_the_live_fetch() {
        let mut cache = MockCache::new();
        cache
            .expect_get()
            .with(eq("Tables:c1~app"))
            .return_once(|_| Ok(Some(r#"["users"]"#.to_string())));
        cache.expect_set().never();

        let tables: Vec<String> = cached_fetch(&cache, "Tables:c1~app", SCHEMA_TTL, || async {
            panic!("live fetch must not run on a hit")
        })
        .await
        .unwrap();
        assert_eq!(tables, vec!["users"]);
    }

    #[tokio::test]
    async fn miss_fetches_and_writes_back() {
        let mut cache = MockCache::new();
        cache.expect_get().return_once(|_| Ok(None));
        cache
            .expect_set()
            .with(eq("Tables:c1~app"), eq(r#"["users"]"#), eq(SCHEMA_TTL))
            .return_once(|_, _, _| Ok(()));

        let tables: Vec<String> = cached_fetch(&cache, "Tables:c1~app", SCHEMA_TTL, || async {
            Ok(vec!["users".to_string()])
        })
        .await
        .unwrap();
        assert_eq!(tables, vec!["users"]);
    }

    #[tokio::test]
    async fn unreadable_entry_falls_through_to_the_live_fetch() {
        let mut cache = MockCache::new();
        cache
            .expect_get()
            .return_once(|_| Ok(Some("{not json".to_string())));
        cache.expect_set().with(always(), always(), always()).return_once(|_, _, _| Ok(()));

        let tables: Vec<String> =
            cached_fetch(&cache, "k", SCHEMA_TTL, || async { Ok(vec!["t".to_string()]) })
                .await
                .unwrap();
        assert_eq!(tables, vec!["t"]);
    }

    #[tokio::test]
    async fn store_errors_never_escape() {
        let mut cache = MockCache::new();
        cache
            .expect_get()
            .return_once(|_| Err(DbError::Cache("redis down".into())));
        cache
            .expect_set()
            .return_once(|_, _, _| Err(DbError::Cache("redis down".into())));

        let value: i64 = cached_fetch(&cache, "k", DATA_TTL, || async { Ok(41) })
            .await
            .unwrap();
        assert_eq!(value, 41);
    }

    #[tokio::test]
    async fn live_fetch_failure_is_reported() {
        let mut cache = MockCache::new();
        cache.expect_get().return_once(|_| Ok(None));
        cache.expect_set().never();

        let result: Result<i64, _> = cached_fetch(&cache, "k", DATA_TTL, || async {
            Err(DbError::Query("boom".into()))
        })
        .await;
        assert!(matches!(result, Err(DbError::Query(_))));
    }
}

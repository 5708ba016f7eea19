use std::path::Path;
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::Zero;
use rollup_common::decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};

use super::{Entry, Store};
use crate::error::DbError;

/// Persistent store on SQLite. Several namespaces can share one pool; each
/// has its own keys and its own root.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    namespace: String,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url`, e.g.
    /// `sqlite://rollup.db` or `sqlite::memory:`.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // An in-memory database lives and dies with its single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool, namespace).await
    }

    pub async fn open(path: &Path, namespace: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool, namespace).await
    }

    pub async fn with_pool(pool: SqlitePool, namespace: &str) -> Result<Self, DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS roots (
                namespace TEXT PRIMARY KEY NOT NULL,
                root TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            namespace: namespace.to_string(),
        })
    }

    /// Same database, different key space.
    pub fn namespace(&self, namespace: &str) -> Self {
        Self {
            pool: self.pool.clone(),
            namespace: namespace.to_string(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn encode_value(value: &[BigUint]) -> Result<String, DbError> {
    let strings: Vec<String> = value.iter().map(|v| v.to_str_radix(10)).collect();
    Ok(serde_json::to_string(&strings)?)
}

fn decode_value(raw: &str) -> Result<Vec<BigUint>, DbError> {
    let strings: Vec<String> = serde_json::from_str(raw)?;
    strings
        .iter()
        .map(|s| decimal::parse(s).map_err(DbError::Corrupted))
        .collect()
}

async fn upsert_entry(
    conn: &mut SqliteConnection,
    namespace: &str,
    key: &BigUint,
    value: &[BigUint],
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO entries (namespace, key, value)
        VALUES (?, ?, ?)
        ON CONFLICT (namespace, key) DO UPDATE
        SET value = excluded.value
        "#,
    )
    .bind(namespace)
    .bind(key.to_str_radix(10))
    .bind(encode_value(value)?)
    .execute(conn)
    .await?;
    Ok(())
}

async fn delete_entry(conn: &mut SqliteConnection, namespace: &str, key: &BigUint) -> Result<(), DbError> {
    sqlx::query("DELETE FROM entries WHERE namespace = ? AND key = ?")
        .bind(namespace)
        .bind(key.to_str_radix(10))
        .execute(conn)
        .await?;
    Ok(())
}

async fn upsert_root(conn: &mut SqliteConnection, namespace: &str, root: &BigUint) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO roots (namespace, root)
        VALUES (?, ?)
        ON CONFLICT (namespace) DO UPDATE
        SET root = excluded.root
        "#,
    )
    .bind(namespace)
    .bind(root.to_str_radix(10))
    .execute(conn)
    .await?;
    Ok(())
}

impl Store for SqliteStore {
    async fn get(&self, key: &BigUint) -> Result<Option<Vec<BigUint>>, DbError> {
        let raw: Option<String> = sqlx::query_scalar(
            r#"
            SELECT value
            FROM entries
            WHERE namespace = ? AND key = ?
            "#,
        )
        .bind(&self.namespace)
        .bind(key.to_str_radix(10))
        .fetch_optional(&self.pool)
        .await?;

        raw.map(|raw| decode_value(&raw)).transpose()
    }

    async fn multi_ins(&self, inserts: Vec<Entry>) -> Result<(), DbError> {
        if inserts.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (key, value) in &inserts {
            upsert_entry(&mut tx, &self.namespace, key, value).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn multi_del(&self, keys: Vec<BigUint>) -> Result<(), DbError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for key in &keys {
            delete_entry(&mut tx, &self.namespace, key).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_root(&self) -> Result<BigUint, DbError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT root FROM roots WHERE namespace = ?")
                .bind(&self.namespace)
                .fetch_optional(&self.pool)
                .await?;

        match raw {
            Some(raw) => decimal::parse(&raw).map_err(DbError::Corrupted),
            None => Ok(BigUint::zero()),
        }
    }

    async fn set_root(&self, root: BigUint) -> Result<(), DbError> {
        let mut conn = self.pool.acquire().await?;
        upsert_root(&mut conn, &self.namespace, &root).await
    }

    async fn apply(
        &self,
        inserts: Vec<Entry>,
        deletes: Vec<BigUint>,
        root: Option<BigUint>,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in &inserts {
            upsert_entry(&mut tx, &self.namespace, key, value).await?;
        }
        for key in &deletes {
            delete_entry(&mut tx, &self.namespace, key).await?;
        }
        if let Some(root) = &root {
            upsert_root(&mut tx, &self.namespace, root).await?;
        }
        // an early return drops `tx`, which rolls it back
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: u32) -> BigUint {
        BigUint::from(v)
    }

    #[tokio::test]
    async fn test_sqlite_store_in_memory() {
        let store = SqliteStore::connect("sqlite::memory:", "test").await.unwrap();
        assert_eq!(store.get(&n(1)).await.unwrap(), None);

        store
            .multi_ins(vec![(n(1), vec![n(2), n(3)])])
            .await
            .unwrap();
        assert_eq!(store.get(&n(1)).await.unwrap(), Some(vec![n(2), n(3)]));

        store.multi_ins(vec![(n(1), vec![n(4)])]).await.unwrap();
        assert_eq!(store.get(&n(1)).await.unwrap(), Some(vec![n(4)]));

        store.multi_del(vec![n(1)]).await.unwrap();
        assert_eq!(store.get(&n(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_namespaces_are_isolated() {
        let a = SqliteStore::connect("sqlite::memory:", "a").await.unwrap();
        let b = a.namespace("b");

        a.multi_ins(vec![(n(1), vec![n(1)])]).await.unwrap();
        a.set_root(n(7)).await.unwrap();

        assert_eq!(b.get(&n(1)).await.unwrap(), None);
        assert_eq!(b.get_root().await.unwrap(), n(0));
        assert_eq!(a.get_root().await.unwrap(), n(7));
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let big = BigUint::parse_bytes(
            b"21888242871839275222246405745257275088548364400416034343698204186575808495616",
            10,
        )
        .unwrap();

        {
            let store = SqliteStore::open(&path, "tree").await.unwrap();
            store
                .multi_ins(vec![(big.clone(), vec![big.clone()])])
                .await
                .unwrap();
            store.set_root(big.clone()).await.unwrap();
            store.pool().close().await;
        }

        let store = SqliteStore::open(&path, "tree").await.unwrap();
        assert_eq!(store.get(&big).await.unwrap(), Some(vec![big.clone()]));
        assert_eq!(store.get_root().await.unwrap(), big);
    }

    #[tokio::test]
    async fn test_apply_rolls_back_on_error() {
        let store = SqliteStore::connect("sqlite::memory:", "tree").await.unwrap();
        store.multi_ins(vec![(n(1), vec![n(1)])]).await.unwrap();

        // the root write is last, so everything before it must be undone
        sqlx::query("DROP TABLE roots")
            .execute(store.pool())
            .await
            .unwrap();
        let res = store
            .apply(vec![(n(2), vec![n(2)])], vec![n(1)], Some(n(5)))
            .await;
        assert!(res.is_err());
        assert_eq!(store.get(&n(1)).await.unwrap(), Some(vec![n(1)]));
        assert_eq!(store.get(&n(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_apply_writes_entries_and_root() {
        let store = SqliteStore::connect("sqlite::memory:", "tree").await.unwrap();
        store.multi_ins(vec![(n(1), vec![n(1)])]).await.unwrap();
        store
            .apply(vec![(n(2), vec![n(3), n(4)])], vec![n(1)], Some(n(5)))
            .await
            .unwrap();
        assert_eq!(store.get(&n(1)).await.unwrap(), None);
        assert_eq!(store.get(&n(2)).await.unwrap(), Some(vec![n(3), n(4)]));
        assert_eq!(store.get_root().await.unwrap(), n(5));
    }
}

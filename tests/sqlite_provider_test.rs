//! Integration tests for the provider against a SQLite database file.
//!
//! Tests verify that:
//! - Queries, updates and batch inserts round-trip through the pool
//! - Missing tables yield empty results instead of errors
//! - Metadata lookups are cached until their TTL expires
//! - Transactions are atomic and one context holds at most one transaction
//! - The single-connection pool blocks a second caller until release
//!   and then lets it proceed

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::json;
use sql_provider::config::{CacheOptions, PoolOptions, ProviderOptions};
use sql_provider::models::{
    DatabaseType, ProviderConfig, SqlValue, TransactionOutcome, TransactionState,
};
use sql_provider::{DatabaseProvider, DbError};
use tempfile::TempPath;

async fn open_with(options: ProviderOptions) -> (TempPath, DatabaseProvider) {
    let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
    let config = ProviderConfig::embedded(DatabaseType::SQLite, path.to_path_buf()).unwrap();
    let provider = DatabaseProvider::open(config, options).await.unwrap();
    (path, provider)
}

async fn open() -> (TempPath, DatabaseProvider) {
    open_with(ProviderOptions::default()).await
}

async fn create_users(provider: &DatabaseProvider) {
    provider
        .create_table("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER)")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_create_insert_and_query() {
    let (_path, provider) = open().await;
    create_users(&provider).await;

    assert!(
        provider
            .execute_update("INSERT INTO users (id, name, age) VALUES (1, 'alice', 30)")
            .await
            .unwrap()
    );
    assert!(
        provider
            .execute_update("INSERT INTO users (id, name, age) VALUES (2, 'bob', NULL)")
            .await
            .unwrap()
    );

    let rows = provider
        .execute_query("SELECT id, name, age FROM users ORDER BY id")
        .await
        .unwrap();
    assert_eq!(rows.row_count(), 2);
    assert_eq!(rows.column_names(), vec!["id", "name", "age"]);
    assert_eq!(rows.rows[0]["name"], json!("alice"));
    assert_eq!(rows.rows[0]["age"], json!(30));
    assert_eq!(rows.rows[1]["age"], json!(null));

    provider.close().await;
}

#[tokio::test]
async fn test_update_matching_no_rows_returns_false() {
    let (_path, provider) = open().await;
    create_users(&provider).await;

    let changed = provider
        .execute_update("UPDATE users SET age = 1 WHERE id = 42")
        .await
        .unwrap();
    assert!(!changed);
}

#[tokio::test]
async fn test_query_with_params() {
    let (_path, provider) = open().await;
    create_users(&provider).await;
    provider
        .execute_updates(&[
            "INSERT INTO users VALUES (1, 'alice', 30)",
            "INSERT INTO users VALUES (2, 'bob', 40)",
        ])
        .await
        .unwrap();

    let rows = provider
        .execute_query_with("SELECT name FROM users WHERE age > ?", &[SqlValue::Int(35)])
        .await
        .unwrap();
    assert_eq!(rows.column_values("name"), vec![json!("bob")]);
}

#[tokio::test]
async fn test_missing_table_returns_empty_result() {
    let (_path, provider) = open().await;

    let rows = provider
        .execute_query("SELECT * FROM nonexistent_table")
        .await
        .unwrap();
    assert!(rows.is_empty());
    assert!(rows.columns.is_empty());
}

#[tokio::test]
async fn test_other_failures_propagate() {
    let (_path, provider) = open().await;
    create_users(&provider).await;

    let err = provider
        .execute_query("SELECT missing_column FROM users")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::QueryExecution { .. }));
}

#[tokio::test]
async fn test_dangling_where_is_rejected_before_execution() {
    let (_path, provider) = open().await;

    let err = provider
        .execute_query("SELECT * FROM test_table WHERE;")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidSqlSyntax { .. }));
    assert!(err.to_string().contains("invalid SQL"));
}

#[tokio::test]
async fn test_execute_updates_is_all_or_nothing() {
    let (_path, provider) = open().await;
    create_users(&provider).await;

    assert!(!provider.execute_updates::<&str>(&[]).await.unwrap());

    let err = provider
        .execute_updates(&[
            "INSERT INTO users VALUES (1, 'alice', 30)",
            "INSERT INTO users VALUES (1, 'duplicate', 31)",
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::QueryExecution { .. }));

    let rows = provider.execute_query("SELECT * FROM users").await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_batch_insert_thousand_rows() {
    let (_path, provider) = open().await;
    create_users(&provider).await;

    let rows: Vec<Vec<SqlValue>> = (1..=1000)
        .map(|i| {
            vec![
                SqlValue::Int(i),
                SqlValue::Text(format!("user{}", i)),
                if i % 2 == 0 { SqlValue::Int(i % 90) } else { SqlValue::Null },
            ]
        })
        .collect();

    let inserted = provider
        .execute_batch_insert("INSERT INTO users (id, name, age) VALUES (?, ?, ?)", &rows)
        .await
        .unwrap();
    assert_eq!(inserted, 1000);
    assert_eq!(provider.try_row_count("users").await.unwrap(), 1000);

    assert_eq!(
        provider
            .execute_batch_insert("INSERT INTO users (id, name, age) VALUES (?, ?, ?)", &[])
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_batch_insert_failure_rolls_back_batch() {
    let (_path, provider) = open().await;
    create_users(&provider).await;

    let rows = vec![
        vec![SqlValue::Int(1), SqlValue::from("a"), SqlValue::Null],
        vec![SqlValue::Int(2), SqlValue::Null, SqlValue::Null],
    ];
    let err = provider
        .execute_batch_insert("INSERT INTO users (id, name, age) VALUES (?, ?, ?)", &rows)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::QueryExecution { .. }));
    assert_eq!(provider.try_row_count("users").await.unwrap(), 0);
}

#[tokio::test]
async fn test_binary_round_trip() {
    let (_path, provider) = open().await;
    provider
        .create_table("CREATE TABLE blobs (id INTEGER PRIMARY KEY, data BLOB, flag BOOLEAN, score REAL)")
        .await
        .unwrap();

    provider
        .execute_batch_insert(
            "INSERT INTO blobs VALUES (?, ?, ?, ?)",
            &[
                vec![
                    SqlValue::Int(1),
                    SqlValue::Bytes(vec![0x00, 0x9f, 0x92, 0x96]),
                    SqlValue::Bool(true),
                    SqlValue::Float(1.5),
                ],
                vec![
                    SqlValue::Int(2),
                    SqlValue::Bytes(b"hello".to_vec()),
                    SqlValue::Bool(false),
                    SqlValue::Null,
                ],
            ],
        )
        .await
        .unwrap();

    let rows = provider
        .execute_query("SELECT data, flag, score FROM blobs ORDER BY id")
        .await
        .unwrap();
    assert_eq!(rows.rows[0]["data"], json!("AJ+Slg=="));
    assert_eq!(rows.rows[0]["flag"], json!(true));
    assert_eq!(rows.rows[0]["score"], json!(1.5));
    assert_eq!(rows.rows[1]["data"], json!("aGVsbG8="));
    assert_eq!(rows.rows[1]["flag"], json!(false));
}

#[tokio::test]
async fn test_decode_binary_as_text() {
    let (_path, provider) = open_with(ProviderOptions::default().with_decode_binary(true)).await;
    provider
        .create_table("CREATE TABLE blobs (id INTEGER PRIMARY KEY, data BLOB)")
        .await
        .unwrap();
    provider
        .execute_batch_insert(
            "INSERT INTO blobs VALUES (?, ?)",
            &[
                vec![SqlValue::Int(1), SqlValue::Bytes(b"hello".to_vec())],
                vec![SqlValue::Int(2), SqlValue::Bytes(vec![0xff, 0xfe])],
            ],
        )
        .await
        .unwrap();

    let rows = provider
        .execute_query("SELECT data FROM blobs ORDER BY id")
        .await
        .unwrap();
    assert_eq!(rows.rows[0]["data"], json!("hello"));
    assert_eq!(rows.rows[1]["data"], json!("//4="));
}

#[tokio::test]
async fn test_metadata_lookups() {
    let (_path, provider) = open().await;
    provider
        .execute_updates(&[
            "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price REAL)",
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, product_id INTEGER REFERENCES products(id), quantity INTEGER)",
            "INSERT INTO products VALUES (1, 'widget', 9.5)",
            "INSERT INTO orders VALUES (1, 1, 3)",
            "INSERT INTO orders VALUES (2, 1, 4)",
        ])
        .await
        .unwrap();

    assert_eq!(
        provider.column_names("orders").await,
        vec!["id", "product_id", "quantity"]
    );
    assert_eq!(provider.row_count("orders").await, 2);
    assert_eq!(provider.primary_keys("orders").await, vec!["id"]);

    let types = provider.column_data_types("products").await;
    assert_eq!(types.get("id").map(String::as_str), Some("INTEGER"));
    assert_eq!(types.get("name").map(String::as_str), Some("TEXT"));
    assert_eq!(types.get("price").map(String::as_str), Some("REAL"));

    let fks = provider.foreign_keys("orders").await;
    assert_eq!(fks.get("product_id").map(String::as_str), Some("products"));
    assert!(provider.foreign_keys("products").await.is_empty());

    let description = provider.describe_table("orders").await.unwrap();
    assert_eq!(description.table_name, "orders");
    assert_eq!(description.row_count, 2);
    assert_eq!(description.primary_key, vec!["id"]);
}

#[tokio::test]
async fn test_metadata_is_fail_soft() {
    let (_path, provider) = open().await;

    assert!(provider.column_names("no_such_table").await.is_empty());
    assert_eq!(provider.row_count("no_such_table").await, 0);
    assert_eq!(provider.row_count("bad name; DROP").await, 0);
    assert!(provider.try_row_count("no_such_table").await.is_err());
    assert!(matches!(
        provider.try_column_names("bad name; DROP").await,
        Err(DbError::InvalidInput { .. })
    ));
}

#[tokio::test]
async fn test_metadata_cache_ttl() {
    let cache = CacheOptions {
        ttl: Duration::from_millis(300),
        capacity: 100,
    };
    let (_path, provider) = open_with(ProviderOptions::default().with_cache(cache)).await;
    create_users(&provider).await;

    provider.column_names("users").await;
    provider.column_names("users").await;
    let stats = provider.cache_statistics();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    provider.column_names("users").await;
    assert_eq!(provider.cache_statistics().misses, 2);
}

#[tokio::test]
async fn test_clear_cache_reloads_row_count() {
    let (_path, provider) = open().await;
    create_users(&provider).await;

    assert_eq!(provider.row_count("users").await, 0);
    provider
        .execute_update("INSERT INTO users VALUES (1, 'alice', 30)")
        .await
        .unwrap();
    // Still served from the cache.
    assert_eq!(provider.row_count("users").await, 0);

    provider.clear_cache_for_table("users");
    assert_eq!(provider.row_count("users").await, 1);

    provider
        .execute_update("INSERT INTO users VALUES (2, 'bob', 31)")
        .await
        .unwrap();
    provider.clear_all_caches();
    assert_eq!(provider.row_count("users").await, 2);
}

#[tokio::test]
async fn test_execute_in_transaction_rolls_back_on_error() {
    let (_path, provider) = open().await;
    create_users(&provider).await;

    let result: Result<(), DbError> = provider
        .execute_in_transaction(|tx| {
            async move {
                tx.execute("INSERT INTO users VALUES (1, 'alice', 30)").await?;
                tx.execute("INSERT INTO users VALUES (2, 'bob', 31)").await?;
                Err(DbError::invalid_input("abort"))
            }
            .boxed()
        })
        .await;
    assert!(matches!(result, Err(DbError::InvalidInput { .. })));

    let rows = provider.execute_query("SELECT * FROM users").await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_execute_in_transaction_commits_and_returns_value() {
    let (_path, provider) = open().await;
    create_users(&provider).await;

    let count = provider
        .execute_in_transaction(|tx| {
            async move {
                tx.execute("INSERT INTO users VALUES (1, 'alice', 30)").await?;
                tx.execute_with(
                    "INSERT INTO users VALUES (?, ?, ?)",
                    &[SqlValue::Int(2), SqlValue::from("bob"), SqlValue::Null],
                )
                .await?;
                Ok(tx.query("SELECT id FROM users").await?.row_count())
            }
            .boxed()
        })
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(provider.try_row_count("users").await.unwrap(), 2);
}

#[tokio::test]
async fn test_transaction_context_single_active_transaction() {
    let (_path, provider) = open().await;
    create_users(&provider).await;

    let mut ctx = provider.transaction_context();
    assert_eq!(ctx.state(), TransactionState::None);

    ctx.begin()
        .await
        .unwrap()
        .execute("INSERT INTO users VALUES (1, 'alice', 30)")
        .await
        .unwrap();
    assert!(matches!(ctx.begin().await, Err(DbError::Transaction { .. })));
    assert_eq!(ctx.state(), TransactionState::Active);

    assert_eq!(ctx.commit().await.unwrap(), TransactionOutcome::Committed);
    assert_eq!(ctx.state(), TransactionState::None);
    assert_eq!(provider.try_row_count("users").await.unwrap(), 1);
}

#[tokio::test]
async fn test_single_connection_pool_blocks_second_caller() {
    let pool = PoolOptions {
        acquire_timeout_secs: Some(1),
        ..PoolOptions::default()
    };
    let (_path, provider) = open_with(ProviderOptions::default().with_pool(pool)).await;
    create_users(&provider).await;

    assert_eq!(provider.pool_statistics().unwrap().total, 1);

    let mut ctx = provider.transaction_context();
    ctx.begin().await.unwrap();
    let stats = provider.pool_statistics().unwrap();
    assert_eq!(stats.active, 1);
    assert_eq!(stats.idle, 0);

    let err = provider.try_row_count("users").await.unwrap_err();
    assert!(matches!(err, DbError::PoolExhausted { timeout_secs: 1 }));

    ctx.rollback().await.unwrap();
    assert_eq!(provider.try_row_count("users").await.unwrap(), 0);
}

#[tokio::test]
async fn test_blocked_caller_resumes_after_release() {
    let pool = PoolOptions {
        acquire_timeout_secs: Some(10),
        ..PoolOptions::default()
    };
    let (_path, provider) = open_with(ProviderOptions::default().with_pool(pool)).await;
    let provider = Arc::new(provider);
    create_users(&provider).await;

    let mut ctx = provider.transaction_context();
    ctx.begin().await.unwrap();

    let update = tokio::spawn({
        let provider = Arc::clone(&provider);
        async move {
            provider
                .execute_update("INSERT INTO users VALUES (1, 'alice', 30)")
                .await
        }
    });

    let mut waiting = 0;
    for _ in 0..100 {
        waiting = provider.pool_statistics().unwrap().waiting;
        if waiting == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(waiting, 1);
    assert!(!update.is_finished());

    ctx.rollback().await.unwrap();
    assert!(update.await.unwrap().unwrap());
    assert_eq!(provider.pool_statistics().unwrap().waiting, 0);
    assert_eq!(provider.try_row_count("users").await.unwrap(), 1);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (_path, provider) = open().await;
    assert!(provider.is_connection_valid().await);
    assert!(provider.server_version().await.is_some());

    provider.close().await;
    provider.close().await;

    assert!(!provider.is_connection_valid().await);
    assert!(matches!(
        provider.pool_statistics(),
        Err(DbError::PoolUnavailable { .. })
    ));
    assert!(matches!(
        provider.execute_query("SELECT 1").await,
        Err(DbError::ConnectionInvalid { .. })
    ));
}

#[tokio::test]
async fn test_open_embedded_creates_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.db");

    let provider = DatabaseProvider::open_embedded(DatabaseType::SQLite, &path)
        .await
        .unwrap();
    assert!(provider.is_connection_valid().await);
    assert!(path.exists());
    provider.close().await;
}

#[tokio::test]
async fn test_open_rejects_invalid_config() {
    let err = DatabaseProvider::open_embedded(DatabaseType::SQLite, "")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Database file path cannot be empty"));

    let err = DatabaseProvider::open_embedded(DatabaseType::MySQL, "/tmp/x.db")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Config(_)));
}

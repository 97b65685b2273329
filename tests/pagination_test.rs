//! Integration tests for dialect-aware pagination.

use serde_json::{Value, json};
use sql_provider::DatabaseProvider;
use sql_provider::db::build_paginated_query;
use sql_provider::models::{DatabaseType, PaginatedQuerySpec, SqlValue};
use tempfile::TempPath;

const BASE_QUERY: &str = "SELECT id, label FROM items ORDER BY id";

async fn setup_items(count: i64) -> (TempPath, DatabaseProvider) {
    let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
    let provider = DatabaseProvider::open_embedded(DatabaseType::SQLite, path.to_path_buf())
        .await
        .unwrap();

    provider
        .create_table("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL)")
        .await
        .unwrap();

    // Inserted in reverse so that row order depends on the ORDER BY, not on insertion.
    let rows: Vec<Vec<SqlValue>> = (1..=count)
        .rev()
        .map(|i| vec![SqlValue::Int(i), SqlValue::Text(format!("item-{:03}", i))])
        .collect();
    provider
        .execute_batch_insert("INSERT INTO items (id, label) VALUES (?, ?)", &rows)
        .await
        .unwrap();

    (path, provider)
}

fn ids(rows: &[serde_json::Map<String, Value>]) -> Vec<Value> {
    rows.iter().map(|row| row["id"].clone()).collect()
}

#[tokio::test]
async fn test_pages_reproduce_full_result() {
    let (_path, provider) = setup_items(23).await;
    let full = provider.execute_query(BASE_QUERY).await.unwrap();
    assert_eq!(full.row_count(), 23);

    for page_size in [1u64, 5, 7, 23, 50] {
        let pages = 23u64.div_ceil(page_size);
        let mut collected = Vec::new();
        for page in 0..pages {
            let rows = provider
                .execute_paginated_query(BASE_QUERY, page, page_size)
                .await
                .unwrap();
            assert!(rows.row_count() as u64 <= page_size);
            collected.extend(rows.rows);
        }
        assert_eq!(
            ids(&collected),
            ids(&full.rows),
            "page size {} lost or duplicated rows",
            page_size
        );
    }
}

#[tokio::test]
async fn test_page_past_the_end_is_empty() {
    let (_path, provider) = setup_items(4).await;

    let rows = provider
        .execute_paginated_query(BASE_QUERY, 3, 2)
        .await
        .unwrap();
    assert!(rows.is_empty());

    let last = provider
        .execute_paginated_query(BASE_QUERY, 1, 3)
        .await
        .unwrap();
    assert_eq!(ids(&last.rows), vec![json!(4)]);
}

#[tokio::test]
async fn test_trailing_semicolon_in_base_query() {
    let (_path, provider) = setup_items(3).await;

    let rows = provider
        .execute_paginated_query("SELECT id FROM items ORDER BY id;", 0, 2)
        .await
        .unwrap();
    assert_eq!(ids(&rows.rows), vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_build_for_other_dialects_from_sqlite_provider() {
    let (_path, provider) = setup_items(1).await;

    let sql = provider
        .build_paginated_query(BASE_QUERY, 1, 10, DatabaseType::PostgreSQL)
        .unwrap();
    assert_eq!(sql, format!("{} LIMIT 10 OFFSET 10", BASE_QUERY));

    let sql = provider
        .build_paginated_query(BASE_QUERY, 1, 10, DatabaseType::SqlServer)
        .unwrap();
    assert!(sql.contains("WHERE RowNum > 10 AND RowNum <= 20"));
    assert!(sql.contains("OVER (ORDER BY id) AS RowNum"), "{}", sql);
    assert!(sql.contains("FROM (SELECT id, label FROM items) AS BaseQuery"), "{}", sql);

    let sql = provider
        .build_paginated_query(BASE_QUERY, 1, 10, DatabaseType::Oracle)
        .unwrap();
    assert!(sql.contains("WHERE ROWNUM <= 20) WHERE rnum > 10"));

    assert!(
        provider
            .build_paginated_query(BASE_QUERY, 0, 10, DatabaseType::Db2)
            .is_err()
    );
}

#[test]
fn test_window_bounds_cover_consecutive_pages() {
    // Consecutive pages must tile the row numbers exactly: page p covers (p*n, (p+1)*n].
    for db_type in [DatabaseType::SqlServer, DatabaseType::OracleServiceName] {
        for page in 0..4u64 {
            let sql =
                build_paginated_query(&PaginatedQuerySpec::new(BASE_QUERY, page, 6, db_type))
                    .unwrap();
            let (start, end) = (page * 6, page * 6 + 6);
            match db_type {
                DatabaseType::SqlServer => assert!(
                    sql.contains(&format!("RowNum > {} AND RowNum <= {}", start, end)),
                    "{}",
                    sql
                ),
                _ => {
                    assert!(sql.contains(&format!("ROWNUM <= {}", end)), "{}", sql);
                    assert!(sql.ends_with(&format!("rnum > {}", start)), "{}", sql);
                }
            }
        }
    }
}

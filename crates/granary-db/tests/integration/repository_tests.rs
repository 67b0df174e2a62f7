//! Integration tests for TableRepository.
//!
//! These tests verify table replacement, bulk loading and rollback against a
//! real PostgreSQL database. Each test runs in an isolated container.

use chrono::NaiveDate;
use granary_core::schema::{CellValue, ColumnType};
use granary_core::traits::{TableLoad, TableStore};
use granary_core::{IngestConfig, IngestService};
use granary_db::TableRepository;

use crate::integration::common::{column_types, schema, setup_test_db};

/// A committed load creates the table with the inferred column types.
#[tokio::test]
async fn test_load_creates_typed_table() {
    let (pool, _container) = setup_test_db().await;
    let repo = TableRepository::new(pool.clone());
    let schema = schema(
        "data_bilancio",
        &[
            ("anno", ColumnType::Integer),
            ("importo", ColumnType::Double),
            ("attivo", ColumnType::Boolean),
            ("data", ColumnType::Date),
            ("ente", ColumnType::Text),
        ],
    );

    let mut load = repo.begin(&schema).await.expect("begin should succeed");
    let inserted = load
        .insert_rows(&[
            vec![
                CellValue::Int(2023),
                CellValue::Float(10.5),
                CellValue::Bool(true),
                CellValue::Date(NaiveDate::from_ymd_opt(2023, 1, 31).unwrap()),
                CellValue::Text("Roma".to_string()),
            ],
            vec![
                CellValue::Null,
                CellValue::Null,
                CellValue::Null,
                CellValue::Null,
                CellValue::Null,
            ],
        ])
        .await
        .expect("insert should succeed");
    load.commit().await.expect("commit should succeed");

    assert_eq!(inserted, 2);
    assert_eq!(repo.row_count("data_bilancio").await.unwrap(), Some(2));
    assert_eq!(
        column_types(&pool, "data_bilancio").await,
        vec![
            ("anno".to_string(), "bigint".to_string()),
            ("importo".to_string(), "double precision".to_string()),
            ("attivo".to_string(), "boolean".to_string()),
            ("data".to_string(), "date".to_string()),
            ("ente".to_string(), "text".to_string()),
        ]
    );

    let (anno, ente): (Option<i64>, Option<String>) =
        sqlx::query_as("SELECT anno, ente FROM data_bilancio WHERE anno IS NOT NULL")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(anno, Some(2023));
    assert_eq!(ente.as_deref(), Some("Roma"));
}

/// Dropping a load without commit leaves the previous table untouched.
#[tokio::test]
async fn test_uncommitted_load_rolls_back() {
    let (pool, _container) = setup_test_db().await;
    let repo = TableRepository::new(pool);
    let schema = schema("data_r1", &[("v", ColumnType::Integer)]);

    let mut first = repo.begin(&schema).await.unwrap();
    first
        .insert_rows(&[vec![CellValue::Int(1)], vec![CellValue::Int(2)]])
        .await
        .unwrap();
    first.commit().await.unwrap();

    {
        let mut second = repo.begin(&schema).await.unwrap();
        second.insert_rows(&[vec![CellValue::Int(3)]]).await.unwrap();
        // Dropped here without commit
    }

    assert_eq!(repo.row_count("data_r1").await.unwrap(), Some(2));
}

/// A failed load never leaves a table behind.
#[tokio::test]
async fn test_failed_load_leaves_no_table() {
    let (pool, _container) = setup_test_db().await;
    let repo = TableRepository::new(pool);
    let schema = schema("data_bad", &[("a", ColumnType::Integer), ("b", ColumnType::Text)]);

    let mut load = repo.begin(&schema).await.unwrap();
    let result = load.insert_rows(&[vec![CellValue::Int(1)]]).await;
    drop(load);

    assert!(result.is_err(), "Short rows are rejected");
    assert_eq!(repo.row_count("data_bad").await.unwrap(), None);
}

/// Re-loading a table replaces its rows and its column layout.
#[tokio::test]
async fn test_reload_replaces_table() {
    let (pool, _container) = setup_test_db().await;
    let repo = TableRepository::new(pool.clone());

    let old = schema("data_r1", &[("v", ColumnType::Integer)]);
    let mut load = repo.begin(&old).await.unwrap();
    load.insert_rows(&[vec![CellValue::Int(1)], vec![CellValue::Int(2)]])
        .await
        .unwrap();
    load.commit().await.unwrap();

    let new = schema("data_r1", &[("v", ColumnType::Text), ("w", ColumnType::Text)]);
    let mut load = repo.begin(&new).await.unwrap();
    load.insert_rows(&[vec![
        CellValue::Text("x".to_string()),
        CellValue::Text("y".to_string()),
    ]])
    .await
    .unwrap();
    load.commit().await.unwrap();

    assert_eq!(repo.row_count("data_r1").await.unwrap(), Some(1));
    assert_eq!(column_types(&pool, "data_r1").await.len(), 2);
}

/// Missing tables report no row count instead of failing.
#[tokio::test]
async fn test_row_count_of_missing_table() {
    let (pool, _container) = setup_test_db().await;
    let repo = TableRepository::new(pool);

    assert_eq!(repo.row_count("data_nothing").await.unwrap(), None);
    assert!(!repo.table_exists("data_nothing").await.unwrap());
}

/// Ingesting a directory through the real store, twice, yields one table per
/// CSV with the same contents.
#[tokio::test]
async fn test_ingest_service_end_to_end() {
    let (pool, _container) = setup_test_db().await;
    let repo = TableRepository::new(pool.clone());
    let dir = tempfile::tempdir().unwrap();
    let package = dir.path().join("bilancio-2023");
    std::fs::create_dir_all(&package).unwrap();
    std::fs::write(
        package.join("res-a.csv"),
        "Anno;Regione;Importo;Data\n2023;Lazio;10,5;31/01/2023\n2024;Molise;;01/02/2024\n",
    )
    .unwrap();
    std::fs::write(package.join("metadata.json"), "{}").unwrap();
    let service = IngestService::new(repo.clone(), IngestConfig::default());

    let first = service.ingest_dir(dir.path()).await.unwrap();
    let second = service.ingest_dir(dir.path()).await.unwrap();

    assert_eq!(first.succeeded, 1);
    assert_eq!(second.succeeded, 1);
    assert_eq!(repo.row_count("data_res_a").await.unwrap(), Some(2));
    assert_eq!(
        column_types(&pool, "data_res_a").await,
        vec![
            ("anno".to_string(), "bigint".to_string()),
            ("regione".to_string(), "text".to_string()),
            ("importo".to_string(), "double precision".to_string()),
            ("data".to_string(), "date".to_string()),
        ]
    );

    let importo: Option<f64> =
        sqlx::query_scalar("SELECT importo FROM data_res_a WHERE anno = 2024")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(importo, None, "Empty cell loads as NULL");
}

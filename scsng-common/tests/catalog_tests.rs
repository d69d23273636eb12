//! Integration tests for the SQLite catalog

use scsng_common::db::{init_database, Catalog};
use sqlx::sqlite::SqlitePoolOptions;

async fn memory_catalog() -> Catalog {
    // One connection so every query sees the same in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    let catalog = Catalog::new(pool);
    catalog
        .execute(
            "CREATE TABLE results (pair_name TEXT PRIMARY KEY, bin INTEGER, cq REAL, model_name TEXT)",
        )
        .await
        .unwrap();
    catalog
}

fn row(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

#[tokio::test]
async fn test_insert_and_select_typed_columns() {
    let catalog = memory_catalog().await;
    let columns = ["pair_name", "bin", "cq", "model_name"];

    catalog
        .insert_rows(
            "results",
            &columns,
            &[
                row(&["1_PREM_201500000000", "1", "0.75", "PREM_201500000000"]),
                vec![
                    Some("2_PREM_201500000000".to_string()),
                    Some("2".to_string()),
                    None,
                    Some("PREM_201500000000".to_string()),
                ],
            ],
        )
        .await
        .unwrap();

    let table = catalog
        .select("SELECT pair_name, bin, cq FROM results ORDER BY bin")
        .await
        .unwrap();

    assert_eq!(table.n_row(), 2);
    assert_eq!(table.get_int("bin").unwrap(), vec![1, 2]);
    let cq = table.get_double("cq").unwrap();
    assert!((cq[0] - 0.75).abs() < 1e-12);
    assert!(cq[1].is_nan());
    assert!(matches!(
        table.get_int("cq"),
        Err(scsng_common::Error::NullValue(_))
    ));
    assert_eq!(table.get_string("pair_name").unwrap()[0], "1_PREM_201500000000");
}

#[tokio::test]
async fn test_insert_rows_upserts_by_key() {
    let catalog = memory_catalog().await;
    let columns = ["pair_name", "bin", "cq", "model_name"];

    catalog
        .insert_rows("results", &columns, &[row(&["3_ULVZ_201500000001", "3", "0.1", "ULVZ_201500000001"])])
        .await
        .unwrap();
    catalog
        .insert_rows("results", &columns, &[row(&["3_ULVZ_201500000001", "3", "0.9", "ULVZ_201500000001"])])
        .await
        .unwrap();

    let table = catalog.select("SELECT cq FROM results").await.unwrap();
    assert_eq!(table.n_row(), 1);
    assert!((table.get_double("cq").unwrap()[0] - 0.9).abs() < 1e-12);
}

#[tokio::test]
async fn test_insert_rows_rejects_short_row() {
    let catalog = memory_catalog().await;
    let result = catalog
        .insert_rows("results", &["pair_name", "bin"], &[row(&["only_one"])])
        .await;
    assert!(matches!(result, Err(scsng_common::Error::RowShape(_))));
}

#[tokio::test]
async fn test_null_text_is_stored_verbatim() {
    let catalog = memory_catalog().await;
    let columns = ["pair_name", "bin", "cq", "model_name"];
    catalog
        .insert_rows(
            "results",
            &columns,
            &[
                row(&["1_NULL", "1", "0.5", "NULL"]),
                row(&["2_NaN", "2", "0.5", "NaN"]),
                vec![Some("3_none".to_string()), Some("3".to_string()), None, None],
            ],
        )
        .await
        .unwrap();

    let table = catalog
        .select("SELECT model_name FROM results ORDER BY bin")
        .await
        .unwrap();
    assert_eq!(
        table.get_optional_string("model_name").unwrap(),
        vec![Some("NULL".to_string()), Some("NaN".to_string()), None]
    );

    let nulls = catalog
        .select("SELECT COUNT(*) AS n FROM results WHERE model_name IS NULL")
        .await
        .unwrap();
    assert_eq!(nulls.get_int("n").unwrap(), vec![1]);
}

#[tokio::test]
async fn test_missing_column_is_unknown() {
    let catalog = memory_catalog().await;
    catalog
        .insert_rows("results", &["pair_name", "bin"], &[row(&["x", "1"])])
        .await
        .unwrap();
    let table = catalog.select("SELECT pair_name FROM results").await.unwrap();
    assert!(matches!(
        table.get_double("cq"),
        Err(scsng_common::Error::UnknownColumn(_))
    ));
}

#[tokio::test]
async fn test_init_database_creates_file() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("catalog.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());

    let catalog = Catalog::new(pool);
    catalog.execute("CREATE TABLE IF NOT EXISTS t (k TEXT PRIMARY KEY)").await.unwrap();
    let table = catalog.select("SELECT COUNT(*) AS n FROM t").await.unwrap();
    assert_eq!(table.get_int("n").unwrap(), vec![0]);
}

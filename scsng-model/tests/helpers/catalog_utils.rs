//! Catalog test utilities

use scsng_common::db::Catalog;
use scsng_model::db::init_tables;
use sqlx::sqlite::SqlitePoolOptions;

/// In-memory catalog with every pipeline table created
///
/// One connection, so every query sees the same database.
pub async fn memory_catalog() -> anyhow::Result<Catalog> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await?;
    let catalog = Catalog::new(pool);
    init_tables(&catalog).await?;
    Ok(catalog)
}

/// Names of the user tables in the catalog
pub async fn table_names(catalog: &Catalog) -> anyhow::Result<Vec<String>> {
    let table = catalog
        .select("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .await?;
    if table.n_row() == 0 {
        return Ok(Vec::new());
    }
    Ok(table.get_string("name")?)
}

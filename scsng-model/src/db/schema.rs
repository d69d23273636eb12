//! Catalog tables written by the pipeline

use crate::error::Result;
use scsng_common::db::Catalog;
use tracing::info;

/// Columns shared by `records` and `synthetic_traces`
const TRACE_COLUMNS: &str = r#"
            pair_name TEXT NOT NULL,
            mode TEXT NOT NULL,
            unit TEXT NOT NULL,
            event TEXT NOT NULL,
            station TEXT NOT NULL,
            gcarc REAL NOT NULL,
            snr REAL,
            tag INTEGER NOT NULL DEFAULT 0,
            frs_amp REAL,
            frs_time REAL,
            decon_file TEXT,
            frs_file TEXT,
            s_stripped_file TEXT,
            scs_stripped_file TEXT,
            PRIMARY KEY (pair_name, mode)
"#;

/// Create every pipeline table if it does not exist
pub async fn init_tables(catalog: &Catalog) -> Result<()> {
    for table in ["records", "synthetic_traces"] {
        catalog
            .execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                table, TRACE_COLUMNS
            ))
            .await?;
    }

    catalog
        .execute(
            r#"
        CREATE TABLE IF NOT EXISTS bins (
            id INTEGER PRIMARY KEY,
            lon REAL NOT NULL,
            lat REAL NOT NULL,
            radius REAL NOT NULL
        )
        "#,
        )
        .await?;

    catalog
        .execute(
            r#"
        CREATE TABLE IF NOT EXISTS bin_members (
            bin INTEGER NOT NULL,
            pair_name TEXT NOT NULL,
            center_distance REAL NOT NULL,
            PRIMARY KEY (bin, pair_name)
        )
        "#,
        )
        .await?;

    catalog
        .execute(
            r#"
        CREATE TABLE IF NOT EXISTS models (
            name TEXT PRIMARY KEY,
            family TEXT NOT NULL,
            thickness REAL NOT NULL,
            dvs REAL NOT NULL,
            drho REAL NOT NULL,
            critical_distance REAL NOT NULL
        )
        "#,
        )
        .await?;

    catalog
        .execute(
            r#"
        CREATE TABLE IF NOT EXISTS modeling_results (
            pair_name TEXT NOT NULL,
            mode TEXT NOT NULL,
            bin INTEGER NOT NULL,
            model_name TEXT NOT NULL,
            cq REAL,
            cq2 REAL,
            scores TEXT,
            stack_trace_count INTEGER,
            weight_sum REAL NOT NULL,
            data_alter_factor REAL,
            model_alter_factor REAL,
            paths TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            PRIMARY KEY (pair_name, mode)
        )
        "#,
        )
        .await?;

    info!("Catalog tables initialized (records, synthetic_traces, bins, bin_members, models, modeling_results)");
    Ok(())
}

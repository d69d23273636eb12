//! Catalog access for the modeling pipeline
//!
//! Everything goes through [`Catalog`] as text rows. An empty select has no
//! columns, so every loader checks `n_row()` first.

pub mod schema;

pub use schema::init_tables;

use crate::config::ProcessingMode;
use crate::cq::CqScores;
use crate::error::{ModelError, Result};
use crate::models::{Bin, BinMember, CandidateModel, ComparisonResult, ProcessedTrace, Record, StackPaths};
use chrono::Utc;
use scsng_common::db::catalog::{format_double, format_optional};
use scsng_common::db::{Catalog, Table};
use std::collections::BTreeMap;
use tracing::debug;

/// Table holding processed traces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceTable {
    /// Observed data
    Records,
    /// Synthetics of candidate models
    SyntheticTraces,
}

impl TraceTable {
    pub fn name(&self) -> &'static str {
        match self {
            TraceTable::Records => "records",
            TraceTable::SyntheticTraces => "synthetic_traces",
        }
    }
}

const TRACE_COLUMNS: [&str; 14] = [
    "pair_name",
    "mode",
    "unit",
    "event",
    "station",
    "gcarc",
    "snr",
    "tag",
    "frs_amp",
    "frs_time",
    "decon_file",
    "frs_file",
    "s_stripped_file",
    "scs_stripped_file",
];

fn optional_double(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

fn sql_text(value: &str) -> String {
    value.replace('\'', "''")
}

fn json_error(e: serde_json::Error) -> ModelError {
    ModelError::Parse(format!("catalog JSON: {}", e))
}

/// Sub-scores as a JSON array; infinite misfits are written as `null`
fn scores_to_json(scores: &CqScores) -> Result<String> {
    let values: Vec<Option<f64>> = scores
        .as_array()
        .iter()
        .map(|v| v.is_finite().then_some(*v))
        .collect();
    serde_json::to_string(&values).map_err(json_error)
}

fn scores_from_json(text: &str) -> Result<CqScores> {
    let values: Vec<Option<f64>> = serde_json::from_str(text).map_err(json_error)?;
    if values.len() != 7 {
        return Err(ModelError::Parse(format!(
            "expected 7 CQ sub-scores, found {}",
            values.len()
        )));
    }
    let at = |i: usize| values[i].unwrap_or(f64::INFINITY);
    Ok(CqScores {
        cc: at(0),
        nd: at(1),
        nd_reverse: at(2),
        cc1: at(3),
        cc2: at(4),
        nn2: at(5),
        nn2_reverse: at(6),
    })
}

/// Upsert the processed rows of one unit
pub async fn save_processed(
    catalog: &Catalog,
    table: TraceTable,
    unit: &str,
    mode: ProcessingMode,
    rows: &[ProcessedTrace],
) -> Result<u64> {
    let values: Vec<Vec<Option<String>>> = rows
        .iter()
        .map(|r| {
            vec![
                Some(r.pair_name.clone()),
                Some(mode.as_str().to_string()),
                Some(unit.to_string()),
                Some(r.event.clone()),
                Some(r.station.clone()),
                format_double(r.gcarc),
                format_double(r.snr),
                Some(r.tag.to_string()),
                format_optional(r.frs_amp),
                format_optional(r.frs_time),
                r.decon_file.clone(),
                r.frs_file.clone(),
                r.s_stripped_file.clone(),
                r.scs_stripped_file.clone(),
            ]
        })
        .collect();
    Ok(catalog.insert_rows(table.name(), &TRACE_COLUMNS, &values).await?)
}

fn processed_rows(table: &Table) -> Result<Vec<ProcessedTrace>> {
    if table.n_row() == 0 {
        return Ok(Vec::new());
    }
    let pair_name = table.get_string("pair_name")?;
    let event = table.get_string("event")?;
    let station = table.get_string("station")?;
    let gcarc = table.get_double("gcarc")?;
    let snr = table.get_double("snr")?;
    let tag = table.get_int("tag")?;
    let frs_amp = table.get_double("frs_amp")?;
    let frs_time = table.get_double("frs_time")?;
    let decon_file = table.get_optional_string("decon_file")?;
    let frs_file = table.get_optional_string("frs_file")?;
    let s_stripped_file = table.get_optional_string("s_stripped_file")?;
    let scs_stripped_file = table.get_optional_string("scs_stripped_file")?;

    Ok((0..table.n_row())
        .map(|i| ProcessedTrace {
            pair_name: pair_name[i].clone(),
            event: event[i].clone(),
            station: station[i].clone(),
            gcarc: gcarc[i],
            snr: snr[i],
            tag: tag[i] as i32,
            frs_amp: optional_double(frs_amp[i]),
            frs_time: optional_double(frs_time[i]),
            decon_file: decon_file[i].clone(),
            frs_file: frs_file[i].clone(),
            s_stripped_file: s_stripped_file[i].clone(),
            scs_stripped_file: scs_stripped_file[i].clone(),
        })
        .collect())
}

/// Processed rows of `mode`, optionally restricted to one unit
pub async fn load_processed(
    catalog: &Catalog,
    table: TraceTable,
    unit: Option<&str>,
    mode: ProcessingMode,
) -> Result<Vec<ProcessedTrace>> {
    let mut sql = format!(
        "SELECT {} FROM {} WHERE mode = '{}'",
        TRACE_COLUMNS.join(", "),
        table.name(),
        mode.as_str()
    );
    if let Some(unit) = unit {
        sql.push_str(&format!(" AND unit = '{}'", sql_text(unit)));
    }
    sql.push_str(" ORDER BY gcarc, pair_name");
    let rows = processed_rows(&catalog.select(&sql).await?)?;
    debug!(table = table.name(), unit, rows = rows.len(), "processed rows loaded");
    Ok(rows)
}

/// Data records of `mode`
pub async fn load_records(catalog: &Catalog, mode: ProcessingMode) -> Result<Vec<Record>> {
    Ok(load_processed(catalog, TraceTable::Records, None, mode)
        .await?
        .into_iter()
        .map(|r| Record {
            pair_name: r.pair_name,
            event: r.event,
            station: r.station,
            gcarc: r.gcarc,
            snr: r.snr,
            tag: r.tag,
            file: r.decon_file,
            s_stripped_file: r.s_stripped_file,
            scs_stripped_file: r.scs_stripped_file,
        })
        .collect())
}

/// Upsert bins and their members
pub async fn save_bins(catalog: &Catalog, bins: &[Bin]) -> Result<()> {
    let rows: Vec<Vec<Option<String>>> = bins
        .iter()
        .map(|b| {
            vec![
                Some(b.id.to_string()),
                format_double(b.lon),
                format_double(b.lat),
                format_double(b.radius),
            ]
        })
        .collect();
    catalog
        .insert_rows("bins", &["id", "lon", "lat", "radius"], &rows)
        .await?;

    let members: Vec<Vec<Option<String>>> = bins
        .iter()
        .flat_map(|b| {
            b.members.iter().map(move |m| {
                vec![
                    Some(b.id.to_string()),
                    Some(m.pair_name.clone()),
                    format_double(m.center_distance),
                ]
            })
        })
        .collect();
    catalog
        .insert_rows("bin_members", &["bin", "pair_name", "center_distance"], &members)
        .await?;
    Ok(())
}

/// Every bin with its members, ordered by id
pub async fn load_bins(catalog: &Catalog) -> Result<Vec<Bin>> {
    let table = catalog
        .select("SELECT id, lon, lat, radius FROM bins ORDER BY id")
        .await?;
    if table.n_row() == 0 {
        return Ok(Vec::new());
    }
    let ids = table.get_int("id")?;
    let lon = table.get_double("lon")?;
    let lat = table.get_double("lat")?;
    let radius = table.get_double("radius")?;

    let mut members: BTreeMap<i64, Vec<BinMember>> = BTreeMap::new();
    let table = catalog
        .select("SELECT bin, pair_name, center_distance FROM bin_members ORDER BY bin, pair_name")
        .await?;
    if table.n_row() > 0 {
        let bin = table.get_int("bin")?;
        let pair_name = table.get_string("pair_name")?;
        let distance = table.get_double("center_distance")?;
        for i in 0..table.n_row() {
            members.entry(bin[i]).or_default().push(BinMember {
                pair_name: pair_name[i].clone(),
                center_distance: distance[i],
            });
        }
    }

    Ok(ids
        .iter()
        .enumerate()
        .map(|(i, id)| Bin {
            id: *id,
            lon: lon[i],
            lat: lat[i],
            radius: radius[i],
            members: members.remove(id).unwrap_or_default(),
        })
        .collect())
}

/// Upsert candidate models
pub async fn save_models(catalog: &Catalog, models: &[CandidateModel]) -> Result<u64> {
    let rows: Vec<Vec<Option<String>>> = models
        .iter()
        .map(|m| {
            vec![
                Some(m.name.clone()),
                Some(m.family.as_str().to_string()),
                format_double(m.thickness),
                format_double(m.dvs),
                format_double(m.drho),
                format_double(m.critical_distance),
            ]
        })
        .collect();
    Ok(catalog
        .insert_rows(
            "models",
            &["name", "family", "thickness", "dvs", "drho", "critical_distance"],
            &rows,
        )
        .await?)
}

/// Every candidate model, ordered by name
pub async fn load_models(catalog: &Catalog) -> Result<Vec<CandidateModel>> {
    let table = catalog
        .select("SELECT name, family, thickness, dvs, drho, critical_distance FROM models ORDER BY name")
        .await?;
    if table.n_row() == 0 {
        return Ok(Vec::new());
    }
    let name = table.get_string("name")?;
    let family = table.get_string("family")?;
    let thickness = table.get_double("thickness")?;
    let dvs = table.get_double("dvs")?;
    let drho = table.get_double("drho")?;
    let crit = table.get_double("critical_distance")?;

    (0..table.n_row())
        .map(|i| {
            Ok(CandidateModel {
                name: name[i].clone(),
                family: family[i].parse()?,
                thickness: thickness[i],
                dvs: dvs[i],
                drho: drho[i],
                critical_distance: crit[i],
            })
        })
        .collect()
}

const RESULT_COLUMNS: [&str; 13] = [
    "pair_name",
    "mode",
    "bin",
    "model_name",
    "cq",
    "cq2",
    "scores",
    "stack_trace_count",
    "weight_sum",
    "data_alter_factor",
    "model_alter_factor",
    "paths",
    "created_at",
];

/// Upsert comparison results; a missing CQ is stored as NULL
pub async fn save_results(catalog: &Catalog, results: &[ComparisonResult]) -> Result<u64> {
    let created_at = Utc::now().to_rfc3339();
    let mut rows = Vec::with_capacity(results.len());
    for r in results {
        let scores = match &r.scores {
            Some(s) => Some(scores_to_json(s)?),
            None => None,
        };
        rows.push(vec![
            Some(r.pair_name.clone()),
            Some(r.mode.as_str().to_string()),
            Some(r.bin.to_string()),
            Some(r.model_name.clone()),
            format_optional(r.cq()),
            format_optional(r.cq2()),
            scores,
            r.stack_trace_count.map(|c| c.to_string()),
            format_double(r.weight_sum),
            format_optional(r.data_alter_factor),
            format_optional(r.model_alter_factor),
            Some(serde_json::to_string(&r.paths).map_err(json_error)?),
            Some(created_at.clone()),
        ]);
    }
    Ok(catalog
        .insert_rows("modeling_results", &RESULT_COLUMNS, &rows)
        .await?)
}

/// Comparison results of `mode`, ordered by bin and model
pub async fn load_results(catalog: &Catalog, mode: ProcessingMode) -> Result<Vec<ComparisonResult>> {
    let table = catalog
        .select(&format!(
            "SELECT {} FROM modeling_results WHERE mode = '{}' ORDER BY bin, model_name",
            RESULT_COLUMNS.join(", "),
            mode.as_str()
        ))
        .await?;
    if table.n_row() == 0 {
        return Ok(Vec::new());
    }
    let pair_name = table.get_string("pair_name")?;
    let bin = table.get_int("bin")?;
    let model_name = table.get_string("model_name")?;
    let scores = table.get_optional_string("scores")?;
    let count = table.get_double("stack_trace_count")?;
    let weight_sum = table.get_double("weight_sum")?;
    let data_alter = table.get_double("data_alter_factor")?;
    let model_alter = table.get_double("model_alter_factor")?;
    let paths = table.get_string("paths")?;

    let mut results = Vec::with_capacity(table.n_row());
    for i in 0..table.n_row() {
        let scores = scores[i].as_deref().map(scores_from_json).transpose()?;
        let paths: StackPaths = serde_json::from_str(&paths[i]).map_err(json_error)?;
        results.push(ComparisonResult {
            pair_name: pair_name[i].clone(),
            bin: bin[i],
            model_name: model_name[i].clone(),
            mode,
            scores,
            stack_trace_count: optional_double(count[i]).map(|c| c as usize),
            weight_sum: weight_sum[i],
            data_alter_factor: optional_double(data_alter[i]),
            model_alter_factor: optional_double(model_alter[i]),
            paths,
        });
    }
    Ok(results)
}

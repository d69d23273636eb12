//! Integration tests for the pipeline catalog tables

mod helpers;

use helpers::{memory_catalog, table_names};
use scsng_model::config::ProcessingMode;
use scsng_model::cq::CqScores;
use scsng_model::db::{self, TraceTable};
use scsng_model::models::{Bin, BinMember, CandidateModel, ComparisonResult, ModelFamily, ProcessedTrace, StackPaths};

fn processed(pair: &str, gcarc: f64, tag: i32) -> ProcessedTrace {
    let (event, station) = pair.split_once('_').unwrap();
    ProcessedTrace {
        pair_name: pair.to_string(),
        event: event.to_string(),
        station: station.to_string(),
        gcarc,
        snr: f64::NAN,
        tag,
        frs_amp: Some(0.4),
        frs_time: None,
        decon_file: Some(format!("decon/{}/{}.trace", event, station)),
        frs_file: None,
        s_stripped_file: None,
        scs_stripped_file: None,
    }
}

#[tokio::test]
async fn test_init_tables_is_idempotent() {
    let catalog = memory_catalog().await.unwrap();
    db::init_tables(&catalog).await.unwrap();

    let names = table_names(&catalog).await.unwrap();
    for table in ["bin_members", "bins", "modeling_results", "models", "records", "synthetic_traces"] {
        assert!(names.iter().any(|n| n == table), "missing table {}", table);
    }
}

#[tokio::test]
async fn test_processed_rows_round_trip_per_mode() {
    let catalog = memory_catalog().await.unwrap();
    let rows = vec![processed("E1_ST02", 66.0, 0), processed("E1_ST01", 61.0, 5)];
    db::save_processed(&catalog, TraceTable::Records, "E1", ProcessingMode::Decon, &rows)
        .await
        .unwrap();

    let loaded = db::load_processed(&catalog, TraceTable::Records, Some("E1"), ProcessingMode::Decon)
        .await
        .unwrap();
    assert_eq!(loaded.len(), 2);
    // Ordered by distance
    assert_eq!(loaded[0].pair_name, "E1_ST01");
    assert_eq!(loaded[0].tag, 5);
    assert!(loaded[0].snr.is_nan());
    assert_eq!(loaded[0].frs_amp, Some(0.4));
    assert_eq!(loaded[0].frs_time, None);
    assert_eq!(loaded[1].decon_file.as_deref(), Some("decon/E1/ST02.trace"));

    let subtract = db::load_processed(&catalog, TraceTable::Records, None, ProcessingMode::Subtract)
        .await
        .unwrap();
    assert!(subtract.is_empty());
    let synthetics = db::load_processed(&catalog, TraceTable::SyntheticTraces, None, ProcessingMode::Decon)
        .await
        .unwrap();
    assert!(synthetics.is_empty());

    let records = db::load_records(&catalog, ProcessingMode::Decon).await.unwrap();
    assert_eq!(records[1].file.as_deref(), Some("decon/E1/ST02.trace"));
}

#[tokio::test]
async fn test_bins_keep_their_members() {
    let catalog = memory_catalog().await.unwrap();
    let bins = vec![
        Bin {
            id: 2,
            lon: 120.0,
            lat: -10.0,
            radius: 3.0,
            members: vec![],
        },
        Bin {
            id: 1,
            lon: 100.5,
            lat: 5.25,
            radius: 2.5,
            members: vec![
                BinMember {
                    pair_name: "E1_ST01".to_string(),
                    center_distance: 0.5,
                },
                BinMember {
                    pair_name: "E1_ST02".to_string(),
                    center_distance: 1.75,
                },
            ],
        },
    ];
    db::save_bins(&catalog, &bins).await.unwrap();

    let loaded = db::load_bins(&catalog).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0], bins[1]);
    assert_eq!(loaded[1], bins[0]);
}

#[tokio::test]
async fn test_models_round_trip_with_family() {
    let catalog = memory_catalog().await.unwrap();
    let models = vec![
        CandidateModel::new("ULVZ_201500000003", 10.0, -20.0, 10.0, 75.0).unwrap(),
        CandidateModel::new("PREM_201500000000", 0.0, 0.0, 0.0, 180.0).unwrap(),
    ];
    db::save_models(&catalog, &models).await.unwrap();

    let loaded = db::load_models(&catalog).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].family, ModelFamily::Prem);
    assert_eq!(loaded[1], models[0]);
}

#[tokio::test]
async fn test_results_store_missing_cq_as_null() {
    let catalog = memory_catalog().await.unwrap();
    let scores = CqScores {
        cc: 0.9,
        nd: 0.2,
        nd_reverse: f64::INFINITY,
        cc1: 0.8,
        cc2: 0.7,
        nn2: 0.3,
        nn2_reverse: 0.25,
    };
    let scored = ComparisonResult {
        pair_name: "1_ULVZ_201500000003".to_string(),
        bin: 1,
        model_name: "ULVZ_201500000003".to_string(),
        mode: ProcessingMode::Decon,
        scores: Some(scores),
        stack_trace_count: Some(24),
        weight_sum: 18.5,
        data_alter_factor: Some(1.02),
        model_alter_factor: None,
        paths: StackPaths {
            data_stack: Some("data_stack/ULVZ_201500000003/1.signal".to_string()),
            ..Default::default()
        },
    };
    let empty = ComparisonResult::insufficient(2, "ULVZ_201500000003", ProcessingMode::Decon, 3.0);
    db::save_results(&catalog, &[scored.clone(), empty.clone()]).await.unwrap();

    let loaded = db::load_results(&catalog, ProcessingMode::Decon).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0], scored);
    assert_eq!(loaded[1], empty);
    assert_eq!(loaded[1].cq(), None);

    let table = catalog
        .select("SELECT cq FROM modeling_results WHERE bin = 2")
        .await
        .unwrap();
    assert!(table.get_double("cq").unwrap()[0].is_nan());

    assert!(db::load_results(&catalog, ProcessingMode::Subtract).await.unwrap().is_empty());
}

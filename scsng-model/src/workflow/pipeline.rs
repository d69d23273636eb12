//! Pipeline runners
//!
//! Each runner fans its units (trace directories or candidate models) out
//! over a [`SlotScheduler`] and persists worker results under the
//! scheduler lock.
//!
//! Runners block. Call them from a plain thread (for example through
//! `tokio::task::spawn_blocking`); catalog access goes through the runtime
//! handle given to [`Pipeline::new`].

use crate::config::{PipelineConfig, ProcessingMode};
use crate::db::{self, TraceTable};
use crate::error::{ModelError, Result};
use crate::models::{CandidateModel, ModelRanking};
use crate::services::bin_modeler::{
    is_usable, load_synthetics, prepare_decon_trace, prepare_subtract_trace, BinModeler,
    BinParams, DataSet, DataTrace, SyntheticSet, TraceRole,
};
use crate::services::cq_scenarios::{run_scenarios, ScenarioParams, ScenarioRow};
use crate::services::ranking::{frs_amplitude_threshold, rank_bins};
pub use crate::services::trace_processor::TraceSource;
use crate::services::trace_processor::{load_unit, ProcessParams, TraceProcessor};
use crate::services::trace_store::TraceStore;
use crate::services::travel_time::TravelTimeOracle;
use crate::signal::Signal;
use crate::workflow::scheduler::SlotScheduler;
use scsng_common::db::Catalog;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

impl TraceSource {
    fn table(&self) -> TraceTable {
        match self {
            TraceSource::Data => TraceTable::Records,
            TraceSource::Synthetics => TraceTable::SyntheticTraces,
        }
    }
}

/// Outcome of one runner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub units: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub panicked: usize,
    /// Traces or bins written to the catalog
    pub written: usize,
}

/// Counters and the first fatal error, shared with the workers
#[derive(Default)]
struct RunState {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    written: AtomicUsize,
    abort: AtomicBool,
    fatal: Mutex<Option<ModelError>>,
}

impl RunState {
    fn record_failure(&self, unit: &str, e: ModelError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        if matches!(e, ModelError::DataIntegrity(_) | ModelError::Io(_) | ModelError::Database(_)) {
            error!(unit, error = %e, "fatal error; no further units are started");
            self.abort.store(true, Ordering::SeqCst);
            let mut fatal = self.fatal.lock().unwrap_or_else(|p| p.into_inner());
            fatal.get_or_insert(e);
        } else {
            error!(unit, error = %e, "unit failed");
        }
    }

    fn finish(self, units: usize, panicked: usize) -> Result<RunSummary> {
        if let Some(e) = self.fatal.into_inner().unwrap_or_else(|p| p.into_inner()) {
            return Err(e);
        }
        Ok(RunSummary {
            units,
            succeeded: self.succeeded.into_inner(),
            failed: self.failed.into_inner(),
            panicked,
            written: self.written.into_inner(),
        })
    }
}

/// Configured pipeline bound to a catalog
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    root: PathBuf,
    catalog: Catalog,
    workers: usize,
    handle: Handle,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, root: PathBuf, catalog: Catalog, handle: Handle) -> Self {
        let workers = config.pool.workers;
        Self {
            config: Arc::new(config),
            root,
            catalog,
            workers,
            handle,
        }
    }

    /// Override the configured worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.config.paths.output)
    }

    fn mode(&self) -> ProcessingMode {
        self.config.binning.mode
    }

    /// Process every unit of `source` and store the per-trace rows
    pub fn process_traces(
        &self,
        source: TraceSource,
        oracle: Arc<dyn TravelTimeOracle>,
    ) -> Result<RunSummary> {
        let paths = &self.config.paths;
        let dir = match source {
            TraceSource::Data => self.resolve(&paths.traces),
            TraceSource::Synthetics => self.resolve(&paths.synthetics),
        };
        let units = TraceStore::list_units(&dir)?;
        let params = Arc::new(ProcessParams::from_config(&self.config, source, self.output_dir())?);
        let shared_esw: Option<Arc<Signal>> = match &paths.esw_reference {
            Some(p) => Some(Arc::new(TraceStore::load(&self.resolve(p))?)),
            None => None,
        };
        let expected = match source {
            TraceSource::Synthetics => self.config.binning.expected_trace_count,
            TraceSource::Data => None,
        };
        info!(?source, units = units.len(), workers = self.workers, mode = self.mode().as_str(), "processing traces");

        let state = Arc::new(RunState::default());
        let mut scheduler = SlotScheduler::new(self.workers);
        for unit in &units {
            if state.abort.load(Ordering::SeqCst) {
                break;
            }
            let unit = unit.clone();
            let dir = dir.clone();
            let extension = paths.trace_extension.clone();
            let params = Arc::clone(&params);
            let oracle = Arc::clone(&oracle);
            let shared_esw = shared_esw.clone();
            let state = Arc::clone(&state);
            let catalog = self.catalog.clone();
            let rt = self.handle.clone();
            let mode = self.mode();

            scheduler.submit(move |guard| {
                let outcome = load_unit(&dir, &unit, &extension).and_then(|traces| {
                    TraceProcessor::new(&params, oracle.as_ref()).process(
                        &unit,
                        traces,
                        shared_esw.as_deref(),
                        expected,
                    )
                });
                let output = match outcome {
                    Ok(output) => output,
                    Err(e) => return state.record_failure(&unit, e),
                };
                let saved = guard.persist(|| {
                    rt.block_on(db::save_processed(&catalog, source.table(), &unit, mode, &output.rows))
                });
                match saved {
                    Ok(_) => {
                        state.succeeded.fetch_add(1, Ordering::SeqCst);
                        state.written.fetch_add(output.rows.len(), Ordering::SeqCst);
                    }
                    Err(e) => state.record_failure(&unit, e),
                }
            });
        }
        let panicked = scheduler.drain();
        drop(scheduler);

        let state = Arc::try_unwrap(state)
            .map_err(|_| ModelError::DataIntegrity("worker still holds run state".to_string()))?;
        let summary = state.finish(units.len(), panicked)?;
        info!(?source, succeeded = summary.succeeded, failed = summary.failed, panicked, rows = summary.written, "trace processing finished");
        Ok(summary)
    }

    /// Load and prepare every usable data record
    fn load_data(&self) -> Result<DataSet> {
        let mode = self.mode();
        let records = self.handle.block_on(db::load_records(&self.catalog, mode))?;
        let output = self.output_dir();
        let mut data = DataSet::new();
        let mut skipped = 0;

        for record in records.iter().filter(|r| is_usable(r.tag)) {
            let prepared = match mode {
                ProcessingMode::Decon => {
                    let Some(file) = &record.file else {
                        skipped += 1;
                        continue;
                    };
                    TraceStore::load(&output.join(file)).map(|s| prepare_decon_trace(s, TraceRole::Data))
                }
                ProcessingMode::Subtract => {
                    let (Some(scs), Some(s)) = (&record.scs_stripped_file, &record.s_stripped_file) else {
                        skipped += 1;
                        continue;
                    };
                    TraceStore::load(&output.join(scs)).and_then(|scs| {
                        let s = TraceStore::load(&output.join(s))?;
                        prepare_subtract_trace(scs, Some(&s))
                    })
                }
            };
            match prepared {
                Ok(signal) => data.insert(
                    record.pair_name.clone(),
                    DataTrace {
                        gcarc: record.gcarc,
                        snr: record.snr,
                        signal,
                    },
                ),
                Err(e) => {
                    warn!(pair = %record.pair_name, error = %e, "data trace unreadable");
                    skipped += 1;
                }
            }
        }
        info!(
            records = records.len(),
            loaded = data.len(),
            discarded = data.unusable_count(),
            skipped,
            "data traces prepared"
        );
        Ok(data)
    }

    fn synthetic_files(&self, model: &CandidateModel) -> Result<Vec<String>> {
        let rows = self.handle.block_on(db::load_processed(
            &self.catalog,
            TraceTable::SyntheticTraces,
            Some(&model.name),
            self.mode(),
        ))?;
        Ok(rows
            .into_iter()
            .filter(|r| is_usable(r.tag))
            .filter_map(|r| match self.mode() {
                ProcessingMode::Decon => r.decon_file,
                ProcessingMode::Subtract => r.scs_stripped_file,
            })
            .collect())
    }

    /// Compare every candidate model against every bin
    pub fn model_bins(&self) -> Result<RunSummary> {
        let mode = self.mode();
        let bins = Arc::new(self.handle.block_on(db::load_bins(&self.catalog))?);
        let models = self.handle.block_on(db::load_models(&self.catalog))?;
        let reference_name = &self.config.binning.reference_model;
        let reference_model = models
            .iter()
            .find(|m| &m.name == reference_name)
            .ok_or_else(|| {
                ModelError::DataIntegrity(format!("reference model {} not in catalog", reference_name))
            })?;

        let output = self.output_dir();
        let reference = Arc::new(load_synthetics(
            &output,
            &self.synthetic_files(reference_model)?,
            mode,
            TraceRole::Reference,
        )?);
        if reference.is_empty() {
            return Err(ModelError::DataIntegrity(format!(
                "reference model {} has no processed synthetics",
                reference_name
            )));
        }
        let data = Arc::new(self.load_data()?);
        let params = Arc::new(BinParams::from_config(&self.config, output.clone()));
        info!(bins = bins.len(), models = models.len(), records = data.len(), mode = mode.as_str(), "modeling bins");

        let state = Arc::new(RunState::default());
        let mut scheduler = SlotScheduler::new(self.workers);
        for model in &models {
            if state.abort.load(Ordering::SeqCst) {
                break;
            }
            let files = self.synthetic_files(model)?;
            let model = model.clone();
            let (bins, data, reference, params) = (
                Arc::clone(&bins),
                Arc::clone(&data),
                Arc::clone(&reference),
                Arc::clone(&params),
            );
            let state = Arc::clone(&state);
            let catalog = self.catalog.clone();
            let rt = self.handle.clone();
            let output = output.clone();

            scheduler.submit(move |guard| {
                let outcome = load_synthetics(&output, &files, mode, TraceRole::Model).and_then(|set: SyntheticSet| {
                    BinModeler::new(&params, &bins, &data, &reference).model_bins(&model, &set)
                });
                let results = match outcome {
                    Ok(results) => results,
                    Err(e) => return state.record_failure(&model.name, e),
                };
                match guard.persist(|| rt.block_on(db::save_results(&catalog, &results))) {
                    Ok(_) => {
                        state.succeeded.fetch_add(1, Ordering::SeqCst);
                        state.written.fetch_add(results.len(), Ordering::SeqCst);
                    }
                    Err(e) => state.record_failure(&model.name, e),
                }
            });
        }
        let panicked = scheduler.drain();
        drop(scheduler);

        let state = Arc::try_unwrap(state)
            .map_err(|_| ModelError::DataIntegrity("worker still holds run state".to_string()))?;
        let summary = state.finish(models.len(), panicked)?;
        info!(succeeded = summary.succeeded, failed = summary.failed, panicked, results = summary.written, "bin modeling finished");
        Ok(summary)
    }

    /// Rank model families per bin and write `rankings/<mode>.json`
    pub fn rank(&self) -> Result<Vec<ModelRanking>> {
        let mode = self.mode();
        let results = self.handle.block_on(db::load_results(&self.catalog, mode))?;
        let models = self.handle.block_on(db::load_models(&self.catalog))?;
        let rankings = rank_bins(&results, &models, &self.config.ranking);

        if mode == ProcessingMode::Decon {
            let reference_rows = self.handle.block_on(db::load_processed(
                &self.catalog,
                TraceTable::SyntheticTraces,
                Some(&self.config.binning.reference_model),
                mode,
            ))?;
            match frs_amplitude_threshold(&reference_rows) {
                Some(range) => info!(max = range.max, min = range.min, traces = range.count, "reference FRS amplitude range"),
                None => warn!("no reference FRS amplitudes"),
            }
        }

        let prem_best = rankings.iter().filter(|r| r.prem_cq.is_some() && r.prem_fits_best()).count();
        info!(bins = rankings.len(), prem_best, "bins ranked");
        write_json(&self.output_dir().join(format!("rankings/{}.json", mode.as_str())), &rankings)?;
        Ok(rankings)
    }

    /// Run the CQ calibration scenarios and write `cq_scenarios.json`
    pub fn define_cq(&self) -> Result<Vec<ScenarioRow>> {
        let rows = run_scenarios(&ScenarioParams::default())?;
        for row in &rows {
            info!(scenario = ?row.scenario, parameter = row.parameter, cq = row.cq, cc1 = row.scores.cc1, nd = row.scores.nd, "scenario");
        }
        write_json(&self.output_dir().join("cq_scenarios.json"), &rows)?;
        Ok(rows)
    }
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ModelError::Parse(format!("{}: {}", path.display(), e)))?;
    std::fs::write(path, text)?;
    Ok(())
}

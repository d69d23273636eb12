//! Best-fit model ranking per bin

use crate::config::RankingConfig;
use crate::models::{CandidateModel, ComparisonResult, FamilyBest, ModelFamily, ModelRanking, ProcessedTrace};
use crate::signal::TAG_OK;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

impl RankingConfig {
    /// Whether `model` passes the density and thickness limits
    pub fn accepts(&self, model: &CandidateModel) -> bool {
        self.drho_min.map_or(true, |min| model.drho >= min)
            && self.drho_max.map_or(true, |max| model.drho <= max)
            && self.thickness_max.map_or(true, |max| model.thickness <= max)
    }
}

/// Rank the candidate families of every bin against the reference model
///
/// Results with a NULL CQ or for models outside `filter` are ignored. Bins
/// without a reference CQ cannot be ranked and come back with no family.
pub fn rank_bins(
    results: &[ComparisonResult],
    models: &[CandidateModel],
    filter: &RankingConfig,
) -> Vec<ModelRanking> {
    let by_name: HashMap<&str, &CandidateModel> =
        models.iter().map(|m| (m.name.as_str(), m)).collect();

    let mut per_bin: BTreeMap<i64, Vec<(&CandidateModel, f64)>> = BTreeMap::new();
    for r in results {
        let (Some(cq), Some(model)) = (r.cq(), by_name.get(r.model_name.as_str())) else {
            continue;
        };
        per_bin.entry(r.bin).or_default().push((model, cq));
    }

    let mut rankings = Vec::with_capacity(per_bin.len());
    for (bin, scored) in per_bin {
        let prem_cq = scored
            .iter()
            .filter(|(m, _)| m.is_reference())
            .map(|(_, cq)| *cq)
            .reduce(f64::max);
        let Some(prem) = prem_cq else {
            debug!(bin, "no reference score; bin not ranked");
            rankings.push(ModelRanking {
                bin,
                prem_cq: None,
                best: Vec::new(),
            });
            continue;
        };

        let mut best = Vec::new();
        for family in ModelFamily::ALL.iter().filter(|f| **f != ModelFamily::Prem) {
            let top = scored
                .iter()
                .filter(|(m, _)| m.family == *family && filter.accepts(m))
                .max_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((model, cq)) = top {
                best.push(FamilyBest {
                    family: *family,
                    model_name: model.name.clone(),
                    cq: *cq,
                    dcq: cq - prem,
                });
            }
        }

        let ranking = ModelRanking {
            bin,
            prem_cq: Some(prem),
            best,
        };
        match ranking.winner() {
            Some(w) => info!(bin, prem_cq = prem, family = %w.family, model = %w.model_name, dcq = w.dcq, "best fit"),
            None => info!(bin, prem_cq = prem, "PREM fits best"),
        }
        rankings.push(ranking);
    }
    rankings
}

/// Spread of FRS amplitudes over usable traces
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrsAmplitudeRange {
    pub max: f64,
    pub min: f64,
    pub count: usize,
}

/// Max and min FRS amplitude of the reference synthetics
///
/// Sets the level below which a data FRS peak is indistinguishable from
/// the reference model.
pub fn frs_amplitude_threshold(rows: &[ProcessedTrace]) -> Option<FrsAmplitudeRange> {
    let amps: Vec<f64> = rows
        .iter()
        .filter(|r| r.tag == TAG_OK)
        .filter_map(|r| r.frs_amp)
        .filter(|a| a.is_finite())
        .collect();
    if amps.is_empty() {
        return None;
    }
    Some(FrsAmplitudeRange {
        max: amps.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        min: amps.iter().copied().fold(f64::INFINITY, f64::min),
        count: amps.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingMode;
    use crate::cq::CqScores;

    fn model(name: &str, drho: f64, thickness: f64) -> CandidateModel {
        CandidateModel::new(name, thickness, -10.0, drho, 90.0).unwrap()
    }

    fn result(bin: i64, model: &str, cq: Option<f64>) -> ComparisonResult {
        let mut r = ComparisonResult::insufficient(bin, model, ProcessingMode::Decon, 5.0);
        r.scores = cq.map(|cq| CqScores {
            cc: 1.0,
            nd: cq,
            nd_reverse: cq,
            cc1: 1.0,
            cc2: 1.0,
            nn2: 0.0,
            nn2_reverse: 0.0,
        });
        r
    }

    #[test]
    fn test_rank_picks_best_per_family() {
        let models = vec![
            model("PREM_1", 0.0, 0.0),
            model("ULVZ_2", 10.0, 5.0),
            model("ULVZ_3", 0.0, 20.0),
            model("UHVZ_4", 0.0, 5.0),
        ];
        let results = vec![
            result(1, "PREM_1", Some(0.5)),
            result(1, "ULVZ_2", Some(0.7)),
            result(1, "ULVZ_3", Some(0.6)),
            result(1, "UHVZ_4", None),
            result(2, "PREM_1", Some(0.9)),
            result(2, "ULVZ_2", Some(0.4)),
        ];

        let rankings = rank_bins(&results, &models, &RankingConfig::default());
        assert_eq!(rankings.len(), 2);
        assert_eq!(rankings[0].best.len(), 1);
        let w = rankings[0].winner().unwrap();
        assert_eq!(w.model_name, "ULVZ_2");
        assert!((w.dcq - 0.2).abs() < 1e-12);
        assert!(rankings[1].prem_fits_best());

        let filter = RankingConfig {
            drho_max: Some(5.0),
            ..Default::default()
        };
        let rankings = rank_bins(&results, &models, &filter);
        assert_eq!(rankings[0].best[0].model_name, "ULVZ_3");
    }

    #[test]
    fn test_frs_amplitude_threshold() {
        let row = |amp: Option<f64>, tag| ProcessedTrace {
            pair_name: "E_S".to_string(),
            event: "E".to_string(),
            station: "S".to_string(),
            gcarc: 60.0,
            snr: 3.0,
            tag,
            frs_amp: amp,
            frs_time: Some(1.0),
            decon_file: None,
            frs_file: None,
            s_stripped_file: None,
            scs_stripped_file: None,
        };
        let range = frs_amplitude_threshold(&[
            row(Some(0.2), 0),
            row(Some(-0.1), 0),
            row(Some(5.0), 3),
            row(None, 0),
        ])
        .unwrap();
        assert_eq!(range.max, 0.2);
        assert_eq!(range.min, -0.1);
        assert_eq!(range.count, 2);
        assert!(frs_amplitude_threshold(&[]).is_none());
    }
}

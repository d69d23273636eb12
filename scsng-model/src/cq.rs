//! Compare Quality (CQ) scorer
//!
//! Scores a data trace against a model trace over `[0, compare_len]`:
//!
//! - `cc1`: zero-lag zero-mean correlation coefficient
//! - `cc2 = cc1 · min(E_d, E_m) / max(E_d, E_m)` with `E = sqrt(Σa²)`
//! - `cc = (1 + cc2) / 2`
//! - `nn2 = |m - d|² / |d|²`, `nd = 1 / (1 + nn2)`
//! - `nn2' = |d - m|² / |m|²`, `nd' = 1 / (1 + nn2')`
//!
//! `CQ = cc · nd` and `CQ2 = cc · nd'`. Both are persisted since neither
//! norm convention is settled.

use crate::error::{ModelError, Result};
use crate::signal::Signal;
use crate::transforms::xcorr::{correlation_coefficient, Normalization};
use serde::{Deserialize, Serialize};

/// CQ sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CqScores {
    pub cc: f64,
    pub nd: f64,
    pub nd_reverse: f64,
    pub cc1: f64,
    pub cc2: f64,
    pub nn2: f64,
    pub nn2_reverse: f64,
}

impl CqScores {
    /// `[cc, nd, nd', cc1, cc2, nn2, nn2']`
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.cc,
            self.nd,
            self.nd_reverse,
            self.cc1,
            self.cc2,
            self.nn2,
            self.nn2_reverse,
        ]
    }

    pub fn cq(&self) -> f64 {
        self.cc * self.nd
    }

    pub fn cq2(&self) -> f64 {
        self.cc * self.nd_reverse
    }
}

/// `|x - y|² / |y|²`; infinite when `y` has zero norm and `x` does not
fn relative_misfit(x: &[f64], y: &[f64]) -> f64 {
    let diff: f64 = x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum();
    let norm: f64 = y.iter().map(|v| v * v).sum();
    if norm > 0.0 {
        diff / norm
    } else if diff == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

/// Score `model` against `data` over `[0, compare_len]`
pub fn calculate_cq(data: &Signal, model: &Signal, compare_len: f64) -> Result<CqScores> {
    if !(compare_len > 0.0) {
        return Err(ModelError::InvalidInput(format!(
            "compare length must be positive, got {}",
            compare_len
        )));
    }
    let d = data.window_values(0.0, compare_len);
    let m = model.window_values(0.0, compare_len);
    if d.is_empty() || m.is_empty() {
        return Err(ModelError::WindowNotCovered {
            t1: 0.0,
            t2: compare_len,
            context: "CQ comparison window".to_string(),
        });
    }
    let n = d.len().min(m.len());
    let (d, m) = (&d[..n], &m[..n]);

    let e_data = d.iter().map(|v| v * v).sum::<f64>().sqrt();
    let e_model = m.iter().map(|v| v * v).sum::<f64>().sqrt();

    let (cc1, cc2) = if e_data > 0.0 && e_model > 0.0 {
        let cc1 = correlation_coefficient(d, m, Normalization::ZeroMean);
        (cc1, cc1 * e_data.min(e_model) / e_data.max(e_model))
    } else {
        (0.0, 0.0)
    };

    let nn2 = relative_misfit(m, d);
    let nn2_reverse = relative_misfit(d, m);
    Ok(CqScores {
        cc: (1.0 + cc2) / 2.0,
        nd: 1.0 / (1.0 + nn2),
        nd_reverse: 1.0 / (1.0 + nn2_reverse),
        cc1,
        cc2,
        nn2,
        nn2_reverse,
    })
}

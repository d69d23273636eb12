//! Geographic bins and the data records they collect

use serde::{Deserialize, Serialize};

/// One record inside a bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinMember {
    /// Record key `"{event}_{station}"`
    pub pair_name: String,
    /// Distance from the record's sampling point to the bin center, degrees
    pub center_distance: f64,
}

/// Geographic bin; members lie within `radius` of the center
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
    /// Degrees
    pub radius: f64,
    pub members: Vec<BinMember>,
}

impl Bin {
    /// Gaussian standard deviation (in radius units) that gives `edge_weight` at the radius
    pub fn gaussian_sigma(edge_weight: f64) -> f64 {
        (-1.0 / (2.0 * edge_weight.ln())).sqrt()
    }

    /// Distance weight of a member at `distance` degrees from the center
    ///
    /// `exp(-(d/r)²/(2σ²))`, equal to `edge_weight` at `d = radius` and zero
    /// beyond it.
    pub fn distance_weight(&self, distance: f64, edge_weight: f64) -> f64 {
        if !(self.radius > 0.0) || distance > self.radius {
            return 0.0;
        }
        let sigma = Self::gaussian_sigma(edge_weight);
        let x = distance / self.radius;
        (-x * x / (2.0 * sigma * sigma)).exp()
    }
}

/// One data trace in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// `"{event}_{station}"`
    pub pair_name: String,
    pub event: String,
    pub station: String,
    /// Epicentral distance, degrees
    pub gcarc: f64,
    /// NaN when the noise window was not covered
    pub snr: f64,
    pub tag: i32,
    /// Deconvolved trace, relative to the output directory
    pub file: Option<String>,
    pub s_stripped_file: Option<String>,
    pub scs_stripped_file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(radius: f64) -> Bin {
        Bin {
            id: 1,
            lon: 0.0,
            lat: 0.0,
            radius,
            members: Vec::new(),
        }
    }

    #[test]
    fn test_weight_at_edge_equals_edge_weight() {
        let b = bin(2.5);
        assert!((b.distance_weight(0.0, 0.3) - 1.0).abs() < 1e-12);
        assert!((b.distance_weight(2.5, 0.3) - 0.3).abs() < 1e-12);
        assert_eq!(b.distance_weight(2.6, 0.3), 0.0);
    }

    #[test]
    fn test_weight_decreases_with_distance() {
        let b = bin(3.0);
        let w: Vec<f64> = [0.0, 1.0, 2.0, 3.0].iter().map(|d| b.distance_weight(*d, 0.3)).collect();
        assert!(w.windows(2).all(|p| p[0] > p[1]));
    }
}

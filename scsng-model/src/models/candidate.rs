//! Candidate Earth models

use crate::error::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Structural family of a candidate model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelFamily {
    /// Reference model without a layer
    Prem,
    /// Ultra-low velocity zone
    Ulvz,
    /// Ultra-high velocity zone
    Uhvz,
    Lamella,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::Prem,
        ModelFamily::Ulvz,
        ModelFamily::Uhvz,
        ModelFamily::Lamella,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Prem => "PREM",
            ModelFamily::Ulvz => "ULVZ",
            ModelFamily::Uhvz => "UHVZ",
            ModelFamily::Lamella => "LAMELLA",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PREM" => Ok(ModelFamily::Prem),
            "ULVZ" => Ok(ModelFamily::Ulvz),
            "UHVZ" => Ok(ModelFamily::Uhvz),
            "LAMELLA" => Ok(ModelFamily::Lamella),
            other => Err(ModelError::Parse(format!("unknown model family '{}'", other))),
        }
    }
}

/// Candidate model; immutable once loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateModel {
    /// `"<FAMILY>_<event id>"`
    pub name: String,
    pub family: ModelFamily,
    /// Layer thickness, km
    pub thickness: f64,
    /// Shear velocity perturbation, %
    pub dvs: f64,
    /// Density perturbation, %
    pub drho: f64,
    /// Distance beyond which the layer totally reflects, degrees
    pub critical_distance: f64,
}

impl CandidateModel {
    /// Build a model, deriving the family from the name prefix
    pub fn new(
        name: &str,
        thickness: f64,
        dvs: f64,
        drho: f64,
        critical_distance: f64,
    ) -> Result<Self> {
        let (prefix, _) = split_name(name)?;
        Ok(Self {
            name: name.to_string(),
            family: prefix.parse()?,
            thickness,
            dvs,
            drho,
            critical_distance,
        })
    }

    /// Synthetic event id: the part of the name after `_`
    pub fn event_id(&self) -> &str {
        self.name
            .split_once('_')
            .map(|(_, id)| id)
            .unwrap_or(self.name.as_str())
    }

    pub fn is_reference(&self) -> bool {
        self.family == ModelFamily::Prem
    }
}

fn split_name(name: &str) -> Result<(&str, &str)> {
    match name.split_once('_') {
        Some((family, id)) if !family.is_empty() && !id.is_empty() => Ok((family, id)),
        _ => Err(ModelError::Parse(format!(
            "model name '{}' is not <FAMILY>_<event id>",
            name
        ))),
    }
}

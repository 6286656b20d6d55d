use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Flow units used when reporting results; the engines always work in cfs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum FlowUnits {
  // Imperial units
  #[default]
  CFS,  // Cubic feet per second
  GPM,  // Gallons per minute
  MGD,  // Million gallons per day
  IMGD, // Imperial million gallons per day
  AFD,  // Acre-feet per day
  // Metric units
  LPS,  // Liters per second
  LPM,  // Liters per minute
  MLD,  // Million liters per day
  CMS,  // Cubic meters per second
  CMH,  // Cubic meters per hour
  CMD   // Cubic meters per day
}

impl FlowUnits {
  /// Number of flow units in one cfs
  pub fn per_cfs(&self) -> f64 {
    match self {
      FlowUnits::CFS => 1.0,
      FlowUnits::GPM => GPM_PER_CFS,
      FlowUnits::MGD => 0.64632,
      FlowUnits::IMGD => 0.5382,
      FlowUnits::AFD => 1.9837,
      FlowUnits::LPS => LPS_PER_CFS,
      FlowUnits::LPM => 1699.0,
      FlowUnits::MLD => 2.4466,
      FlowUnits::CMS => 0.028317,
      FlowUnits::CMH => 101.94,
      FlowUnits::CMD => 2446.6,
    }
  }

  pub fn from_cfs(&self, q: f64) -> f64 {
    q * self.per_cfs()
  }

  pub fn to_cfs(&self, q: f64) -> f64 {
    q / self.per_cfs()
  }

  pub fn is_metric(&self) -> bool {
    matches!(self, FlowUnits::LPS | FlowUnits::LPM | FlowUnits::MLD | FlowUnits::CMS | FlowUnits::CMH | FlowUnits::CMD)
  }
}

/// FromStr implementation for FlowUnits
impl FromStr for FlowUnits {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_uppercase().as_str() {
      "CFS" => Ok(FlowUnits::CFS),
      "GPM" => Ok(FlowUnits::GPM),
      "MGD" => Ok(FlowUnits::MGD),
      "IMGD" => Ok(FlowUnits::IMGD),
      "AFD" => Ok(FlowUnits::AFD),
      "LPS" => Ok(FlowUnits::LPS),
      "LPM" => Ok(FlowUnits::LPM),
      "MLD" => Ok(FlowUnits::MLD),
      "CMS" => Ok(FlowUnits::CMS),
      "CMH" => Ok(FlowUnits::CMH),
      "CMD" => Ok(FlowUnits::CMD),
      _ => Err(format!("Invalid flow unit: {}", s)),
    }
  }
}

use serde::{Deserialize, Serialize};

use crate::model::units::FlowUnits;

#[derive(Debug, Eq, PartialEq, Clone, Copy, Deserialize, Serialize)]
pub enum HeadlossFormula {
  HazenWilliams, // H-W
  DarcyWeisbach, // D-W
  ChezyManning,  // C-M
}

impl HeadlossFormula {
  /// Flow exponent of the friction head loss law
  pub fn exponent(&self) -> f64 {
    match self {
      HeadlossFormula::HazenWilliams => crate::constants::HW_EXPONENT,
      HeadlossFormula::DarcyWeisbach | HeadlossFormula::ChezyManning => 2.0,
    }
  }
}

/// What to do when the hydraulics do not converge within `max_trials`
#[derive(Debug, PartialEq, Clone, Copy, Deserialize, Serialize)]
pub enum Unbalanced {
  /// Keep the unconverged solution and halt the run
  Stop,
  /// Allow this many extra trials (with status checks frozen), then keep going
  Continue(usize),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HydraulicOptions {
  pub headloss_formula: HeadlossFormula,
  /// Convergence limit on sum(|dq|) / sum(|q|)
  pub accuracy: f64,
  /// Head tolerance used by the status checks (ft)
  pub head_tolerance: f64,
  /// Flow tolerance used by the status checks (cfs)
  pub flow_tolerance: f64,
  pub max_trials: usize,
  pub unbalanced: Unbalanced,
  pub check_frequency: usize,
  pub max_check: usize,
  /// Relative error below which damping (relaxation 0.6) kicks in; 0 disables it
  pub damp_limit: f64,
  pub demand_multiplier: f64,
  pub emitter_exponent: f64,
  pub specific_gravity: f64,
  /// Kinematic viscosity (ft2/s)
  pub viscosity: f64,
  /// Pattern applied to demands without one of their own
  pub default_pattern: Option<Box<str>>,
}

impl Default for HydraulicOptions {
  fn default() -> Self {
    Self {
      headloss_formula: HeadlossFormula::HazenWilliams,
      accuracy: 0.001,
      head_tolerance: 0.0005,
      flow_tolerance: 0.0001,
      max_trials: 200,
      unbalanced: Unbalanced::Stop,
      check_frequency: 2,
      max_check: 10,
      damp_limit: 0.0,
      demand_multiplier: 1.0,
      emitter_exponent: 0.5,
      specific_gravity: 1.0,
      viscosity: 1.1e-5,
      default_pattern: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum QualityMode {
  None,
  Chemical,
  /// Water age in hours
  Age,
  /// Percent of flow originating at a node
  Trace { node: Box<str> },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QualityOptions {
  pub mode: QualityMode,
  pub bulk_order: f64,
  pub wall_order: f64,
  pub tank_order: f64,
  /// Default bulk coefficient (1/s) for pipes and tanks without their own
  pub global_bulk: f64,
  /// Default wall coefficient (ft/s for 1st order) for pipes without their own
  pub global_wall: f64,
  /// Limiting potential concentration (0 = none)
  pub limiting_concentration: f64,
  /// Molecular diffusivity (ft2/s); 0 disables mass transfer limitation
  pub diffusivity: f64,
  /// Segments whose qualities differ by less than this are merged
  pub tolerance: f64,
  /// Maximum number of live segments before the pool reports exhaustion
  pub segment_limit: usize,
}

impl Default for QualityOptions {
  fn default() -> Self {
    Self {
      mode: QualityMode::None,
      bulk_order: 1.0,
      wall_order: 1.0,
      tank_order: 1.0,
      global_bulk: 0.0,
      global_wall: 0.0,
      limiting_concentration: 0.0,
      diffusivity: 1.3e-8,
      tolerance: 0.01,
      segment_limit: 1_000_000,
    }
  }
}

/// All times are in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeOptions {
  pub duration: i64,
  pub hydraulic_step: i64,
  pub quality_step: i64,
  pub pattern_step: i64,
  pub pattern_start: i64,
  pub report_step: i64,
  pub report_start: i64,
  pub rule_step: i64,
  /// Clock time of day at which the simulation starts
  pub start_clocktime: i64,
}

impl Default for TimeOptions {
  fn default() -> Self {
    Self {
      duration: 0,
      hydraulic_step: 3600,
      quality_step: 300,
      pattern_step: 3600,
      pattern_start: 0,
      report_step: 3600,
      report_start: 0,
      rule_step: 360,
      start_clocktime: 0,
    }
  }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnergyOptions {
  /// Pump efficiency (percent) used when a pump has no efficiency curve
  pub global_efficiency: f64,
  /// Energy price per kWh
  pub global_price: f64,
  pub price_pattern: Option<Box<str>>,
}

impl Default for EnergyOptions {
  fn default() -> Self {
    Self { global_efficiency: 75.0, global_price: 0.0, price_pattern: None }
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationOptions {
  pub flow_units: FlowUnits,
  pub hydraulics: HydraulicOptions,
  pub quality: QualityOptions,
  pub times: TimeOptions,
  pub energy: EnergyOptions,
}

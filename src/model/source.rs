use serde::{Deserialize, Serialize};

/// How a water quality source adds mass at its node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SourceType {
  /// Concentration of external inflow (only acts on negative demand)
  Concen,
  /// Fixed mass inflow per second
  Mass,
  /// Raises the outflow concentration up to the source strength
  Setpoint,
  /// Adds the source strength to the outflow concentration
  FlowPaced,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Source {
  pub source_type: SourceType,
  pub strength: f64,
  pub pattern: Option<Box<str>>,
  #[serde(skip)]
  pub pattern_index: Option<usize>,
}

impl Source {
  pub fn new(source_type: SourceType, strength: f64) -> Self {
    Self { source_type, strength, pattern: None, pattern_index: None }
  }
}

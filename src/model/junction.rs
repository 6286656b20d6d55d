use serde::{Deserialize, Serialize};

/// One demand category at a junction
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Demand {
  /// Base demand (cfs)
  pub base: f64,
  pub pattern: Option<Box<str>>,
  #[serde(skip)]
  pub pattern_index: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Junction {
  #[serde(default)]
  pub demands: Vec<Demand>,
}

impl Junction {
  pub fn with_demand(base: f64) -> Self {
    let demands = if base != 0.0 {
      vec![Demand { base, pattern: None, pattern_index: None }]
    } else {
      Vec::new()
    };
    Self { demands }
  }

  pub fn base_demand(&self) -> f64 {
    self.demands.iter().map(|d| d.base).sum()
  }
}

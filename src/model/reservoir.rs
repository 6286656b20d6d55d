use serde::{Deserialize, Serialize};

/// Fixed-grade node; its head is the node elevation times an optional pattern
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Reservoir {
  pub head_pattern: Option<Box<str>>,
  #[serde(skip)]
  pub pattern_index: Option<usize>,
}

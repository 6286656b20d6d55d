use serde::{Deserialize, Serialize};

/// Time pattern of multipliers, one per pattern step, repeated cyclically
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pattern {
  pub id: Box<str>,
  pub multipliers: Vec<f64>,
}

impl Pattern {
  pub fn new(id: &str, multipliers: Vec<f64>) -> Self {
    Self { id: id.into(), multipliers }
  }

  /// Multiplier in force during pattern period `period`
  pub fn multiplier(&self, period: i64) -> f64 {
    if self.multipliers.is_empty() {
      return 1.0;
    }
    let n = self.multipliers.len() as i64;
    self.multipliers[period.rem_euclid(n) as usize]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pattern_wraps_around() {
    let p = Pattern::new("P", vec![0.5, 1.0, 1.5]);
    assert_eq!(p.multiplier(0), 0.5);
    assert_eq!(p.multiplier(4), 1.0);
    assert_eq!(Pattern::new("E", vec![]).multiplier(7), 1.0);
  }
}

use serde::{Deserialize, Serialize};

use crate::constants::TINY;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Curve {
  pub id: Box<str>,
  pub x: Vec<f64>,
  pub y: Vec<f64>,
}

/// Power function fit of a pump head curve: h = h_shutoff - r * q^n
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadCurveStatistics {
  pub h_max: f64,           // maximum head
  pub h_shutoff: f64,       // shutoff head
  pub q_max: f64,           // maximum flow
  pub q_initial: f64,       // design flow (= initial flow)
  pub r: f64,               // flow coefficient
  pub n: f64,               // pump exponent
}

/// Linear segment of a curve: y = h0 + r * x
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveSegment {
  pub h0: f64,
  pub r: f64,
}

impl Curve {
  pub fn new(id: &str, x: Vec<f64>, y: Vec<f64>) -> Self {
    Self { id: id.into(), x, y }
  }

  pub fn len(&self) -> usize {
    self.x.len()
  }

  pub fn is_empty(&self) -> bool {
    self.x.is_empty()
  }

  /// Check that the curve has matching, ascending x values
  pub fn is_valid(&self) -> bool {
    !self.x.is_empty() && self.x.len() == self.y.len() && self.x.windows(2).all(|w| w[1] > w[0])
  }

  /// Linear interpolation of y at x, clamped to the end points' extrapolation
  pub fn interpolate(&self, x: f64) -> f64 {
    let n = self.x.len();
    if n == 0 {
      return 0.0;
    }
    if n == 1 || x <= self.x[0] {
      return self.y[0];
    }
    for i in 1..n {
      if x <= self.x[i] {
        let dx = self.x[i] - self.x[i - 1];
        if dx.abs() < TINY {
          return self.y[i];
        }
        return self.y[i - 1] + (x - self.x[i - 1]) / dx * (self.y[i] - self.y[i - 1]);
      }
    }
    self.y[n - 1]
  }

  /// Inverse interpolation: x at which the (monotone increasing) curve reaches y
  pub fn interpolate_inverse(&self, y: f64) -> f64 {
    let n = self.y.len();
    if n == 0 {
      return 0.0;
    }
    if n == 1 || y <= self.y[0] {
      return self.x[0];
    }
    for i in 1..n {
      if y <= self.y[i] {
        let dy = self.y[i] - self.y[i - 1];
        if dy.abs() < TINY {
          return self.x[i];
        }
        return self.x[i - 1] + (y - self.y[i - 1]) / dy * (self.x[i] - self.x[i - 1]);
      }
    }
    self.x[n - 1]
  }

  /// Intercept and slope of the curve segment containing x
  /// (end segments are extended beyond the first and last points)
  pub fn segment(&self, x: f64) -> CurveSegment {
    let n = self.x.len();
    if n < 2 {
      return CurveSegment { h0: self.y.first().copied().unwrap_or(0.0), r: 0.0 };
    }
    let mut k2 = 0;
    while k2 < n && self.x[k2] < x {
      k2 += 1;
    }
    if k2 == 0 {
      k2 = 1;
    } else if k2 == n {
      k2 = n - 1;
    }
    let k1 = k2 - 1;
    let r = (self.y[k2] - self.y[k1]) / (self.x[k2] - self.x[k1]);
    CurveSegment { h0: self.y[k1] - r * self.x[k1], r }
  }
}

impl Curve {
  /// Fit a power function to a 1-point or 3-point (first point at zero flow) head curve.
  /// Returns None when the curve has to be treated as a custom curve.
  pub fn head_curve_statistics(&self) -> Option<HeadCurveStatistics> {
    if self.x.len() != self.y.len() {
      return None;
    }
    let (h0, h1, h2, q1, q2) = match self.x.len() {
      1 => {
        // a single design point: shutoff head at 4/3 of it and max flow at twice its flow
        let q = self.x[0];
        let h = self.y[0];
        (h * 4.0 / 3.0, h, 0.0, q, 2.0 * q)
      }
      3 if self.x[0] == 0.0 => (self.y[0], self.y[1], self.y[2], self.x[1], self.x[2]),
      _ => return None,
    };
    if h0 < TINY || h0 - h1 < TINY || h1 - h2 < TINY || q1 < TINY || q2 - q1 < TINY {
      return None;
    }
    let h4 = h0 - h1;
    let h5 = h0 - h2;
    let n = (h5 / h4).ln() / (q2 / q1).ln();
    if n <= 0.0 || n > 20.0 {
      return None;
    }
    let r = h4 / q1.powf(n);
    Some(HeadCurveStatistics {
      h_max: h0,
      h_shutoff: h0,
      q_max: (h0 / r).powf(1.0 / n),
      q_initial: q1,
      r,
      n,
    })
  }
}

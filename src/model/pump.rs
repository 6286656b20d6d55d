use crate::hydraulics::status::{self, Tolerances};
use crate::model::curve::{Curve, HeadCurveStatistics};
use crate::model::link::{CoeffParams, LinkCoefficients, LinkState, LinkStatus, LinkTrait};
use crate::model::options::HeadlossFormula;
use crate::constants::*;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pump {
  /// Head curve (flow in cfs, head in ft)
  #[serde(default)]
  pub head_curve: Option<Box<str>>,
  /// Constant power (hp), used when there is no head curve
  #[serde(default)]
  pub power: Option<f64>,
  /// Relative speed setting
  #[serde(default = "default_speed")]
  pub speed: f64,
  #[serde(default)]
  pub speed_pattern: Option<Box<str>>,
  /// Efficiency curve (flow in cfs, efficiency in percent)
  #[serde(default)]
  pub efficiency_curve: Option<Box<str>>,
  /// Energy price per kWh; global price when none
  #[serde(default)]
  pub energy_price: Option<f64>,
  #[serde(default)]
  pub price_pattern: Option<Box<str>>,

  #[serde(skip)]
  pub characteristic: Option<PumpCharacteristic>,
  #[serde(skip)]
  pub speed_pattern_index: Option<usize>,
  #[serde(skip)]
  pub price_pattern_index: Option<usize>,
  #[serde(skip)]
  pub efficiency: Option<Arc<Curve>>,
}

fn default_speed() -> f64 {
  1.0
}

/// Head-flow characteristic of a pump at unit speed
#[derive(Debug, Clone)]
pub enum PumpCharacteristic {
  ConstantPower { power: f64 },
  PowerFunction(HeadCurveStatistics),
  Custom { curve: Arc<Curve>, h_max: f64, q_max: f64, q_initial: f64 },
}

impl PumpCharacteristic {
  /// Derive the characteristic from a head curve
  pub fn from_curve(curve: Arc<Curve>) -> Option<Self> {
    if !curve.is_valid() {
      return None;
    }
    if let Some(stats) = curve.head_curve_statistics() {
      return Some(PumpCharacteristic::PowerFunction(stats));
    }
    if curve.len() < 2 {
      return None;
    }
    let n = curve.len();
    let (h_max, q_max, q_initial) = (curve.y[0], curve.x[n - 1], (curve.x[0] + curve.x[n - 1]) / 2.0);
    Some(PumpCharacteristic::Custom { curve, h_max, q_max, q_initial })
  }

  /// Shutoff head at unit speed
  pub fn h_max(&self) -> f64 {
    match self {
      PumpCharacteristic::ConstantPower { .. } => BIG_VALUE,
      PumpCharacteristic::PowerFunction(stats) => stats.h_max,
      PumpCharacteristic::Custom { h_max, .. } => *h_max,
    }
  }

  /// Maximum flow at unit speed
  pub fn q_max(&self) -> f64 {
    match self {
      PumpCharacteristic::ConstantPower { .. } => BIG_VALUE,
      PumpCharacteristic::PowerFunction(stats) => stats.q_max,
      PumpCharacteristic::Custom { q_max, .. } => *q_max,
    }
  }

  /// Design flow used to initialise the pump flow
  pub fn q_initial(&self) -> f64 {
    match self {
      PumpCharacteristic::ConstantPower { .. } => 1.0,
      PumpCharacteristic::PowerFunction(stats) => stats.q_initial,
      PumpCharacteristic::Custom { q_initial, .. } => *q_initial,
    }
  }

  /// Head gain delivered at flow q and relative speed
  pub fn head(&self, q: f64, speed: f64) -> f64 {
    match self {
      PumpCharacteristic::ConstantPower { power } => HP_FACTOR * power * speed.powi(3) / q.max(TINY),
      PumpCharacteristic::PowerFunction(stats) => {
        speed * speed * stats.h_shutoff - stats.r * speed.powf(2.0 - stats.n) * q.abs().powf(stats.n)
      }
      PumpCharacteristic::Custom { curve, .. } => {
        if speed == 0.0 {
          return 0.0;
        }
        speed * speed * curve.interpolate(q / speed)
      }
    }
  }
}

impl LinkTrait for Pump {
  fn coefficients(&self, state: &LinkState, _resistance: f64, _params: &CoeffParams) -> LinkCoefficients {
    let speed = state.setting.unwrap_or(self.speed);

    // for closed pumps or pumps without speed, act as closed pipe
    if state.status.is_closed() || speed == 0.0 {
      return LinkCoefficients::closed(state.flow);
    }
    let Some(characteristic) = &self.characteristic else {
      return LinkCoefficients::closed(state.flow);
    };

    let q_abs = state.flow.abs().max(TINY);

    // head loss (negative head gain) as h0 + r * q^n at unit speed
    let (h0, r, n) = match characteristic {
      PumpCharacteristic::ConstantPower { power } => (0.0, -HP_FACTOR * power, -1.0),
      PumpCharacteristic::PowerFunction(stats) => (-stats.h_shutoff, stats.r, stats.n),
      PumpCharacteristic::Custom { curve, .. } => {
        let segment = curve.segment(q_abs / speed);
        (-segment.h0, -segment.r, 1.0)
      }
    };

    // adjust for the speed setting
    let h0 = speed * speed * h0;
    let mut r = r * speed.powf(2.0 - n);
    if n != 1.0 {
      r = n * r * q_abs.powf(n - 1.0);
    }

    let g_inv = 1.0 / r.max(RQ_TOL);
    LinkCoefficients::simple(g_inv, state.flow / n + g_inv * h0)
  }

  fn resistance(&self, _formula: HeadlossFormula) -> f64 {
    BIG_VALUE
  }

  fn update_status(&self, state: &LinkState, h1: f64, h2: f64, tol: &Tolerances) -> LinkStatus {
    let speed = state.setting.unwrap_or(self.speed);
    if state.status < LinkStatus::Open || speed <= 0.0 {
      return state.status;
    }
    let h_max = match &self.characteristic {
      Some(PumpCharacteristic::ConstantPower { .. }) | None => BIG_VALUE,
      Some(characteristic) => speed * speed * characteristic.h_max(),
    };
    status::pump_status(h2 - h1, h_max, tol)
  }
}

impl Pump {
  pub fn with_curve(curve: &str) -> Self {
    Self {
      head_curve: Some(curve.into()),
      power: None,
      speed: 1.0,
      speed_pattern: None,
      efficiency_curve: None,
      energy_price: None,
      price_pattern: None,
      characteristic: None,
      speed_pattern_index: None,
      price_pattern_index: None,
      efficiency: None,
    }
  }

  pub fn with_power(power: f64) -> Self {
    Self { head_curve: None, power: Some(power), ..Self::with_curve("") }
  }

  /// Resolve the pump characteristic; false if the pump has neither a usable curve nor a power
  pub fn prepare(&mut self, head_curve: Option<Arc<Curve>>) -> bool {
    self.characteristic = match (head_curve, self.power) {
      (Some(curve), _) => PumpCharacteristic::from_curve(curve),
      (None, Some(power)) if power > 0.0 => Some(PumpCharacteristic::ConstantPower { power }),
      _ => None,
    };
    self.characteristic.is_some()
  }

  /// Initial flow at the given speed
  pub fn initial_flow(&self, speed: f64) -> f64 {
    speed * self.characteristic.as_ref().map_or(1.0, |c| c.q_initial())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params() -> CoeffParams {
    CoeffParams { formula: HeadlossFormula::HazenWilliams, viscosity: 1.1e-5 }
  }

  fn design_point_pump() -> Pump {
    let mut pump = Pump::with_curve("C");
    assert!(pump.prepare(Some(Arc::new(Curve::new("C", vec![2.0], vec![100.0])))));
    pump
  }

  #[test]
  fn coefficients_match_power_function() {
    let pump = design_point_pump();
    let state = LinkState { flow: 2.0, status: LinkStatus::Open, setting: Some(1.0) };
    let c = pump.coefficients(&state, BIG_VALUE, &params());
    // newton step from a point on the curve with h1 - h2 = -100 is zero
    let dq = c.y - c.g_inv * (-100.0);
    assert!(dq.abs() < 1e-9, "dq = {dq}");
  }

  #[test]
  fn speed_scales_shutoff_head() {
    let pump = design_point_pump();
    let characteristic = pump.characteristic.as_ref().unwrap();
    let h_full = characteristic.head(0.0, 1.0);
    let h_half = characteristic.head(0.0, 0.5);
    assert!((h_half - h_full * 0.25).abs() < 1e-9);
  }

  #[test]
  fn closed_pump_or_zero_speed_acts_closed() {
    let pump = design_point_pump();
    let state = LinkState { flow: 1.0, status: LinkStatus::Open, setting: Some(0.0) };
    assert_eq!(pump.coefficients(&state, BIG_VALUE, &params()), LinkCoefficients::closed(1.0));
  }

  #[test]
  fn pump_cannot_exceed_shutoff_head() {
    let pump = design_point_pump();
    let tol = Tolerances { head: 0.0005, flow: 0.0001 };
    let state = LinkState { flow: 0.5, status: LinkStatus::Open, setting: Some(1.0) };
    assert_eq!(pump.update_status(&state, 0.0, 200.0, &tol), LinkStatus::XHead);
    assert_eq!(pump.update_status(&state, 0.0, 50.0, &tol), LinkStatus::Open);
  }
}

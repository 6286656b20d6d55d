use crate::constants::*;
use crate::model::curve::Curve;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

/// Tank mixing models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum MixModel {
  #[default]
  CompleteMix,
  TwoCompartment,
  Fifo,
  Lifo,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tank {
  pub initial_level: f64,    // initial level of the tank (ft)
  pub min_level: f64,        // minimum level of the tank (ft)
  pub max_level: f64,        // maximum level of the tank (ft)
  pub diameter: f64,         // nominal diameter of the tank (ft)
  #[serde(default)]
  pub min_volume: f64,       // minimum volume of the tank (ft^3)
  #[serde(default)]
  pub volume_curve_id: Option<Box<str>>, // id of the volume curve (depth -> volume)
  #[serde(default)]
  pub mix_model: MixModel,
  #[serde(default = "default_mix_fraction")]
  pub mix_fraction: f64,     // mixing zone fraction of max volume (2-compartment model)
  #[serde(default)]
  pub bulk_coeff: Option<f64>, // tank bulk reaction coefficient (1/s), global default if none
  #[serde(default)]
  pub overflow: bool,

  #[serde(skip)]
  pub volume_curve: Option<Arc<Curve>>,
  /// derived values, computed by `prepare`
  #[serde(skip)]
  pub area: f64,
  #[serde(skip)]
  pub hmin: f64,
  #[serde(skip)]
  pub hmax: f64,
  #[serde(skip)]
  pub h0: f64,
  #[serde(skip)]
  pub vmin: f64,
  #[serde(skip)]
  pub vmax: f64,
  #[serde(skip)]
  pub v0: f64,
  #[serde(skip)]
  pub v1max: f64,
}

fn default_mix_fraction() -> f64 {
  1.0
}

impl Tank {
  pub fn cylinder(initial_level: f64, min_level: f64, max_level: f64, diameter: f64) -> Self {
    Self {
      initial_level,
      min_level,
      max_level,
      diameter,
      min_volume: 0.0,
      volume_curve_id: None,
      mix_model: MixModel::CompleteMix,
      mix_fraction: 1.0,
      bulk_coeff: None,
      overflow: false,
      volume_curve: None,
      area: 0.0,
      hmin: 0.0,
      hmax: 0.0,
      h0: 0.0,
      vmin: 0.0,
      vmax: 0.0,
      v0: 0.0,
      v1max: 0.0,
    }
  }

  /// Compute grades and volumes from the tank geometry. Returns false when the
  /// levels are inconsistent.
  pub fn prepare(&mut self, elevation: f64, volume_curve: Option<Arc<Curve>>) -> bool {
    if self.min_level > self.initial_level || self.initial_level > self.max_level {
      return false;
    }
    self.volume_curve = volume_curve;
    self.hmin = elevation + self.min_level;
    self.hmax = elevation + self.max_level;
    self.h0 = elevation + self.initial_level;

    match &self.volume_curve {
      Some(curve) => {
        if !curve.is_valid() {
          return false;
        }
        self.vmin = curve.interpolate(self.min_level);
        let span = self.max_level - self.min_level;
        let vtop = curve.interpolate(self.max_level);
        self.area = if span > 0.0 { (vtop - self.vmin) / span } else { 0.0 };
      }
      None => {
        // a zero diameter leaves the grade fixed, like a reservoir
        if self.diameter < 0.0 {
          return false;
        }
        self.area = PI * self.diameter * self.diameter / 4.0;
        self.vmin = if self.min_volume > 0.0 { self.min_volume } else { self.area * self.min_level };
      }
    }
    self.vmax = self.volume(self.hmax);
    self.v0 = self.volume(self.h0);
    self.v1max = self.mix_fraction.clamp(0.0, 1.0) * self.vmax;
    true
  }

  /// Tank volume at grade h
  pub fn volume(&self, h: f64) -> f64 {
    match &self.volume_curve {
      Some(curve) => curve.interpolate(h - self.hmin + self.min_level),
      None => self.vmin + (h - self.hmin) * self.area,
    }
  }

  /// Tank grade at volume v
  pub fn grade(&self, v: f64) -> f64 {
    match &self.volume_curve {
      Some(curve) => self.hmin - self.min_level + curve.interpolate_inverse(v),
      None if self.is_reservoir_like() => self.h0,
      None => self.hmin + (v - self.vmin) / self.area,
    }
  }

  /// A tank with no area behaves as a reservoir
  pub fn is_reservoir_like(&self) -> bool {
    self.area <= 0.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cylinder_volume_and_grade_are_inverse() {
    let mut tank = Tank::cylinder(10.0, 0.0, 20.0, 50.0);
    assert!(tank.prepare(100.0, None));
    assert_eq!(tank.h0, 110.0);
    let area = PI * 2500.0 / 4.0;
    assert!((tank.v0 - area * 10.0).abs() < 1e-6);
    assert!((tank.grade(tank.v0) - 110.0).abs() < 1e-9);
    assert!((tank.vmax - area * 20.0).abs() < 1e-6);
  }

  #[test]
  fn curve_tank_uses_depth_volume_curve() {
    let curve = Arc::new(Curve::new("V", vec![0.0, 10.0], vec![0.0, 1000.0]));
    let mut tank = Tank::cylinder(5.0, 0.0, 10.0, 0.0);
    assert!(tank.prepare(50.0, Some(curve)));
    assert!((tank.v0 - 500.0).abs() < 1e-9);
    assert!((tank.grade(750.0) - 57.5).abs() < 1e-9);
  }

  #[test]
  fn inconsistent_levels_are_rejected() {
    let mut tank = Tank::cylinder(25.0, 0.0, 20.0, 50.0);
    assert!(!tank.prepare(0.0, None));
  }

  #[test]
  fn zero_diameter_tank_holds_its_grade() {
    let mut tank = Tank::cylinder(10.0, 0.0, 20.0, 0.0);
    assert!(tank.prepare(100.0, None));
    assert!(tank.is_reservoir_like());
    assert_eq!(tank.grade(tank.v0 + 50.0), 110.0);

    let mut tank = Tank::cylinder(10.0, 0.0, 20.0, -1.0);
    assert!(!tank.prepare(100.0, None));
  }
}

//! Bulk and wall reaction kinetics.

use crate::constants::*;

/// Reaction orders and parameters shared by every pipe and tank
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinetics {
  pub bulk_order: f64,
  pub wall_order: f64,
  pub tank_order: f64,
  /// Limiting potential concentration (0 = none)
  pub limit: f64,
  /// Molecular diffusivity (ft2/s)
  pub diffusivity: f64,
  /// Kinematic viscosity (ft2/s)
  pub viscosity: f64,
}

impl Kinetics {
  /// Schmidt number; zero when mass transfer is not modelled
  pub fn schmidt(&self) -> f64 {
    if self.diffusivity > 0.0 {
      self.viscosity / self.diffusivity
    } else {
      0.0
    }
  }
}

/// Bulk reaction rate (mass/ft3/s) of order `order` with coefficient `kb`
pub fn bulk_rate(c: f64, kb: f64, order: f64, limit: f64) -> f64 {
  let potential = if order == 0.0 {
    1.0
  } else if order < 0.0 {
    // Michaelis-Menten
    let mut c1 = limit + kb.signum() * c;
    if c1.abs() < TINY {
      c1 = c1.signum() * TINY;
    }
    c / c1
  } else {
    let c1 = if limit == 0.0 { c } else { (kb.signum() * (limit - c)).max(0.0) };
    if order == 1.0 {
      c1
    } else if order == 2.0 {
      c1 * c
    } else {
      c1 * c.max(0.0).powf(order - 1.0)
    }
  };
  kb * potential.max(0.0)
}

/// Wall reaction rate (mass/ft3/s) in a pipe of diameter `d`. `rate_coeff` is
/// the mass transfer coefficient for zero order, or the apparent first order
/// coefficient, as computed by [`pipe_rate_coeff`].
pub fn wall_rate(c: f64, d: f64, kw: f64, rate_coeff: f64, order: f64) -> f64 {
  if kw == 0.0 || d == 0.0 {
    return 0.0;
  }
  if order == 0.0 {
    let kf = kw.signum() * c * rate_coeff;
    let k = if kf.abs() < kw.abs() { kf } else { kw };
    k * 4.0 / d
  } else {
    c * rate_coeff
  }
}

/// Wall rate coefficient of a pipe, combining the intrinsic coefficient `kw`
/// with the mass transfer coefficient for the current flow `q`
pub fn pipe_rate_coeff(kinetics: &Kinetics, kw: f64, d: f64, length: f64, q: f64) -> f64 {
  if kw == 0.0 || d <= 0.0 {
    return 0.0;
  }
  let sc = kinetics.schmidt();
  if sc == 0.0 {
    return if kinetics.wall_order == 0.0 { BIG_VALUE } else { kw * 4.0 / d };
  }

  let area = PI * d * d / 4.0;
  let re = q.abs() / area * d / kinetics.viscosity;
  let sh = if re < 1.0 {
    // stagnant flow
    2.0
  } else if re >= 2300.0 {
    // turbulent flow (Notter-Sleicher)
    0.0149 * re.powf(0.88) * sc.powf(0.333)
  } else {
    // laminar flow (Graetz)
    let y = d / length * re * sc;
    3.65 + 0.0668 * y / (1.0 + 0.04 * y.powf(0.667))
  };
  let kf = sh * kinetics.diffusivity / d;
  if kinetics.wall_order == 0.0 {
    return kf;
  }
  (4.0 / d) * kw * kf / (kf + kw.abs())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinetics() -> Kinetics {
    Kinetics { bulk_order: 1.0, wall_order: 1.0, tank_order: 1.0, limit: 0.0, diffusivity: 1.3e-8, viscosity: 1.1e-5 }
  }

  #[test]
  fn first_order_bulk_decay() {
    let kb = -0.5 / 86400.0;
    assert!((bulk_rate(2.0, kb, 1.0, 0.0) - 2.0 * kb).abs() < 1e-15);
    assert_eq!(bulk_rate(2.0, kb, 0.0, 0.0), kb);
  }

  #[test]
  fn limiting_potential_caps_growth() {
    // growth stops at the limiting concentration
    assert_eq!(bulk_rate(5.0, 0.1, 1.0, 5.0), 0.0);
    assert!((bulk_rate(3.0, 0.1, 1.0, 5.0) - 0.2).abs() < 1e-12);
  }

  #[test]
  fn michaelis_menten_saturates() {
    // growth: kb·c/(limit + c) levels off at kb
    let slow = bulk_rate(0.1, 1.0, -1.0, 1.0);
    let fast = bulk_rate(100.0, 1.0, -1.0, 1.0);
    assert!((slow - 0.1 / 1.1).abs() < 1e-12);
    assert!((fast - 100.0 / 101.0).abs() < 1e-12);
    assert!(slow < fast && fast < 1.0);
    // decay below the limit: kb·c/(limit - c)
    assert!((bulk_rate(2.0, -1.0, -1.0, 10.0) + 0.25).abs() < 1e-12);
    // past the limit the potential is clamped to zero
    assert_eq!(bulk_rate(20.0, -1.0, -1.0, 10.0), 0.0);
  }

  #[test]
  fn wall_rate_is_mass_transfer_limited() {
    let k = kinetics();
    let apparent = pipe_rate_coeff(&k, -1.0, 1.0, 1000.0, 1.0);
    // apparent first order coefficient cannot exceed the intrinsic one
    assert!(apparent < 0.0 && apparent.abs() < 4.0);
    assert_eq!(wall_rate(2.0, 1.0, -1.0, apparent, 1.0), 2.0 * apparent);
    assert_eq!(wall_rate(2.0, 1.0, 0.0, apparent, 1.0), 0.0);
  }

  #[test]
  fn zero_order_wall_rate_takes_smaller_rate() {
    // mass transfer is fast: intrinsic rate wins
    assert_eq!(wall_rate(1.0, 2.0, -0.5, 10.0, 0.0), -0.5 * 4.0 / 2.0);
    // mass transfer is slow
    assert_eq!(wall_rate(1.0, 2.0, -0.5, 0.1, 0.0), -0.1 * 4.0 / 2.0);
  }
}

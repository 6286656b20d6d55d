use crate::hydraulics::status::{self, Tolerances};
use crate::model::link::{CoeffParams, LinkCoefficients, LinkState, LinkStatus, LinkTrait};
use crate::model::options::HeadlossFormula;
use crate::constants::*;
use serde::{Deserialize, Serialize};

// Constants used for computing Darcy-Weisbach friction factor (src: hydcoefs.c from EPANET 2.3)
const A1 : f64 =  3.14159265358979323850e+03;   // 1000*PI
const A2 : f64 =  1.57079632679489661930e+03;   // 500*PI
const A8 : f64 =  4.61841319859066668690e+00;   // 5.74*(PI/4)^.9
const A9 : f64 = -8.68588963806503655300e-01;  // -2/ln(10)
const AB : f64 =  3.28895476345399058690e-03;   // 5.74/(4000^.9)
const AC : f64 = -5.14214965799093883760e-03;  // AA*AB

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pipe {
  /// Diameter (ft)
  pub diameter: f64,
  /// Length (ft)
  pub length: f64,
  /// C-factor (H-W), roughness in millifeet (D-W) or Manning's n (C-M)
  pub roughness: f64,
  /// Dimensionless minor loss coefficient
  #[serde(default)]
  pub minor_loss: f64,
  /// Pipe only allows flow from start to end node
  #[serde(default)]
  pub check_valve: bool,
}

impl LinkTrait for Pipe {
  fn coefficients(&self, state: &LinkState, r: f64, params: &CoeffParams) -> LinkCoefficients {
    // for closed pipes use headloss formula hloss = BIG_VALUE * q
    if state.status.is_closed() {
      return LinkCoefficients::closed(state.flow);
    }
    let (g_inv, y) = match params.formula {
      HeadlossFormula::DarcyWeisbach => self.dw_coefficients(state.flow, r, params.viscosity),
      formula => self.power_law_coefficients(state.flow, r, formula.exponent()),
    };
    LinkCoefficients::simple(g_inv, y)
  }

  fn resistance(&self, formula: HeadlossFormula) -> f64 {
    let d = self.diameter;
    match formula {
      HeadlossFormula::HazenWilliams => {
        4.727 * self.length / self.roughness.powf(HW_EXPONENT) / d.powf(4.871)
      }
      HeadlossFormula::DarcyWeisbach => {
        // D-W f factor is applied on top of this in the coefficients
        self.length / 2.0 / GRAVITY / d / (PI * d.powi(2) / 4.0).powi(2)
      }
      HeadlossFormula::ChezyManning => {
        (4.0 * self.roughness / (1.49 * PI * d * d)).powi(2) * (d / 4.0).powf(-1.333) * self.length
      }
    }
  }

  fn update_status(&self, state: &LinkState, h1: f64, h2: f64, tol: &Tolerances) -> LinkStatus {
    if self.check_valve {
      status::cv_status(state.status, h1 - h2, state.flow, tol)
    } else {
      state.status
    }
  }
}

impl Pipe {
  pub fn new(diameter: f64, length: f64, roughness: f64) -> Self {
    Self { diameter, length, roughness, minor_loss: 0.0, check_valve: false }
  }

  /// Minor loss coefficient in head loss per flow squared
  pub fn minor_loss_coeff(&self) -> f64 {
    MINOR_LOSS_FACTOR * self.minor_loss / self.diameter.powi(4)
  }

  /// Coefficients for the Hazen-Williams and Chezy-Manning formulas (h = r * q^n)
  fn power_law_coefficients(&self, q: f64, r: f64, n: f64) -> (f64, f64) {
    // take the absolute value of the flow
    let q_abs = q.abs();
    let ml = self.minor_loss_coeff();

    // Friction head loss gradient
    let mut hgrad = n * r * q_abs.powf(n - 1.0);
    // use a linear relation for very small gradients
    let mut hloss = if hgrad < RQ_TOL {
      hgrad = RQ_TOL;
      hgrad * q_abs
    } else {
      hgrad * q_abs / n
    };

    // contribution of minor losses
    if ml > 0.0 {
      hloss += ml * q_abs.powi(2);
      hgrad += 2.0 * ml * q_abs;
    }
    // adjust the headloss to the sign of the flow
    hloss *= q.signum();

    (1.0 / hgrad, hloss / hgrad)
  }

  /// Calculate the coefficients for the Darcy Weisbach headloss formula
  fn dw_coefficients(&self, q: f64, r: f64, viscosity: f64) -> (f64, f64) {
    let q_abs = q.abs();
    let ml = self.minor_loss_coeff();
    let e = (self.roughness / 1000.0) / self.diameter; // relative roughness (use mf to ft)
    let s = viscosity * self.diameter;      // kinematic viscosity * diameter

    // Laminar flow (Re <= 2000)
    // use Hagen-Poiseuille formula
    if q_abs <= A2 * s {
      let r = 16.0 * PI * s * r;
      let hloss = q * (r + ml * q_abs);
      let hgrad = r + 2.0 * ml * q_abs;

      (1.0 / hgrad, hloss / hgrad)
    } else {
      // Turbulent flow (Re > 2000)
      let (f, dfdq) = Self::dw_friction_factor(q_abs, e, s);

      let r1 = f * r + ml;
      let hloss = r1 * q_abs * q;
      let hgrad = (2.0 * r1 * q_abs) + (dfdq * r * q_abs.powi(2));

      (1.0 / hgrad, hloss / hgrad)
    }
  }

  #[inline(always)]
  // Calculate the Darcy Weisbach friction factor and its derivative
  fn dw_friction_factor(q: f64, e: f64, s: f64) -> (f64, f64) {
    let w = q / s;

    // Re >= 4000, use Swamee & Jain approximation
    if w >= A1 {
      let y1 = A8 / w.powf(0.9);
      let y2 = e / 3.7 + y1;
      let y3 = A9 * y2.ln();
      let f = 1.0 / y3.powi(2);
      let dfdq = 1.8 * f * y1 * A9 / y2 / y3 / q;

      (f, dfdq)

    // Use interpolating polynomials by E. Dunlop for transition flow (2000 < Re < 4000)
    } else {
      let y2 = e / 3.7 + AB;
      let y3 = A9 * y2.ln();
      let fa = 1.0 / (y3 * y3);
      let fb = (2.0 + AC / (y2 * y3)) * fa;
      let r = w / A2;
      let x1 = 7.0 * fa - fb;
      let x2 = 0.128 - 17.0 * fa + 2.5 * fb;
      let x3 = -0.128 + 13.0 * fa - (fb + fb);
      let x4 = 0.032 - 3.0 * fa + 0.5 * fb;
      let f = x1 + r * (x2 + r * (x3 + r * x4));
      let dfdq = (x2 + r * (2.0 * x3 + r * 3.0 * x4)) / s / A2;

      (f, dfdq)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn open(q: f64) -> LinkState {
    LinkState { flow: q, status: LinkStatus::Open, setting: None }
  }

  #[test]
  fn hazen_williams_coefficients_reproduce_headloss() {
    let pipe = Pipe::new(1.0, 1000.0, 100.0);
    let params = CoeffParams { formula: HeadlossFormula::HazenWilliams, viscosity: 1.1e-5 };
    let r = pipe.resistance(HeadlossFormula::HazenWilliams);
    let q = 2.0;
    let c = pipe.coefficients(&open(q), r, &params);
    // y / g_inv is the head loss itself
    let h = c.y / c.g_inv;
    assert!((h - r * q.powf(1.852)).abs() < 1e-9);
    // negative flow gives negative head loss
    let c = pipe.coefficients(&open(-q), r, &params);
    assert!((c.y / c.g_inv + r * q.powf(1.852)).abs() < 1e-9);
  }

  #[test]
  fn closed_pipe_has_tiny_conductance() {
    let pipe = Pipe::new(1.0, 1000.0, 100.0);
    let params = CoeffParams { formula: HeadlossFormula::HazenWilliams, viscosity: 1.1e-5 };
    let state = LinkState { flow: 0.3, status: LinkStatus::Closed, setting: None };
    let c = pipe.coefficients(&state, 1.0, &params);
    assert_eq!(c.g_inv, 1.0 / BIG_VALUE);
    assert_eq!(c.y, 0.3);
  }

  #[test]
  fn darcy_weisbach_turbulent_friction_factor() {
    // 1 ft pipe, 0.1 mft roughness, 3 cfs: Re ~ 3.5e5
    let pipe = Pipe::new(1.0, 1000.0, 0.1);
    let r = pipe.resistance(HeadlossFormula::DarcyWeisbach);
    let params = CoeffParams { formula: HeadlossFormula::DarcyWeisbach, viscosity: 1.1e-5 };
    let c = pipe.coefficients(&open(3.0), r, &params);
    let h = c.y / c.g_inv;
    let f = h / (r * 9.0);
    assert!(f > 0.012 && f < 0.02, "friction factor {f}");
  }

  #[test]
  fn chezy_manning_is_quadratic() {
    let pipe = Pipe::new(1.0, 500.0, 0.012);
    let r = pipe.resistance(HeadlossFormula::ChezyManning);
    let params = CoeffParams { formula: HeadlossFormula::ChezyManning, viscosity: 1.1e-5 };
    let c = pipe.coefficients(&open(1.5), r, &params);
    assert!((c.y / c.g_inv - r * 2.25).abs() < 1e-9);
  }
}

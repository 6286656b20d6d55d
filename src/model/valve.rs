use crate::hydraulics::status::{self, Tolerances};
use crate::model::curve::Curve;
use crate::model::link::{CoeffParams, LinkCoefficients, LinkState, LinkStatus, LinkTrait, NodeModification};
use crate::model::options::HeadlossFormula;
use crate::constants::*;
use std::sync::Arc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ValveType {
  PRV, // Pressure Reducing Valve
  PSV, // Pressure Sustaining Valve
  PBV, // Pressure Breaker Valve
  FCV, // Flow Control Valve
  TCV, // Throttle Control Valve
  GPV, // General Purpose Valve
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Valve {
  pub valve_type: ValveType,
  /// Diameter (ft)
  pub diameter: f64,
  /// Pressure (ft), flow (cfs), head loss (ft) or loss coefficient, depending on the type
  #[serde(default)]
  pub setting: Option<f64>,
  /// Head loss curve of a GPV
  #[serde(default)]
  pub curve: Option<Box<str>>,
  #[serde(default)]
  pub minor_loss: f64,

  #[serde(skip)]
  pub headloss_curve: Option<Arc<Curve>>,
}

impl LinkTrait for Valve {
  fn coefficients(&self, state: &LinkState, _resistance: f64, _params: &CoeffParams) -> LinkCoefficients {
    let q = state.flow;
    if state.status.is_closed() {
      return LinkCoefficients::closed(q);
    }
    match self.valve_type {
      // Pressure Breaker Valve: fixed head loss unless the open valve loses more
      ValveType::PBV => match state.setting {
        Some(setting) if setting != 0.0 && self.minor_loss_coeff() * q * q <= setting => {
          LinkCoefficients::simple(BIG_VALUE, setting * BIG_VALUE)
        }
        _ => self.valve_coefficients(q, self.minor_loss_coeff()),
      },
      // Minor loss coefficient is the setting of the valve
      ValveType::TCV => {
        let km = match state.setting {
          Some(setting) => Self::loss_coeff(setting, self.diameter),
          None => self.minor_loss_coeff(),
        };
        self.valve_coefficients(q, km)
      }
      // General Purpose Valve: head loss from its curve
      ValveType::GPV => match &self.headloss_curve {
        Some(curve) => {
          let q_abs = q.abs().max(TINY);
          let segment = curve.segment(q_abs);
          let r = segment.r.max(TINY);
          let g_inv = 1.0 / r;
          LinkCoefficients::simple(g_inv, g_inv * (segment.h0 + r * q_abs) * q.signum())
        }
        None => self.valve_coefficients(q, self.minor_loss_coeff()),
      },
      // control valves without a setting in force behave as open valves
      ValveType::PRV | ValveType::PSV | ValveType::FCV => self.valve_coefficients(q, self.minor_loss_coeff()),
    }
  }

  /// Return the resistance of the valve
  fn resistance(&self, _formula: HeadlossFormula) -> f64 {
    self.minor_loss_coeff()
  }

  fn update_status(&self, state: &LinkState, h1: f64, h2: f64, tol: &Tolerances) -> LinkStatus {
    match (self.valve_type, state.setting) {
      (ValveType::FCV, Some(setting)) => status::fcv_status(state.status, setting, h1, h2, state.flow, tol),
      _ => state.status,
    }
  }
}

impl Valve {
  pub fn new(valve_type: ValveType, diameter: f64, setting: Option<f64>) -> Self {
    Self { valve_type, diameter, setting, curve: None, minor_loss: 0.0, headloss_curve: None }
  }

  /// PRV, PSV and FCV are assembled with their own constraint while active
  pub fn is_control_valve(&self) -> bool {
    matches!(self.valve_type, ValveType::PRV | ValveType::PSV | ValveType::FCV)
  }

  pub fn minor_loss_coeff(&self) -> f64 {
    Self::loss_coeff(self.minor_loss, self.diameter)
  }

  fn loss_coeff(k: f64, diameter: f64) -> f64 {
    if diameter <= 0.0 {
      return 0.0;
    }
    MINOR_LOSS_FACTOR * k / diameter.powi(4)
  }

  /// Coefficients of a PRV, PSV or FCV with a setting in force. `hset` is the head
  /// setpoint for pressure valves; `excess_upstream` and `excess_downstream` are the
  /// excess flows at the valve's end nodes, excluding the valve itself.
  pub fn control_coefficients(&self, state: &LinkState, hset: f64, excess_upstream: f64, excess_downstream: f64) -> LinkCoefficients {
    let q = state.flow;
    let active = state.status == LinkStatus::Active;
    match (self.valve_type, state.setting) {
      // Pressure Reducing Valve: pin the downstream head to the setpoint
      (ValveType::PRV, Some(_)) if active => LinkCoefficients {
        g_inv: 0.0,
        y: q + excess_downstream,
        upstream_modification: Some(NodeModification {
          rhs_add: excess_downstream.min(0.0),
          ..Default::default()
        }),
        downstream_modification: Some(NodeModification {
          diagonal_add: BIG_VALUE,
          rhs_add: hset * BIG_VALUE,
          ..Default::default()
        }),
      },
      // Pressure Sustaining Valve: pin the upstream head to the setpoint
      (ValveType::PSV, Some(_)) if active => LinkCoefficients {
        g_inv: 0.0,
        y: q - excess_upstream,
        upstream_modification: Some(NodeModification {
          diagonal_add: BIG_VALUE,
          rhs_add: hset * BIG_VALUE,
          ..Default::default()
        }),
        downstream_modification: Some(NodeModification {
          rhs_add: excess_upstream.max(0.0),
          ..Default::default()
        }),
      },
      // Flow Control Valve: force the set flow through the valve
      (ValveType::FCV, Some(q_set)) if active => LinkCoefficients {
        g_inv: 1.0 / BIG_VALUE,
        y: q - q_set,
        upstream_modification: Some(NodeModification { diagonal_add: 0.0, rhs_add: -q_set, excess_add: -q_set }),
        downstream_modification: Some(NodeModification { diagonal_add: 0.0, rhs_add: q_set, excess_add: q_set }),
      },
      // otherwise an open (or closed) valve; its flow is not part of the excess flows
      _ => {
        let c = if state.status.is_closed() {
          LinkCoefficients::closed(q)
        } else {
          self.valve_coefficients(q, self.minor_loss_coeff())
        };
        let dy = c.y - q;
        LinkCoefficients {
          upstream_modification: Some(NodeModification { rhs_add: dy, ..Default::default() }),
          downstream_modification: Some(NodeModification { rhs_add: -dy, ..Default::default() }),
          ..c
        }
      }
    }
  }

  /// Status of a PRV or PSV from the heads at its ends
  pub fn pressure_status(&self, state: &LinkState, hset: f64, h1: f64, h2: f64, tol: &Tolerances) -> LinkStatus {
    if state.setting.is_none() {
      return state.status;
    }
    let hml = self.minor_loss_coeff() * state.flow * state.flow;
    match self.valve_type {
      ValveType::PRV => status::prv_status(state.status, hset, h1, h2, state.flow, hml, tol),
      ValveType::PSV => status::psv_status(state.status, hset, h1, h2, state.flow, hml, tol),
      _ => state.status,
    }
  }

  /// Compute the coefficients for a valve with a minor loss coefficient km and flow q
  fn valve_coefficients(&self, q: f64, km: f64) -> LinkCoefficients {
    if km > 0.0 {
      // guard against too small a head loss gradient
      let hgrad = (2.0 * km * q.abs()).max(RQ_TOL);
      LinkCoefficients::simple(1.0 / hgrad, q / 2.0)
    }
    // if no minor loss coefficient, use a low resistance linear head loss relation
    else {
      LinkCoefficients::simple(1.0 / RQ_TOL, q)
    }
  }
}

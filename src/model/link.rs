use crate::hydraulics::status::Tolerances;
use crate::model::options::HeadlossFormula;
use crate::model::pipe::Pipe;
use crate::model::pump::Pump;
use crate::model::valve::{Valve, ValveType};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
/// Link struct
pub struct Link {
  /// Link ID
  pub id: Box<str>,
  /// Link type (pipe, pump, valve)
  pub link_type: LinkType,
  /// Start node ID
  pub start_node_id: Box<str>,
  /// End node ID
  pub end_node_id: Box<str>,
  /// Initial status (open, closed, active)
  #[serde(default = "default_status")]
  pub initial_status: LinkStatus,
  /// Bulk reaction coefficient (1/s); global value when none
  #[serde(default)]
  pub bulk_coeff: Option<f64>,
  /// Wall reaction coefficient; global value when none
  #[serde(default)]
  pub wall_coeff: Option<f64>,

  /// Cached start and end node indices to avoid looking up the node map every time
  #[serde(skip)]
  pub start_node: usize,
  #[serde(skip)]
  pub end_node: usize,
}

fn default_status() -> LinkStatus {
  LinkStatus::Open
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum LinkType {
  Pipe(Pipe),
  Pump(Pump),
  Valve(Valve),
}

// Source: EPANET 2.3 types.h; the derived ordering is relied upon (e.g. status <= Closed)
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash, Deserialize, Serialize)]
pub enum LinkStatus {
  XHead,         // pump cannot deliver head (closed)
  TempClosed,    // temporarily closed
  Closed,        // closed
  Open,          // open
  Active,        // valve active (partially open)
  XFlow,         // pump exceeds maximum flow
  XFcv,          // FCV cannot supply flow
  XPressure,     // valve cannot supply pressure
  Filling,       // tank filling
  Emptying,      // tank emptying
  Overflowing,   // tank overflowing
}

impl LinkStatus {
  pub fn is_closed(&self) -> bool {
    *self <= LinkStatus::Closed
  }

  /// Numeric code used in the hydraulics file
  pub fn code(&self) -> u8 {
    *self as u8
  }

  pub fn from_code(code: u8) -> Option<LinkStatus> {
    use LinkStatus::*;
    const ALL: [LinkStatus; 11] =
      [XHead, TempClosed, Closed, Open, Active, XFlow, XFcv, XPressure, Filling, Emptying, Overflowing];
    ALL.get(code as usize).copied()
  }
}

/// Operating state of a link within one solver iteration
#[derive(Debug, Clone, Copy)]
pub struct LinkState {
  pub flow: f64,
  pub status: LinkStatus,
  /// Pump speed, valve setting; None when no setting is in force
  pub setting: Option<f64>,
}

/// Network-wide parameters needed to evaluate head loss laws
#[derive(Debug, Clone, Copy)]
pub struct CoeffParams {
  pub formula: HeadlossFormula,
  pub viscosity: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeModification {
  pub diagonal_add: f64,
  pub rhs_add: f64,
  /// Change to the node's excess flow
  pub excess_add: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkCoefficients {
  /// 1/(dh/dq)
  pub g_inv: f64,
  /// h/(dh/dq)
  pub y: f64,
  /// Optional modification to upstream node (active control valves)
  pub upstream_modification: Option<NodeModification>,
  /// Optional modification to downstream node (active control valves)
  pub downstream_modification: Option<NodeModification>,
}

impl LinkCoefficients {
  /// Create a simple link coefficients struct with no matrix modifications
  pub fn simple(g_inv: f64, y: f64) -> Self {
    Self { g_inv, y, upstream_modification: None, downstream_modification: None }
  }

  /// Coefficients of a closed link: a very high resistance so its flow decays towards zero
  pub fn closed(q: f64) -> Self {
    Self::simple(1.0 / crate::constants::BIG_VALUE, q)
  }
}

pub trait LinkTrait {
  /// Calculate the 1/G_ij and Y_ij coefficients for the link
  fn coefficients(&self, state: &LinkState, resistance: f64, params: &CoeffParams) -> LinkCoefficients;
  /// Calculate the resistance of the link
  fn resistance(&self, formula: HeadlossFormula) -> f64;
  /// Re-evaluate the status of the link from the heads at its ends
  fn update_status(&self, state: &LinkState, h1: f64, h2: f64, tol: &Tolerances) -> LinkStatus;
}

impl LinkTrait for Link {
  fn coefficients(&self, state: &LinkState, resistance: f64, params: &CoeffParams) -> LinkCoefficients {
    match &self.link_type {
      LinkType::Pipe(pipe) => pipe.coefficients(state, resistance, params),
      LinkType::Pump(pump) => pump.coefficients(state, resistance, params),
      LinkType::Valve(valve) => valve.coefficients(state, resistance, params),
    }
  }
  fn resistance(&self, formula: HeadlossFormula) -> f64 {
    match &self.link_type {
      LinkType::Pipe(pipe) => pipe.resistance(formula),
      LinkType::Pump(pump) => pump.resistance(formula),
      LinkType::Valve(valve) => valve.resistance(formula),
    }
  }
  fn update_status(&self, state: &LinkState, h1: f64, h2: f64, tol: &Tolerances) -> LinkStatus {
    match &self.link_type {
      LinkType::Pipe(pipe) => pipe.update_status(state, h1, h2, tol),
      LinkType::Pump(pump) => pump.update_status(state, h1, h2, tol),
      LinkType::Valve(valve) => valve.update_status(state, h1, h2, tol),
    }
  }
}

impl Link {
  pub fn pipe(id: &str, start: &str, end: &str, pipe: Pipe) -> Self {
    Self::new(id, start, end, LinkType::Pipe(pipe))
  }

  pub fn pump(id: &str, start: &str, end: &str, pump: Pump) -> Self {
    Self::new(id, start, end, LinkType::Pump(pump))
  }

  pub fn valve(id: &str, start: &str, end: &str, valve: Valve) -> Self {
    Self::new(id, start, end, LinkType::Valve(valve))
  }

  fn new(id: &str, start: &str, end: &str, link_type: LinkType) -> Self {
    Self {
      id: id.into(),
      link_type,
      start_node_id: start.into(),
      end_node_id: end.into(),
      initial_status: LinkStatus::Open,
      bulk_coeff: None,
      wall_coeff: None,
      start_node: 0,
      end_node: 0,
    }
  }

  pub fn diameter(&self) -> f64 {
    match &self.link_type {
      LinkType::Pipe(pipe) => pipe.diameter,
      LinkType::Valve(valve) => valve.diameter,
      LinkType::Pump(_) => 0.0,
    }
  }

  pub fn length(&self) -> f64 {
    match &self.link_type {
      LinkType::Pipe(pipe) => pipe.length,
      _ => 0.0,
    }
  }

  /// Geometric volume (ft3); pumps and valves hold no water
  pub fn volume(&self) -> f64 {
    let d = self.diameter();
    crate::constants::PI * d * d / 4.0 * self.length()
  }

  /// Setting in force at the start of a run (pump speed or valve setting)
  pub fn initial_setting(&self) -> Option<f64> {
    match &self.link_type {
      LinkType::Pipe(_) => None,
      LinkType::Pump(pump) => Some(pump.speed),
      LinkType::Valve(valve) => valve.setting,
    }
  }

  /// Status the link starts a run in
  pub fn start_status(&self) -> LinkStatus {
    match &self.link_type {
      LinkType::Valve(valve)
        if valve.is_control_valve() && valve.setting.is_some() && !self.initial_status.is_closed() =>
      {
        LinkStatus::Active
      }
      _ => self.initial_status,
    }
  }

  pub fn is_pump(&self) -> bool {
    matches!(self.link_type, LinkType::Pump(_))
  }

  pub fn is_check_valve(&self) -> bool {
    matches!(&self.link_type, LinkType::Pipe(pipe) if pipe.check_valve)
  }

  pub fn valve_type(&self) -> Option<ValveType> {
    match &self.link_type {
      LinkType::Valve(valve) => Some(valve.valve_type),
      _ => None,
    }
  }
}

//! Extended-period hydraulic solver.
//!
//! Each call to [`HydraulicSolver::run`] solves the network at the current
//! time with the gradient algorithm; [`HydraulicSolver::next`] then picks the
//! next time step and moves tank levels forward.

pub mod energy;
pub mod hydfile;
pub mod matrix;
pub mod solve;
pub mod status;
pub mod timestep;

use std::path::Path;

use simplelog::{debug, info, warn};

use crate::constants::*;
use crate::error::{EngineError, EngineResult, Warning};
use crate::hydraulics::energy::EnergyTotals;
use crate::hydraulics::hydfile::{HydFileWriter, HydSnapshot};
use crate::hydraulics::matrix::SparseSystem;
use crate::hydraulics::status::Tolerances;
use crate::model::link::{LinkStatus, LinkTrait, LinkType};
use crate::model::network::Network;
use crate::model::node::NodeType;

/// Options for [`HydraulicSolver::init`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitFlags {
  /// Write every solved step to the hydraulics scratch file
  pub save: bool,
  /// Reset link flows to their initial guess instead of keeping the last solution
  pub reinit_flows: bool,
}

/// Dense solver state, one entry per node or per link
#[derive(Debug)]
pub struct HydraulicSolver {
  /// Hydraulic head (ft)
  pub heads: Vec<f64>,
  /// Junction outflow including emitters; net inflow for tanks and reservoirs (cfs)
  pub demands: Vec<f64>,
  /// Emitter outflow (cfs)
  pub emitter_flows: Vec<f64>,
  /// Tank volume (ft3), zero for other nodes
  pub tank_volumes: Vec<f64>,
  /// Link flow (cfs)
  pub flows: Vec<f64>,
  pub status: Vec<LinkStatus>,
  /// Pump speed or valve setting in force
  pub settings: Vec<Option<f64>>,

  /// Current time (s)
  pub time: i64,
  /// Next reporting time (s)
  pub report_time: i64,
  /// Length of the step taken by the last call to `next` (s)
  pub step: i64,
  pub halt: bool,
  pub iterations: usize,
  pub relative_error: f64,
  pub energy: EnergyTotals,
  /// Worst warning raised since the last initialization
  pub warning: Option<Warning>,

  pub(crate) matrix: SparseSystem,
  pub(crate) resistance: Vec<f64>,
  /// Excess flow at each node during assembly
  pub(crate) excess: Vec<f64>,
  /// 1/(dh/dq) and h/(dh/dq) of every link from the last assembly
  pub(crate) p: Vec<f64>,
  pub(crate) y: Vec<f64>,
  pub(crate) relax: f64,
  pub(crate) tolerances: Tolerances,
  hydfile: Option<HydFileWriter>,
  initialized: bool,
}

/// Lifecycle
impl HydraulicSolver {
  /// Allocate the solver arrays and build the sparse structure for a finalized network
  pub fn open(network: &Network) -> EngineResult<Self> {
    if !network.is_finalized() {
      return Err(EngineError::NoNetwork);
    }
    let n_nodes = network.nodes.len();
    let n_links = network.links.len();
    let options = &network.options.hydraulics;
    let formula = options.headloss_formula;

    let matrix = SparseSystem::new(network)?;
    let resistance = network.links.iter().map(|l| l.resistance(formula)).collect();
    info!("Hydraulics opened: {} unknown heads, {} links", matrix.size(), n_links);

    Ok(Self {
      heads: vec![0.0; n_nodes],
      demands: vec![0.0; n_nodes],
      emitter_flows: vec![0.0; n_nodes],
      tank_volumes: vec![0.0; n_nodes],
      flows: vec![0.0; n_links],
      status: vec![LinkStatus::Open; n_links],
      settings: vec![None; n_links],
      time: 0,
      report_time: 0,
      step: 0,
      halt: false,
      iterations: 0,
      relative_error: 0.0,
      energy: EnergyTotals::new(network),
      warning: None,
      matrix,
      resistance,
      excess: vec![0.0; n_nodes],
      p: vec![0.0; n_links],
      y: vec![0.0; n_links],
      relax: 1.0,
      tolerances: Tolerances { head: options.head_tolerance, flow: options.flow_tolerance },
      hydfile: None,
      initialized: false,
    })
  }

  /// Reset heads, flows, statuses and accumulators to their starting values.
  /// With `flags.save` the solved steps are written to `hydfile`.
  pub fn init(&mut self, network: &Network, flags: InitFlags, hydfile: Option<&Path>) -> EngineResult<()> {
    for (i, node) in network.nodes.iter().enumerate() {
      self.emitter_flows[i] = if node.emitter_coeff > 0.0 { 1.0 } else { 0.0 };
      self.demands[i] = 0.0;
      self.tank_volumes[i] = 0.0;
      self.heads[i] = match &node.node_type {
        NodeType::Tank(tank) => {
          self.tank_volumes[i] = tank.v0;
          tank.h0
        }
        NodeType::Reservoir(_) | NodeType::Junction(_) => node.elevation,
      };
    }

    for (k, link) in network.links.iter().enumerate() {
      self.status[k] = link.start_status();
      self.settings[k] = link.initial_setting();
      if self.status[k].is_closed() {
        self.flows[k] = Q_ZERO;
      } else if self.flows[k].abs() <= Q_ZERO || flags.reinit_flows {
        self.flows[k] = initial_flow(link, self.settings[k]);
      }
    }

    self.energy.reset();
    self.time = 0;
    self.report_time = network.options.times.report_step;
    self.step = 0;
    self.halt = false;
    self.iterations = 0;
    self.relative_error = 0.0;
    self.relax = 1.0;
    self.warning = None;

    self.hydfile = match (flags.save, hydfile) {
      (true, Some(path)) => Some(HydFileWriter::create(path, network)?),
      (true, None) => return Err(EngineError::HydFileInvalid { what: "no hydraulics file to save to".into() }),
      (false, _) => None,
    };
    self.initialized = true;
    debug!("Hydraulics initialized (save: {}, reinit flows: {})", flags.save, flags.reinit_flows);
    Ok(())
  }

  /// Solve the network at the current time and return that time
  pub fn run(&mut self, network: &Network) -> EngineResult<i64> {
    if !self.initialized {
      return Err(EngineError::HydraulicsNotInitialized);
    }
    self.apply_demands(network);
    self.apply_controls(network);
    let (iterations, relerr) = self.netsolve(network)?;
    self.iterations = iterations;
    self.relative_error = relerr;

    let hydraulics = &network.options.hydraulics;
    if relerr > hydraulics.accuracy && hydraulics.unbalanced == crate::model::options::Unbalanced::Stop {
      self.halt = true;
    }
    if let Some(warning) = self.check_warnings(network) {
      self.warning = self.warning.max(Some(warning));
    }
    debug!("Solved hydraulics at t = {} s in {} trials (relative error {:.3e})", self.time, iterations, relerr);
    Ok(self.time)
  }

  /// Advance to the next hydraulic event and return the step taken (0 at the end of the run)
  pub fn next(&mut self, network: &Network) -> EngineResult<i64> {
    if !self.initialized {
      return Err(EngineError::HydraulicsNotInitialized);
    }
    let duration = network.options.times.duration;
    if self.halt {
      self.time = duration;
    }
    if self.hydfile.is_some() {
      let snapshot = self.snapshot();
      if let Some(writer) = self.hydfile.as_mut() {
        writer.write_step(&snapshot)?;
      }
    }

    let step = if self.time < duration { self.timestep(network) } else { 0 };
    if duration == 0 {
      self.accumulate_energy(network, 0);
    } else if self.time < duration {
      self.accumulate_energy(network, step);
    }
    if let Some(writer) = self.hydfile.as_mut() {
      writer.write_timestep(step)?;
      if step == 0 {
        writer.flush()?;
      }
    }

    if self.time < duration {
      self.time += step;
      if self.time >= self.report_time {
        self.report_time += network.options.times.report_step;
      }
    } else {
      self.time += 1;
    }
    self.step = step;
    Ok(step)
  }

  /// Flush the scratch file and release it
  pub fn close(&mut self) -> EngineResult<()> {
    if let Some(mut writer) = self.hydfile.take() {
      writer.flush()?;
    }
    self.initialized = false;
    info!("Hydraulics closed");
    Ok(())
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized
  }

  /// Copy of the current solution, as stored in the scratch file
  pub fn snapshot(&self) -> HydSnapshot {
    HydSnapshot {
      time: self.time,
      demands: self.demands.clone(),
      heads: self.heads.clone(),
      flows: self.flows.clone(),
      status: self.status.clone(),
      settings: self.settings.clone(),
      step: self.step,
    }
  }
}

/// Warnings
impl HydraulicSolver {
  /// Worst condition found in the current solution, logging every one found
  pub(crate) fn check_warnings(&self, network: &Network) -> Option<Warning> {
    let hydraulics = &network.options.hydraulics;
    let mut found = Vec::new();

    if self.relative_error > hydraulics.accuracy {
      found.push(Warning::Unbalanced);
    } else if self.iterations > hydraulics.max_trials {
      found.push(Warning::Unstable);
    }

    let negative = network
      .nodes
      .iter()
      .enumerate()
      .any(|(i, n)| n.is_junction() && self.heads[i] < n.elevation && self.demands[i] > 0.0);
    if negative {
      found.push(Warning::NegativePressure);
    }

    for (k, link) in network.links.iter().enumerate() {
      match &link.link_type {
        LinkType::Valve(valve) if valve.is_control_valve() && self.status[k] >= LinkStatus::XFcv => {
          found.push(Warning::ValveCannotDeliver);
        }
        LinkType::Pump(pump) => {
          let speed = self.settings[k].unwrap_or(pump.speed);
          let q_max = pump.characteristic.as_ref().map_or(BIG_VALUE, |c| c.q_max());
          let open = !self.status[k].is_closed();
          if self.status[k] == LinkStatus::XHead || (open && (self.flows[k] > speed * q_max || self.flows[k] < 0.0)) {
            found.push(Warning::PumpOutOfRange);
          }
        }
        _ => {}
      }
    }

    if self.disconnected(network) > 0 {
      found.push(Warning::Disconnected);
    }

    found.sort();
    found.dedup();
    for warning in found.iter() {
      warn!("{} at t = {} s", warning, self.time);
    }
    found.pop()
  }

  /// Number of junctions with demand that no fixed-grade node can reach over open links
  pub fn disconnected(&self, network: &Network) -> usize {
    let mut reached = vec![false; network.nodes.len()];
    let mut stack: Vec<usize> = (0..network.nodes.len()).filter(|&i| network.nodes[i].is_fixed()).collect();
    for &i in stack.iter() {
      reached[i] = true;
    }
    while let Some(i) = stack.pop() {
      for &k in network.adjacency[i].iter() {
        if self.status[k].is_closed() {
          continue;
        }
        let link = &network.links[k];
        let j = if link.start_node == i { link.end_node } else { link.start_node };
        if !reached[j] {
          reached[j] = true;
          stack.push(j);
        }
      }
    }
    let count = (0..network.nodes.len())
      .filter(|&i| network.nodes[i].is_junction() && !reached[i] && self.demands[i] > 0.0)
      .count();
    if count > 0 {
      debug!("{count} junctions with demand are disconnected at t = {} s", self.time);
    }
    count
  }
}

/// Initial flow guess for an open link: design flow for pumps, 1 ft/s otherwise
fn initial_flow(link: &crate::model::link::Link, setting: Option<f64>) -> f64 {
  match &link.link_type {
    LinkType::Pump(pump) => pump.initial_flow(setting.unwrap_or(pump.speed)),
    _ => PI * link.diameter().powi(2) / 4.0,
  }
}

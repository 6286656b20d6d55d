//! Water quality transport.
//!
//! Water in pipes is tracked as a chain of parcels ("segments") of uniform
//! quality. Every quality step reacts the parcels, moves them downstream by
//! the link flow, mixes what arrives at each node and releases new parcels
//! at the upstream end of every link. Flows come either straight from a
//! [`HydraulicSolver`] running alongside, or from its scratch file.

pub mod reaction;
pub mod segment;
pub mod tankmix;
pub mod transport;

use std::path::Path;

use serde::Serialize;
use simplelog::{debug, error, info};

use crate::error::{EngineError, EngineResult};
use crate::hydraulics::hydfile::HydFileReader;
use crate::hydraulics::HydraulicSolver;
use crate::model::link::LinkStatus;
use crate::model::network::Network;
use crate::model::node::NodeType;
use crate::model::options::QualityMode;
use crate::quality::reaction::{pipe_rate_coeff, Kinetics};
use crate::quality::segment::{SegList, SegPool};
use crate::quality::tankmix::TankState;

/// Where the quality engine takes its flows from
#[derive(Debug, Clone, Copy)]
pub enum HydSource<'a> {
  /// The current solution of a solver stepping in tandem
  Memory(&'a HydraulicSolver),
  /// The scratch file named at `init`
  File,
}

/// Direction of the flow a link's segments were laid out for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowDir {
  Positive,
  Negative,
}

/// Constituent mass bookkeeping over a quality run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MassBalance {
  /// Mass stored in pipes and tanks at the start
  pub initial: f64,
  /// Mass added by sources and carried in from reservoirs
  pub inflow: f64,
  /// Mass leaving through demands and into reservoirs
  pub outflow: f64,
  /// Mass lost to reactions (negative for growth)
  pub reacted: f64,
  /// Mass stored in pipes and tanks now
  pub final_mass: f64,
}

impl MassBalance {
  /// Mass accounted for over mass supplied; 1 when balanced
  pub fn ratio(&self) -> f64 {
    let supplied = self.initial + self.inflow;
    if supplied == 0.0 {
      return 1.0;
    }
    (self.final_mass + self.outflow + self.reacted) / supplied
  }
}

#[derive(Debug)]
pub struct QualityEngine {
  /// Quality at each node
  pub quality: Vec<f64>,
  /// Current quality time (s)
  pub time: i64,
  pub mass_balance: MassBalance,
  /// Volume weighted reaction rate in each link over the last sub-step (mass/ft3/s)
  pub reaction_rates: Vec<f64>,
  /// Source mass injected per second over the last sub-step
  pub source_rates: Vec<f64>,

  pub(crate) pool: SegPool,
  pub(crate) link_segs: Vec<SegList>,
  pub(crate) tanks: Vec<TankState>,
  /// Position of each node in `tanks`
  pub(crate) tank_slot: Vec<Option<usize>>,
  pub(crate) flow_dir: Vec<FlowDir>,
  /// Link flows of the current hydraulic interval, zero for closed links
  pub(crate) flows: Vec<f64>,
  /// Node demands of the current hydraulic interval
  pub(crate) demands: Vec<f64>,
  pub(crate) bulk_coeffs: Vec<f64>,
  pub(crate) wall_coeffs: Vec<f64>,
  /// Wall rate coefficients for the current flows
  pub(crate) wall_rate_coeffs: Vec<f64>,
  pub(crate) vol_in: Vec<f64>,
  pub(crate) mass_in: Vec<f64>,
  /// Adjacent segment quality, then staged source quality, per node
  pub(crate) x: Vec<f64>,
  pub(crate) source_mass: Vec<f64>,
  pub(crate) kinetics: Kinetics,
  pub(crate) reactive: bool,
  /// End of the hydraulic interval being read from the scratch file
  next_event: i64,
  hydfile: Option<HydFileReader>,
  initialized: bool,
}

/// Lifecycle
impl QualityEngine {
  pub fn open(network: &Network) -> EngineResult<Self> {
    if !network.is_finalized() {
      return Err(EngineError::NoNetwork);
    }
    let n_nodes = network.nodes.len();
    let n_links = network.links.len();
    let options = &network.options.quality;
    info!("Water quality opened: {} nodes, {} links, mode {:?}", n_nodes, n_links, options.mode);

    Ok(Self {
      quality: vec![0.0; n_nodes],
      time: 0,
      mass_balance: MassBalance::default(),
      reaction_rates: vec![0.0; n_links],
      source_rates: vec![0.0; n_nodes],
      pool: SegPool::new(options.segment_limit),
      link_segs: vec![SegList::default(); n_links],
      tanks: Vec::new(),
      tank_slot: vec![None; n_nodes],
      flow_dir: vec![FlowDir::Positive; n_links],
      flows: vec![0.0; n_links],
      demands: vec![0.0; n_nodes],
      bulk_coeffs: vec![0.0; n_links],
      wall_coeffs: vec![0.0; n_links],
      wall_rate_coeffs: vec![0.0; n_links],
      vol_in: vec![0.0; n_nodes],
      mass_in: vec![0.0; n_nodes],
      x: vec![0.0; n_nodes],
      source_mass: vec![0.0; n_nodes],
      kinetics: kinetics(network),
      reactive: false,
      next_event: 0,
      hydfile: None,
      initialized: false,
    })
  }

  /// Reset qualities, segments and accumulators. With `hydfile` the flows are
  /// read back from that scratch file.
  pub fn init(&mut self, network: &Network, hydfile: Option<&Path>) -> EngineResult<()> {
    let options = &network.options.quality;
    let trace = matches!(options.mode, QualityMode::Trace { .. });
    self.kinetics = kinetics(network);

    for (i, node) in network.nodes.iter().enumerate() {
      self.quality[i] = if trace { 0.0 } else { node.initial_quality };
    }

    self.pool = SegPool::new(options.segment_limit);
    self.link_segs.iter_mut().for_each(|l| *l = SegList::default());
    self.flow_dir.iter_mut().for_each(|d| *d = FlowDir::Positive);

    self.tanks.clear();
    self.tank_slot.iter_mut().for_each(|s| *s = None);
    for (i, node) in network.nodes.iter().enumerate() {
      let NodeType::Tank(tank) = &node.node_type else { continue };
      if tank.is_reservoir_like() {
        continue;
      }
      self.tank_slot[i] = Some(self.tanks.len());
      self.tanks.push(TankState {
        node: i,
        mix_model: tank.mix_model,
        volume: tank.v0,
        c: self.quality[i],
        v1max: tank.v1max,
        kb: tank.bulk_coeff.unwrap_or(options.global_bulk),
        segs: SegList::default(),
      });
    }

    for (k, link) in network.links.iter().enumerate() {
      self.bulk_coeffs[k] = link.bulk_coeff.unwrap_or(options.global_bulk);
      self.wall_coeffs[k] = link.wall_coeff.unwrap_or(options.global_wall);
    }
    self.reactive = match options.mode {
      QualityMode::Age => true,
      QualityMode::Chemical => {
        self.bulk_coeffs.iter().chain(self.wall_coeffs.iter()).any(|&k| k != 0.0)
          || self.tanks.iter().any(|t| t.kb != 0.0)
      }
      QualityMode::None | QualityMode::Trace { .. } => false,
    };

    self.flows.fill(0.0);
    self.demands.fill(0.0);
    self.wall_rate_coeffs.fill(0.0);
    self.reaction_rates.fill(0.0);
    self.source_rates.fill(0.0);
    self.source_mass.fill(0.0);
    self.mass_balance = MassBalance::default();
    self.time = 0;
    self.next_event = 0;
    self.hydfile = hydfile.map(|path| HydFileReader::open(path, network)).transpose()?;
    self.initialized = true;
    debug!("Water quality initialized (reactive: {}, from file: {})", self.reactive, self.hydfile.is_some());
    Ok(())
  }

  /// Take up the hydraulics of a new interval when one starts at the current
  /// time, and return that time
  pub fn run(&mut self, network: &Network, source: HydSource) -> EngineResult<i64> {
    if !self.initialized {
      return Err(EngineError::QualityNotInitialized);
    }
    match source {
      HydSource::Memory(_) => {
        self.load_event(network, source)?;
      }
      HydSource::File if self.time == self.next_event => {
        self.load_event(network, source)?;
      }
      HydSource::File => {}
    }
    Ok(self.time)
  }

  /// Transport water quality to the end of the current hydraulic interval and
  /// return the time advanced (0 once the run is over)
  pub fn next(&mut self, network: &Network, source: HydSource) -> EngineResult<i64> {
    if !self.initialized {
      return Err(EngineError::QualityNotInitialized);
    }
    if self.pool.out_of_memory {
      return Err(EngineError::OutOfMemory);
    }
    let hydstep = self.interval_end(source) - self.time;
    if network.options.quality.mode != QualityMode::None && hydstep > 0 {
      self.transport(network, hydstep);
    }
    if self.pool.out_of_memory {
      error!("Water quality segment pool exhausted at t = {} s", self.time);
      return Err(EngineError::OutOfMemory);
    }
    self.time += hydstep;
    Ok(hydstep)
  }

  /// Transport over one quality step, crossing hydraulic events read from
  /// the scratch file. Stops early at an event when stepping in tandem with
  /// the hydraulics. Returns the time left in the run.
  pub fn step(&mut self, network: &Network, source: HydSource) -> EngineResult<i64> {
    if !self.initialized {
      return Err(EngineError::QualityNotInitialized);
    }
    if self.pool.out_of_memory {
      return Err(EngineError::OutOfMemory);
    }
    let active = network.options.quality.mode != QualityMode::None;
    let mut remaining = network.options.times.quality_step.max(1);
    loop {
      let end = self.interval_end(source);
      let dt = remaining.min(end - self.time);
      if dt > 0 {
        if active {
          self.transport(network, dt);
        }
        self.time += dt;
        remaining -= dt;
      }
      if self.pool.out_of_memory {
        error!("Water quality segment pool exhausted at t = {} s", self.time);
        return Err(EngineError::OutOfMemory);
      }
      if self.time == end {
        let HydSource::File = source else { break };
        if self.load_event(network, source)? {
          break;
        }
      }
      if remaining <= 0 {
        break;
      }
    }
    Ok(network.options.times.duration - self.time)
  }

  /// Release the scratch file
  pub fn close(&mut self) {
    self.hydfile = None;
    self.initialized = false;
    info!("Water quality closed");
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized
  }

  /// Copy in the flows of a new hydraulic interval and lay out the segments
  /// for them. Returns true when this is the last interval of the run.
  fn load_event(&mut self, network: &Network, source: HydSource) -> EngineResult<bool> {
    let last = match source {
      HydSource::Memory(h) => {
        self.take_hydraulics(&h.flows, &h.demands, &h.status);
        h.time >= network.options.times.duration
      }
      HydSource::File => {
        let reader = self.hydfile.as_mut().ok_or(EngineError::NoHydraulicsForQuality)?;
        let snapshot = reader.read_step()?;
        if snapshot.time != self.time {
          debug!("Hydraulics file step at t = {} s read at quality time {} s", snapshot.time, self.time);
        }
        self.next_event = snapshot.time + snapshot.step;
        self.take_hydraulics(&snapshot.flows, &snapshot.demands, &snapshot.status);
        snapshot.step == 0
      }
    };

    let options = &network.options;
    if options.quality.mode != QualityMode::None && self.time < options.times.duration {
      if self.time == 0 {
        self.init_segs(network);
      } else {
        self.reorient_segs();
      }
    }
    self.update_wall_rates(network);
    debug!("Water quality took up hydraulics at t = {} s", self.time);
    Ok(last)
  }

  fn take_hydraulics(&mut self, flows: &[f64], demands: &[f64], status: &[LinkStatus]) {
    for (k, q) in self.flows.iter_mut().enumerate() {
      *q = if status[k].is_closed() { 0.0 } else { flows[k] };
    }
    self.demands.copy_from_slice(demands);
  }

  fn interval_end(&self, source: HydSource) -> i64 {
    match source {
      HydSource::Memory(h) if h.step > 0 && h.time > self.time => h.time,
      HydSource::Memory(_) => self.time,
      HydSource::File => self.next_event.max(self.time),
    }
  }

  fn update_wall_rates(&mut self, network: &Network) {
    let age = network.options.quality.mode == QualityMode::Age;
    for (k, link) in network.links.iter().enumerate() {
      self.wall_rate_coeffs[k] = if self.reactive && !age && link.length() > 0.0 {
        pipe_rate_coeff(&self.kinetics, self.wall_coeffs[k], link.diameter(), link.length(), self.flows[k])
      } else {
        0.0
      };
    }
  }
}

/// Results
impl QualityEngine {
  /// Volume weighted quality in link `k`, or the mean of its end nodes when it holds no water
  pub fn link_quality(&self, network: &Network, k: usize) -> f64 {
    let list = &self.link_segs[k];
    let volume = self.pool.volume(list);
    if volume > 0.0 {
      return self.pool.mass(list) / volume;
    }
    let link = &network.links[k];
    (self.quality[link.start_node] + self.quality[link.end_node]) / 2.0
  }

  pub fn link_qualities(&self, network: &Network) -> Vec<f64> {
    (0..network.links.len()).map(|k| self.link_quality(network, k)).collect()
  }

  /// Water volume currently held by the segments of link `k`
  pub fn link_segment_volume(&self, k: usize) -> f64 {
    self.pool.volume(&self.link_segs[k])
  }

  /// Stored tank volume as tracked by the quality engine
  pub fn tank_volume(&self, node: usize) -> Option<f64> {
    self.tank_slot[node].map(|t| self.tanks[t].volume)
  }

  /// Number of live segments
  pub fn segment_count(&self) -> usize {
    self.pool.live()
  }

  /// Constituent mass held in pipes and tanks
  pub fn stored_mass(&self) -> f64 {
    let pipes: f64 = self.link_segs.iter().map(|l| self.pool.mass(l)).sum();
    let tanks: f64 = self.tanks.iter().map(|t| t.mass(&self.pool)).sum();
    pipes + tanks
  }
}

fn kinetics(network: &Network) -> Kinetics {
  let options = &network.options.quality;
  Kinetics {
    bulk_order: options.bulk_order,
    wall_order: options.wall_order,
    tank_order: options.tank_order,
    limit: options.limiting_concentration,
    diffusivity: options.diffusivity,
    viscosity: network.options.hydraulics.viscosity,
  }
}

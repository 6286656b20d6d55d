//! Segment transport through links and nodes.

use crate::constants::*;
use crate::model::link::Link;
use crate::model::network::Network;
use crate::model::node::{Node, NodeType};
use crate::model::options::QualityMode;
use crate::model::source::{Source, SourceType};
use crate::quality::reaction::{bulk_rate, wall_rate};
use crate::quality::tankmix::TankInflow;
use crate::quality::{FlowDir, MassBalance, QualityEngine};

impl QualityEngine {
  /// Move water quality forward over `tstep` seconds in quality step sized sub-steps
  pub(crate) fn transport(&mut self, network: &Network, tstep: i64) {
    let qstep = network.options.times.quality_step.max(1);
    let mut elapsed = 0;
    while !self.pool.out_of_memory && elapsed < tstep {
      let dt = qstep.min(tstep - elapsed);
      let now = self.time + elapsed;
      elapsed += dt;
      let dt = dt as f64;

      if self.reactive {
        self.react_pipes(network, dt);
      }
      self.accumulate(network, dt);
      self.update_nodes(network, dt);
      self.source_input(network, now, dt);
      self.release(network, dt);
      self.update_source_nodes(network, dt);
    }
    self.mass_balance.final_mass = self.stored_mass();
  }

  /// Upstream and downstream node of a link for its current flow direction
  fn ends(&self, link: &Link, k: usize) -> (usize, usize) {
    match self.flow_dir[k] {
      FlowDir::Positive => (link.start_node, link.end_node),
      FlowDir::Negative => (link.end_node, link.start_node),
    }
  }

  /// Lay out one segment filling each link, and the starting parcels of each tank
  pub(crate) fn init_segs(&mut self, network: &Network) {
    for (k, link) in network.links.iter().enumerate() {
      self.flow_dir[k] = if self.flows[k] < 0.0 { FlowDir::Negative } else { FlowDir::Positive };
      let (_, down) = self.ends(link, k);
      let c = match self.tank_slot[down] {
        Some(t) => self.tanks[t].c,
        None => self.quality[down],
      };
      self.pool.clear(&mut self.link_segs[k]);
      self.pool.push_back(&mut self.link_segs[k], link.volume(), c);
    }
    for tank in self.tanks.iter_mut() {
      tank.init_segments(&mut self.pool);
    }
    let stored = self.stored_mass();
    self.mass_balance = MassBalance { initial: stored, final_mass: stored, ..Default::default() };
  }

  /// Reverse the segments of every link whose flow changed direction
  pub(crate) fn reorient_segs(&mut self) {
    for k in 0..self.flows.len() {
      let q = self.flows[k];
      let dir = if q > 0.0 {
        FlowDir::Positive
      } else if q < 0.0 {
        FlowDir::Negative
      } else {
        self.flow_dir[k]
      };
      if dir != self.flow_dir[k] {
        self.pool.reverse(&mut self.link_segs[k]);
        self.flow_dir[k] = dir;
      }
    }
  }

  /// Apply bulk and wall reactions to every pipe segment
  fn react_pipes(&mut self, network: &Network, dt: f64) {
    let age = network.options.quality.mode == QualityMode::Age;
    let kinetics = self.kinetics;
    let mut reacted = 0.0;
    for (k, link) in network.links.iter().enumerate() {
      self.reaction_rates[k] = 0.0;
      if link.length() == 0.0 {
        continue;
      }
      let (kb, kw, rc, d) = (self.bulk_coeffs[k], self.wall_coeffs[k], self.wall_rate_coeffs[k], link.diameter());
      let mut rsum = 0.0;
      let mut vsum = 0.0;
      self.pool.for_each_mut(&self.link_segs[k], |seg| {
        let c = seg.c;
        seg.c = if age {
          c + dt / SEC_PER_HOUR
        } else {
          let rate = bulk_rate(c, kb, kinetics.bulk_order, kinetics.limit) + wall_rate(c, d, kw, rc, kinetics.wall_order);
          (c + rate * dt).max(0.0)
        };
        if !age {
          rsum += (seg.c - c).abs() * seg.v;
          reacted += (c - seg.c) * seg.v;
        }
        vsum += seg.v;
      });
      if vsum > 0.0 {
        self.reaction_rates[k] = rsum / vsum / dt;
      }
    }
    self.mass_balance.reacted += reacted;
  }

  /// Drain |q|·dt of water from the leading segments of every link into the
  /// inflow buffers of its downstream node
  fn accumulate(&mut self, network: &Network, dt: f64) {
    self.vol_in.fill(0.0);
    self.mass_in.fill(0.0);
    self.x.fill(0.0);

    // average quality of the segments next to each node, used when nothing flows through it
    for (k, link) in network.links.iter().enumerate() {
      let (up, down) = self.ends(link, k);
      let list = self.link_segs[k];
      if let Some(id) = list.first {
        self.mass_in[down] += self.pool.get(id).c;
        self.vol_in[down] += 1.0;
      }
      if let Some(id) = list.last {
        self.mass_in[up] += self.pool.get(id).c;
        self.vol_in[up] += 1.0;
      }
    }
    for i in 0..self.x.len() {
      if self.vol_in[i] > 0.0 {
        self.x[i] = self.mass_in[i] / self.vol_in[i];
      }
    }

    self.vol_in.fill(0.0);
    self.mass_in.fill(0.0);
    for (k, link) in network.links.iter().enumerate() {
      let (_, down) = self.ends(link, k);
      let mut v = self.flows[k].abs() * dt;
      while v > 0.0 {
        let Some(id) = self.link_segs[k].first else { break };
        let seg = *self.pool.get(id);
        // the last segment gives up whatever is still to be drained
        let vseg = if self.link_segs[k].last == Some(id) { v } else { seg.v.min(v) };
        self.vol_in[down] += vseg;
        self.mass_in[down] += vseg * seg.c;
        v -= vseg;
        if vseg >= seg.v {
          self.pool.pop_front(&mut self.link_segs[k]);
        } else {
          self.pool.get_mut(id).v -= vseg;
        }
      }
    }
  }

  /// Mix the water arriving at each node
  fn update_nodes(&mut self, network: &Network, dt: f64) {
    let trace = matches!(network.options.quality.mode, QualityMode::Trace { .. });
    for (i, node) in network.nodes.iter().enumerate() {
      match (&node.node_type, self.tank_slot[i]) {
        (NodeType::Junction(_), _) => {
          // external inflow carries no constituent
          if self.demands[i] < 0.0 {
            self.vol_in[i] -= self.demands[i] * dt;
          }
          self.quality[i] = if self.vol_in[i] > 0.0 { self.mass_in[i] / self.vol_in[i] } else { self.x[i] };
        }
        (_, None) => {
          self.quality[i] = if trace { 0.0 } else { node.initial_quality };
        }
        (_, Some(_)) => {}
      }
    }
    self.update_tanks(network, dt);
    if let Some(n) = network.trace_node.filter(|_| trace) {
      self.quality[n] = 100.0;
    }
  }

  fn update_tanks(&mut self, network: &Network, dt: f64) {
    let options = &network.options.quality;
    let age = options.mode == QualityMode::Age;
    let reactive = self.reactive;
    let kinetics = self.kinetics;
    let mut reacted = 0.0;
    for t in 0..self.tanks.len() {
      let n = self.tanks[t].node;
      let kb = self.tanks[t].kb;
      let inflow = TankInflow { volume: self.vol_in[n], mass: self.mass_in[n], net: self.demands[n] * dt };
      let react = |c: f64, v: f64| {
        if !reactive {
          return c;
        }
        if age {
          return c + dt / SEC_PER_HOUR;
        }
        let cnew = (c + bulk_rate(c, kb, kinetics.tank_order, kinetics.limit) * dt).max(0.0);
        reacted += (c - cnew) * v;
        cnew
      };
      self.tanks[t].mix(&mut self.pool, inflow, options.tolerance, react);
      self.quality[n] = self.tanks[t].c;
    }
    self.mass_balance.reacted += reacted;
  }

  /// Stage the quality added by each source for the water leaving its node
  fn source_input(&mut self, network: &Network, now: i64, dt: f64) {
    self.x.fill(0.0);
    self.source_mass.fill(0.0);

    if network.options.quality.mode == QualityMode::Chemical {
      let qcutoff = 10.0 * TINY;
      for (n, node) in network.nodes.iter().enumerate() {
        let Some(source) = &node.source else { continue };
        if source.strength == 0.0 {
          continue;
        }
        let volout = if node.is_junction() { self.vol_in[n] } else { self.vol_in[n] - self.demands[n] * dt };
        if volout / dt <= qcutoff {
          continue;
        }
        let s = source_strength(network, source, now);
        let mass = match source.source_type {
          SourceType::Concen if self.demands[n] < 0.0 => {
            if !node.is_junction() {
              self.quality[n] = 0.0;
            }
            -s * self.demands[n] * dt
          }
          SourceType::Concen => 0.0,
          SourceType::Mass => s * dt,
          SourceType::Setpoint if s > self.quality[n] => (s - self.quality[n]) * volout,
          SourceType::Setpoint => 0.0,
          SourceType::FlowPaced => s * volout,
        };
        self.x[n] = mass / volout;
        self.source_mass[n] = mass;
        self.mass_balance.inflow += mass;
      }
    }

    // water leaving reservoirs brings its quality into the network
    for (i, node) in network.nodes.iter().enumerate() {
      if is_reservoir(node, self.tank_slot[i]) {
        let volout = self.vol_in[i] - self.demands[i] * dt;
        if volout > 0.0 {
          self.mass_balance.inflow += volout * self.quality[i];
        }
      }
    }
  }

  /// Start a new segment, or grow the last one, at the upstream end of every link with flow
  fn release(&mut self, network: &Network, dt: f64) {
    let tolerance = network.options.quality.tolerance;
    for (k, link) in network.links.iter().enumerate() {
      let q = self.flows[k];
      if q == 0.0 {
        continue;
      }
      let (up, _) = self.ends(link, k);
      let v = q.abs() * dt;
      let c = self.quality[up] + self.x[up];
      match self.link_segs[k].last {
        Some(id) if (self.pool.get(id).c - c).abs() < tolerance => {
          let seg = self.pool.get_mut(id);
          seg.c = (seg.c * seg.v + c * v) / (seg.v + v);
          seg.v += v;
        }
        Some(_) => {
          self.pool.push_back(&mut self.link_segs[k], v, c);
        }
        // the link was flushed: refill it completely
        None => {
          self.pool.push_back(&mut self.link_segs[k], link.volume(), c);
        }
      }
    }

    for (i, node) in network.nodes.iter().enumerate() {
      if node.is_junction() {
        if self.demands[i] > 0.0 {
          self.mass_balance.outflow += self.demands[i] * dt * (self.quality[i] + self.x[i]);
        }
      } else if is_reservoir(node, self.tank_slot[i]) {
        self.mass_balance.outflow += self.mass_in[i];
      }
    }
  }

  /// Add the staged source quality to the source nodes themselves
  fn update_source_nodes(&mut self, network: &Network, dt: f64) {
    if network.options.quality.mode != QualityMode::Chemical {
      return;
    }
    for (n, node) in network.nodes.iter().enumerate() {
      if node.source.is_none() {
        continue;
      }
      self.quality[n] += self.x[n];
      if let Some(t) = self.tank_slot[n] {
        self.quality[n] = self.tanks[t].c;
      }
      self.source_rates[n] = self.source_mass[n] / dt;
    }
  }
}

fn is_reservoir(node: &Node, tank_slot: Option<usize>) -> bool {
  node.is_fixed() && tank_slot.is_none()
}

/// Source strength in force at time `now`
fn source_strength(network: &Network, source: &Source, now: i64) -> f64 {
  let times = &network.options.times;
  match source.pattern_index {
    Some(p) => source.strength * network.patterns[p].multiplier((now + times.pattern_start) / times.pattern_step.max(1)),
    None => source.strength,
  }
}

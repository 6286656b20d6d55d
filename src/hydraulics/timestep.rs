use hashbrown::HashMap;
use simplelog::debug;

use crate::constants::*;
use crate::hydraulics::HydraulicSolver;
use crate::model::control::{ControlCondition, LinkAction};
use crate::model::link::{LinkStatus, LinkType};
use crate::model::network::Network;
use crate::model::node::NodeType;
use crate::model::rule::{LinkVariable, NodeVariable, PremiseObject, PremiseValue, Relation, Rule};

/// Tolerance used when comparing rule premise values
const RULE_TOLERANCE: f64 = 1e-3;

/// Demands, patterns and controls applied at the start of a step
impl HydraulicSolver {
  /// Current pattern period
  fn pattern_period(&self, network: &Network) -> i64 {
    let times = &network.options.times;
    (self.time + times.pattern_start) / times.pattern_step.max(1)
  }

  /// Junction demands, reservoir heads and pump speeds from their patterns
  pub(crate) fn apply_demands(&mut self, network: &Network) {
    let period = self.pattern_period(network);
    let hydraulics = &network.options.hydraulics;
    let default_pattern = hydraulics.default_pattern.as_ref().and_then(|id| network.pattern_map.get(id).copied());
    let multiplier = |index: Option<usize>| index.map_or(1.0, |i| network.patterns[i].multiplier(period));

    for (i, node) in network.nodes.iter().enumerate() {
      match &node.node_type {
        NodeType::Junction(junction) => {
          self.demands[i] = junction
            .demands
            .iter()
            .map(|d| d.base * multiplier(d.pattern_index.or(default_pattern)) * hydraulics.demand_multiplier)
            .sum();
        }
        NodeType::Reservoir(reservoir) => {
          if reservoir.pattern_index.is_some() {
            self.heads[i] = node.elevation * multiplier(reservoir.pattern_index);
          }
        }
        NodeType::Tank(_) => {}
      }
    }

    for (k, link) in network.links.iter().enumerate() {
      let LinkType::Pump(pump) = &link.link_type else { continue };
      if pump.speed_pattern_index.is_some() {
        let speed = multiplier(pump.speed_pattern_index);
        self.set_pump_speed(k, speed);
      }
    }
  }

  /// A positive speed opens a closed pump, a zero speed closes an open one
  fn set_pump_speed(&mut self, k: usize, speed: f64) {
    self.settings[k] = Some(speed);
    if speed > 0.0 && self.status[k].is_closed() {
      self.status[k] = LinkStatus::Open;
    } else if speed == 0.0 && !self.status[k].is_closed() {
      self.status[k] = LinkStatus::Closed;
    }
  }

  /// Apply tank level, timer and time-of-day controls that hold at the current time
  pub(crate) fn apply_controls(&mut self, network: &Network) {
    let start_clocktime = network.options.times.start_clocktime;
    for control in network.controls.iter() {
      let fire = match control.condition {
        ControlCondition::LowLevel { grade, .. } | ControlCondition::HighLevel { grade, .. } => {
          let Some(node) = control.node_index else { continue };
          let NodeType::Tank(tank) = &network.nodes[node].node_type else { continue };
          if tank.is_reservoir_like() {
            continue;
          }
          let vplus = self.demands[node].abs();
          let v1 = tank.volume(self.heads[node]);
          let v2 = tank.volume(grade);
          match control.condition {
            ControlCondition::LowLevel { .. } => v1 <= v2 + vplus,
            _ => v1 >= v2 - vplus,
          }
        }
        ControlCondition::Timer { time } => time == self.time,
        ControlCondition::TimeOfDay { time } => (self.time + start_clocktime).rem_euclid(SEC_PER_DAY) == time,
      };
      if !fire {
        continue;
      }
      let k = control.action.link_index;
      let (status, setting) = control.action.target(&network.links[k], self.settings[k]);
      if status != self.status[k] || setting != self.settings[k] {
        debug!("Control sets link {} to {:?} at t = {} s", network.links[k].id, status, self.time);
        self.status[k] = status;
        self.settings[k] = setting;
      }
    }
  }
}

/// Time step selection
impl HydraulicSolver {
  /// Length of the next hydraulic step. Moves tank levels forward over it;
  /// the current time itself is left unchanged.
  pub(crate) fn timestep(&mut self, network: &Network) -> i64 {
    let times = &network.options.times;
    let mut tstep = times.hydraulic_step;

    // next pattern boundary
    let pattern_step = times.pattern_step.max(1);
    let n = (self.time + times.pattern_start) / pattern_step + 1;
    let t = n * pattern_step - self.time - times.pattern_start;
    if t > 0 && t < tstep {
      tstep = t;
    }

    // next reporting time
    let t = self.report_time - self.time;
    if t > 0 && t < tstep {
      tstep = t;
    }

    tstep = self.tank_timestep(network, tstep);
    tstep = self.control_timestep(network, tstep);

    if network.rules.is_empty() {
      self.tank_levels(network, tstep);
      tstep
    } else {
      self.rule_timestep(network, tstep)
    }
  }

  /// Shorten the step so no tank overfills or drains
  fn tank_timestep(&self, network: &Network, tstep: i64) -> i64 {
    let mut tstep = tstep;
    for (i, node) in network.nodes.iter().enumerate() {
      let NodeType::Tank(tank) = &node.node_type else { continue };
      if tank.is_reservoir_like() {
        continue;
      }
      let q = self.demands[i];
      if q.abs() <= Q_ZERO {
        continue;
      }
      let h = self.heads[i];
      let v = if q > 0.0 && h < tank.hmax {
        tank.vmax - self.tank_volumes[i]
      } else if q < 0.0 && h > tank.hmin {
        tank.vmin - self.tank_volumes[i]
      } else {
        continue;
      };
      let t = (v / q).round() as i64;
      if t > 0 && t < tstep {
        tstep = t;
      }
    }
    tstep
  }

  /// Shorten the step to the first simple control that would change a link
  fn control_timestep(&self, network: &Network, tstep: i64) -> i64 {
    let mut tstep = tstep;
    let start_clocktime = network.options.times.start_clocktime;
    for control in network.controls.iter() {
      let t = match control.condition {
        ControlCondition::LowLevel { grade, .. } | ControlCondition::HighLevel { grade, .. } => {
          let Some(node) = control.node_index else { continue };
          let NodeType::Tank(tank) = &network.nodes[node].node_type else { continue };
          let (h, q) = (self.heads[node], self.demands[node]);
          if tank.is_reservoir_like() || q.abs() <= Q_ZERO {
            continue;
          }
          let approaching = match control.condition {
            ControlCondition::LowLevel { .. } => h > grade && q < 0.0,
            _ => h < grade && q > 0.0,
          };
          if !approaching {
            continue;
          }
          ((tank.volume(grade) - self.tank_volumes[node]) / q).round() as i64
        }
        ControlCondition::Timer { time } if time > self.time => time - self.time,
        ControlCondition::Timer { .. } => continue,
        ControlCondition::TimeOfDay { time } => {
          let now = (self.time + start_clocktime).rem_euclid(SEC_PER_DAY);
          if time >= now {
            time - now
          } else {
            SEC_PER_DAY - now + time
          }
        }
      };
      let k = control.action.link_index;
      if t > 0 && t < tstep && control.action.changes(&network.links[k], self.status[k], self.settings[k]) {
        tstep = t;
      }
    }
    tstep
  }

  /// Step tank levels forward in rule-step increments, stopping as soon as a
  /// rule fires. Returns the step actually taken.
  fn rule_timestep(&mut self, network: &Network, tstep: i64) -> i64 {
    let rule_step = network.options.times.rule_step;
    let tnow = self.time;
    let tmax = tnow + tstep;
    let (mut dt, mut dt1) = if rule_step <= 0 { (tstep, tstep) } else { (rule_step, rule_step - tnow % rule_step) };
    dt = dt.min(tstep);
    dt1 = dt1.min(tstep);
    if dt1 == 0 {
      dt1 = dt;
    }

    loop {
      self.time += dt1;
      self.tank_levels(network, dt1);
      if self.check_rules(network, dt1) {
        break;
      }
      dt = dt.min(tmax - self.time);
      dt1 = dt;
      if dt <= 0 {
        break;
      }
    }
    let taken = self.time - tnow;
    self.time = tnow;
    taken
  }

  /// Move tank volumes and grades forward by `dt` seconds of net inflow
  pub(crate) fn tank_levels(&mut self, network: &Network, dt: i64) {
    for (i, node) in network.nodes.iter().enumerate() {
      let NodeType::Tank(tank) = &node.node_type else { continue };
      if tank.is_reservoir_like() {
        continue;
      }
      let mut v = self.tank_volumes[i] + self.demands[i] * dt as f64;
      if v + TINY >= tank.vmax {
        v = tank.vmax;
      } else if v - TINY <= tank.vmin {
        v = tank.vmin;
      }
      self.tank_volumes[i] = v;
      self.heads[i] = tank.grade(v);
    }
  }
}

/// Rule-based controls
impl HydraulicSolver {
  /// Evaluate every rule at the current time and take the winning actions.
  /// `dt` is the length of the interval just stepped over. True if any link changed.
  pub(crate) fn check_rules(&mut self, network: &Network, dt: i64) -> bool {
    // link -> (priority, action); a higher priority rule overrides a lower one
    let mut actions: HashMap<usize, (f64, &LinkAction)> = HashMap::new();
    let mut order = Vec::new();
    for rule in network.rules.iter() {
      let results: Vec<bool> = rule.premises.iter().map(|p| self.check_premise(network, &p.object, p.relation, &p.value, dt)).collect();
      let list = if rule.combine(results) { &rule.then_actions } else { &rule.else_actions };
      for action in list.iter() {
        match actions.get_mut(&action.link_index) {
          Some(entry) if rule.priority > entry.0 => *entry = (rule.priority, action),
          Some(_) => {}
          None => {
            actions.insert(action.link_index, (rule.priority, action));
            order.push(action.link_index);
          }
        }
      }
    }

    let mut fired = false;
    for k in order {
      let Some(&(_, action)) = actions.get(&k) else { continue };
      let link = &network.links[k];
      if action.changes(link, self.status[k], self.settings[k]) {
        let (status, setting) = action.target(link, self.settings[k]);
        debug!("Rule action sets link {} to {:?} at t = {} s", link.id, status, self.time);
        self.status[k] = status;
        self.settings[k] = setting;
        fired = true;
      }
    }
    fired
  }

  fn check_premise(&self, network: &Network, object: &PremiseObject, relation: Relation, value: &PremiseValue, dt: i64) -> bool {
    match (object, value) {
      (PremiseObject::Time | PremiseObject::ClockTime, PremiseValue::Number(x)) => {
        let (t1, t2) = match object {
          PremiseObject::Time => (self.time - dt, self.time),
          _ => {
            let start = network.options.times.start_clocktime;
            ((self.time - dt + start).rem_euclid(SEC_PER_DAY), (self.time + start).rem_euclid(SEC_PER_DAY))
          }
        };
        check_time(relation, t1 as f64, t2 as f64, *x)
      }
      (PremiseObject::Node { index, variable, .. }, PremiseValue::Number(x)) => {
        let node = &network.nodes[*index];
        let v = match variable {
          NodeVariable::Head => self.heads[*index],
          NodeVariable::Pressure | NodeVariable::Level => self.heads[*index] - node.elevation,
          NodeVariable::Demand => self.demands[*index],
        };
        relation.compare(v, *x, RULE_TOLERANCE)
      }
      (PremiseObject::Link { index, variable, .. }, PremiseValue::Number(x)) => match variable {
        LinkVariable::Flow => relation.compare(self.flows[*index].abs(), *x, RULE_TOLERANCE),
        LinkVariable::Setting => self.settings[*index].is_some_and(|s| relation.compare(s, *x, RULE_TOLERANCE)),
        LinkVariable::Status => false,
      },
      (PremiseObject::Link { index, .. }, PremiseValue::Status(s)) => {
        relation.compare_status(Rule::normalized_status(self.status[*index]), Rule::normalized_status(*s))
      }
      _ => false,
    }
  }
}

/// Whether a clock premise holds over the interval (t1, t2]
fn check_time(relation: Relation, t1: f64, t2: f64, x: f64) -> bool {
  match relation {
    Relation::Lt => t2 < x,
    Relation::Le => t2 <= x,
    Relation::Gt => t2 > x,
    Relation::Ge => t2 >= x,
    Relation::Eq | Relation::Ne => {
      // the interval may wrap around midnight
      let within = if t2 < t1 { x >= t1 || x <= t2 } else { x >= t1 && x <= t2 };
      within == (relation == Relation::Eq)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clock_premise_matches_within_interval() {
    assert!(check_time(Relation::Eq, 3600.0, 7200.0, 5000.0));
    assert!(!check_time(Relation::Eq, 3600.0, 7200.0, 8000.0));
    // interval wrapping midnight
    assert!(check_time(Relation::Eq, 86000.0, 400.0, 100.0));
    assert!(check_time(Relation::Ne, 86000.0, 400.0, 500.0));
    assert!(check_time(Relation::Ge, 0.0, 7200.0, 7200.0));
  }
}

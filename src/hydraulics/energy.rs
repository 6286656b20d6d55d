use serde::Serialize;

use crate::constants::*;
use crate::hydraulics::HydraulicSolver;
use crate::model::link::LinkType;
use crate::model::network::Network;

/// Energy use of one pump accumulated over a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PumpEnergy {
  pub link: usize,
  pub hours_on_line: f64,
  /// Sum of efficiency x hours
  pub efficiency_hours: f64,
  /// Sum of kW per unit flow x hours
  pub kw_per_flow_hours: f64,
  pub kwh: f64,
  pub peak_kw: f64,
  pub cost: f64,
}

impl PumpEnergy {
  /// Average efficiency while on line (percent)
  pub fn average_efficiency(&self) -> f64 {
    if self.hours_on_line > 0.0 {
      100.0 * self.efficiency_hours / self.hours_on_line
    } else {
      0.0
    }
  }

  /// Average kW per cfs while on line
  pub fn average_kw_per_flow(&self) -> f64 {
    if self.hours_on_line > 0.0 {
      self.kw_per_flow_hours / self.hours_on_line
    } else {
      0.0
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergyTotals {
  pub pumps: Vec<PumpEnergy>,
  /// Peak total pumping demand (kW)
  pub peak_demand: f64,
}

impl EnergyTotals {
  pub fn new(network: &Network) -> Self {
    let pumps = network
      .links
      .iter()
      .enumerate()
      .filter(|(_, l)| l.is_pump())
      .map(|(k, _)| PumpEnergy { link: k, ..Default::default() })
      .collect();
    Self { pumps, peak_demand: 0.0 }
  }

  pub fn reset(&mut self) {
    for pump in self.pumps.iter_mut() {
      *pump = PumpEnergy { link: pump.link, ..Default::default() };
    }
    self.peak_demand = 0.0;
  }
}

impl HydraulicSolver {
  /// Power (kW) drawn by pump `k` and its efficiency (fraction)
  pub fn pump_power(&self, network: &Network, k: usize) -> (f64, f64) {
    let link = &network.links[k];
    let LinkType::Pump(pump) = &link.link_type else { return (0.0, 0.0) };
    if self.status[k].is_closed() {
      return (0.0, 0.0);
    }
    let dh = (self.heads[link.end_node] - self.heads[link.start_node]).abs();
    let q = self.flows[k].abs().max(Q_ZERO);
    let efficiency = match &pump.efficiency {
      Some(curve) => curve.interpolate(q).clamp(1.0, 100.0),
      None => network.options.energy.global_efficiency,
    } / 100.0;
    let kw = dh * q * network.options.hydraulics.specific_gravity / HP_FACTOR / efficiency * KW_PER_HP;
    (kw, efficiency)
  }

  /// Add `step` seconds of pumping at the current solution to the energy totals.
  /// A zero step counts as one hour, for single period runs.
  pub(crate) fn accumulate_energy(&mut self, network: &Network, step: i64) {
    let dt = if network.options.times.duration == 0 { 1.0 } else { step as f64 / SEC_PER_HOUR };
    if dt == 0.0 {
      return;
    }
    let times = &network.options.times;
    let energy = &network.options.energy;
    let period = (self.time + times.pattern_start) / times.pattern_step.max(1);
    let price_factor = |index: Option<usize>| index.map(|i| network.patterns[i].multiplier(period));
    let global_pattern = energy.price_pattern.as_ref().and_then(|id| network.pattern_map.get(id).copied());
    let global_factor = price_factor(global_pattern).unwrap_or(1.0);

    let mut total = 0.0;
    for i in 0..self.energy.pumps.len() {
      let k = self.energy.pumps[i].link;
      let LinkType::Pump(pump) = &network.links[k].link_type else { continue };
      if self.status[k].is_closed() {
        continue;
      }
      let q = self.flows[k].abs().max(Q_ZERO);
      let price = pump.energy_price.filter(|c| *c > 0.0).unwrap_or(energy.global_price);
      let price = price * price_factor(pump.price_pattern_index).unwrap_or(global_factor);
      let (kw, efficiency) = self.pump_power(network, k);
      total += kw;

      let record = &mut self.energy.pumps[i];
      record.hours_on_line += dt;
      record.efficiency_hours += efficiency * dt;
      record.kw_per_flow_hours += kw / q * dt;
      record.kwh += kw * dt;
      record.peak_kw = record.peak_kw.max(kw);
      record.cost += price * kw * dt;
    }
    self.energy.peak_demand = self.energy.peak_demand.max(total);
  }
}

use std::fs::File;
use std::io::BufWriter;

use rmp_serde::Serializer;
use serde::Serialize;

use crate::constants::M_PER_FT;
use crate::error::{EngineError, EngineResult};
use crate::hydraulics::energy::EnergyTotals;
use crate::hydraulics::HydraulicSolver;
use crate::model::link::LinkStatus;
use crate::model::network::{extension, Network};
use crate::model::units::FlowUnits;
use crate::quality::{MassBalance, QualityEngine};

const DIGITS: usize = 3;

// helper function to round to a given number of digits (prevent JSON file bloat due to floating point precision)
fn round_to_digits(value: f64, digits: usize) -> f64 {
  let factor = 10.0_f64.powi(digits as i32);
  (value * factor).round() / factor
}

fn rounded(values: &[f64], factor: f64) -> Vec<f64> {
  values.iter().map(|v| round_to_digits(*v * factor, DIGITS)).collect()
}

/// Results of a simulation, one entry per reporting period
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationResults {
  pub nodes: Vec<Box<str>>,
  pub links: Vec<Box<str>>,
  /// Units of the written flows and demands; heads are written in meters
  /// with metric flow units
  pub flow_units: FlowUnits,
  /// Reporting times (s)
  pub times: Vec<i64>,
  pub heads: Vec<Vec<f64>>,
  pub demands: Vec<Vec<f64>>,
  pub flows: Vec<Vec<f64>>,
  pub statuses: Vec<Vec<LinkStatus>>,
  /// Node water quality; empty without a quality run
  pub node_quality: Vec<Vec<f64>>,
  pub link_quality: Vec<Vec<f64>>,
  pub energy: EnergyTotals,
  pub mass_balance: Option<MassBalance>,
  /// Code of the worst warning raised
  pub warning: Option<i32>,
}

impl SimulationResults {
  pub fn new(network: &Network) -> Self {
    Self {
      nodes: network.nodes.iter().map(|n| n.id.clone()).collect(),
      links: network.links.iter().map(|l| l.id.clone()).collect(),
      flow_units: network.options.flow_units,
      ..Default::default()
    }
  }

  /// Store the state of the engines at time `t`
  pub fn record(&mut self, network: &Network, t: i64, hyd: &HydraulicSolver, qual: Option<&QualityEngine>) {
    self.times.push(t);
    self.heads.push(hyd.heads.clone());
    self.demands.push(hyd.demands.clone());
    self.flows.push(hyd.flows.clone());
    self.statuses.push(hyd.status.clone());
    if let Some(qual) = qual {
      self.node_quality.push(qual.quality.clone());
      self.link_quality.push(qual.link_qualities(network));
    }
  }

  /// Store the run totals
  pub fn finish(&mut self, hyd: &HydraulicSolver, qual: Option<&QualityEngine>) {
    self.energy = hyd.energy.clone();
    self.mass_balance = qual.map(|q| q.mass_balance);
    self.warning = hyd.warning.map(|w| w.code());
  }

  /// Write the results as .json or .mpk/.msgpack in the report units,
  /// rounded to a few digits
  pub fn write(&self, file: &str) -> EngineResult<()> {
    let q = self.flow_units.per_cfs();
    let h = if self.flow_units.is_metric() { M_PER_FT } else { 1.0 };
    let output = Self {
      heads: self.heads.iter().map(|v| rounded(v, h)).collect(),
      demands: self.demands.iter().map(|v| rounded(v, q)).collect(),
      flows: self.flows.iter().map(|v| rounded(v, q)).collect(),
      node_quality: self.node_quality.iter().map(|c| rounded(c, 1.0)).collect(),
      link_quality: self.link_quality.iter().map(|c| rounded(c, 1.0)).collect(),
      ..self.clone()
    };

    let ext = extension(file);
    if !matches!(ext, "json" | "mpk" | "msgpack") {
      return Err(EngineError::invalid(format!("unsupported file extension: {ext}")));
    }
    let writer = BufWriter::new(File::create(file)?);
    if ext == "json" {
      serde_json::to_writer(writer, &output).map_err(std::io::Error::other)?;
    } else {
      let mut serializer = Serializer::new(writer).with_struct_map();
      output.serialize(&mut serializer).map_err(std::io::Error::other)?;
    }
    Ok(())
  }
}

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use simplelog::debug;

use crate::error::{EngineError, EngineResult};
use crate::model::control::{Control, LinkAction};
use crate::model::curve::Curve;
use crate::model::link::{Link, LinkType};
use crate::model::node::{Node, NodeType};
use crate::model::options::{QualityMode, SimulationOptions};
use crate::model::pattern::Pattern;
use crate::model::rule::{PremiseObject, Rule};

/// Pipe network: topology, components, time patterns, curves and controls
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Network {
  #[serde(default)]
  pub options: SimulationOptions,
  pub nodes: Vec<Node>,
  pub links: Vec<Link>,
  #[serde(default)]
  pub patterns: Vec<Pattern>,
  #[serde(default)]
  pub curves: Vec<Curve>,
  #[serde(default)]
  pub controls: Vec<Control>,
  #[serde(default)]
  pub rules: Vec<Rule>,

  #[serde(skip)]
  pub node_map: HashMap<Box<str>, usize>,
  #[serde(skip)]
  pub link_map: HashMap<Box<str>, usize>,
  #[serde(skip)]
  pub pattern_map: HashMap<Box<str>, usize>,
  #[serde(skip)]
  pub curve_map: HashMap<Box<str>, usize>,
  /// Links incident to each node
  #[serde(skip)]
  pub adjacency: Vec<Vec<usize>>,
  /// Node traced when running a source trace analysis
  #[serde(skip)]
  pub trace_node: Option<usize>,
  #[serde(skip)]
  finalized: bool,
}

/// Network methods to add components
impl Network {
  pub fn add_node(&mut self, node: Node) -> EngineResult<()> {
    if self.node_map.contains_key(&node.id) {
      return Err(EngineError::DuplicateId { id: node.id });
    }
    self.node_map.insert(node.id.clone(), self.nodes.len());
    self.nodes.push(node);
    self.finalized = false;
    Ok(())
  }

  pub fn add_link(&mut self, link: Link) -> EngineResult<()> {
    if self.link_map.contains_key(&link.id) {
      return Err(EngineError::DuplicateId { id: link.id });
    }
    self.link_map.insert(link.id.clone(), self.links.len());
    self.links.push(link);
    self.finalized = false;
    Ok(())
  }

  pub fn add_pattern(&mut self, pattern: Pattern) -> EngineResult<()> {
    if self.pattern_map.contains_key(&pattern.id) {
      return Err(EngineError::DuplicateId { id: pattern.id });
    }
    self.pattern_map.insert(pattern.id.clone(), self.patterns.len());
    self.patterns.push(pattern);
    Ok(())
  }

  pub fn add_curve(&mut self, curve: Curve) -> EngineResult<()> {
    if self.curve_map.contains_key(&curve.id) {
      return Err(EngineError::DuplicateId { id: curve.id });
    }
    self.curve_map.insert(curve.id.clone(), self.curves.len());
    self.curves.push(curve);
    Ok(())
  }

  pub fn add_control(&mut self, control: Control) {
    self.controls.push(control);
    self.finalized = false;
  }

  pub fn add_rule(&mut self, rule: Rule) {
    self.rules.push(rule);
    self.finalized = false;
  }
}

/// Counts and lookups
impl Network {
  pub fn is_finalized(&self) -> bool {
    self.finalized
  }

  pub fn node_index(&self, id: &str) -> Option<usize> {
    self.node_map.get(id).copied()
  }

  pub fn link_index(&self, id: &str) -> Option<usize> {
    self.link_map.get(id).copied()
  }

  pub fn junction_count(&self) -> usize {
    self.nodes.iter().filter(|n| n.is_junction()).count()
  }

  pub fn tank_count(&self) -> usize {
    self.nodes.iter().filter(|n| n.is_fixed()).count()
  }

  pub fn pump_count(&self) -> usize {
    self.links.iter().filter(|l| l.is_pump()).count()
  }

  pub fn valve_count(&self) -> usize {
    self.links.iter().filter(|l| l.valve_type().is_some()).count()
  }

  fn pattern_index(&self, id: &Option<Box<str>>) -> EngineResult<Option<usize>> {
    match id {
      None => Ok(None),
      Some(id) => self
        .pattern_map
        .get(id)
        .copied()
        .map(Some)
        .ok_or_else(|| EngineError::UndefinedPattern { pattern: id.clone() }),
    }
  }

  fn curve(&self, id: &Option<Box<str>>) -> EngineResult<Option<Arc<Curve>>> {
    match id {
      None => Ok(None),
      Some(id) => self
        .curve_map
        .get(id)
        .map(|&i| Some(Arc::new(self.curves[i].clone())))
        .ok_or_else(|| EngineError::UndefinedCurve { curve: id.clone() }),
    }
  }
}

/// Preparing a network for simulation
impl Network {
  /// Resolve names to indices, derive tank, pump and valve quantities and
  /// validate the topology. Must be called before a network is simulated.
  pub fn finalize(&mut self) -> EngineResult<()> {
    self.rebuild_maps()?;
    if self.nodes.is_empty() || self.links.is_empty() {
      return Err(EngineError::NoNetwork);
    }
    if !self.nodes.iter().any(|n| n.is_fixed()) {
      return Err(EngineError::invalid("network has no tanks or reservoirs"));
    }

    self.resolve_links()?;
    self.resolve_nodes()?;
    self.resolve_controls()?;
    self.resolve_rules()?;

    self.trace_node = match &self.options.quality.mode {
      QualityMode::Trace { node } => {
        Some(self.node_index(node).ok_or_else(|| EngineError::invalid(format!("undefined trace node {node}")))?)
      }
      _ => None,
    };
    if let Some(id) = &self.options.hydraulics.default_pattern {
      if !self.pattern_map.contains_key(id) {
        return Err(EngineError::UndefinedPattern { pattern: id.clone() });
      }
    }
    self.pattern_index(&self.options.energy.price_pattern.clone())?;

    let mut adjacency = vec![Vec::new(); self.nodes.len()];
    for (i, link) in self.links.iter().enumerate() {
      adjacency[link.start_node].push(i);
      adjacency[link.end_node].push(i);
    }
    self.adjacency = adjacency;
    self.finalized = true;
    debug!(
      "Network finalized: {} junctions, {} tanks and reservoirs, {} links",
      self.junction_count(),
      self.tank_count(),
      self.links.len()
    );
    Ok(())
  }

  fn rebuild_maps(&mut self) -> EngineResult<()> {
    fn build<'a>(ids: impl Iterator<Item = &'a Box<str>>) -> EngineResult<HashMap<Box<str>, usize>> {
      let mut map = HashMap::new();
      for (i, id) in ids.enumerate() {
        if map.insert(id.clone(), i).is_some() {
          return Err(EngineError::DuplicateId { id: id.clone() });
        }
      }
      Ok(map)
    }
    self.node_map = build(self.nodes.iter().map(|n| &n.id))?;
    self.link_map = build(self.links.iter().map(|l| &l.id))?;
    self.pattern_map = build(self.patterns.iter().map(|p| &p.id))?;
    self.curve_map = build(self.curves.iter().map(|c| &c.id))?;
    Ok(())
  }

  fn resolve_links(&mut self) -> EngineResult<()> {
    for i in 0..self.links.len() {
      let link = &self.links[i];
      let lookup = |id: &Box<str>| {
        self.node_map.get(id).copied().ok_or_else(|| EngineError::UndefinedNode { link: link.id.clone(), node: id.clone() })
      };
      let start = lookup(&link.start_node_id)?;
      let end = lookup(&link.end_node_id)?;
      if start == end {
        return Err(EngineError::invalid(format!("link {} connects a node to itself", link.id)));
      }

      let mut link_type = link.link_type.clone();
      match &mut link_type {
        LinkType::Pipe(pipe) => {
          if pipe.diameter <= 0.0 || pipe.length <= 0.0 || pipe.roughness <= 0.0 {
            return Err(EngineError::invalid(format!("pipe {} has non-positive dimensions", link.id)));
          }
        }
        LinkType::Pump(pump) => {
          let head_curve = self.curve(&pump.head_curve)?;
          if !pump.prepare(head_curve) {
            return Err(EngineError::InvalidPumpCurve { pump: link.id.clone() });
          }
          pump.speed_pattern_index = self.pattern_index(&pump.speed_pattern)?;
          pump.price_pattern_index = self.pattern_index(&pump.price_pattern)?;
          pump.efficiency = self.curve(&pump.efficiency_curve)?;
        }
        LinkType::Valve(valve) => {
          valve.headloss_curve = self.curve(&valve.curve)?;
          // pressure and flow control valves cannot sit next to a fixed-grade node
          if valve.is_control_valve() && (self.nodes[start].is_fixed() || self.nodes[end].is_fixed()) {
            return Err(EngineError::invalid(format!("control valve {} is connected to a tank or reservoir", link.id)));
          }
        }
      }

      let link = &mut self.links[i];
      link.link_type = link_type;
      link.start_node = start;
      link.end_node = end;
    }
    Ok(())
  }

  fn resolve_nodes(&mut self) -> EngineResult<()> {
    for i in 0..self.nodes.len() {
      let mut node_type = self.nodes[i].node_type.clone();
      match &mut node_type {
        NodeType::Junction(junction) => {
          for demand in junction.demands.iter_mut() {
            demand.pattern_index = self.pattern_index(&demand.pattern)?;
          }
        }
        NodeType::Reservoir(reservoir) => {
          reservoir.pattern_index = self.pattern_index(&reservoir.head_pattern)?;
        }
        NodeType::Tank(tank) => {
          let curve = self.curve(&tank.volume_curve_id)?;
          if !tank.prepare(self.nodes[i].elevation, curve) {
            return Err(EngineError::InvalidTank { tank: self.nodes[i].id.clone() });
          }
        }
      }
      let source_pattern = match &self.nodes[i].source {
        Some(source) => self.pattern_index(&source.pattern)?,
        None => None,
      };
      let node = &mut self.nodes[i];
      node.node_type = node_type;
      if let Some(source) = node.source.as_mut() {
        source.pattern_index = source_pattern;
      }
    }
    Ok(())
  }

  fn resolve_action(&self, action: &mut LinkAction) -> EngineResult<()> {
    action.link_index = self
      .link_index(&action.link_id)
      .ok_or_else(|| EngineError::invalid(format!("control refers to undefined link {}", action.link_id)))?;
    if !action.is_valid() {
      return Err(EngineError::invalid(format!("control on link {} has neither status nor setting", action.link_id)));
    }
    Ok(())
  }

  fn resolve_controls(&mut self) -> EngineResult<()> {
    let mut controls = std::mem::take(&mut self.controls);
    let resolved = controls.iter_mut().try_for_each(|control| {
      self.resolve_action(&mut control.action)?;
      control.node_index = match control.node_id() {
        Some(id) => Some(self.node_index(id).ok_or_else(|| EngineError::invalid(format!("control refers to undefined node {id}")))?),
        None => None,
      };
      Ok(())
    });
    self.controls = controls;
    resolved
  }

  fn resolve_rules(&mut self) -> EngineResult<()> {
    let mut rules = std::mem::take(&mut self.rules);
    let resolved = rules.iter_mut().try_for_each(|rule| {
      for premise in rule.premises.iter_mut() {
        match &mut premise.object {
          PremiseObject::Node { node_id, index, .. } => {
            *index = self.node_index(node_id).ok_or_else(|| EngineError::invalid(format!("rule {} refers to undefined node {node_id}", rule.id)))?;
          }
          PremiseObject::Link { link_id, index, .. } => {
            *index = self.link_index(link_id).ok_or_else(|| EngineError::invalid(format!("rule {} refers to undefined link {link_id}", rule.id)))?;
          }
          PremiseObject::Time | PremiseObject::ClockTime => {}
        }
      }
      for action in rule.then_actions.iter_mut().chain(rule.else_actions.iter_mut()) {
        self.resolve_action(action)?;
      }
      Ok(())
    });
    self.rules = rules;
    resolved
  }
}

/// Reading and writing network files (.json, .mpk/.msgpack)
impl Network {
  pub fn read_file(&mut self, file: &str) -> EngineResult<()> {
    let reader = BufReader::new(File::open(file)?);
    let network: Network = match extension(file) {
      "json" => serde_json::from_reader(reader).map_err(|e| EngineError::invalid(format!("failed to parse {file}: {e}")))?,
      "mpk" | "msgpack" => rmp_serde::from_read(reader).map_err(|e| EngineError::invalid(format!("failed to parse {file}: {e}")))?,
      other => return Err(EngineError::invalid(format!("unsupported file extension: {other}"))),
    };
    *self = network;
    self.finalize()
  }

  pub fn save_network(&self, file: &str) -> EngineResult<()> {
    let writer = BufWriter::new(File::create(file)?);
    match extension(file) {
      "json" => serde_json::to_writer_pretty(writer, self).map_err(std::io::Error::other)?,
      "mpk" | "msgpack" => {
        let mut serializer = rmp_serde::Serializer::new(writer).with_struct_map();
        self.serialize(&mut serializer).map_err(std::io::Error::other)?;
      }
      other => return Err(EngineError::invalid(format!("unsupported file extension: {other}"))),
    }
    Ok(())
  }
}

pub(crate) fn extension(file: &str) -> &str {
  Path::new(file).extension().and_then(|e| e.to_str()).unwrap_or("")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::pipe::Pipe;

  fn two_node_network() -> Network {
    let mut network = Network::default();
    network.add_node(Node::reservoir("R1", 100.0)).unwrap();
    network.add_node(Node::junction("J1", 90.0, 0.1)).unwrap();
    network.add_link(Link::pipe("P1", "R1", "J1", Pipe::new(1.0, 100.0, 130.0))).unwrap();
    network
  }

  #[test]
  fn finalize_resolves_endpoints() {
    let mut network = two_node_network();
    network.finalize().unwrap();
    assert_eq!(network.links[0].start_node, 0);
    assert_eq!(network.links[0].end_node, 1);
    assert_eq!(network.adjacency[1], vec![0]);
    assert!(network.is_finalized());
  }

  #[test]
  fn duplicate_ids_are_rejected() {
    let mut network = two_node_network();
    let err = network.add_node(Node::junction("J1", 0.0, 0.0)).unwrap_err();
    assert_eq!(err.code(), 215);
  }

  #[test]
  fn undefined_node_is_reported() {
    let mut network = two_node_network();
    network.add_link(Link::pipe("P2", "J1", "J9", Pipe::new(1.0, 100.0, 130.0))).unwrap();
    let err = network.finalize().unwrap_err();
    assert!(matches!(err, EngineError::UndefinedNode { .. }));
    assert_eq!(err.code(), 203);
  }

  #[test]
  fn json_round_trip_keeps_topology() {
    let network = two_node_network();
    let json = serde_json::to_string(&network).unwrap();
    let mut restored: Network = serde_json::from_str(&json).unwrap();
    restored.finalize().unwrap();
    assert_eq!(restored.node_index("J1"), Some(1));
    assert_eq!(restored.links[0].end_node, 1);
  }
}

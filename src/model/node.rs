use serde::{Deserialize, Serialize};

use crate::model::junction::Junction;
use crate::model::reservoir::Reservoir;
use crate::model::source::Source;
use crate::model::tank::Tank;

/// Node struct
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Node {
  pub id: Box<str>,
  pub node_type: NodeType,
  pub elevation: f64,
  /// Initial water quality
  #[serde(default)]
  pub initial_quality: f64,
  /// Water quality source injected at this node
  #[serde(default)]
  pub source: Option<Source>,
  /// Emitter discharge coefficient (cfs per ft^exponent); 0 for none
  #[serde(default)]
  pub emitter_coeff: f64,
}

/// Node types
#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum NodeType {
  Junction(Junction),
  Reservoir(Reservoir),
  Tank(Tank),
}

// helper methods for nodes to check if they are fixed head
impl Node {
  pub fn junction(id: &str, elevation: f64, demand: f64) -> Self {
    Self {
      id: id.into(),
      node_type: NodeType::Junction(Junction::with_demand(demand)),
      elevation,
      initial_quality: 0.0,
      source: None,
      emitter_coeff: 0.0,
    }
  }

  pub fn reservoir(id: &str, head: f64) -> Self {
    Self {
      id: id.into(),
      node_type: NodeType::Reservoir(Reservoir::default()),
      elevation: head,
      initial_quality: 0.0,
      source: None,
      emitter_coeff: 0.0,
    }
  }

  pub fn tank(id: &str, elevation: f64, tank: Tank) -> Self {
    Self {
      id: id.into(),
      node_type: NodeType::Tank(tank),
      elevation,
      initial_quality: 0.0,
      source: None,
      emitter_coeff: 0.0,
    }
  }

  pub fn is_fixed(&self) -> bool {
    matches!(self.node_type, NodeType::Reservoir(_) | NodeType::Tank(_))
  }

  pub fn is_junction(&self) -> bool {
    matches!(self.node_type, NodeType::Junction(_))
  }
}

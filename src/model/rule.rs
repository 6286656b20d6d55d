use serde::{Deserialize, Serialize};

use crate::model::control::LinkAction;
use crate::model::link::LinkStatus;

/// Rule-based control: IF premises THEN actions ELSE actions
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
  pub id: Box<str>,
  #[serde(default)]
  pub priority: f64,
  pub premises: Vec<Premise>,
  pub then_actions: Vec<LinkAction>,
  #[serde(default)]
  pub else_actions: Vec<LinkAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum Logic {
  #[default]
  And,
  Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Relation {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum NodeVariable {
  Head,
  Pressure,
  Demand,
  Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LinkVariable {
  Flow,
  Status,
  Setting,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum PremiseObject {
  Node {
    node_id: Box<str>,
    variable: NodeVariable,
    #[serde(skip)]
    index: usize,
  },
  Link {
    link_id: Box<str>,
    variable: LinkVariable,
    #[serde(skip)]
    index: usize,
  },
  /// Elapsed simulation time (s)
  Time,
  /// Clock time of day (s)
  ClockTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub enum PremiseValue {
  Number(f64),
  Status(LinkStatus),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Premise {
  /// How this premise joins the ones before it (ignored on the first)
  #[serde(default)]
  pub logic: Logic,
  pub object: PremiseObject,
  pub relation: Relation,
  pub value: PremiseValue,
}

impl Relation {
  pub fn compare(&self, lhs: f64, rhs: f64, tol: f64) -> bool {
    match self {
      Relation::Eq => (lhs - rhs).abs() <= tol,
      Relation::Ne => (lhs - rhs).abs() > tol,
      Relation::Lt => lhs < rhs - tol,
      Relation::Le => lhs <= rhs + tol,
      Relation::Gt => lhs > rhs + tol,
      Relation::Ge => lhs >= rhs - tol,
    }
  }

  /// Statuses only compare for (in)equality
  pub fn compare_status(&self, lhs: LinkStatus, rhs: LinkStatus) -> bool {
    match self {
      Relation::Ne => lhs != rhs,
      _ => lhs == rhs,
    }
  }
}

impl Rule {
  /// Combine premise results strictly left to right: OR folds the next result into
  /// the running one, AND requires the running result before moving on
  pub fn combine(&self, results: impl IntoIterator<Item = bool>) -> bool {
    let mut result = true;
    for (i, (premise, next)) in self.premises.iter().zip(results).enumerate() {
      if i > 0 && premise.logic == Logic::Or {
        result = result || next;
      } else if !result {
        return false;
      } else {
        result = next;
      }
    }
    result
  }

  /// Statuses as premises see them: closed, active or open
  pub fn normalized_status(status: LinkStatus) -> LinkStatus {
    match status {
      s if s.is_closed() => LinkStatus::Closed,
      LinkStatus::Active => LinkStatus::Active,
      _ => LinkStatus::Open,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn premise(logic: Logic) -> Premise {
    Premise { logic, object: PremiseObject::Time, relation: Relation::Ge, value: PremiseValue::Number(0.0) }
  }

  #[test]
  fn and_or_chains() {
    let rule = Rule {
      id: "R".into(),
      priority: 0.0,
      premises: vec![premise(Logic::And), premise(Logic::And), premise(Logic::Or)],
      then_actions: vec![],
      else_actions: vec![],
    };
    assert!(rule.combine([true, true, false]));
    assert!(rule.combine([true, false, true]));
    assert!(!rule.combine([true, false, false]));
    assert!(!rule.combine([false, true, false]));

    // OR only folds into the running result
    let rule = Rule { premises: vec![premise(Logic::And), premise(Logic::Or), premise(Logic::And)], ..rule };
    assert!(!rule.combine([true, false, false]));
    assert!(rule.combine([false, true, true]));
  }

  #[test]
  fn relations_respect_tolerance() {
    assert!(Relation::Eq.compare(10.0, 10.0005, 0.001));
    assert!(Relation::Lt.compare(5.0, 10.0, 0.001));
    assert!(!Relation::Gt.compare(10.0, 10.0, 0.001));
    assert!(Relation::Ne.compare_status(LinkStatus::Open, LinkStatus::Closed));
  }
}

use serde::{Deserialize, Serialize};
use crate::constants::TINY;
use crate::model::link::{Link, LinkStatus, LinkType};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub enum ControlCondition {
  /// Head at the node drops to or below the grade (ft)
  LowLevel { node_id: Box<str>, grade: f64 },
  /// Head at the node rises to or above the grade (ft)
  HighLevel { node_id: Box<str>, grade: f64 },
  /// Elapsed simulation time (s)
  Timer { time: i64 },
  /// Clock time of day (s after midnight)
  TimeOfDay { time: i64 },
}

/// New status and/or setting for a link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkAction {
  pub link_id: Box<str>,
  #[serde(default)]
  pub status: Option<LinkStatus>,
  #[serde(default)]
  pub setting: Option<f64>,
  #[serde(skip)]
  pub link_index: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Control {
  pub condition: ControlCondition,
  pub action: LinkAction,
  #[serde(skip)]
  pub node_index: Option<usize>,
}

impl LinkAction {
  pub fn new(link_id: &str, status: Option<LinkStatus>, setting: Option<f64>) -> Self {
    Self { link_id: link_id.into(), status, setting, link_index: 0 }
  }

  /// Status and setting the link ends up with when the action is taken
  pub fn target(&self, link: &Link, current_setting: Option<f64>) -> (LinkStatus, Option<f64>) {
    match (&link.link_type, self.setting, self.status) {
      (LinkType::Pump(_), Some(speed), _) => {
        let status = if speed > 0.0 { LinkStatus::Open } else { LinkStatus::Closed };
        (status, Some(speed))
      }
      (LinkType::Pump(_), None, Some(status)) => {
        let speed = if status.is_closed() { 0.0 } else { current_setting.filter(|s| *s > 0.0).unwrap_or(1.0) };
        (status, Some(speed))
      }
      (LinkType::Valve(_), Some(setting), _) => (LinkStatus::Active, Some(setting)),
      // fixing a valve open or closed cancels its setting
      (LinkType::Valve(_), None, Some(status)) => (status, None),
      (LinkType::Pipe(_), _, Some(status)) => (status, current_setting),
      (_, _, None) => (LinkStatus::Open, current_setting),
    }
  }

  /// Whether taking the action would change the link's state. Pipes only
  /// switch between open and closed; pumps and valves compare both the
  /// status and the setting the action would leave them with.
  pub fn changes(&self, link: &Link, status: LinkStatus, setting: Option<f64>) -> bool {
    match &link.link_type {
      LinkType::Pipe(_) => self.status.is_some_and(|s| s.is_closed() != status.is_closed()),
      LinkType::Pump(_) | LinkType::Valve(_) => {
        let (new_status, new_setting) = self.target(link, setting);
        let setting_differs = match (new_setting, setting) {
          (Some(a), Some(b)) => (a - b).abs() > TINY,
          (None, None) => false,
          _ => true,
        };
        setting_differs || new_status != status
      }
    }
  }

  pub fn is_valid(&self) -> bool {
    self.status.is_some() || self.setting.is_some()
  }
}

impl Control {
  pub fn new(condition: ControlCondition, action: LinkAction) -> Self {
    Self { condition, action, node_index: None }
  }

  pub fn node_id(&self) -> Option<&str> {
    match &self.condition {
      ControlCondition::LowLevel { node_id, .. } | ControlCondition::HighLevel { node_id, .. } => Some(node_id),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::pump::Pump;
  use crate::model::valve::{Valve, ValveType};

  #[test]
  fn pump_actions_set_speed() {
    let link = Link::pump("P1", "A", "B", Pump::with_power(10.0));
    let close = LinkAction::new("P1", Some(LinkStatus::Closed), None);
    assert_eq!(close.target(&link, Some(1.0)), (LinkStatus::Closed, Some(0.0)));
    let speed = LinkAction::new("P1", None, Some(0.8));
    assert_eq!(speed.target(&link, Some(1.0)), (LinkStatus::Open, Some(0.8)));
    assert!(!speed.changes(&link, LinkStatus::Open, Some(0.8)));
  }

  #[test]
  fn valve_setting_makes_it_active() {
    let link = Link::valve("V1", "A", "B", Valve::new(ValveType::PRV, 1.0, None));
    let action = LinkAction::new("V1", None, Some(40.0));
    assert_eq!(action.target(&link, None), (LinkStatus::Active, Some(40.0)));
    let open = LinkAction::new("V1", Some(LinkStatus::Open), None);
    assert_eq!(open.target(&link, Some(40.0)), (LinkStatus::Open, None));
  }

  #[test]
  fn opening_an_active_valve_is_a_change() {
    let link = Link::valve("V1", "A", "B", Valve::new(ValveType::PRV, 1.0, Some(40.0)));
    let open = LinkAction::new("V1", Some(LinkStatus::Open), None);
    assert!(open.changes(&link, LinkStatus::Active, Some(40.0)));
    assert!(!open.changes(&link, LinkStatus::Open, None));
    let same = LinkAction::new("V1", None, Some(40.0));
    assert!(!same.changes(&link, LinkStatus::Active, Some(40.0)));
    assert!(same.changes(&link, LinkStatus::Active, Some(30.0)));
  }

  #[test]
  fn pipes_change_only_between_open_and_closed() {
    let link = Link::pipe("P", "A", "B", crate::model::pipe::Pipe::new(1.0, 100.0, 100.0));
    let close = LinkAction::new("P", Some(LinkStatus::Closed), None);
    assert!(close.changes(&link, LinkStatus::Open, None));
    assert!(!close.changes(&link, LinkStatus::TempClosed, None));
  }
}

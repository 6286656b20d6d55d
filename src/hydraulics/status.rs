//! Link status state machines.
//!
//! Every function here is pure: the new status depends only on the old status,
//! the heads at the link's ends, its flow and its setting.

use crate::model::link::LinkStatus;

/// Head and flow tolerances used to decide status transitions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
  /// ft
  pub head: f64,
  /// cfs
  pub flow: f64,
}

/// Check valve status from the head drop `dh` = h1 - h2 across it
pub fn cv_status(s: LinkStatus, dh: f64, q: f64, tol: &Tolerances) -> LinkStatus {
  if dh.abs() > tol.head {
    if dh < -tol.head || q < -tol.flow {
      LinkStatus::Closed
    } else {
      LinkStatus::Open
    }
  } else if q < -tol.flow {
    LinkStatus::Closed
  } else {
    s
  }
}

/// Pump status from the head gain it is asked to deliver
pub fn pump_status(head_gain: f64, h_max: f64, tol: &Tolerances) -> LinkStatus {
  if head_gain > h_max + tol.head {
    LinkStatus::XHead
  } else {
    LinkStatus::Open
  }
}

/// Pressure reducing valve status. `hset` is the downstream head setpoint and
/// `hml` the head loss of the fully open valve.
pub fn prv_status(s: LinkStatus, hset: f64, h1: f64, h2: f64, q: f64, hml: f64, tol: &Tolerances) -> LinkStatus {
  let htol = tol.head;
  match s {
    LinkStatus::Active => {
      if q < -tol.flow {
        LinkStatus::Closed
      } else if h1 - hml < hset - htol {
        LinkStatus::Open
      } else {
        LinkStatus::Active
      }
    }
    LinkStatus::Open => {
      if q < -tol.flow {
        LinkStatus::Closed
      } else if h2 >= hset + htol {
        LinkStatus::Active
      } else {
        LinkStatus::Open
      }
    }
    LinkStatus::Closed => {
      if h1 >= hset + htol && h2 < hset - htol {
        LinkStatus::Active
      } else if h1 < hset - htol && h1 > h2 + htol {
        LinkStatus::Open
      } else {
        LinkStatus::Closed
      }
    }
    LinkStatus::XPressure if q < -tol.flow => LinkStatus::Closed,
    _ => s,
  }
}

/// Pressure sustaining valve status. `hset` is the upstream head setpoint.
pub fn psv_status(s: LinkStatus, hset: f64, h1: f64, h2: f64, q: f64, hml: f64, tol: &Tolerances) -> LinkStatus {
  let htol = tol.head;
  match s {
    LinkStatus::Active => {
      if q < -tol.flow {
        LinkStatus::Closed
      } else if h2 + hml > hset + htol {
        LinkStatus::Open
      } else {
        LinkStatus::Active
      }
    }
    LinkStatus::Open => {
      if q < -tol.flow {
        LinkStatus::Closed
      } else if h1 < hset - htol {
        LinkStatus::Active
      } else {
        LinkStatus::Open
      }
    }
    LinkStatus::Closed => {
      if h2 > hset + htol && h1 > h2 + htol {
        LinkStatus::Open
      } else if h1 >= hset + htol && h1 > h2 + htol {
        LinkStatus::Active
      } else {
        LinkStatus::Closed
      }
    }
    LinkStatus::XPressure if q < -tol.flow => LinkStatus::Closed,
    _ => s,
  }
}

/// Flow control valve status
pub fn fcv_status(s: LinkStatus, setting: f64, h1: f64, h2: f64, q: f64, tol: &Tolerances) -> LinkStatus {
  if h1 - h2 < -tol.head || q < -tol.flow {
    LinkStatus::XFcv
  } else if s == LinkStatus::XFcv && q >= setting {
    LinkStatus::Active
  } else {
    s
  }
}

/// Which way a link attached to a tank can move water
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TankConnection {
  /// A pump delivering into the tank
  PumpInto,
  /// A pump drawing from the tank
  PumpFrom,
  /// Any other link
  Other,
}

/// Status of a link attached to a tank: temporarily closed when it would fill
/// a full tank or drain an empty one. `q_out` is the flow leaving the tank.
#[allow(clippy::too_many_arguments)]
pub fn tank_status(
  s: LinkStatus,
  connection: TankConnection,
  tank_head: f64,
  other_head: f64,
  q_out: f64,
  hmin: f64,
  hmax: f64,
  tol: &Tolerances,
) -> LinkStatus {
  if s.is_closed() {
    return s;
  }
  let dh = tank_head - other_head;
  let mut status = s;
  if tank_head >= hmax - tol.head {
    let closes = match connection {
      TankConnection::PumpInto => true,
      TankConnection::PumpFrom => false,
      TankConnection::Other => cv_status(LinkStatus::Open, dh, q_out, tol) == LinkStatus::Closed,
    };
    if closes {
      status = LinkStatus::TempClosed;
    }
  }
  if tank_head <= hmin + tol.head {
    let closes = match connection {
      TankConnection::PumpFrom => true,
      TankConnection::PumpInto => false,
      TankConnection::Other => cv_status(LinkStatus::Closed, dh, q_out, tol) == LinkStatus::Open,
    };
    if closes {
      status = LinkStatus::TempClosed;
    }
  }
  status
}

#[cfg(test)]
mod tests {
  use super::*;

  const TOL: Tolerances = Tolerances { head: 0.0005, flow: 0.0001 };

  #[test]
  fn check_valve_closes_on_reverse_head() {
    assert_eq!(cv_status(LinkStatus::Open, -5.0, 1.0, &TOL), LinkStatus::Closed);
    assert_eq!(cv_status(LinkStatus::Closed, 5.0, 0.0, &TOL), LinkStatus::Open);
    // inside the head tolerance only a reverse flow changes the status
    assert_eq!(cv_status(LinkStatus::Closed, 0.0001, 0.0, &TOL), LinkStatus::Closed);
    assert_eq!(cv_status(LinkStatus::Open, 0.0001, -1.0, &TOL), LinkStatus::Closed);
  }

  #[test]
  fn prv_transitions() {
    // open valve whose downstream head exceeds the setpoint becomes active
    assert_eq!(prv_status(LinkStatus::Open, 100.0, 150.0, 120.0, 1.0, 0.0, &TOL), LinkStatus::Active);
    // active valve with upstream head below the setpoint opens fully
    assert_eq!(prv_status(LinkStatus::Active, 100.0, 90.0, 89.0, 1.0, 0.0, &TOL), LinkStatus::Open);
    // reverse flow closes it
    assert_eq!(prv_status(LinkStatus::Active, 100.0, 150.0, 100.0, -1.0, 0.0, &TOL), LinkStatus::Closed);
    assert_eq!(prv_status(LinkStatus::XPressure, 100.0, 150.0, 100.0, 1.0, 0.0, &TOL), LinkStatus::XPressure);
  }

  #[test]
  fn psv_transitions() {
    assert_eq!(psv_status(LinkStatus::Open, 100.0, 90.0, 80.0, 1.0, 0.0, &TOL), LinkStatus::Active);
    assert_eq!(psv_status(LinkStatus::Active, 100.0, 110.0, 105.0, 1.0, 0.0, &TOL), LinkStatus::Open);
    assert_eq!(psv_status(LinkStatus::Closed, 100.0, 120.0, 110.0, 0.0, 0.0, &TOL), LinkStatus::Open);
  }

  #[test]
  fn fcv_cannot_deliver_against_head() {
    assert_eq!(fcv_status(LinkStatus::Active, 1.0, 50.0, 60.0, 1.0, &TOL), LinkStatus::XFcv);
    assert_eq!(fcv_status(LinkStatus::XFcv, 1.0, 60.0, 50.0, 1.5, &TOL), LinkStatus::Active);
    assert_eq!(fcv_status(LinkStatus::XFcv, 1.0, 60.0, 50.0, 0.5, &TOL), LinkStatus::XFcv);
  }

  #[test]
  fn full_tank_closes_filling_link() {
    // water flows into the tank (q_out < 0) while it is full
    let s = tank_status(LinkStatus::Open, TankConnection::Other, 120.0, 125.0, -1.0, 100.0, 120.0, &TOL);
    assert_eq!(s, LinkStatus::TempClosed);
    // draining a full tank is allowed
    let s = tank_status(LinkStatus::Open, TankConnection::Other, 120.0, 110.0, 1.0, 100.0, 120.0, &TOL);
    assert_eq!(s, LinkStatus::Open);
    let s = tank_status(LinkStatus::Open, TankConnection::PumpFrom, 100.0, 150.0, 1.0, 100.0, 120.0, &TOL);
    assert_eq!(s, LinkStatus::TempClosed);
  }

  mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = LinkStatus> {
      (0u8..11).prop_map(|c| LinkStatus::from_code(c).unwrap_or(LinkStatus::Open))
    }

    proptest! {
      #[test]
      fn status_functions_are_pure(
        s in any_status(),
        hset in 0.0f64..200.0,
        h1 in 0.0f64..200.0,
        h2 in 0.0f64..200.0,
        q in -5.0f64..5.0,
        hml in 0.0f64..2.0,
      ) {
        prop_assert_eq!(prv_status(s, hset, h1, h2, q, hml, &TOL), prv_status(s, hset, h1, h2, q, hml, &TOL));
        prop_assert_eq!(psv_status(s, hset, h1, h2, q, hml, &TOL), psv_status(s, hset, h1, h2, q, hml, &TOL));
        prop_assert_eq!(fcv_status(s, hset, h1, h2, q, &TOL), fcv_status(s, hset, h1, h2, q, &TOL));
        prop_assert_eq!(cv_status(s, h1 - h2, q, &TOL), cv_status(s, h1 - h2, q, &TOL));
        prop_assert_eq!(pump_status(h2 - h1, hset, &TOL), pump_status(h2 - h1, hset, &TOL));
      }

      #[test]
      fn check_valve_never_passes_reverse_flow(
        s in any_status(),
        dh in -100.0f64..100.0,
        q in -5.0f64..-0.001,
      ) {
        prop_assert_eq!(cv_status(s, dh, q, &TOL), LinkStatus::Closed);
      }

      #[test]
      fn closed_links_stay_closed_at_tanks(
        th in 0.0f64..200.0,
        oh in 0.0f64..200.0,
        q in -5.0f64..5.0,
      ) {
        let s = tank_status(LinkStatus::Closed, TankConnection::Other, th, oh, q, 50.0, 150.0, &TOL);
        prop_assert_eq!(s, LinkStatus::Closed);
      }
    }
  }
}

//! Tank mixing models.
//!
//! Each model moves one quality sub-step of inflow and outflow through a
//! tank and sets the quality of the water leaving it. `react` is applied to
//! every stored parcel first; it takes a concentration and the volume it
//! occupies and returns the reacted concentration.

use crate::model::tank::MixModel;
use crate::quality::segment::{SegList, SegPool};

/// Water held in a tank during a quality run
#[derive(Debug, Clone, PartialEq)]
pub struct TankState {
  pub node: usize,
  pub mix_model: MixModel,
  /// Stored volume (ft3)
  pub volume: f64,
  /// Quality of the water leaving the tank
  pub c: f64,
  /// Mixing zone volume of a 2-compartment tank
  pub v1max: f64,
  /// Bulk reaction coefficient (1/s)
  pub kb: f64,
  /// Parcels held by 2-compartment, FIFO and LIFO tanks
  pub segs: SegList,
}

/// Flow through a tank over one sub-step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TankInflow {
  /// Volume entering (ft3)
  pub volume: f64,
  /// Mass entering
  pub mass: f64,
  /// Net volume change, inflow minus outflow (ft3)
  pub net: f64,
}

impl TankInflow {
  fn concentration(&self) -> f64 {
    if self.volume > 0.0 {
      self.mass / self.volume
    } else {
      0.0
    }
  }
}

impl TankState {
  /// Build the starting parcels. A 2-compartment tank always gets two of them,
  /// the ambient zone first and the mixing zone last.
  pub fn init_segments(&mut self, pool: &mut SegPool) {
    pool.clear(&mut self.segs);
    match self.mix_model {
      MixModel::CompleteMix => {}
      MixModel::TwoCompartment => {
        let ambient = (self.volume - self.v1max).max(0.0);
        pool.push_back(&mut self.segs, ambient, self.c);
        pool.push_back(&mut self.segs, self.volume - ambient, self.c);
      }
      MixModel::Fifo | MixModel::Lifo => {
        pool.push_back(&mut self.segs, self.volume, self.c);
      }
    }
  }

  /// Mass of water quality constituent stored in the tank
  pub fn mass(&self, pool: &SegPool) -> f64 {
    match self.mix_model {
      MixModel::CompleteMix => self.volume * self.c,
      _ => pool.mass(&self.segs),
    }
  }

  pub fn mix<R: FnMut(f64, f64) -> f64>(&mut self, pool: &mut SegPool, inflow: TankInflow, tolerance: f64, react: R) {
    match self.mix_model {
      MixModel::CompleteMix => complete_mix(self, inflow, react),
      MixModel::TwoCompartment => two_compartment(pool, self, inflow, react),
      MixModel::Fifo => fifo(pool, self, inflow, tolerance, react),
      MixModel::Lifo => lifo(pool, self, inflow, tolerance, react),
    }
  }
}

/// One well mixed volume
pub fn complete_mix<R: FnMut(f64, f64) -> f64>(tank: &mut TankState, inflow: TankInflow, mut react: R) {
  tank.c = react(tank.c, tank.volume);
  let vold = tank.volume;
  tank.volume += inflow.net;
  let cin = inflow.concentration();
  let cmax = tank.c.max(cin);
  if inflow.volume > 0.0 {
    tank.c = (tank.c * vold + inflow.mass) / (vold + inflow.volume);
  }
  tank.c = tank.c.min(cmax).max(0.0);
}

/// A mixing zone of fixed maximum volume feeding a plug flow ambient zone
pub fn two_compartment<R: FnMut(f64, f64) -> f64>(
  pool: &mut SegPool,
  tank: &mut TankState,
  inflow: TankInflow,
  mut react: R,
) {
  let (Some(ambient_id), Some(mixed_id)) = (tank.segs.first, tank.segs.last) else { return };
  if ambient_id == mixed_id {
    return;
  }
  let mut mixed = *pool.get(mixed_id);
  let mut ambient = *pool.get(ambient_id);
  mixed.c = react(mixed.c, mixed.v);
  ambient.c = react(ambient.c, ambient.v);

  let vnet = inflow.net;
  let vin = inflow.volume;
  let cin = inflow.concentration();
  let v1max = tank.v1max;

  // volume moved between the zones
  let mut vt = 0.0;
  if vnet > 0.0 {
    vt = (mixed.v + vnet - v1max).max(0.0);
    if vin > 0.0 {
      mixed.c = (mixed.c * mixed.v + cin * vin) / (mixed.v + vin);
    }
    if vt > 0.0 {
      ambient.c = (ambient.c * ambient.v + mixed.c * vt) / (ambient.v + vt);
    }
  } else if vnet < 0.0 {
    if ambient.v > 0.0 {
      vt = ambient.v.min(-vnet);
    }
    if vin + vt > 0.0 {
      mixed.c = (mixed.c * mixed.v + cin * vin + ambient.c * vt) / (mixed.v + vin + vt);
    }
  }

  if vt > 0.0 {
    mixed.v = v1max;
    if vnet > 0.0 {
      ambient.v += vt;
    } else {
      ambient.v -= vt;
    }
  } else {
    mixed.v = (mixed.v + vnet).min(v1max).max(0.0);
    ambient.v = 0.0;
  }
  tank.volume = (tank.volume + vnet).max(0.0);
  tank.c = mixed.c;

  let m = pool.get_mut(mixed_id);
  m.v = mixed.v;
  m.c = mixed.c;
  let a = pool.get_mut(ambient_id);
  a.v = ambient.v;
  a.c = ambient.c;
}

/// Plug flow: inflow joins the back of the queue, outflow leaves from the front
pub fn fifo<R: FnMut(f64, f64) -> f64>(
  pool: &mut SegPool,
  tank: &mut TankState,
  inflow: TankInflow,
  tolerance: f64,
  mut react: R,
) {
  if tank.segs.is_empty() {
    return;
  }
  pool.for_each_mut(&tank.segs, |seg| seg.c = react(seg.c, seg.v));

  let vin = inflow.volume;
  let cin = inflow.concentration();
  let mut vout = vin - inflow.net;
  tank.volume = (tank.volume + inflow.net).max(0.0);

  let (vsum, csum) = withdraw(pool, &mut tank.segs, &mut vout);
  tank.c = if vsum > 0.0 {
    csum / vsum
  } else {
    tank.segs.first.map_or(tank.c, |id| pool.get(id).c)
  };

  if vin > 0.0 {
    match tank.segs.last {
      Some(id) if (pool.get(id).c - cin).abs() < tolerance => {
        let seg = pool.get_mut(id);
        seg.c = (seg.c * seg.v + cin * vin) / (seg.v + vin);
        seg.v += vin;
      }
      _ => {
        pool.push_back(&mut tank.segs, vin, cin);
      }
    }
  }
}

/// Stacked layers: inflow and outflow both use the top of the stack, which
/// is the front of the list
pub fn lifo<R: FnMut(f64, f64) -> f64>(
  pool: &mut SegPool,
  tank: &mut TankState,
  inflow: TankInflow,
  tolerance: f64,
  mut react: R,
) {
  let Some(top) = tank.segs.first else { return };
  pool.for_each_mut(&tank.segs, |seg| seg.c = react(seg.c, seg.v));

  let vin = inflow.volume;
  let cin = inflow.concentration();
  let vnet = inflow.net;
  tank.volume = (tank.volume + vnet).max(0.0);
  tank.c = pool.get(top).c;

  if vnet > 0.0 {
    let seg = pool.get_mut(top);
    if (seg.c - cin).abs() < tolerance {
      seg.c = (seg.c * seg.v + cin * vnet) / (seg.v + vnet);
      seg.v += vnet;
    } else {
      pool.push_front(&mut tank.segs, vnet, cin);
    }
    if let Some(id) = tank.segs.first {
      tank.c = pool.get(id).c;
    }
  } else if vnet < 0.0 {
    let mut vout = -vnet;
    let (vsum, csum) = withdraw(pool, &mut tank.segs, &mut vout);
    if vsum + vin > 0.0 {
      tank.c = (csum + inflow.mass) / (vsum + vin);
    }
  }
}

/// Take `vout` from the front of a list, consuming whole parcels as needed.
/// The final parcel only shrinks, so the list is never emptied. Returns the
/// volume withdrawn and its mass.
fn withdraw(pool: &mut SegPool, list: &mut SegList, vout: &mut f64) -> (f64, f64) {
  let mut vsum = 0.0;
  let mut csum = 0.0;
  while *vout > 0.0 {
    let Some(id) = list.first else { break };
    let is_last = list.last == Some(id);
    let seg = pool.get_mut(id);
    let vseg = if is_last { *vout } else { seg.v.min(*vout) };
    vsum += vseg;
    csum += seg.c * vseg;
    *vout -= vseg;
    if is_last {
      seg.v = (seg.v - vseg).max(0.0);
    } else if vseg >= seg.v {
      pool.pop_front(list);
    } else {
      seg.v -= vseg;
    }
  }
  (vsum, csum)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tank(model: MixModel, volume: f64, c: f64) -> TankState {
    TankState { node: 0, mix_model: model, volume, c, v1max: volume, kb: 0.0, segs: SegList::default() }
  }

  fn no_reaction(c: f64, _v: f64) -> f64 {
    c
  }

  #[test]
  fn complete_mix_blends_inflow() {
    let mut t = tank(MixModel::CompleteMix, 100.0, 1.0);
    complete_mix(&mut t, TankInflow { volume: 100.0, mass: 300.0, net: 50.0 }, no_reaction);
    assert_eq!(t.volume, 150.0);
    assert!((t.c - 2.0).abs() < 1e-12);
  }

  #[test]
  fn complete_mix_applies_reaction_first() {
    let mut t = tank(MixModel::CompleteMix, 100.0, 1.0);
    complete_mix(&mut t, TankInflow::default(), |c, _| c * 0.5);
    assert_eq!(t.c, 0.5);
  }

  #[test]
  fn fifo_releases_oldest_water_first() {
    let mut pool = SegPool::new(100);
    let mut t = tank(MixModel::Fifo, 100.0, 1.0);
    t.init_segments(&mut pool);
    // steady throughflow of 40 ft3 of new water per step
    let inflow = TankInflow { volume: 40.0, mass: 40.0 * 5.0, net: 0.0 };
    fifo(&mut pool, &mut t, inflow, 0.01, no_reaction);
    assert_eq!(t.c, 1.0);
    fifo(&mut pool, &mut t, inflow, 0.01, no_reaction);
    assert_eq!(t.c, 1.0);
    // the third withdrawal reaches past the old water
    fifo(&mut pool, &mut t, inflow, 0.01, no_reaction);
    assert!((t.c - (20.0 * 1.0 + 20.0 * 5.0) / 40.0).abs() < 1e-12);
    fifo(&mut pool, &mut t, inflow, 0.01, no_reaction);
    assert_eq!(t.c, 5.0);
    assert!((pool.volume(&t.segs) - 100.0).abs() < 1e-9);
  }

  #[test]
  fn lifo_returns_newest_water() {
    let mut pool = SegPool::new(100);
    let mut t = tank(MixModel::Lifo, 100.0, 1.0);
    t.init_segments(&mut pool);
    lifo(&mut pool, &mut t, TankInflow { volume: 50.0, mass: 150.0, net: 50.0 }, 0.01, no_reaction);
    assert_eq!(t.c, 3.0);
    assert_eq!(pool.len(&t.segs), 2);
    // draining 30 ft3 comes off the layer just added
    lifo(&mut pool, &mut t, TankInflow { volume: 0.0, mass: 0.0, net: -30.0 }, 0.01, no_reaction);
    assert_eq!(t.c, 3.0);
    assert!((t.volume - 120.0).abs() < 1e-12);
    // the next 40 ft3 takes the rest of that layer and 20 ft3 of the original water
    lifo(&mut pool, &mut t, TankInflow { volume: 0.0, mass: 0.0, net: -40.0 }, 0.01, no_reaction);
    assert!((t.c - (20.0 * 3.0 + 20.0 * 1.0) / 40.0).abs() < 1e-12);
    assert_eq!(pool.len(&t.segs), 1);
  }

  #[test]
  fn two_compartment_overflows_into_ambient_zone() {
    let mut pool = SegPool::new(100);
    let mut t = tank(MixModel::TwoCompartment, 100.0, 0.0);
    t.v1max = 100.0;
    t.init_segments(&mut pool);
    assert_eq!(pool.len(&t.segs), 2);
    two_compartment(&mut pool, &mut t, TankInflow { volume: 50.0, mass: 100.0, net: 50.0 }, no_reaction);
    let ambient = *pool.get(t.segs.first.unwrap());
    let mixed = *pool.get(t.segs.last.unwrap());
    assert_eq!(mixed.v, 100.0);
    assert_eq!(ambient.v, 50.0);
    assert!((mixed.c - 100.0 / 150.0).abs() < 1e-12);
    assert_eq!(t.c, mixed.c);
    assert_eq!(t.volume, 150.0);
  }
}

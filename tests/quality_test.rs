//! Integration tests for the water quality engine

use proptest::prelude::*;

use epanet_engine::constants::{SEC_PER_DAY, SEC_PER_HOUR};
use epanet_engine::error::EngineError;
use epanet_engine::hydraulics::InitFlags;
use epanet_engine::model::link::Link;
use epanet_engine::model::network::Network;
use epanet_engine::model::node::Node;
use epanet_engine::model::options::QualityMode;
use epanet_engine::model::pipe::Pipe;
use epanet_engine::model::source::{Source, SourceType};
use epanet_engine::model::tank::{MixModel, Tank};
use epanet_engine::project::Project;

/// Reservoir at quality `c0` feeding a junction through a single pipe of
/// 785.4 ft3, 12 hours at a one minute quality step
fn pipe_network(mode: QualityMode, c0: f64, demand: f64) -> Network {
  let mut network = Network::default();
  network.options.times.duration = 12 * 3600;
  network.options.times.quality_step = 60;
  network.options.quality.mode = mode;
  network.options.quality.tolerance = 1e-6;
  let mut reservoir = Node::reservoir("R", 100.0);
  reservoir.initial_quality = c0;
  network.add_node(reservoir).unwrap();
  network.add_node(Node::junction("J", 0.0, demand)).unwrap();
  network.add_link(Link::pipe("P", "R", "J", Pipe::new(1.0, 1000.0, 100.0))).unwrap();
  network
}

/// Reservoir at quality 2 filling a tank of 31416 ft3 at quality 1 that
/// drains 1 cfs into a junction
fn tank_network(mix_model: MixModel) -> Network {
  let mut network = Network::default();
  network.options.times.duration = 12 * 3600;
  network.options.times.quality_step = 60;
  network.options.quality.mode = QualityMode::Chemical;
  let mut reservoir = Node::reservoir("R", 120.0);
  reservoir.initial_quality = 2.0;
  network.add_node(reservoir).unwrap();
  let mut tank = Node::tank("T", 0.0, Tank { mix_model, mix_fraction: 0.5, ..Tank::cylinder(100.0, 0.0, 200.0, 20.0) });
  tank.initial_quality = 1.0;
  network.add_node(tank).unwrap();
  network.add_node(Node::junction("J", 0.0, 1.0)).unwrap();
  network.add_link(Link::pipe("P1", "R", "T", Pipe::new(0.5, 5000.0, 120.0))).unwrap();
  network.add_link(Link::pipe("P2", "T", "J", Pipe::new(1.0, 1000.0, 120.0))).unwrap();
  network
}

fn travel_time(network: &Network, demand: f64) -> f64 {
  network.links[0].volume() / demand
}

#[test]
fn test_first_order_decay_along_a_pipe() {
  let kb = -0.5 / SEC_PER_DAY as f64;
  let mut network = pipe_network(QualityMode::Chemical, 1.0, 0.2);
  network.options.quality.global_bulk = kb;
  let mut project = Project::new(network).unwrap();
  let results = project.run_simulation(true).unwrap();

  let travel = travel_time(&project.network, 0.2);
  let expected = (kb * travel).exp();
  let j = project.network.node_index("J").unwrap();
  for (t, quality) in results.times.iter().zip(results.node_quality.iter()) {
    if (*t as f64) < travel - 60.0 {
      // still draining the water that filled the pipe at the start
      assert_eq!(quality[j], 0.0, "t = {t}");
    } else if (*t as f64) > travel + 120.0 {
      assert!((quality[j] - expected).abs() < 2e-3, "t = {t}: {} vs {expected}", quality[j]);
    }
  }

  let balance = results.mass_balance.unwrap();
  assert!(balance.reacted > 0.0);
  assert!((balance.ratio() - 1.0).abs() < 1e-3, "mass balance {balance:?}");
}

#[test]
fn test_water_age_matches_travel_time() {
  let mut project = Project::new(pipe_network(QualityMode::Age, 0.0, 0.2)).unwrap();
  let results = project.run_simulation(true).unwrap();
  let hours = travel_time(&project.network, 0.2) / SEC_PER_HOUR;
  let j = project.network.node_index("J").unwrap();
  let age = results.node_quality.last().unwrap()[j];
  assert!((age - hours).abs() < 0.05, "age {age} h vs travel time {hours} h");
}

#[test]
fn test_source_trace_reaches_downstream_node() {
  let mode = QualityMode::Trace { node: "R".into() };
  let mut project = Project::new(pipe_network(mode, 0.0, 0.2)).unwrap();
  let results = project.run_simulation(true).unwrap();
  let r = project.network.node_index("R").unwrap();
  let j = project.network.node_index("J").unwrap();
  assert_eq!(results.node_quality[1][j], 0.0);
  let last = results.node_quality.last().unwrap();
  assert!((last[j] - 100.0).abs() < 1e-6);
  assert_eq!(last[r], 100.0);
}

#[test]
fn test_setpoint_booster_raises_downstream_quality() {
  let mut network = Network::default();
  network.options.times.duration = 12 * 3600;
  network.options.times.quality_step = 60;
  network.options.quality.mode = QualityMode::Chemical;
  network.add_node(Node::reservoir("R", 100.0)).unwrap();
  let mut booster = Node::junction("J1", 0.0, 0.0);
  booster.source = Some(Source::new(SourceType::Setpoint, 1.5));
  network.add_node(booster).unwrap();
  network.add_node(Node::junction("J2", 0.0, 0.2)).unwrap();
  network.add_link(Link::pipe("P1", "R", "J1", Pipe::new(1.0, 500.0, 100.0))).unwrap();
  network.add_link(Link::pipe("P2", "J1", "J2", Pipe::new(1.0, 500.0, 100.0))).unwrap();

  let mut project = Project::new(network).unwrap();
  let results = project.run_simulation(true).unwrap();
  let j2 = project.network.node_index("J2").unwrap();
  let last = results.node_quality.last().unwrap();
  assert!((last[j2] - 1.5).abs() < 1e-6);
  let p2 = project.network.link_index("P2").unwrap();
  assert!((results.link_quality.last().unwrap()[p2] - 1.5).abs() < 1e-6);

  let qual = project.quality().unwrap();
  let j1 = project.network.node_index("J1").unwrap();
  assert!((qual.source_rates[j1] - 1.5 * 0.2).abs() < 1e-6);
  let balance = results.mass_balance.unwrap();
  assert!(balance.inflow > 0.0);
  assert!((balance.ratio() - 1.0).abs() < 1e-3, "mass balance {balance:?}");
}

#[test]
fn test_fifo_tank_releases_stored_water_first() {
  let mut project = Project::new(tank_network(MixModel::Fifo)).unwrap();
  let results = project.run_simulation(true).unwrap();
  let network = &project.network;
  let t = network.node_index("T").unwrap();
  let stored = std::f64::consts::PI * 100.0 * 100.0;
  // the inlet pipe starts out holding tank water too
  let displaced = stored + network.links[0].volume();

  for (time, quality) in results.times.iter().zip(results.node_quality.iter()) {
    // outflow is a steady 1 cfs
    let withdrawn = *time as f64;
    if withdrawn < stored - 600.0 {
      assert!((quality[t] - 1.0).abs() < 1e-9, "t = {time}: {}", quality[t]);
    } else if withdrawn > displaced + 600.0 {
      assert!((quality[t] - 2.0).abs() < 1e-9, "t = {time}: {}", quality[t]);
    }
  }
  assert!((results.node_quality.last().unwrap()[t] - 2.0).abs() < 1e-9);

  let qual = project.quality().unwrap();
  let hyd = project.hydraulics().unwrap();
  let volume = qual.tank_volume(t).unwrap();
  assert!((volume - hyd.tank_volumes[t]).abs() < 1e-3, "{volume} vs {}", hyd.tank_volumes[t]);
}

#[test]
fn test_tank_mixing_models_conserve_mass() {
  for mix_model in [MixModel::CompleteMix, MixModel::TwoCompartment, MixModel::Fifo, MixModel::Lifo] {
    let mut project = Project::new(tank_network(mix_model)).unwrap();
    let results = project.run_simulation(true).unwrap();
    let balance = results.mass_balance.unwrap();
    assert!((balance.ratio() - 1.0).abs() < 1e-3, "{mix_model:?}: {balance:?}");

    // tank quality always lies between the two sources
    let t = project.network.node_index("T").unwrap();
    for quality in results.node_quality.iter() {
      assert!(quality[t] >= 1.0 - 1e-9 && quality[t] <= 2.0 + 1e-9, "{mix_model:?}: {}", quality[t]);
    }
  }
}

#[test]
fn test_complete_mix_tank_dilutes_gradually() {
  let mut project = Project::new(tank_network(MixModel::CompleteMix)).unwrap();
  let results = project.run_simulation(true).unwrap();
  let t = project.network.node_index("T").unwrap();
  let tank_quality: Vec<f64> = results.node_quality.iter().map(|q| q[t]).collect();
  assert_eq!(tank_quality[0], 1.0);
  assert!(tank_quality.windows(2).all(|w| w[1] >= w[0] - 1e-12));
  assert!(*tank_quality.last().unwrap() > 1.0 && *tank_quality.last().unwrap() < 2.0);
}

#[test]
fn test_saved_hydraulics_give_the_same_quality() {
  let mut tandem = Project::new(tank_network(MixModel::CompleteMix)).unwrap();
  let results = tandem.run_simulation(true).unwrap();

  let mut saved = Project::new(tank_network(MixModel::CompleteMix)).unwrap();
  saved.solve_h().unwrap();
  saved.solve_q().unwrap();
  let qual = saved.quality().unwrap();
  assert_eq!(qual.time, 12 * 3600);
  for (a, b) in qual.quality.iter().zip(results.node_quality.last().unwrap().iter()) {
    assert!((a - b).abs() < 1e-4, "{a} vs {b}");
  }
}

#[test]
fn test_quality_steps_match_hydraulic_steps() {
  let mut by_interval = Project::new(tank_network(MixModel::Fifo)).unwrap();
  by_interval.solve_h().unwrap();
  by_interval.solve_q().unwrap();

  let mut by_step = Project::new(tank_network(MixModel::Fifo)).unwrap();
  by_step.solve_h().unwrap();
  by_step.open_q().unwrap();
  by_step.init_q().unwrap();
  by_step.run_q().unwrap();
  let mut steps = 0;
  loop {
    let left = by_step.step_q().unwrap();
    steps += 1;
    if left == 0 {
      break;
    }
  }
  assert_eq!(steps, 12 * 3600 / 60);

  let a = by_interval.quality().unwrap();
  let b = by_step.quality().unwrap();
  assert_eq!(b.time, a.time);
  for (x, y) in a.quality.iter().zip(b.quality.iter()) {
    assert!((x - y).abs() < 1e-9, "{x} vs {y}");
  }
}

#[test]
fn test_segment_pool_exhaustion_is_reported() {
  let mut network = pipe_network(QualityMode::Chemical, 1.0, 0.2);
  network.options.quality.global_bulk = -1.0 / SEC_PER_DAY as f64;
  network.options.quality.tolerance = 0.0;
  network.options.quality.segment_limit = 3;

  let mut project = Project::new(network).unwrap();
  project.open_h().unwrap();
  project.init_h(InitFlags::default()).unwrap();
  project.open_q().unwrap();
  project.init_q().unwrap();
  project.run_h().unwrap();
  project.run_q().unwrap();
  project.next_h().unwrap();
  let err = project.next_q().unwrap_err();
  assert!(matches!(err, EngineError::OutOfMemory));
  assert_eq!(err.code(), 101);
  assert!(matches!(project.next_q(), Err(EngineError::OutOfMemory)));
  assert!(project.quality().unwrap().segment_count() <= 3);

  // the hydraulics carry on regardless
  assert_eq!(project.run_h().unwrap(), 3600);
}

#[test]
fn test_quality_without_hydraulics_is_refused() {
  let mut project = Project::new(pipe_network(QualityMode::Chemical, 1.0, 0.2)).unwrap();
  assert!(matches!(project.open_q(), Err(EngineError::NoHydraulicsForQuality)));
  assert!(matches!(project.run_q(), Err(EngineError::QualityNotOpened)));
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(16))]

  #[test]
  fn test_segments_always_fill_their_pipe(
    demand in 0.02f64..0.6,
    quality_step in prop::sample::select(vec![30i64, 60, 300, 900]),
    tolerance in prop::sample::select(vec![0.0, 1e-6, 0.01]),
  ) {
    let mut network = tank_network(MixModel::Lifo);
    network.options.times.quality_step = quality_step;
    network.options.quality.tolerance = tolerance;
    network.options.quality.global_bulk = -0.3 / SEC_PER_DAY as f64;
    if let Some(j) = network.nodes.iter_mut().find(|n| &*n.id == "J") {
      *j = Node::junction("J", 0.0, demand);
    }
    let mut project = Project::new(network).unwrap();
    project.run_simulation(true).unwrap();

    let qual = project.quality().unwrap();
    for (k, link) in project.network.links.iter().enumerate() {
      let volume = link.volume();
      prop_assert!((qual.link_segment_volume(k) - volume).abs() <= 1e-6 * volume);
    }
  }
}

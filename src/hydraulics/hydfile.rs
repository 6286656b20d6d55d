//! Hydraulics scratch file.
//!
//! Little-endian layout: a header of magic number, version and six `i32`
//! counts (nodes, links, tanks, pumps, valves, duration); then for every
//! solved step an `i32` time, `f32` arrays of demands, heads, flows, status
//! codes and settings, followed by the `i32` length of the step. A zero step
//! ends the file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::model::link::LinkStatus;
use crate::model::network::Network;

pub const MAGIC: i32 = 516_114_521;
pub const VERSION: i32 = 20012;

/// Stored in place of a setting when none is in force
const MISSING: f32 = -1e10;

/// One solved hydraulic step
#[derive(Debug, Clone, PartialEq)]
pub struct HydSnapshot {
  pub time: i64,
  pub demands: Vec<f64>,
  pub heads: Vec<f64>,
  pub flows: Vec<f64>,
  pub status: Vec<LinkStatus>,
  pub settings: Vec<Option<f64>>,
  /// Time until the next hydraulic event (0 at the end of the run)
  pub step: i64,
}

fn header(network: &Network) -> [i32; 8] {
  [
    MAGIC,
    VERSION,
    network.nodes.len() as i32,
    network.links.len() as i32,
    network.tank_count() as i32,
    network.pump_count() as i32,
    network.valve_count() as i32,
    network.options.times.duration as i32,
  ]
}

#[derive(Debug)]
pub struct HydFileWriter {
  writer: BufWriter<File>,
}

impl HydFileWriter {
  pub fn create(path: &Path, network: &Network) -> EngineResult<Self> {
    let mut writer = BufWriter::new(File::create(path)?);
    for value in header(network) {
      writer.write_all(&value.to_le_bytes())?;
    }
    Ok(Self { writer })
  }

  /// Write the solution at `snapshot.time`; its step is written separately
  pub fn write_step(&mut self, snapshot: &HydSnapshot) -> EngineResult<()> {
    self.writer.write_all(&(snapshot.time as i32).to_le_bytes())?;
    let statuses = snapshot.status.iter().map(|s| s.code() as f64);
    let settings = snapshot.settings.iter().map(|s| s.map_or(MISSING as f64, |v| v));
    let values = snapshot
      .demands
      .iter()
      .chain(snapshot.heads.iter())
      .chain(snapshot.flows.iter())
      .copied()
      .chain(statuses)
      .chain(settings);
    for value in values {
      self.writer.write_all(&(value as f32).to_le_bytes())?;
    }
    Ok(())
  }

  pub fn write_timestep(&mut self, step: i64) -> EngineResult<()> {
    self.writer.write_all(&(step as i32).to_le_bytes())?;
    Ok(())
  }

  pub fn flush(&mut self) -> EngineResult<()> {
    self.writer.flush()?;
    Ok(())
  }
}

#[derive(Debug)]
pub struct HydFileReader {
  reader: BufReader<File>,
  nodes: usize,
  links: usize,
}

impl HydFileReader {
  /// Open a scratch file and check that it was written for `network`
  pub fn open(path: &Path, network: &Network) -> EngineResult<Self> {
    let file = File::open(path).map_err(|_| EngineError::NoHydraulicsForQuality)?;
    let mut reader = Self { reader: BufReader::new(file), nodes: network.nodes.len(), links: network.links.len() };
    let expected = header(network);
    let magic = reader.read_i32()?;
    if magic != MAGIC {
      return Err(EngineError::HydFileInvalid { what: format!("bad magic number {magic}") });
    }
    for &value in expected[1..].iter() {
      if reader.read_i32()? != value {
        return Err(EngineError::HydFileMismatch);
      }
    }
    Ok(reader)
  }

  /// Read the next solved step together with the step that follows it
  pub fn read_step(&mut self) -> EngineResult<HydSnapshot> {
    let time = self.read_i32()? as i64;
    let demands = self.read_f32s(self.nodes)?;
    let heads = self.read_f32s(self.nodes)?;
    let flows = self.read_f32s(self.links)?;
    let status = self
      .read_f32s(self.links)?
      .into_iter()
      .map(|c| LinkStatus::from_code(c as u8).ok_or_else(|| EngineError::HydFileInvalid { what: format!("bad status code {c}") }))
      .collect::<EngineResult<Vec<_>>>()?;
    let settings = self
      .read_f32s(self.links)?
      .into_iter()
      .map(|s| if s as f32 == MISSING { None } else { Some(s) })
      .collect();
    let step = self.read_i32()? as i64;
    Ok(HydSnapshot { time, demands, heads, flows, status, settings, step })
  }

  fn read_i32(&mut self) -> EngineResult<i32> {
    let mut buf = [0u8; 4];
    self.reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(i32::from_le_bytes(buf))
  }

  fn read_f32s(&mut self, n: usize) -> EngineResult<Vec<f64>> {
    let mut buf = vec![0u8; 4 * n];
    self.reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64).collect())
  }
}

fn truncated(e: std::io::Error) -> EngineError {
  match e.kind() {
    std::io::ErrorKind::UnexpectedEof => EngineError::HydFileInvalid { what: "unexpected end of file".into() },
    _ => EngineError::Io(e),
  }
}

//! A network together with the engines that simulate it.
//!
//! The hydraulic and water quality engines are driven step by step through
//! the `*_h` and `*_q` calls, in the order `open`, `init`, then `run`/`next`
//! (or `step`) until the time step returned is zero, then `close`. Water
//! quality reads the hydraulic solution straight from memory while the
//! hydraulics are initialized, and from the scratch file otherwise.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use simplelog::{debug, info, warn};

use crate::error::{EngineError, EngineResult, Warning};
use crate::hydraulics::{HydraulicSolver, InitFlags};
use crate::model::network::Network;
use crate::output::SimulationResults;
use crate::quality::{HydSource, QualityEngine};

static PROJECT_COUNT: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
pub struct Project {
  pub network: Network,
  hyd: Option<HydraulicSolver>,
  qual: Option<QualityEngine>,
  hydfile: PathBuf,
  /// Remove the scratch file when the project is dropped
  owns_hydfile: bool,
}

impl Project {
  /// Wrap a network, finalizing it first if needed. The hydraulics scratch
  /// file goes to the system temporary directory.
  pub fn new(mut network: Network) -> EngineResult<Self> {
    if !network.is_finalized() {
      network.finalize()?;
    }
    let n = PROJECT_COUNT.fetch_add(1, Ordering::Relaxed);
    let hydfile = std::env::temp_dir().join(format!("epanet-engine-{}-{}.hyd", std::process::id(), n));
    Ok(Self { network, hyd: None, qual: None, hydfile, owns_hydfile: true })
  }

  /// Use `path` for the hydraulics scratch file
  pub fn with_hydfile(mut self, path: impl AsRef<Path>) -> Self {
    self.hydfile = path.as_ref().to_path_buf();
    self.owns_hydfile = false;
    self
  }

  pub fn hydfile(&self) -> &Path {
    &self.hydfile
  }

  pub fn hydraulics(&self) -> Option<&HydraulicSolver> {
    self.hyd.as_ref()
  }

  pub fn quality(&self) -> Option<&QualityEngine> {
    self.qual.as_ref()
  }

  /// Worst warning raised by the hydraulics since they were last initialized
  pub fn warning(&self) -> Option<Warning> {
    self.hyd.as_ref().and_then(|h| h.warning)
  }

  fn hyd_mut(&mut self) -> EngineResult<&mut HydraulicSolver> {
    self.hyd.as_mut().ok_or(EngineError::HydraulicsNotOpened)
  }
}

/// Quality follows the hydraulics in memory while they are initialized
fn hydraulic_source(hyd: &Option<HydraulicSolver>) -> HydSource<'_> {
  match hyd.as_ref() {
    Some(h) if h.is_initialized() => HydSource::Memory(h),
    _ => HydSource::File,
  }
}

/// Hydraulics
impl Project {
  pub fn open_h(&mut self) -> EngineResult<()> {
    self.hyd = Some(HydraulicSolver::open(&self.network)?);
    Ok(())
  }

  pub fn init_h(&mut self, flags: InitFlags) -> EngineResult<()> {
    let hyd = self.hyd.as_mut().ok_or(EngineError::HydraulicsNotOpened)?;
    hyd.init(&self.network, flags, Some(&self.hydfile))
  }

  pub fn run_h(&mut self) -> EngineResult<i64> {
    let hyd = self.hyd.as_mut().ok_or(EngineError::HydraulicsNotOpened)?;
    hyd.run(&self.network)
  }

  pub fn next_h(&mut self) -> EngineResult<i64> {
    let hyd = self.hyd.as_mut().ok_or(EngineError::HydraulicsNotOpened)?;
    hyd.next(&self.network)
  }

  /// Stop the hydraulics; the last solution stays readable
  pub fn close_h(&mut self) -> EngineResult<()> {
    self.hyd_mut()?.close()
  }

  /// Run the whole hydraulic simulation, saving every step to the scratch file
  pub fn solve_h(&mut self) -> EngineResult<()> {
    self.open_h()?;
    self.init_h(InitFlags { save: true, reinit_flows: false })?;
    loop {
      self.run_h()?;
      if self.next_h()? == 0 {
        break;
      }
    }
    self.close_h()?;
    info!("Hydraulics saved to {}", self.hydfile.display());
    Ok(())
  }
}

/// Water quality
impl Project {
  pub fn open_q(&mut self) -> EngineResult<()> {
    if matches!(hydraulic_source(&self.hyd), HydSource::File) && !self.hydfile.exists() {
      return Err(EngineError::NoHydraulicsForQuality);
    }
    self.qual = Some(QualityEngine::open(&self.network)?);
    Ok(())
  }

  pub fn init_q(&mut self) -> EngineResult<()> {
    let from_file = matches!(hydraulic_source(&self.hyd), HydSource::File);
    let qual = self.qual.as_mut().ok_or(EngineError::QualityNotOpened)?;
    let hydfile = from_file.then_some(self.hydfile.as_path());
    qual.init(&self.network, hydfile)
  }

  pub fn run_q(&mut self) -> EngineResult<i64> {
    let source = hydraulic_source(&self.hyd);
    let qual = self.qual.as_mut().ok_or(EngineError::QualityNotOpened)?;
    qual.run(&self.network, source)
  }

  pub fn next_q(&mut self) -> EngineResult<i64> {
    let source = hydraulic_source(&self.hyd);
    let qual = self.qual.as_mut().ok_or(EngineError::QualityNotOpened)?;
    qual.next(&self.network, source)
  }

  pub fn step_q(&mut self) -> EngineResult<i64> {
    let source = hydraulic_source(&self.hyd);
    let qual = self.qual.as_mut().ok_or(EngineError::QualityNotOpened)?;
    qual.step(&self.network, source)
  }

  /// Stop water quality; the last state stays readable
  pub fn close_q(&mut self) -> EngineResult<()> {
    self.qual.as_mut().ok_or(EngineError::QualityNotOpened)?.close();
    Ok(())
  }

  /// Run the whole water quality simulation over saved hydraulics
  pub fn solve_q(&mut self) -> EngineResult<()> {
    self.open_q()?;
    self.init_q()?;
    loop {
      self.run_q()?;
      if self.next_q()? == 0 {
        break;
      }
    }
    self.close_q()
  }
}

/// Combined runs
impl Project {
  /// Step the hydraulics, and water quality with them, to the end of the run,
  /// collecting results at every reporting time
  pub fn run_simulation(&mut self, with_quality: bool) -> EngineResult<SimulationResults> {
    let times = self.network.options.times.clone();
    let report_step = times.report_step.max(1);
    let mut results = SimulationResults::new(&self.network);

    self.open_h()?;
    self.init_h(InitFlags::default())?;
    if with_quality {
      self.open_q()?;
      self.init_q()?;
    }

    loop {
      let t = self.run_h()?;
      if with_quality {
        self.run_q()?;
      }
      if t >= times.report_start && (t - times.report_start) % report_step == 0 {
        debug!("Recording results at t = {} s", t);
        if let Some(hyd) = self.hyd.as_ref() {
          results.record(&self.network, t, hyd, self.qual.as_ref());
        }
      }
      let tstep = self.next_h()?;
      if with_quality {
        self.next_q()?;
      }
      if tstep == 0 {
        break;
      }
    }

    if let Some(hyd) = self.hyd.as_ref() {
      results.finish(hyd, self.qual.as_ref());
    }
    if with_quality {
      self.close_q()?;
    }
    self.close_h()?;
    info!("Simulation finished: {} reporting periods", results.times.len());
    Ok(results)
  }
}

impl Drop for Project {
  fn drop(&mut self) {
    if self.owns_hydfile && self.hydfile.exists() {
      remove_scratch_file(&self.hydfile);
    }
  }
}

/// Delete a scratch file, logging a failure
fn remove_scratch_file(path: &Path) -> bool {
  match std::fs::remove_file(path) {
    Ok(()) => true,
    Err(e) => {
      warn!("Could not remove scratch file {}: {}", path.display(), e);
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scratch_file_removal_failure_is_not_fatal() {
    let dir = std::env::temp_dir().join(format!("epanet-engine-scratch-dir-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    assert!(!remove_scratch_file(&dir));
    assert!(dir.exists());
    std::fs::remove_dir(&dir).unwrap();

    let file = dir.with_extension("hyd");
    std::fs::write(&file, [0u8; 4]).unwrap();
    assert!(remove_scratch_file(&file));
    assert!(!file.exists());
  }
}

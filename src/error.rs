use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Fatal errors raised by the engines and by network preparation.
///
/// Each variant maps to a stable integer code through [`EngineError::code`];
/// warnings live separately in [`Warning`] and never abort a run.
#[derive(Error, Debug)]
pub enum EngineError {
  #[error("insufficient memory: water quality segment pool exhausted")]
  OutOfMemory,

  #[error("no network data available")]
  NoNetwork,

  #[error("hydraulics not opened")]
  HydraulicsNotOpened,

  #[error("hydraulics not initialized")]
  HydraulicsNotInitialized,

  #[error("no hydraulic results available for water quality analysis")]
  NoHydraulicsForQuality,

  #[error("water quality not opened")]
  QualityNotOpened,

  #[error("water quality not initialized")]
  QualityNotInitialized,

  #[error("cannot solve network hydraulic equations: ill-conditioned at node {node}")]
  IllConditioned { node: Box<str> },

  #[error("invalid network: {what}")]
  InvalidNetwork { what: String },

  #[error("link {link} refers to undefined node {node}")]
  UndefinedNode { link: Box<str>, node: Box<str> },

  #[error("undefined pattern {pattern}")]
  UndefinedPattern { pattern: Box<str> },

  #[error("undefined curve {curve}")]
  UndefinedCurve { curve: Box<str> },

  #[error("duplicate ID {id}")]
  DuplicateId { id: Box<str> },

  #[error("invalid tank levels or volume curve for tank {tank}")]
  InvalidTank { tank: Box<str> },

  #[error("invalid head curve for pump {pump}")]
  InvalidPumpCurve { pump: Box<str> },

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("hydraulics file does not match network data")]
  HydFileMismatch,

  #[error("invalid hydraulics file: {what}")]
  HydFileInvalid { what: String },
}

impl EngineError {
  /// Integer error code (>= 100 means fatal for the call that raised it)
  pub fn code(&self) -> i32 {
    match self {
      EngineError::OutOfMemory => 101,
      EngineError::NoNetwork => 102,
      EngineError::HydraulicsNotOpened | EngineError::HydraulicsNotInitialized => 103,
      EngineError::NoHydraulicsForQuality => 104,
      EngineError::QualityNotOpened | EngineError::QualityNotInitialized => 105,
      EngineError::IllConditioned { .. } => 110,
      EngineError::InvalidNetwork { .. } => 200,
      EngineError::UndefinedNode { .. } => 203,
      EngineError::UndefinedPattern { .. } => 205,
      EngineError::UndefinedCurve { .. } => 206,
      EngineError::DuplicateId { .. } => 215,
      EngineError::InvalidTank { .. } => 225,
      EngineError::InvalidPumpCurve { .. } => 227,
      EngineError::Io(_) => 302,
      EngineError::HydFileMismatch => 306,
      EngineError::HydFileInvalid { .. } => 307,
    }
  }

  pub(crate) fn invalid(what: impl Into<String>) -> Self {
    EngineError::InvalidNetwork { what: what.into() }
  }
}

/// Non-fatal conditions found after a hydraulic solution.
/// Ordered by severity so the worst one can be kept with `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Warning {
  /// Not converged after all trials
  Unbalanced = 1,
  /// Converged only during the extra trials
  Unstable = 2,
  /// Junctions with demand cannot be reached from a fixed-grade node
  Disconnected = 3,
  /// A pump cannot deliver head or exceeds its maximum flow
  PumpOutOfRange = 4,
  /// A flow or pressure control valve cannot meet its setting
  ValveCannotDeliver = 5,
  /// Negative pressure at a junction with demand
  NegativePressure = 6,
}

impl Warning {
  pub fn code(&self) -> i32 {
    *self as i32
  }
}

impl std::fmt::Display for Warning {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let message = match self {
      Warning::Unbalanced => "system unbalanced",
      Warning::Unstable => "system unstable",
      Warning::Disconnected => "system disconnected",
      Warning::PumpOutOfRange => "pumps cannot deliver enough flow or head",
      Warning::ValveCannotDeliver => "valves cannot deliver enough flow",
      Warning::NegativePressure => "system has negative pressures",
    };
    write!(f, "WARNING {}: {}", self.code(), message)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_codes_split_fatal_from_state() {
    assert_eq!(EngineError::HydraulicsNotOpened.code(), 103);
    assert_eq!(EngineError::IllConditioned { node: "J1".into() }.code(), 110);
    assert!(EngineError::OutOfMemory.code() >= 100);
  }

  #[test]
  fn worst_warning_is_max() {
    let worst = [Warning::NegativePressure, Warning::Unbalanced, Warning::Disconnected]
      .into_iter()
      .max()
      .unwrap();
    assert_eq!(worst, Warning::NegativePressure);
    assert_eq!(Warning::Unstable.code(), 2);
  }
}

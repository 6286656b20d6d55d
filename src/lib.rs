//! EPANET-style hydraulic and water quality engines for pressurized pipe networks

pub mod constants;
pub mod error;
pub mod hydraulics;
pub mod model;
pub mod output;
pub mod project;
pub mod quality;

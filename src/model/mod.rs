pub mod control;
pub mod curve;
pub mod junction;
pub mod link;
pub mod network;
pub mod node;
pub mod options;
pub mod pattern;
pub mod pipe;
pub mod pump;
pub mod reservoir;
pub mod rule;
pub mod source;
pub mod tank;
pub mod units;
pub mod valve;

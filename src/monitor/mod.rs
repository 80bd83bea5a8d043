pub mod matcher;
pub mod runner;

pub use runner::{CycleStats, Monitor};

pub mod collector;

pub use collector::{FlushStats, FlushStatsSnapshot, LatencySummary};

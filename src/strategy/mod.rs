//! Opportunity scanning, risk gating and execution.

pub mod executor;
pub mod loop_;
pub mod risk;
pub mod scanner;

#[cfg(test)]
pub(crate) mod testing;

pub use executor::Executor;
pub use loop_::{run_cycle, run_trading_loop, CycleReport, TradingContext};
pub use scanner::{scan, scan_and_record, ScanResult};

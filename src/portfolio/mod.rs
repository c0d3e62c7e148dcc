pub mod monitor;

pub use monitor::{fetch_balances, PortfolioReport, SafetyMonitor, HALT_KEY};

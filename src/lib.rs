//! algotrader: autonomous Algorand DeFi trade execution.
//!
//! Scans Tinyman V2, Pact Finance and Folks Finance for opportunities,
//! gates them through balance and risk checks, and executes approved ones
//! as signed Algorand transaction groups.

pub mod algorand;
pub mod config;
pub mod heartbeat;
pub mod identity;
pub mod portfolio;
pub mod protocols;
pub mod setup;
pub mod state;
pub mod strategy;
pub mod types;

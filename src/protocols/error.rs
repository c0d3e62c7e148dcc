//! Typed execution failures.
//!
//! Every protocol operation either lands a real transaction, returns a
//! clearly labelled dry-run record, or fails with one of these errors.

use crate::algorand::client::AlgodError;
use crate::algorand::submit::SubmitError;
use crate::algorand::transaction::TxnError;
use thiserror::Error;

/// One failed attempt within an ordered method chain.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodFailure {
    pub method: String,
    pub error: String,
}

fn describe(attempts: &[MethodFailure]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.method, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("unknown asset: {0}")]
    UnknownAsset(String),

    #[error("amount {amount} is below the pool minimum of {minimum}")]
    BelowMinimum { amount: f64, minimum: f64 },

    #[error("insufficient {asset} balance: have {available}, need {required}")]
    InsufficientBalance {
        asset: String,
        available: f64,
        required: f64,
    },

    #[error("no on-chain pricing for {0}; refusing to execute")]
    UnpricedQuote(String),

    #[error("invalid pool data: {0}")]
    BadPoolData(String),

    #[error("no wallet loaded; set ALGORAND_WALLET_MNEMONIC")]
    NoWallet,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("all execution methods failed: {}", describe(.0))]
    AllMethodsFailed(Vec<MethodFailure>),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Algod(#[from] AlgodError),

    #[error(transparent)]
    Txn(#[from] TxnError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_methods_failed_lists_each_attempt() {
        let err = ExecutionError::AllMethodsFailed(vec![
            MethodFailure { method: "staking_app".into(), error: "rejected".into() },
            MethodFailure { method: "farm".into(), error: "timeout".into() },
        ]);
        assert_eq!(
            err.to_string(),
            "all execution methods failed: staking_app: rejected; farm: timeout"
        );
    }
}

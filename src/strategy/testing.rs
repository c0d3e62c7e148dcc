//! Scripted protocol for orchestrator tests.

use crate::protocols::{ContractCheck, DefiProtocol, ExecutionError};
use crate::protocols::{folks, pact, tinyman};
use crate::types::{Opportunity, Protocol, TradeKind, TradeRecord, TradeStatus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct StubProtocol {
    protocol: Protocol,
    scores: Vec<f64>,
    fail_scan: bool,
    fail_execute: bool,
    executions: AtomicUsize,
}

impl StubProtocol {
    pub fn new(protocol: Protocol, scores: &[f64]) -> Self {
        Self {
            protocol,
            scores: scores.to_vec(),
            fail_scan: false,
            fail_execute: false,
            executions: AtomicUsize::new(0),
        }
    }

    pub fn failing(protocol: Protocol) -> Self {
        Self {
            fail_scan: true,
            ..Self::new(protocol, &[])
        }
    }

    pub fn rejecting(mut self) -> Self {
        self.fail_execute = true;
        self
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    fn sample(&self) -> Opportunity {
        match self.protocol {
            Protocol::Tinyman => tinyman::opportunity(&tinyman::known_pools()[0]),
            Protocol::PactFinance => pact::opportunity(&pact::known_pools()[0]),
            Protocol::FolksFinance => folks::opportunity(&folks::known_pools()[0]),
        }
    }
}

#[async_trait]
impl DefiProtocol for StubProtocol {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn opportunities(&self, top_n: usize) -> anyhow::Result<Vec<Opportunity>> {
        if self.fail_scan {
            anyhow::bail!("endpoint unreachable");
        }
        Ok(self
            .scores
            .iter()
            .take(top_n)
            .map(|score| {
                let mut opp = self.sample();
                opp.id = ulid::Ulid::new().to_string();
                opp.score = *score;
                opp
            })
            .collect())
    }

    async fn execute(&self, opportunity: &Opportunity, amount: f64) -> Result<TradeRecord, ExecutionError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.fail_execute {
            return Err(ExecutionError::BelowMinimum { amount, minimum: 10.0 });
        }
        let kind = match self.protocol {
            Protocol::Tinyman => TradeKind::Swap,
            Protocol::PactFinance => TradeKind::YieldFarm,
            Protocol::FolksFinance => TradeKind::Lend,
        };
        let mut trade = TradeRecord::new(kind, self.protocol, opportunity.pool.name(), "ALGO", amount);
        trade.tx_id = Some(format!("STUB{}", self.executions()));
        trade.status = TradeStatus::DryRun;
        trade.opportunity_id = Some(opportunity.id.clone());
        Ok(trade)
    }

    async fn verify_contracts(&self) -> Vec<ContractCheck> {
        Vec::new()
    }
}

//! Shared transaction execution for protocol integrations.
//!
//! Builds, signs and submits groups on behalf of the wallet. In dry-run mode
//! groups are still built and signed so the real transaction id is known,
//! but nothing reaches the network.

use crate::algorand::client::{AccountInfo, AlgodApi};
use crate::algorand::submit::{submit_and_confirm, RetryPolicy, SubmitError};
use crate::algorand::transaction::{from_base_units, OnComplete, SuggestedParams, Transaction};
use crate::algorand::{Address, AssetRegistry};
use crate::identity::Wallet;
use crate::protocols::error::{ExecutionError, MethodFailure};
use crate::types::{TradeRecord, TradeStatus};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of sending one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Confirmed { tx_id: String, round: u64 },
    /// Accepted by the node but not seen in a block before the timeout.
    Pending { tx_id: String },
    DryRun { tx_id: String },
}

impl Submission {
    pub fn tx_id(&self) -> &str {
        match self {
            Self::Confirmed { tx_id, .. } | Self::Pending { tx_id } | Self::DryRun { tx_id } => tx_id,
        }
    }

    /// Stamp the outcome onto a trade record.
    pub fn apply(&self, trade: &mut TradeRecord) {
        trade.tx_id = Some(self.tx_id().to_string());
        match self {
            Self::Confirmed { round, .. } => {
                trade.status = TradeStatus::Confirmed;
                trade.confirmed_round = Some(*round);
            }
            Self::Pending { .. } => trade.status = TradeStatus::Pending,
            Self::DryRun { .. } => trade.status = TradeStatus::DryRun,
        }
    }
}

/// One entry of an ordered execution-method chain: fund the target
/// application's escrow and call it in the same group.
#[derive(Debug, Clone)]
pub struct MethodPlan {
    pub name: &'static str,
    pub app_id: u64,
    pub args: Vec<Vec<u8>>,
    pub accounts: Vec<Address>,
    pub foreign_assets: Vec<u64>,
    /// The app keeps per-account local state; opt in before the call.
    pub needs_opt_in: bool,
}

impl MethodPlan {
    pub fn new(name: &'static str, app_id: u64, args: Vec<Vec<u8>>) -> Self {
        Self {
            name,
            app_id,
            args,
            accounts: Vec::new(),
            foreign_assets: Vec::new(),
            needs_opt_in: false,
        }
    }

    pub fn with_opt_in(mut self) -> Self {
        self.needs_opt_in = true;
        self
    }

    pub fn with_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn with_assets(mut self, assets: Vec<u64>) -> Self {
        self.foreign_assets = assets.into_iter().filter(|id| *id != 0).collect();
        self
    }
}

/// Everything a protocol needs to put transactions on chain.
#[derive(Clone)]
pub struct ExecutionContext {
    pub algod: Arc<dyn AlgodApi>,
    pub wallet: Wallet,
    pub policy: RetryPolicy,
    pub dry_run: bool,
    pub assets: AssetRegistry,
}

impl ExecutionContext {
    pub fn new(algod: Arc<dyn AlgodApi>, wallet: Wallet, policy: RetryPolicy, dry_run: bool) -> Self {
        Self {
            algod,
            wallet,
            policy,
            dry_run,
            assets: AssetRegistry::new(),
        }
    }

    pub fn sender(&self) -> Address {
        self.wallet.address
    }

    pub async fn params(&self) -> Result<SuggestedParams, ExecutionError> {
        Ok(self.algod.suggested_params().await?)
    }

    pub async fn account(&self) -> Result<AccountInfo, ExecutionError> {
        Ok(self.algod.account_info(&self.wallet.address).await?)
    }

    /// Fail unless the wallet holds at least `amount` whole units of the asset.
    pub async fn require_balance(&self, asset_id: u64, amount: f64) -> Result<(), ExecutionError> {
        let account = self.account().await?;
        let decimals = self.assets.decimals(asset_id);
        let available = from_base_units(account.asset_amount(asset_id), decimals);
        if available < amount {
            let asset = self
                .assets
                .by_id(asset_id)
                .map(|a| a.name.to_string())
                .unwrap_or_else(|| asset_id.to_string());
            return Err(ExecutionError::InsufficientBalance {
                asset,
                available,
                required: amount,
            });
        }
        Ok(())
    }

    /// Opt the wallet into an ASA if it is not already holding it.
    pub async fn ensure_asset_opt_in(&self, asset_id: u64) -> Result<(), ExecutionError> {
        if asset_id == 0 {
            return Ok(());
        }
        if self.account().await?.holds_asset(asset_id) {
            return Ok(());
        }
        if self.dry_run {
            info!("[dry-run] would opt in to asset {}", asset_id);
            return Ok(());
        }

        info!("Opting in to asset {}", asset_id);
        let params = self.params().await?;
        let txn = Transaction::asset_opt_in(&params, self.sender(), asset_id);
        self.send(vec![txn]).await?;
        Ok(())
    }

    /// Opt the wallet into an application if it has no local state there.
    pub async fn ensure_app_opt_in(&self, app_id: u64) -> Result<(), ExecutionError> {
        if self.account().await?.is_opted_into_app(app_id) {
            return Ok(());
        }
        if self.dry_run {
            info!("[dry-run] would opt in to app {}", app_id);
            return Ok(());
        }

        info!("Opting in to app {}", app_id);
        let params = self.params().await?;
        let txn = Transaction::app_call(&params, self.sender(), app_id, OnComplete::OptIn, Vec::new());
        self.send(vec![txn]).await?;
        Ok(())
    }

    /// Sign a group and, unless in dry-run mode, submit it and wait for the
    /// last transaction to confirm.
    ///
    /// A confirmation timeout after a successful submit is reported as
    /// `Pending`; the transaction may still land.
    pub async fn send(&self, txns: Vec<Transaction>) -> Result<Submission, ExecutionError> {
        let signed = self.wallet.sign_group(txns)?;
        let tx_id = match signed.last() {
            Some(stx) => stx.id()?,
            None => return Err(crate::algorand::transaction::TxnError::EmptyGroup.into()),
        };

        if self.dry_run {
            info!("[dry-run] signed {} transaction(s), not submitting {}", signed.len(), tx_id);
            return Ok(Submission::DryRun { tx_id });
        }

        match submit_and_confirm(self.algod.as_ref(), &signed, &self.policy).await {
            Ok(confirmation) => Ok(Submission::Confirmed {
                tx_id: confirmation.tx_id,
                round: confirmation.round,
            }),
            Err(SubmitError::ConfirmationTimeout { tx_id, secs }) => {
                warn!("{} not confirmed after {}s; leaving it pending", tx_id, secs);
                Ok(Submission::Pending { tx_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Try each method in order; the first group that lands wins.
    pub async fn run_methods(
        &self,
        plans: Vec<MethodPlan>,
        asset_id: u64,
        amount: u64,
        note: &str,
    ) -> Result<(&'static str, Submission), ExecutionError> {
        let mut failures = Vec::new();

        for plan in plans {
            info!("Trying method {} (app {})", plan.name, plan.app_id);
            match self.run_method(&plan, asset_id, amount, note).await {
                Ok(submission) => {
                    info!("Method {} succeeded: {}", plan.name, submission.tx_id());
                    return Ok((plan.name, submission));
                }
                Err(e) => {
                    warn!("Method {} failed: {}", plan.name, e);
                    failures.push(MethodFailure {
                        method: plan.name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(ExecutionError::AllMethodsFailed(failures))
    }

    async fn run_method(
        &self,
        plan: &MethodPlan,
        asset_id: u64,
        amount: u64,
        note: &str,
    ) -> Result<Submission, ExecutionError> {
        if plan.needs_opt_in {
            self.ensure_app_opt_in(plan.app_id).await?;
        }
        let params = self.params().await?;
        let escrow = Address::for_application(plan.app_id);
        let funding = Transaction::transfer(&params, self.sender(), escrow, asset_id, amount);
        let call = Transaction::app_call(
            &params,
            self.sender(),
            plan.app_id,
            OnComplete::NoOp,
            plan.args.clone(),
        )
        .with_references(&params, plan.accounts.clone(), plan.foreign_assets.clone())
        .with_note(&params, note);

        self.send(vec![funding, call]).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::algorand::testing::FakeAlgod;
    use crate::types::{Protocol, TradeKind};

    pub(crate) fn context(fake: Arc<FakeAlgod>, dry_run: bool) -> ExecutionContext {
        ExecutionContext::new(fake, Wallet::generate(), RetryPolicy::immediate(1), dry_run)
    }

    #[tokio::test]
    async fn dry_run_signs_without_submitting() {
        let fake = Arc::new(FakeAlgod::default());
        let ctx = context(fake.clone(), true);
        let params = FakeAlgod::params();
        let txn = Transaction::payment(&params, ctx.sender(), ctx.sender(), 1);
        let expected = txn.id().unwrap();

        let out = ctx.send(vec![txn]).await.unwrap();
        assert_eq!(out, Submission::DryRun { tx_id: expected });
        assert_eq!(fake.submit_calls(), 0);
    }

    #[tokio::test]
    async fn unconfirmed_submit_is_pending() {
        let fake = Arc::new(FakeAlgod::default());
        let ctx = context(fake.clone(), false);
        let params = FakeAlgod::params();
        let txn = Transaction::payment(&params, ctx.sender(), ctx.sender(), 1);

        let out = ctx.send(vec![txn]).await.unwrap();
        assert!(matches!(out, Submission::Pending { .. }));
        assert_eq!(fake.submit_calls(), 1);
    }

    #[tokio::test]
    async fn method_chain_falls_through_to_next() {
        let fake = Arc::new(FakeAlgod::default());
        fake.push_submit_error(400, "logic eval error: assert failed");
        fake.confirm_all(42);
        let ctx = context(fake.clone(), false);

        let plans = vec![
            MethodPlan::new("first", 1, vec![b"a".to_vec()]),
            MethodPlan::new("second", 2, vec![b"b".to_vec()]),
        ];
        let (method, out) = ctx.run_methods(plans, 0, 1_000, "test").await.unwrap();
        assert_eq!(method, "second");
        assert!(matches!(out, Submission::Confirmed { round: 42, .. }));
        assert_eq!(fake.submit_calls(), 2);
    }

    #[tokio::test]
    async fn method_chain_reports_every_failure() {
        let fake = Arc::new(FakeAlgod::default());
        fake.push_submit_error(400, "logic eval error: one");
        fake.push_submit_error(400, "logic eval error: two");
        let ctx = context(fake, false);

        let plans = vec![
            MethodPlan::new("first", 1, Vec::new()),
            MethodPlan::new("second", 2, Vec::new()),
        ];
        match ctx.run_methods(plans, 0, 1_000, "test").await {
            Err(ExecutionError::AllMethodsFailed(failures)) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].method, "first");
                assert!(failures[1].error.contains("two"));
            }
            other => panic!("unexpected: {:?}", other.map(|(m, _)| m)),
        }
    }

    #[tokio::test]
    async fn balance_requirement() {
        let fake = Arc::new(FakeAlgod::default());
        let ctx = context(fake, true);
        assert!(ctx.require_balance(0, 1.0).await.is_ok());
        assert!(matches!(
            ctx.require_balance(31566704, 1.0).await,
            Err(ExecutionError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn submission_stamps_trade() {
        let mut trade = TradeRecord::new(TradeKind::Swap, Protocol::Tinyman, "ALGO-USDC", "ALGO", 1.0);
        Submission::Confirmed { tx_id: "ABC".into(), round: 7 }.apply(&mut trade);
        assert_eq!(trade.status, TradeStatus::Confirmed);
        assert_eq!(trade.confirmed_round, Some(7));
        assert_eq!(trade.tx_id.as_deref(), Some("ABC"));
    }
}

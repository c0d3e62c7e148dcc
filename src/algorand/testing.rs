//! In-memory algod fake used by unit and integration tests.

use crate::algorand::address::Address;
use crate::algorand::client::{
    AccountInfo, AlgodApi, AlgodError, AppLocalState, AssetHolding, NodeStatus,
    PendingTransaction,
};
use crate::algorand::transaction::SuggestedParams;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Scriptable stand-in for an algod node.
pub struct FakeAlgod {
    account: Mutex<AccountInfo>,
    account_unavailable: Mutex<bool>,
    submit_errors: Mutex<VecDeque<AlgodError>>,
    submitted: Mutex<Vec<Vec<u8>>>,
    pending: Mutex<HashMap<String, PendingTransaction>>,
    confirm_round: Mutex<Option<u64>>,
    missing_apps: Mutex<Vec<u64>>,
}

impl Default for FakeAlgod {
    fn default() -> Self {
        Self {
            account: Mutex::new(AccountInfo {
                address: Address::default().to_string(),
                amount: 5_000_000,
                min_balance: 100_000,
                assets: Vec::new(),
                apps_local_state: Vec::new(),
            }),
            account_unavailable: Mutex::new(false),
            submit_errors: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            confirm_round: Mutex::new(None),
            missing_apps: Mutex::new(Vec::new()),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeAlgod {
    pub fn set_algo(&self, micro_algos: u64) {
        lock(&self.account).amount = micro_algos;
    }

    pub fn add_asset(&self, asset_id: u64, amount: u64) {
        lock(&self.account).assets.push(AssetHolding { asset_id, amount });
    }

    pub fn add_app(&self, app_id: u64) {
        lock(&self.account)
            .apps_local_state
            .push(AppLocalState { id: app_id });
    }

    /// Answer `application_info` for this app with a 404.
    pub fn remove_app(&self, app_id: u64) {
        lock(&self.missing_apps).push(app_id);
    }

    /// Make `account_info` fail as if the node were unreachable.
    pub fn set_account_unavailable(&self, unavailable: bool) {
        *lock(&self.account_unavailable) = unavailable;
    }

    pub fn push_submit_error(&self, status: u16, body: &str) {
        lock(&self.submit_errors).push_back(AlgodError::Http {
            status,
            body: body.to_string(),
        });
    }

    pub fn set_pending(&self, tx_id: &str, round: Option<u64>, pool_error: &str) {
        lock(&self.pending).insert(
            tx_id.to_string(),
            PendingTransaction {
                confirmed_round: round,
                pool_error: pool_error.to_string(),
            },
        );
    }

    /// Report every otherwise unknown transaction as confirmed in `round`.
    pub fn confirm_all(&self, round: u64) {
        *lock(&self.confirm_round) = Some(round);
    }

    pub fn submit_calls(&self) -> usize {
        lock(&self.submitted).len()
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        lock(&self.submitted).clone()
    }

    pub fn params() -> SuggestedParams {
        SuggestedParams {
            fee_per_byte: 0,
            min_fee: 1000,
            first_valid: 1000,
            last_valid: 2000,
            genesis_id: "testnet-v1.0".into(),
            genesis_hash: [7u8; 32],
        }
    }
}

#[async_trait]
impl AlgodApi for FakeAlgod {
    async fn status(&self) -> Result<NodeStatus, AlgodError> {
        Ok(NodeStatus { last_round: 1000 })
    }

    async fn suggested_params(&self) -> Result<SuggestedParams, AlgodError> {
        Ok(Self::params())
    }

    async fn account_info(&self, address: &Address) -> Result<AccountInfo, AlgodError> {
        if *lock(&self.account_unavailable) {
            return Err(AlgodError::Http {
                status: 503,
                body: "unavailable".into(),
            });
        }
        let mut info = lock(&self.account).clone();
        info.address = address.to_string();
        Ok(info)
    }

    async fn application_info(&self, app_id: u64) -> Result<serde_json::Value, AlgodError> {
        if lock(&self.missing_apps).contains(&app_id) {
            return Err(AlgodError::Http {
                status: 404,
                body: "application does not exist".into(),
            });
        }
        Ok(serde_json::json!({ "id": app_id, "params": {} }))
    }

    async fn application_boxes(&self, _app_id: u64) -> Result<Vec<Vec<u8>>, AlgodError> {
        Ok(Vec::new())
    }

    async fn send_raw_transaction(&self, signed: &[u8]) -> Result<String, AlgodError> {
        let mut submitted = lock(&self.submitted);
        submitted.push(signed.to_vec());
        if let Some(err) = lock(&self.submit_errors).pop_front() {
            return Err(err);
        }
        Ok(format!("SUBMITTED{}", submitted.len()))
    }

    async fn pending_transaction_info(&self, tx_id: &str) -> Result<PendingTransaction, AlgodError> {
        if let Some(p) = lock(&self.pending).get(tx_id) {
            return Ok(p.clone());
        }
        match *lock(&self.confirm_round) {
            Some(round) => Ok(PendingTransaction {
                confirmed_round: Some(round),
                pool_error: String::new(),
            }),
            None => Err(AlgodError::Http {
                status: 404,
                body: "transaction not found".into(),
            }),
        }
    }
}

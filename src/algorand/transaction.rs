//! Transaction construction and canonical msgpack encoding.
//!
//! Algorand hashes and signs the canonical msgpack form of a transaction:
//! map keys sorted, zero-valued fields omitted, byte strings as `bin`.

use crate::algorand::address::Address;
use data_encoding::BASE32_NOPAD;
use serde::Serialize;
use sha2::{Digest, Sha512_256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum number of transactions in an atomic group.
pub const MAX_GROUP_SIZE: usize = 16;

/// Bytes a signature adds on top of the bare transaction encoding
/// (`{"sig": bin64, "txn": ...}` wrapper).
const SIG_OVERHEAD: u64 = 75;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("msgpack encoding failed: {0}")]
    Encode(String),
    #[error("transaction group is empty")]
    EmptyGroup,
    #[error("transaction group has {0} transactions (max {MAX_GROUP_SIZE})")]
    GroupTooLarge(usize),
}

// ---------------------------------------------------------------------------
// Suggested params
// ---------------------------------------------------------------------------

/// Network parameters needed to build a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuggestedParams {
    pub fee_per_byte: u64,
    pub min_fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub genesis_id: String,
    pub genesis_hash: [u8; 32],
}

impl SuggestedParams {
    /// Fee for a transaction whose unsigned encoding is `encoded_len` bytes.
    pub fn fee_for(&self, encoded_len: usize, multiplier: u64) -> u64 {
        let by_size = self.fee_per_byte * (encoded_len as u64 + SIG_OVERHEAD);
        by_size.max(self.min_fee * multiplier.max(1))
    }
}

// ---------------------------------------------------------------------------
// Transaction types
// ---------------------------------------------------------------------------

/// Application call completion action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnComplete {
    NoOp = 0,
    OptIn = 1,
    CloseOut = 2,
    ClearState = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnKind {
    Payment {
        receiver: Address,
        amount: u64,
    },
    /// A zero-amount transfer to oneself opts the sender into the asset.
    AssetTransfer {
        asset_id: u64,
        receiver: Address,
        amount: u64,
    },
    ApplicationCall {
        app_id: u64,
        on_complete: OnComplete,
        args: Vec<Vec<u8>>,
        accounts: Vec<Address>,
        foreign_assets: Vec<u64>,
        foreign_apps: Vec<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sender: Address,
    pub fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub genesis_id: String,
    pub genesis_hash: [u8; 32],
    pub note: Vec<u8>,
    pub group: Option<[u8; 32]>,
    pub kind: TxnKind,
}

impl Transaction {
    fn with_kind(params: &SuggestedParams, sender: Address, kind: TxnKind) -> Self {
        let mut txn = Self {
            sender,
            fee: 0,
            first_valid: params.first_valid,
            last_valid: params.last_valid,
            genesis_id: params.genesis_id.clone(),
            genesis_hash: params.genesis_hash,
            note: Vec::new(),
            group: None,
            kind,
        };
        txn.fee = txn.estimate_fee(params, 1);
        txn
    }

    pub fn payment(params: &SuggestedParams, sender: Address, receiver: Address, amount: u64) -> Self {
        Self::with_kind(params, sender, TxnKind::Payment { receiver, amount })
    }

    pub fn asset_transfer(
        params: &SuggestedParams,
        sender: Address,
        receiver: Address,
        asset_id: u64,
        amount: u64,
    ) -> Self {
        Self::with_kind(
            params,
            sender,
            TxnKind::AssetTransfer {
                asset_id,
                receiver,
                amount,
            },
        )
    }

    /// Transfer of ALGO (asset 0) or an ASA.
    pub fn transfer(
        params: &SuggestedParams,
        sender: Address,
        receiver: Address,
        asset_id: u64,
        amount: u64,
    ) -> Self {
        if asset_id == 0 {
            Self::payment(params, sender, receiver, amount)
        } else {
            Self::asset_transfer(params, sender, receiver, asset_id, amount)
        }
    }

    pub fn asset_opt_in(params: &SuggestedParams, sender: Address, asset_id: u64) -> Self {
        Self::asset_transfer(params, sender, sender, asset_id, 0)
    }

    pub fn app_call(
        params: &SuggestedParams,
        sender: Address,
        app_id: u64,
        on_complete: OnComplete,
        args: Vec<Vec<u8>>,
    ) -> Self {
        Self::with_kind(
            params,
            sender,
            TxnKind::ApplicationCall {
                app_id,
                on_complete,
                args,
                accounts: Vec::new(),
                foreign_assets: Vec::new(),
                foreign_apps: Vec::new(),
            },
        )
    }

    pub fn with_note(mut self, params: &SuggestedParams, note: &str) -> Self {
        self.note = note.as_bytes().to_vec();
        self.fee = self.estimate_fee(params, 1);
        self
    }

    /// Set the referenced accounts and assets of an application call.
    pub fn with_references(
        mut self,
        params: &SuggestedParams,
        refs_accounts: Vec<Address>,
        refs_assets: Vec<u64>,
    ) -> Self {
        if let TxnKind::ApplicationCall {
            accounts,
            foreign_assets,
            ..
        } = &mut self.kind
        {
            *accounts = refs_accounts;
            *foreign_assets = refs_assets;
        }
        self.fee = self.estimate_fee(params, 1);
        self
    }

    /// Pay for `count` transactions' worth of minimum fee (covers inner calls).
    pub fn with_fee_multiplier(mut self, params: &SuggestedParams, count: u64) -> Self {
        self.fee = self.estimate_fee(params, count);
        self
    }

    fn estimate_fee(&self, params: &SuggestedParams, multiplier: u64) -> u64 {
        let len = self.encode().map(|b| b.len()).unwrap_or(0);
        params.fee_for(len, multiplier)
    }

    pub fn type_tag(&self) -> &'static str {
        match self.kind {
            TxnKind::Payment { .. } => "pay",
            TxnKind::AssetTransfer { .. } => "axfer",
            TxnKind::ApplicationCall { .. } => "appl",
        }
    }

    fn fields(&self) -> BTreeMap<&'static str, Field> {
        let mut m = BTreeMap::new();
        put_uint(&mut m, "fee", self.fee);
        put_uint(&mut m, "fv", self.first_valid);
        if !self.genesis_id.is_empty() {
            m.insert("gen", Field::Str(self.genesis_id.clone()));
        }
        m.insert("gh", Field::Bin(self.genesis_hash.to_vec()));
        if let Some(group) = self.group {
            m.insert("grp", Field::Bin(group.to_vec()));
        }
        put_uint(&mut m, "lv", self.last_valid);
        if !self.note.is_empty() {
            m.insert("note", Field::Bin(self.note.clone()));
        }
        m.insert("snd", Field::Bin(self.sender.0.to_vec()));
        m.insert("type", Field::Str(self.type_tag().to_string()));

        match &self.kind {
            TxnKind::Payment { receiver, amount } => {
                put_uint(&mut m, "amt", *amount);
                put_address(&mut m, "rcv", receiver);
            }
            TxnKind::AssetTransfer {
                asset_id,
                receiver,
                amount,
            } => {
                put_uint(&mut m, "aamt", *amount);
                put_address(&mut m, "arcv", receiver);
                put_uint(&mut m, "xaid", *asset_id);
            }
            TxnKind::ApplicationCall {
                app_id,
                on_complete,
                args,
                accounts,
                foreign_assets,
                foreign_apps,
            } => {
                if !args.is_empty() {
                    m.insert("apaa", Field::BinArray(args.clone()));
                }
                put_uint(&mut m, "apan", *on_complete as u64);
                if !foreign_assets.is_empty() {
                    m.insert("apas", Field::UintArray(foreign_assets.clone()));
                }
                if !accounts.is_empty() {
                    m.insert(
                        "apat",
                        Field::BinArray(accounts.iter().map(|a| a.0.to_vec()).collect()),
                    );
                }
                if !foreign_apps.is_empty() {
                    m.insert("apfa", Field::UintArray(foreign_apps.clone()));
                }
                put_uint(&mut m, "apid", *app_id);
            }
        }
        m
    }

    /// Canonical msgpack encoding of the unsigned transaction.
    pub fn encode(&self) -> Result<Vec<u8>, TxnError> {
        let mut buf = Vec::with_capacity(256);
        write_map(&mut buf, &self.fields())?;
        Ok(buf)
    }

    /// Raw 32-byte transaction hash.
    pub fn raw_id(&self) -> Result<[u8; 32], TxnError> {
        let mut hasher = Sha512_256::new();
        hasher.update(b"TX");
        hasher.update(self.encode()?);
        Ok(hasher.finalize().into())
    }

    /// Transaction id as shown by explorers and algod.
    pub fn id(&self) -> Result<String, TxnError> {
        Ok(BASE32_NOPAD.encode(&self.raw_id()?))
    }

    /// Bytes that get signed: `"TX" || encoding`.
    pub fn bytes_to_sign(&self) -> Result<Vec<u8>, TxnError> {
        let mut out = b"TX".to_vec();
        out.extend(self.encode()?);
        Ok(out)
    }
}

/// A transaction with its ed25519 signature.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub txn: Transaction,
    pub sig: [u8; 64],
}

impl SignedTransaction {
    pub fn encode(&self) -> Result<Vec<u8>, TxnError> {
        let mut buf = Vec::with_capacity(320);
        rmp::encode::write_map_len(&mut buf, 2).map_err(encode_err)?;
        rmp::encode::write_str(&mut buf, "sig").map_err(encode_err)?;
        rmp::encode::write_bin(&mut buf, &self.sig).map_err(encode_err)?;
        rmp::encode::write_str(&mut buf, "txn").map_err(encode_err)?;
        write_map(&mut buf, &self.txn.fields())?;
        Ok(buf)
    }

    pub fn id(&self) -> Result<String, TxnError> {
        self.txn.id()
    }
}

/// Concatenate signed transactions into one submission body.
pub fn encode_group(signed: &[SignedTransaction]) -> Result<Vec<u8>, TxnError> {
    let mut body = Vec::new();
    for stx in signed {
        body.extend(stx.encode()?);
    }
    Ok(body)
}

/// Compute and stamp the group id on every transaction of an atomic group.
///
/// A single transaction is left ungrouped.
pub fn assign_group_id(txns: &mut [Transaction]) -> Result<Option<[u8; 32]>, TxnError> {
    if txns.is_empty() {
        return Err(TxnError::EmptyGroup);
    }
    if txns.len() > MAX_GROUP_SIZE {
        return Err(TxnError::GroupTooLarge(txns.len()));
    }
    if txns.len() == 1 {
        return Ok(None);
    }

    for txn in txns.iter_mut() {
        txn.group = None;
    }
    let mut ids = Vec::with_capacity(txns.len());
    for txn in txns.iter() {
        ids.push(txn.raw_id()?.to_vec());
    }

    let mut buf = b"TG".to_vec();
    let mut m = BTreeMap::new();
    m.insert("txlist", Field::BinArray(ids));
    write_map(&mut buf, &m)?;
    let gid: [u8; 32] = Sha512_256::digest(&buf).into();

    for txn in txns.iter_mut() {
        txn.group = Some(gid);
    }
    Ok(Some(gid))
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

/// Application argument encoding of an integer (8-byte big-endian).
pub fn encode_u64_arg(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// Convert a whole-unit amount into base units for an asset with `decimals`,
/// dropping any fraction of a base unit.
pub fn to_base_units(amount: f64, decimals: u32) -> u64 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    // The epsilon absorbs binary representation error (0.29 * 1e6 = 289999.99...).
    (amount * 10f64.powi(decimals as i32) + 1e-6).floor() as u64
}

/// Convert base units back into whole units.
pub fn from_base_units(amount: u64, decimals: u32) -> f64 {
    amount as f64 / 10f64.powi(decimals as i32)
}

// ---------------------------------------------------------------------------
// Msgpack writer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Field {
    Uint(u64),
    Str(String),
    Bin(Vec<u8>),
    BinArray(Vec<Vec<u8>>),
    UintArray(Vec<u64>),
}

fn put_uint(m: &mut BTreeMap<&'static str, Field>, key: &'static str, value: u64) {
    if value != 0 {
        m.insert(key, Field::Uint(value));
    }
}

fn put_address(m: &mut BTreeMap<&'static str, Field>, key: &'static str, addr: &Address) {
    if *addr != Address::default() {
        m.insert(key, Field::Bin(addr.0.to_vec()));
    }
}

fn encode_err<E: std::fmt::Display>(e: E) -> TxnError {
    TxnError::Encode(e.to_string())
}

fn write_map(buf: &mut Vec<u8>, fields: &BTreeMap<&'static str, Field>) -> Result<(), TxnError> {
    rmp::encode::write_map_len(buf, fields.len() as u32).map_err(encode_err)?;
    for (key, value) in fields {
        rmp::encode::write_str(buf, key).map_err(encode_err)?;
        match value {
            Field::Uint(v) => {
                rmp::encode::write_uint(buf, *v).map_err(encode_err)?;
            }
            Field::Str(s) => rmp::encode::write_str(buf, s).map_err(encode_err)?,
            Field::Bin(b) => rmp::encode::write_bin(buf, b).map_err(encode_err)?,
            Field::BinArray(items) => {
                rmp::encode::write_array_len(buf, items.len() as u32).map_err(encode_err)?;
                for item in items {
                    rmp::encode::write_bin(buf, item).map_err(encode_err)?;
                }
            }
            Field::UintArray(items) => {
                rmp::encode::write_array_len(buf, items.len() as u32).map_err(encode_err)?;
                for item in items {
                    rmp::encode::write_uint(buf, *item).map_err(encode_err)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_params() -> SuggestedParams {
    SuggestedParams {
        fee_per_byte: 0,
        min_fee: 1000,
        first_valid: 1000,
        last_valid: 2000,
        genesis_id: "mainnet-v1.0".into(),
        genesis_hash: [4u8; 32],
    }
}

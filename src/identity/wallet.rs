//! Algorand wallet handling.
//!
//! The wallet is restored from a 25-word mnemonic held in the environment
//! (`ALGORAND_WALLET_MNEMONIC`, usually via `.env`). The signing key never
//! touches disk.

use crate::algorand::address::Address;
use crate::algorand::mnemonic;
use crate::algorand::transaction::{assign_group_id, SignedTransaction, Transaction, TxnError};
use crate::config::{ENV_WALLET_ADDRESS, ENV_WALLET_MNEMONIC};
use anyhow::{bail, Context, Result};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use tracing::info;

/// An in-memory wallet handle.
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    pub address: Address,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet").field("address", &self.address).finish()
    }
}

impl Wallet {
    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::new(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            address,
        }
    }

    /// Restore a wallet from its 25-word mnemonic.
    pub fn from_mnemonic(phrase: &str) -> Result<Self> {
        let seed = mnemonic::to_seed(phrase).context("Invalid wallet mnemonic")?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&seed)))
    }

    /// Load the wallet from environment variables.
    ///
    /// If `ALGORAND_WALLET_ADDRESS` is set it must match the address the
    /// mnemonic derives.
    pub fn from_env() -> Result<Self> {
        let phrase = std::env::var(ENV_WALLET_MNEMONIC)
            .with_context(|| format!("{} is not set (add it to .env)", ENV_WALLET_MNEMONIC))?;
        let wallet = Self::from_mnemonic(&phrase)?;

        if let Ok(declared) = std::env::var(ENV_WALLET_ADDRESS) {
            let declared = declared.trim();
            if !declared.is_empty() {
                let expected: Address = declared
                    .parse()
                    .with_context(|| format!("{} is not a valid address", ENV_WALLET_ADDRESS))?;
                if expected != wallet.address {
                    bail!(
                        "{} ({}) does not match the mnemonic's address ({})",
                        ENV_WALLET_ADDRESS,
                        expected,
                        wallet.address
                    );
                }
            }
        }

        info!("Loaded wallet: {}", wallet.address);
        Ok(wallet)
    }

    /// Generate a fresh random wallet.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// The wallet's 25-word backup phrase.
    pub fn mnemonic(&self) -> String {
        mnemonic::from_seed(&self.signing_key.to_bytes())
    }

    pub fn sign(&self, txn: Transaction) -> Result<SignedTransaction, TxnError> {
        let sig = self.signing_key.sign(&txn.bytes_to_sign()?).to_bytes();
        Ok(SignedTransaction { txn, sig })
    }

    /// Group (when more than one) and sign every transaction.
    pub fn sign_group(&self, mut txns: Vec<Transaction>) -> Result<Vec<SignedTransaction>, TxnError> {
        assign_group_id(&mut txns)?;
        txns.into_iter().map(|t| self.sign(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorand::transaction::test_params;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    #[test]
    fn mnemonic_restores_same_address() {
        let wallet = Wallet::generate();
        let restored = Wallet::from_mnemonic(&wallet.mnemonic()).unwrap();
        assert_eq!(restored.address, wallet.address);
    }

    #[test]
    fn signature_verifies_over_tx_prefix() {
        let wallet = Wallet::generate();
        let txn = Transaction::payment(&test_params(), wallet.address, wallet.address, 1);
        let stx = wallet.sign(txn.clone()).unwrap();

        let vk = VerifyingKey::from_bytes(wallet.address.as_bytes()).unwrap();
        let sig = Signature::from_bytes(&stx.sig);
        assert!(vk.verify(&txn.bytes_to_sign().unwrap(), &sig).is_ok());
    }

    #[test]
    fn group_signing_stamps_group_id() {
        let wallet = Wallet::generate();
        let p = test_params();
        let group = wallet
            .sign_group(vec![
                Transaction::payment(&p, wallet.address, wallet.address, 1),
                Transaction::payment(&p, wallet.address, wallet.address, 2),
            ])
            .unwrap();
        assert_eq!(group.len(), 2);
        assert!(group[0].txn.group.is_some());
        assert_eq!(group[0].txn.group, group[1].txn.group);
    }
}

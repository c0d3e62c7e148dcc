pub mod address;
pub mod assets;
pub mod client;
pub mod mnemonic;
pub mod submit;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transaction;

pub use address::Address;
pub use assets::AssetRegistry;
pub use client::{AccountInfo, AlgodApi, AlgodClient, AlgodError};
pub use submit::{Confirmation, RetryPolicy, SubmitError};
pub use transaction::{OnComplete, SignedTransaction, SuggestedParams, Transaction};

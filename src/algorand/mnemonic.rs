//! 25-word Algorand mnemonics.
//!
//! The 32-byte ed25519 seed is split into 24 little-endian 11-bit indices
//! into the BIP-39 English wordlist; the 25th word is the first 11 bits of
//! the seed's SHA-512/256 digest.

use bip39::Language;
use sha2::{Digest, Sha512_256};
use thiserror::Error;

const SEED_LEN: usize = 32;
const MNEMONIC_WORDS: usize = 25;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MnemonicError {
    #[error("mnemonic must have {MNEMONIC_WORDS} words, got {0}")]
    WordCount(usize),
    #[error("unknown mnemonic word: {0}")]
    UnknownWord(String),
    #[error("mnemonic does not decode to a 32-byte key")]
    Padding,
    #[error("mnemonic checksum word does not match")]
    Checksum,
}

/// Encode a 32-byte seed as a 25-word mnemonic.
pub fn from_seed(seed: &[u8; SEED_LEN]) -> String {
    let words = Language::English.word_list();
    let mut out: Vec<&str> = to_u11(seed).into_iter().map(|i| words[i as usize]).collect();
    out.push(words[checksum_index(seed) as usize]);
    out.join(" ")
}

/// Decode a 25-word mnemonic back into the 32-byte seed.
pub fn to_seed(mnemonic: &str) -> Result<[u8; SEED_LEN], MnemonicError> {
    let words: Vec<&str> = mnemonic.split_whitespace().collect();
    if words.len() != MNEMONIC_WORDS {
        return Err(MnemonicError::WordCount(words.len()));
    }

    let list = Language::English.word_list();
    let mut indices = Vec::with_capacity(MNEMONIC_WORDS);
    for word in &words {
        let lower = word.to_ascii_lowercase();
        let idx = list
            .iter()
            .position(|w| *w == lower)
            .ok_or_else(|| MnemonicError::UnknownWord(word.to_string()))?;
        indices.push(idx as u32);
    }

    let checksum = indices.pop().unwrap_or_default();
    let bytes = from_u11(&indices);
    // 24 words carry 264 bits; the trailing byte must be empty.
    if bytes.len() != SEED_LEN + 1 || bytes[SEED_LEN] != 0 {
        return Err(MnemonicError::Padding);
    }

    let mut seed = [0u8; SEED_LEN];
    seed.copy_from_slice(&bytes[..SEED_LEN]);
    if checksum_index(&seed) != checksum {
        return Err(MnemonicError::Checksum);
    }
    Ok(seed)
}

fn checksum_index(seed: &[u8]) -> u32 {
    let digest = Sha512_256::digest(seed);
    to_u11(&digest[..2])[0]
}

fn to_u11(bytes: &[u8]) -> Vec<u32> {
    let mut out = Vec::with_capacity(bytes.len() * 8 / 11 + 1);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;
    for &b in bytes {
        buffer |= (b as u32) << bits;
        bits += 8;
        if bits >= 11 {
            out.push(buffer & 0x7ff);
            buffer >>= 11;
            bits -= 11;
        }
    }
    if bits != 0 {
        out.push(buffer & 0x7ff);
    }
    out
}

fn from_u11(indices: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(indices.len() * 11 / 8 + 1);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;
    for &i in indices {
        buffer |= i << bits;
        bits += 11;
        while bits >= 8 {
            out.push((buffer & 0xff) as u8);
            buffer >>= 8;
            bits -= 8;
        }
    }
    if bits != 0 {
        out.push((buffer & 0xff) as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_survives_mnemonic() {
        let seed: [u8; 32] = core::array::from_fn(|i| (i as u8).wrapping_mul(37).wrapping_add(11));
        let phrase = from_seed(&seed);
        assert_eq!(phrase.split(' ').count(), 25);
        assert_eq!(to_seed(&phrase).unwrap(), seed);
    }

    #[test]
    fn zero_seed_is_all_abandon_except_checksum() {
        let phrase = from_seed(&[0u8; 32]);
        let words: Vec<&str> = phrase.split(' ').collect();
        assert!(words[..24].iter().all(|w| *w == "abandon"));
        assert_eq!(to_seed(&phrase).unwrap(), [0u8; 32]);
    }

    #[test]
    fn wrong_checksum_word_is_rejected() {
        let phrase = from_seed(&[9u8; 32]);
        let mut words: Vec<&str> = phrase.split(' ').collect();
        let last = words[24];
        words[24] = if last == "zoo" { "zone" } else { "zoo" };
        assert_eq!(to_seed(&words.join(" ")), Err(MnemonicError::Checksum));
    }

    #[test]
    fn rejects_short_and_unknown() {
        assert_eq!(to_seed("abandon abandon"), Err(MnemonicError::WordCount(2)));
        let phrase = vec!["notaword"; 25].join(" ");
        assert_eq!(
            to_seed(&phrase),
            Err(MnemonicError::UnknownWord("notaword".into()))
        );
    }

    #[test]
    fn u11_packing_is_reversible() {
        let bytes = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let packed = to_u11(&bytes);
        assert_eq!(packed.len(), 8);
        assert_eq!(from_u11(&packed), bytes.to_vec());
    }
}

//! BIP-39 seed phrase handling.

use bip39::{Language, Mnemonic};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// Word counts accepted by BIP-39.
pub const WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

pub const DEFAULT_WORD_COUNT: usize = 12;

/// Size of the seed derived from a mnemonic.
pub const SEED_SIZE: usize = 64;

/// Lowercase the words and collapse whitespace.
pub fn normalize_phrase(phrase: &str) -> Zeroizing<String> {
    let words: Zeroizing<Vec<String>> = Zeroizing::new(
        phrase
            .split_whitespace()
            .map(|word| word.to_lowercase())
            .collect(),
    );
    Zeroizing::new(words.join(" "))
}

/// Parsed mnemonic, wiped when dropped.
fn parse(phrase: &str) -> VaultResult<Zeroizing<Mnemonic>> {
    let normalized = normalize_phrase(phrase);
    Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map(Zeroizing::new)
        .map_err(|_| VaultError::InvalidSeedFormat)
}

/// Check word list membership, length and checksum.
pub fn validate_mnemonic(phrase: &str) -> VaultResult<()> {
    parse(phrase).map(|_| ())
}

/// Derive the 64-byte BIP-39 seed (empty passphrase).
pub fn derive_seed(phrase: &str) -> VaultResult<Zeroizing<[u8; SEED_SIZE]>> {
    let mnemonic = parse(phrase)?;
    Ok(Zeroizing::new(mnemonic.to_seed_normalized("")))
}

/// Generate a fresh English mnemonic with `word_count` words.
pub fn generate_mnemonic(word_count: usize) -> VaultResult<Zeroizing<String>> {
    if !WORD_COUNTS.contains(&word_count) {
        return Err(VaultError::InvalidSeedFormat);
    }
    let mnemonic = Mnemonic::generate(word_count)
        .map(Zeroizing::new)
        .map_err(|_| VaultError::InvalidSeedFormat)?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

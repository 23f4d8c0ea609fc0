//! Encrypted seed blob using AES-256-GCM.
//!
//! Layout before base64 encoding:
//!
//! ```text
//! [1-byte version][4-byte m_cost][4-byte t_cost][4-byte p_cost]
//! [16-byte salt][12-byte nonce][ciphertext with 16-byte auth tag]
//! ```
//!
//! Cost fields are little-endian. The header and the account name are
//! authenticated as associated data, so a blob only opens under the account
//! it was sealed for.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use data_encoding::BASE64;
use tracing::debug;
use zeroize::Zeroizing;

use super::kdf::{derive_key, dummy_derivation, generate_salt, SALT_SIZE};
use crate::config::KdfConfig;
use crate::error::{VaultError, VaultResult};

const BLOB_VERSION: u8 = 1;

/// Nonce size for AES-GCM (96 bits = 12 bytes)
const NONCE_SIZE: usize = 12;

const TAG_SIZE: usize = 16;

const HEADER_SIZE: usize = 1 + 4 * 3 + SALT_SIZE + NONCE_SIZE;

/// Encrypt a seed phrase for `account` under a key derived from `password`.
pub fn seal_seed(
    phrase: &str,
    password: &str,
    account: &str,
    kdf: &KdfConfig,
) -> VaultResult<String> {
    let salt = generate_salt();
    let key = derive_key(password, &salt, kdf)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.push(BLOB_VERSION);
    header.extend_from_slice(&kdf.memory_kib.to_le_bytes());
    header.extend_from_slice(&kdf.iterations.to_le_bytes());
    header.extend_from_slice(&kdf.parallelism.to_le_bytes());
    header.extend_from_slice(&salt);
    header.extend_from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Crypto(format!("Invalid key: {}", e)))?;

    let aad = associated_data(&header, account);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: phrase.as_bytes(),
                aad: &aad,
            },
        )
        .map_err(|e| VaultError::Crypto(format!("Encryption failed: {}", e)))?;

    let mut output = header;
    output.extend(ciphertext);
    Ok(BASE64.encode(&output))
}

/// Decrypt a blob produced by [`seal_seed`].
///
/// Every failure, whether a wrong password or a damaged blob, is reported
/// as `IncorrectPassword`. A blob that cannot be parsed still costs one key
/// derivation at `fallback` cost.
pub fn open_seed(
    blob: &str,
    password: &str,
    account: &str,
    fallback: &KdfConfig,
) -> VaultResult<Zeroizing<String>> {
    open_blob(blob, password, account, fallback).map_err(|reason| {
        debug!("Seed blob for '{}' rejected: {}", account, reason);
        VaultError::IncorrectPassword
    })
}

/// Decoded blob fields, before any key derivation.
struct SealedSeed {
    header: Vec<u8>,
    ciphertext: Vec<u8>,
    kdf: KdfConfig,
    salt: [u8; SALT_SIZE],
}

fn parse_blob(blob: &str) -> Result<SealedSeed, &'static str> {
    let mut encrypted = BASE64
        .decode(blob.as_bytes())
        .map_err(|_| "not valid base64")?;

    if encrypted.len() < HEADER_SIZE + TAG_SIZE {
        return Err("too short");
    }

    let ciphertext = encrypted.split_off(HEADER_SIZE);
    let header = encrypted;
    if header[0] != BLOB_VERSION {
        return Err("unknown version");
    }

    let kdf = KdfConfig {
        memory_kib: read_u32(&header, 1),
        iterations: read_u32(&header, 5),
        parallelism: read_u32(&header, 9),
    };
    if !kdf.within_limits() {
        return Err("cost parameters out of range");
    }

    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&header[13..13 + SALT_SIZE]);

    Ok(SealedSeed {
        header,
        ciphertext,
        kdf,
        salt,
    })
}

fn open_blob(
    blob: &str,
    password: &str,
    account: &str,
    fallback: &KdfConfig,
) -> Result<Zeroizing<String>, &'static str> {
    let sealed = match parse_blob(blob) {
        Ok(sealed) => sealed,
        Err(reason) => {
            dummy_derivation(password, fallback);
            return Err(reason);
        }
    };

    let key = match derive_key(password, &sealed.salt, &sealed.kdf) {
        Ok(key) => key,
        Err(_) => {
            // Params rejected by argon2 before any hashing happened
            dummy_derivation(password, fallback);
            return Err("key derivation failed");
        }
    };
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| "invalid key")?;

    let nonce = Nonce::from_slice(&sealed.header[13 + SALT_SIZE..]);
    let aad = associated_data(&sealed.header, account);
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| "authentication failed")?,
    );

    let phrase = std::str::from_utf8(&plaintext).map_err(|_| "plaintext is not UTF-8")?;
    Ok(Zeroizing::new(phrase.to_owned()))
}

fn associated_data(header: &[u8], account: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(header.len() + account.len());
    aad.extend_from_slice(header);
    aad.extend_from_slice(account.as_bytes());
    aad
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

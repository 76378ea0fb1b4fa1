// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{SweeperError, SweeperResult};
use ethers::signers::{coins_bip39::English, LocalWallet, MnemonicBuilder};
use std::str::FromStr;

pub const DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";
const PASSPHRASE_SEPARATOR: &str = "|||";

/// Builds the signing identity from either a 32-byte hex private key
/// (optionally `0x`-prefixed) or a BIP-39 mnemonic. A mnemonic may carry a
/// passphrase after `|||`.
pub fn wallet_from_secret(secret: &str) -> SweeperResult<LocalWallet> {
    let secret = secret.trim();
    if secret.is_empty() {
        return Err(SweeperError::ConfigError("Signer secret is empty".into()));
    }
    let hex = secret.strip_prefix("0x").unwrap_or(secret);
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return LocalWallet::from_str(hex)
            .map_err(|e| SweeperError::ConfigError(format!("Invalid private key: {}", e)));
    }

    let (phrase, passphrase) = match secret.split_once(PASSPHRASE_SEPARATOR) {
        Some((phrase, passphrase)) => (phrase.trim(), Some(passphrase.trim())),
        None => (secret, None),
    };
    let mut builder = MnemonicBuilder::<English>::default()
        .phrase(phrase)
        .derivation_path(DERIVATION_PATH)
        .map_err(|e| SweeperError::ConfigError(format!("Invalid derivation path: {}", e)))?;
    if let Some(passphrase) = passphrase {
        builder = builder.password(passphrase);
    }
    // the phrase itself is never echoed back
    builder
        .build()
        .map_err(|_| SweeperError::ConfigError("Invalid private key or mnemonic".into()))
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::types::TxHash;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SweeperError {
    // Missing or invalid credentials/settings, fatal at startup
    #[error("Configuration error: {0}")]
    ConfigError(String),
    // Network/provider failure that may succeed on the next cycle
    #[error("Transient provider error: {0}")]
    TransientProviderError(String),
    // Provider returned something we cannot use
    #[error("Provider error: {0}")]
    ProviderError(String),
    // Balance cannot cover amount, reserve and fee
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),
    // Forward tx submitted but not confirmed in time; it may still land
    #[error("Forward transaction {tx_hash:?} not confirmed within {timeout_secs}s")]
    ConfirmationTimeout { tx_hash: TxHash, timeout_secs: u64 },
    // Forward tx was mined with a failed status
    #[error("Forward transaction {0:?} reverted")]
    TxReverted(TxHash),
    // Persistence backend I/O failure
    #[error("Storage error: {0}")]
    StorageError(String),
    // Live subscription could not be (re-)established
    #[error("Subscription error: {0}")]
    SubscriptionError(String),
    // Bearer token mismatch on a trigger endpoint
    #[error("Unauthorized")]
    Unauthorized,
    // Uncategorized error
    #[error("{0}")]
    Generic(String),
}

impl SweeperError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            SweeperError::ConfigError(_) => "config_error",
            SweeperError::TransientProviderError(_) => "transient_provider_error",
            SweeperError::ProviderError(_) => "provider_error",
            SweeperError::InsufficientFunds(_) => "insufficient_funds",
            SweeperError::ConfirmationTimeout { .. } => "confirmation_timeout",
            SweeperError::TxReverted(_) => "tx_reverted",
            SweeperError::StorageError(_) => "storage_error",
            SweeperError::SubscriptionError(_) => "subscription_error",
            SweeperError::Unauthorized => "unauthorized",
            SweeperError::Generic(_) => "generic",
        }
    }

    /// Classifies a provider error message. Node implementations report a
    /// balance that cannot pay for gas with an "insufficient funds" message.
    pub fn from_submission_error(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.to_lowercase().contains("insufficient funds") {
            SweeperError::InsufficientFunds(message)
        } else {
            SweeperError::ProviderError(message)
        }
    }
}

impl From<ethers::providers::ProviderError> for SweeperError {
    fn from(e: ethers::providers::ProviderError) -> Self {
        SweeperError::TransientProviderError(e.to_string())
    }
}

impl From<std::io::Error> for SweeperError {
    fn from(e: std::io::Error) -> Self {
        SweeperError::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for SweeperError {
    fn from(e: serde_json::Error) -> Self {
        SweeperError::StorageError(format!("Serialization failed: {}", e))
    }
}

pub type SweeperResult<T> = Result<T, SweeperError>;

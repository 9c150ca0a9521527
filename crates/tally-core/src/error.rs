use crate::domain::events::Phase;
use crate::types::amount_string;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable classification of a ledger failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerErrorCode {
    /// The user declined the request in the wallet
    UserRejected,
    /// Not enough balance for the value sent
    InsufficientBalance,
    /// Not enough funds for gas, or gas estimation failed
    InsufficientGas,
    /// Counter vault on a curve that never received a for deposit
    CounterNotInitializable,
    /// Caller holds a position on the opposite side of the vault
    HasCounterStake,
    /// Object or relationship already exists
    TermAlreadyExists,
    /// Any other contract revert
    Reverted,
    /// RPC or network failure
    Transport,
    /// Unrecognised failure
    Unknown,
}

impl fmt::Display for LedgerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedgerErrorCode::UserRejected => "user_rejected",
            LedgerErrorCode::InsufficientBalance => "insufficient_balance",
            LedgerErrorCode::InsufficientGas => "insufficient_gas",
            LedgerErrorCode::CounterNotInitializable => "counter_not_initializable",
            LedgerErrorCode::HasCounterStake => "has_counter_stake",
            LedgerErrorCode::TermAlreadyExists => "term_already_exists",
            LedgerErrorCode::Reverted => "reverted",
            LedgerErrorCode::Transport => "transport",
            LedgerErrorCode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Map a raw revert or transport message to a [`LedgerErrorCode`].
///
/// Protocol revert names are checked before wallet and transport phrases,
/// since revert reasons are usually wrapped in a generic provider message.
pub fn classify_ledger_message(raw: &str) -> LedgerErrorCode {
    let msg = raw.to_lowercase();

    if msg.contains("cannotdirectlyinitializecountertriple")
        || msg.contains("counter triple cannot be initialized")
    {
        LedgerErrorCode::CounterNotInitializable
    } else if msg.contains("hascounterstake") {
        LedgerErrorCode::HasCounterStake
    } else if msg.contains("atomexists")
        || msg.contains("tripleexists")
        || msg.contains("termalreadyexists")
    {
        LedgerErrorCode::TermAlreadyExists
    } else if msg.contains("user rejected")
        || msg.contains("user denied")
        || msg.contains("rejected the request")
    {
        LedgerErrorCode::UserRejected
    } else if msg.contains("insufficient funds") || msg.contains("exceeds balance") {
        LedgerErrorCode::InsufficientBalance
    } else if msg.contains("gas") {
        LedgerErrorCode::InsufficientGas
    } else if msg.contains("revert") {
        LedgerErrorCode::Reverted
    } else if msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection")
        || msg.contains("network")
    {
        LedgerErrorCode::Transport
    } else {
        LedgerErrorCode::Unknown
    }
}

/// A failed ledger read or write
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Ledger error ({code}): {message}")]
pub struct LedgerError {
    /// Stable code
    pub code: LedgerErrorCode,
    /// Raw message
    pub message: String,
}

impl LedgerError {
    /// Build an error with a known code
    pub fn new(code: LedgerErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Build an error from a raw message, classifying it
    pub fn from_raw(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: classify_ledger_message(&message),
            message,
        }
    }

    /// Whether the error carries `code`
    #[inline]
    pub fn is(&self, code: LedgerErrorCode) -> bool {
        self.code == code
    }
}

/// Indexer query failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexerError {
    /// Request could not be sent or the connection failed
    #[error("Indexer request failed: {0}")]
    Http(String),

    /// Non-success HTTP status
    #[error("Indexer returned status {0}")]
    Status(u16),

    /// The query itself was rejected
    #[error("Indexer query error: {0}")]
    GraphQl(String),

    /// Response body did not match the expected shape
    #[error("Indexer response could not be decoded: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for IndexerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IndexerError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            IndexerError::Status(status.as_u16())
        } else {
            IndexerError::Http(err.to_string())
        }
    }
}

/// Bounded polling ran out of attempts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The target never became visible in the indexer
    #[error("{what} not indexed after {attempts} attempts")]
    NotIndexed {
        /// What was being polled for
        what: String,
        /// Attempts made
        attempts: u32,
    },
}

/// An item whose amount is too small to submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortfall {
    /// Cart item id
    pub item_id: String,
    /// Amount carried by the item
    #[serde(with = "amount_string")]
    pub amount: u128,
    /// Minimum the item needs
    #[serde(with = "amount_string")]
    pub minimum: u128,
    /// Missing amount
    #[serde(with = "amount_string")]
    pub shortfall: u128,
}

/// Error raised inside the engine's phases
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Nothing to submit
    #[error("Cart is empty")]
    EmptyCart,

    /// No wallet account
    #[error("Wallet is not connected")]
    WalletNotConnected,

    /// Wallet connected but the signing client is not usable yet
    #[error("Signing client is not ready")]
    ClientNotReady,

    /// An item breaks a shape invariant
    #[error("Invalid cart item {item_id}: {reason}")]
    InvalidItem {
        /// Cart item id
        item_id: String,
        /// What is wrong
        reason: String,
    },

    /// One or more items carry less than their minimum
    #[error("{} item(s) below the minimum amount", .0.len())]
    AmountBelowMinimum(Vec<Shortfall>),

    /// Against votes on relationships that do not exist yet, in strict mode
    #[error("Cannot vote against relationships that do not exist yet: {}", .0.join(", "))]
    AgainstOnNewRelationship(Vec<String>),

    /// A submission is already running on this engine
    #[error("A submission is already in progress")]
    AlreadyInProgress,

    /// Ledger failure
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Indexer failure
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    /// Indexer never caught up
    #[error(transparent)]
    Poll(#[from] PollError),

    /// Configuration could not be loaded or is unusable
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Code reported to the caller when a submission fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// Nothing to submit
    EmptyCart,
    /// No wallet account
    WalletNotConnected,
    /// Signing client not ready
    ClientNotReady,
    /// Malformed cart item
    InvalidItem,
    /// Amounts below minimum
    AmountBelowMinimum,
    /// Another submission is running
    AlreadyInProgress,
    /// Wallet request declined
    UserRejected,
    /// Not enough balance
    InsufficientBalance,
    /// Not enough gas
    InsufficientGas,
    /// Contract rejected the transaction
    ContractRejected,
    /// Indexer failed or never caught up
    IndexerUnavailable,
    /// Bad configuration
    Config,
    /// Anything else
    Unknown,
}

impl FailureCode {
    /// Snake-case name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::EmptyCart => "empty_cart",
            FailureCode::WalletNotConnected => "wallet_not_connected",
            FailureCode::ClientNotReady => "client_not_ready",
            FailureCode::InvalidItem => "invalid_item",
            FailureCode::AmountBelowMinimum => "amount_below_minimum",
            FailureCode::AlreadyInProgress => "already_in_progress",
            FailureCode::UserRejected => "user_rejected",
            FailureCode::InsufficientBalance => "insufficient_balance",
            FailureCode::InsufficientGas => "insufficient_gas",
            FailureCode::ContractRejected => "contract_rejected",
            FailureCode::IndexerUnavailable => "indexer_unavailable",
            FailureCode::Config => "config",
            FailureCode::Unknown => "unknown",
        }
    }
}

/// Terminal failure of a submission, as reported to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct ExecutionFailure {
    /// Stable code
    pub code: FailureCode,
    /// Human-readable message
    pub message: String,
    /// Phase that failed
    pub phase: Option<Phase>,
    /// Per-item shortfalls when the code is `AmountBelowMinimum`
    #[serde(default)]
    pub shortfalls: Vec<Shortfall>,
}

impl ExecutionFailure {
    /// Map an engine error raised in `phase`
    pub fn from_engine_error(err: EngineError, phase: Option<Phase>) -> Self {
        let (code, message, shortfalls) = match err {
            EngineError::EmptyCart => (FailureCode::EmptyCart, err.to_string(), Vec::new()),
            EngineError::WalletNotConnected => {
                (FailureCode::WalletNotConnected, err.to_string(), Vec::new())
            }
            EngineError::ClientNotReady => (FailureCode::ClientNotReady, err.to_string(), Vec::new()),
            EngineError::InvalidItem { .. } | EngineError::AgainstOnNewRelationship(_) => {
                (FailureCode::InvalidItem, err.to_string(), Vec::new())
            }
            EngineError::AmountBelowMinimum(ref shortfalls) => {
                let shortfalls = shortfalls.clone();
                (FailureCode::AmountBelowMinimum, err.to_string(), shortfalls)
            }
            EngineError::AlreadyInProgress => {
                (FailureCode::AlreadyInProgress, err.to_string(), Vec::new())
            }
            EngineError::Ledger(ledger) => {
                let (code, message) = Self::describe_ledger_error(ledger);
                (code, message, Vec::new())
            }
            EngineError::Indexer(_) | EngineError::Poll(_) => {
                (FailureCode::IndexerUnavailable, err.to_string(), Vec::new())
            }
            EngineError::Config(_) => (FailureCode::Config, err.to_string(), Vec::new()),
        };

        Self {
            code,
            message,
            phase,
            shortfalls,
        }
    }

    fn describe_ledger_error(err: LedgerError) -> (FailureCode, String) {
        match err.code {
            LedgerErrorCode::UserRejected => (
                FailureCode::UserRejected,
                "Transaction was rejected in the wallet".to_string(),
            ),
            LedgerErrorCode::InsufficientBalance => (
                FailureCode::InsufficientBalance,
                "Insufficient balance to cover the transaction".to_string(),
            ),
            LedgerErrorCode::InsufficientGas => (
                FailureCode::InsufficientGas,
                "Insufficient funds to pay for gas".to_string(),
            ),
            LedgerErrorCode::CounterNotInitializable
            | LedgerErrorCode::HasCounterStake
            | LedgerErrorCode::TermAlreadyExists
            | LedgerErrorCode::Reverted => (FailureCode::ContractRejected, err.message),
            LedgerErrorCode::Transport | LedgerErrorCode::Unknown => {
                (FailureCode::Unknown, err.message)
            }
        }
    }
}

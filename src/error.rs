//! Error types for the sentinel core

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sentinel core
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid signer key: {0}")]
    InvalidSignerKey(String),

    // RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("Nonce fetch failed for {account}: {reason}")]
    NonceFetch { account: String, reason: String },

    // Gas errors
    #[error("Gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("Fee data unavailable: {0}")]
    FeeData(String),

    #[error("Gas price {current_gwei} gwei exceeds ceiling {ceiling_gwei} gwei")]
    GasPriceExceedsCeiling { current_gwei: u64, ceiling_gwei: u64 },

    // Validation rejections
    #[error("Threat detected: {reason}")]
    ThreatRejected { reason: String },

    #[error("Unknown contract: {address}")]
    UnknownContract { address: String },

    #[error("Blocked contract: {address}")]
    BlockedContract { address: String },

    // Limit rejections
    #[error("Transaction of ${amount:.2} exceeds per-transaction limit ${limit:.2}")]
    TransactionLimitExceeded { amount: f64, limit: f64 },

    #[error("{window} limit exceeded: ${spent:.2} spent + ${requested:.2} requested > ${limit:.2} limit")]
    WindowLimitExceeded {
        window: String,
        spent: f64,
        requested: f64,
        limit: f64,
    },

    // Approval outcomes
    #[error("Approval request not found: {0}")]
    ApprovalNotFound(String),

    #[error("Approval request {id} rejected: {reason}")]
    ApprovalRejected { id: String, reason: String },

    #[error("Approval request {0} expired before a decision was made")]
    ApprovalExpired(String),

    #[error("Approval request {id} already resolved as {status}")]
    ApprovalAlreadyResolved { id: String, status: String },

    // Wallet / tier errors
    #[error("Wallet is paused: {0}")]
    WalletPaused(String),

    #[error("Manual tier cannot sign non-interactively; use prepare_for_signing")]
    ManualSigningRequired,

    #[error("Insufficient balance: {available} wei available, {required} wei required")]
    InsufficientBalance { available: String, required: String },

    // Execution errors
    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("{stage} stage rejected transaction: {reason}")]
    StageRejected { stage: String, reason: String },

    #[error("Transaction submission failed: {0}")]
    Submission(String),

    #[error("Confirmation wait timed out for {0}")]
    ConfirmationTimeout(String),

    #[error("Confirmation wait cancelled for {0}")]
    ConfirmationCancelled(String),

    // Signer errors
    #[error("Signer error: {0}")]
    Signer(String),

    // Price errors
    #[error("Price unavailable for {token}/{quote}: {reason}")]
    PriceUnavailable {
        token: String,
        quote: String,
        reason: String,
    },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc(_)
                | Error::RpcTimeout(_)
                | Error::RpcConnection(_)
                | Error::FeeData(_)
                | Error::Submission(_)
                | Error::PriceUnavailable { .. }
        )
    }

    /// Check if this error is a deliberate policy rejection (money is safe,
    /// the engine refused to spend it) as opposed to a network-side failure
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Error::ThreatRejected { .. }
                | Error::UnknownContract { .. }
                | Error::BlockedContract { .. }
                | Error::TransactionLimitExceeded { .. }
                | Error::WindowLimitExceeded { .. }
                | Error::ApprovalRejected { .. }
                | Error::ApprovalExpired(_)
                | Error::GasPriceExceedsCeiling { .. }
                | Error::WalletPaused(_)
        )
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::RpcTimeout(0)
        } else if e.is_connect() {
            Error::RpcConnection(e.to_string())
        } else {
            Error::Rpc(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

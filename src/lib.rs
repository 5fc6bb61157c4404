//! EVM Sentinel Library
//!
//! Authorization and execution-safety core for an autonomous on-chain
//! funds-management agent. Every value-moving transaction passes a layered
//! policy engine - spending limits, attack-signature detection, contract
//! trust checks, optional human approval, gas caps, and pre-flight
//! simulation - before it can reach the network.

pub mod approval;
pub mod audit;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod gas;
pub mod ledger;
pub mod nonce;
pub mod pipeline;
pub mod price;
pub mod registry;
pub mod signer;
pub mod threat;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use engine::{EngineBuilder, SentinelEngine};
pub use error::{Error, Result};
pub use pipeline::{ExecutionPipeline, ExecutionReport, Stage, TransactionIntent};
pub use wallet::{TierPolicy, TieredWallet, WalletTier};

//! Tiered wallet module
//!
//! Three policy profiles over one wallet shape:
//!
//! ```text
//! autonomous        - low limits, lowest-risk contracts, no human, auto-pause
//! approval_required - mid limits, mandatory human sign-off with timeout
//! manual            - hardware-backed, read-only + prepare-for-signing
//! ```
//!
//! A wallet is one [`TierPolicy`] value composed with one signing backend;
//! there is no provider inheritance. All checks run in the execution
//! pipeline before the backend ever sees a transaction.

pub mod policy;
pub mod tiered;

pub use policy::{TierPolicy, TierRuntimeState, WalletTier};
pub use tiered::{PauseHook, TieredWallet};

//! Built-in contract table (Ethereum mainnet)
//!
//! The starting trust set: bluechip tokens, the major lending pools and
//! routers, factories, oracles, wrappers, governance, and the Permit2
//! approval hub. Operators extend or override this via the whitelist file.

use alloy::primitives::{address, Address};

use super::{ContractCategory, ContractRecord, RiskTier};

pub const WETH: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
pub const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
pub const USDT: Address = address!("dac17f958d2ee523a2206206994597c13d831ec7");
pub const DAI: Address = address!("6b175474e89094c44da98b954eedeac495271d0f");
pub const WBTC: Address = address!("2260fac5e5542a773aa44fbcfedf7c193bc2c599");
pub const STETH: Address = address!("ae7ab96520de3a18e5e111b5eaab095312d7fe84");
pub const WSTETH: Address = address!("7f39c581f595b53c5cb19bd0b3f8da6c935e2ca0");

pub const AAVE_V3_POOL: Address = address!("87870bca3f3fd6335c3f4ce8392d69350b4fa4e2");
pub const COMPOUND_V3_USDC: Address = address!("c3d688b66703497daa19211eedff47f25384cdc3");

pub const UNISWAP_V2_ROUTER: Address = address!("7a250d5630b4cf539739df2c5dacb4c659f2488d");
pub const UNISWAP_V3_ROUTER: Address = address!("e592427a0aece92de3edee1f18e0157c05861564");
pub const UNIVERSAL_ROUTER: Address = address!("3fc91a3afd70395cd496c647d5a6cc9d4b2b7fad");

pub const UNISWAP_V2_FACTORY: Address = address!("5c69bee701ef814a2b6a3edd4b1652cb9cc5aa6f");
pub const UNISWAP_V3_FACTORY: Address = address!("1f98431c8ad98523631ae4a59f267346ea31f984");

pub const CHAINLINK_ETH_USD: Address = address!("5f4ec3df9cbd43714fe2740f5e3616155c5b8419");

/// Permit2 — can grant token spending without a direct `approve` call
pub const PERMIT2: Address = address!("000000000022d473030f116ddee9f6b43ac78ba3");

pub const COMPOUND_GOVERNOR: Address = address!("c0da02939e1441f497fd74f78ce7decb17b66529");

const MAINNET: &str = "mainnet";

fn record(
    address: Address,
    name: &str,
    protocol: &str,
    category: ContractCategory,
    risk: RiskTier,
    notes: &str,
) -> ContractRecord {
    ContractRecord {
        address,
        name: name.to_string(),
        protocol: protocol.to_string(),
        category,
        risk,
        network: MAINNET.to_string(),
        notes: notes.to_string(),
    }
}

/// The built-in trust table
pub fn builtin_records() -> Vec<ContractRecord> {
    use ContractCategory::*;
    use RiskTier::*;

    vec![
        // Tokens
        record(WETH, "WETH", "weth", Token, Low, "canonical wrapped ether"),
        record(USDC, "USDC", "circle", Token, Low, ""),
        record(USDT, "USDT", "tether", Token, Low, ""),
        record(DAI, "DAI", "makerdao", Token, Low, ""),
        record(WBTC, "WBTC", "bitgo", Token, Medium, "custodial bridge token"),
        record(STETH, "stETH", "lido", Token, Medium, "rebasing"),
        // Wrappers
        record(WSTETH, "wstETH", "lido", Wrapper, Medium, ""),
        // Lending pools
        record(AAVE_V3_POOL, "Aave v3 Pool", "aave", LendingPool, Low, ""),
        record(
            COMPOUND_V3_USDC,
            "Compound v3 USDC",
            "compound",
            LendingPool,
            Low,
            "",
        ),
        // Routers
        record(
            UNISWAP_V2_ROUTER,
            "Uniswap V2 Router",
            "uniswap",
            Router,
            Low,
            "",
        ),
        record(
            UNISWAP_V3_ROUTER,
            "Uniswap V3 SwapRouter",
            "uniswap",
            Router,
            Low,
            "",
        ),
        record(
            UNIVERSAL_ROUTER,
            "Uniswap Universal Router",
            "uniswap",
            Router,
            Medium,
            "permit2-integrated, commands are opaque",
        ),
        // Factories
        record(
            UNISWAP_V2_FACTORY,
            "Uniswap V2 Factory",
            "uniswap",
            Factory,
            Medium,
            "",
        ),
        record(
            UNISWAP_V3_FACTORY,
            "Uniswap V3 Factory",
            "uniswap",
            Factory,
            Medium,
            "",
        ),
        // Oracles
        record(
            CHAINLINK_ETH_USD,
            "Chainlink ETH/USD",
            "chainlink",
            Oracle,
            Low,
            "",
        ),
        // Approval hub
        record(
            PERMIT2,
            "Permit2",
            "uniswap",
            ApprovalHub,
            High,
            "grants token allowances via signatures; every interaction is scrutinized",
        ),
        // Governance
        record(
            COMPOUND_GOVERNOR,
            "Compound Governor Bravo",
            "compound",
            Governance,
            Medium,
            "",
        ),
    ]
}

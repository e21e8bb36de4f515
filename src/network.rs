// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Network presets and the per-connection network context.

use std::fmt;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Chain id of the local development ledger.
pub const LOCAL_CHAIN_ID: u64 = 31337;

/// Chain id of the Sepolia test network.
pub const SEPOLIA_CHAIN_ID: u64 = 11155111;

/// EVM network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: &'static str,
    /// Chain ID
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: &'static str,
    /// Block explorer URL (empty for local networks)
    pub explorer_url: &'static str,
}

/// Local development node (Hardhat-style).
pub const LOCALHOST: NetworkConfig = NetworkConfig {
    name: "Local Development",
    chain_id: LOCAL_CHAIN_ID,
    rpc_url: "http://127.0.0.1:8545",
    explorer_url: "",
};

/// Sepolia testnet configuration.
pub const SEPOLIA: NetworkConfig = NetworkConfig {
    name: "Sepolia",
    chain_id: SEPOLIA_CHAIN_ID,
    rpc_url: "https://ethereum-sepolia-rpc.publicnode.com",
    explorer_url: "https://sepolia.etherscan.io",
};

/// Look up a preset by chain id.
pub fn preset_for(chain_id: u64) -> Option<NetworkConfig> {
    match chain_id {
        LOCAL_CHAIN_ID => Some(LOCALHOST),
        SEPOLIA_CHAIN_ID => Some(SEPOLIA),
        _ => None,
    }
}

/// Which family of confidential backend a network uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// Development ledger served by the local simulator
    Local,
    /// Public network served by the remote relayer
    Remote,
}

impl NetworkKind {
    pub fn of(network_id: u64) -> Self {
        if network_id == LOCAL_CHAIN_ID {
            NetworkKind::Local
        } else {
            NetworkKind::Remote
        }
    }
}

/// Identity of a connection: which chain, which records contract, which account.
///
/// Immutable for the lifetime of a session. Any change of chain or account
/// produces a new context, and every session built on the old one is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkContext {
    pub network_id: u64,
    pub ledger_address: Address,
    pub account: Address,
}

impl NetworkContext {
    pub fn new(network_id: u64, ledger_address: Address, account: Address) -> Self {
        Self {
            network_id,
            ledger_address,
            account,
        }
    }

    pub fn kind(&self) -> NetworkKind {
        NetworkKind::of(self.network_id)
    }

    /// Display label used in logs, mirroring the wallet's status badge.
    pub fn label(&self) -> &'static str {
        match preset_for(self.network_id) {
            Some(preset) => preset.name,
            None => "Unknown network",
        }
    }
}

impl fmt::Display for NetworkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} ledger={} account={}",
            self.label(),
            self.network_id,
            self.ledger_address,
            self.account
        )
    }
}

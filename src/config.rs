// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the client. Configuration is loaded from the environment at
//! startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `VITALCHAIN_CHAIN_ID` | Host network id | `31337` |
//! | `VITALCHAIN_RPC_URL` | Ledger JSON-RPC endpoint | Preset of the chain id |
//! | `VITALCHAIN_ADDRESS` | Records contract | `0x5FbD...0aa3` |
//! | `VITALCHAIN_BADGE_ADDRESS` | Badge contract | `0xe7f1...0512` |
//! | `VITALCHAIN_PRIVATE_KEY` | Hex signer key | Required unless `VITALCHAIN_KEY_PEM` is set |
//! | `VITALCHAIN_KEY_PEM` | Path of a PEM signer key | Optional |
//! | `VITALCHAIN_RELAYER_URL` | Relayer speaking the `v1/keyurl`, `v1/input-proof` and `v1/user-decrypt` protocol | Required for encrypted operations on Sepolia |
//! | `VITALCHAIN_CONFIRMATIONS` | Receipts required before success | `1` |
//! | `VITALCHAIN_RECEIPT_TIMEOUT_SECS` | Confirmation wait before "pending" | `120` |
//! | `VITALCHAIN_AUTH_VALIDITY_DAYS` | Decryption authorization window | `365` |
//! | `VITALCHAIN_GAS_LIMIT` | Gas limit for record submission | `10000000` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,vitalchain_client=debug` |

use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::{address, Address};
use url::Url;

use crate::fhe::eip712::{validate_validity_days, MAX_VALIDITY_DAYS};
use crate::fhe::relayer::RelayerConfig;
use crate::ledger::ConfirmationPolicy;
use crate::network::{preset_for, LOCAL_CHAIN_ID, SEPOLIA_CHAIN_ID};
use crate::records::{RecordContracts, DEFAULT_GAS_LIMIT};
use crate::wallet::LocalWallet;

/// Environment variable name for the host network id.
pub const CHAIN_ID_ENV: &str = "VITALCHAIN_CHAIN_ID";

/// Environment variable name for the ledger JSON-RPC endpoint.
///
/// # Default
/// The RPC URL of the network preset matching the chain id. Chains without
/// a preset must set it explicitly.
pub const RPC_URL_ENV: &str = "VITALCHAIN_RPC_URL";

/// Environment variable name for the records contract address.
pub const RECORDS_ADDRESS_ENV: &str = "VITALCHAIN_ADDRESS";

/// Environment variable name for the badge contract address.
pub const BADGE_ADDRESS_ENV: &str = "VITALCHAIN_BADGE_ADDRESS";

/// Environment variable name for the hex-encoded signer key.
///
/// Never logged.
pub const PRIVATE_KEY_ENV: &str = "VITALCHAIN_PRIVATE_KEY";

/// Environment variable name for the path of a PEM signer key.
pub const KEY_PEM_ENV: &str = "VITALCHAIN_KEY_PEM";

/// Environment variable name for the remote relayer base URL.
pub const RELAYER_URL_ENV: &str = "VITALCHAIN_RELAYER_URL";

/// Environment variable name for the confirmation depth.
pub const CONFIRMATIONS_ENV: &str = "VITALCHAIN_CONFIRMATIONS";

/// Environment variable name for the receipt wait in seconds.
pub const RECEIPT_TIMEOUT_ENV: &str = "VITALCHAIN_RECEIPT_TIMEOUT_SECS";

/// Environment variable name for the authorization window in days.
pub const AUTH_VALIDITY_DAYS_ENV: &str = "VITALCHAIN_AUTH_VALIDITY_DAYS";

/// Environment variable name for the record submission gas limit.
pub const GAS_LIMIT_ENV: &str = "VITALCHAIN_GAS_LIMIT";

/// Environment variable name for the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Log filter applied when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,vitalchain_client=debug";

/// Records contract of a fresh local deployment.
pub const DEFAULT_RECORDS_ADDRESS: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");

/// Badge contract of a fresh local deployment.
pub const DEFAULT_BADGE_ADDRESS: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not set")]
    Missing { name: &'static str },

    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Where the signer key comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    Hex(String),
    PemFile(PathBuf),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Hex(_) => write!(f, "Hex(<redacted>)"),
            KeySource::PemFile(path) => write!(f, "PemFile({})", path.display()),
        }
    }
}

impl KeySource {
    pub fn load(&self) -> Result<LocalWallet, ConfigError> {
        match self {
            KeySource::Hex(hex) => LocalWallet::from_hex(hex).map_err(|e| ConfigError::Invalid {
                name: PRIVATE_KEY_ENV,
                reason: e.to_string(),
            }),
            KeySource::PemFile(path) => {
                LocalWallet::from_pem_file(path).map_err(|e| ConfigError::Invalid {
                    name: KEY_PEM_ENV,
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match env_optional(LOG_FORMAT_ENV).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Everything the binary needs to connect.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub chain_id: u64,
    pub rpc_url: Url,
    pub contracts: RecordContracts,
    pub key: KeySource,
    /// Only set when overridden; remote networks otherwise use their preset
    pub relayer_url: Option<Url>,
    pub confirmations: u64,
    pub receipt_timeout: Duration,
    pub validity_days: u64,
    pub gas_limit: u64,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_optional)
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let chain_id = parse_or(&lookup, CHAIN_ID_ENV, LOCAL_CHAIN_ID)?;

        let rpc_url = match lookup(RPC_URL_ENV) {
            Some(raw) => parse_url(RPC_URL_ENV, &raw)?,
            None => {
                let preset = preset_for(chain_id).ok_or(ConfigError::Missing { name: RPC_URL_ENV })?;
                parse_url(RPC_URL_ENV, preset.rpc_url)?
            }
        };

        let contracts = RecordContracts {
            records: parse_or(&lookup, RECORDS_ADDRESS_ENV, DEFAULT_RECORDS_ADDRESS)?,
            badge: parse_or(&lookup, BADGE_ADDRESS_ENV, DEFAULT_BADGE_ADDRESS)?,
        };

        let key = match (lookup(PRIVATE_KEY_ENV), lookup(KEY_PEM_ENV)) {
            (Some(hex), _) => KeySource::Hex(hex),
            (None, Some(path)) => KeySource::PemFile(PathBuf::from(path)),
            (None, None) => return Err(ConfigError::Missing { name: PRIVATE_KEY_ENV }),
        };

        let relayer_url = lookup(RELAYER_URL_ENV)
            .map(|raw| parse_url(RELAYER_URL_ENV, &raw))
            .transpose()?;

        let confirmations = parse_or(&lookup, CONFIRMATIONS_ENV, 1u64)?;
        if confirmations == 0 {
            return Err(ConfigError::Invalid {
                name: CONFIRMATIONS_ENV,
                reason: "must be at least 1".to_string(),
            });
        }

        let validity_days = parse_or(&lookup, AUTH_VALIDITY_DAYS_ENV, MAX_VALIDITY_DAYS)?;
        validate_validity_days(validity_days).map_err(|e| ConfigError::Invalid {
            name: AUTH_VALIDITY_DAYS_ENV,
            reason: e.to_string(),
        })?;

        Ok(Self {
            chain_id,
            rpc_url,
            contracts,
            key,
            relayer_url,
            confirmations,
            receipt_timeout: Duration::from_secs(parse_or(&lookup, RECEIPT_TIMEOUT_ENV, 120u64)?),
            validity_days,
            gas_limit: parse_or(&lookup, GAS_LIMIT_ENV, DEFAULT_GAS_LIMIT)?,
        })
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            confirmations: self.confirmations,
            timeout: self.receipt_timeout,
        }
    }

    /// Relayer deployment for this chain.
    ///
    /// # Returns
    /// * `Some(RelayerConfig)` - Sepolia coprocessor deployment behind `VITALCHAIN_RELAYER_URL`
    /// * `None` - If no relayer URL is set or the chain has no known coprocessor addresses
    pub fn relayer(&self) -> Option<RelayerConfig> {
        if self.chain_id != SEPOLIA_CHAIN_ID {
            return None;
        }
        self.relayer_url
            .as_ref()
            .map(|url| RelayerConfig::sepolia(url.as_str()))
    }
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

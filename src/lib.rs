// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! VitalChain Client - Confidential Health Records
//!
//! This crate lets a client submit numeric health measurements to an EVM
//! ledger in encrypted form and later decrypt its own values through a
//! wallet-signed, time-bounded authorization.
//!
//! ## Modules
//!
//! - `config` - Environment configuration
//! - `error` - Client error taxonomy
//! - `network` - Network presets and connection context
//! - `wallet` - Wallet signer port and local key signer
//! - `fhe` - Confidential session protocol (backends, sessions, authorizations)
//! - `ledger` - Ledger gateway port, contract ABI, alloy and in-memory adapters
//! - `records` - Record submission, statistics, history and achievements

pub mod config;
pub mod error;
pub mod fhe;
pub mod ledger;
pub mod network;
pub mod records;
pub mod wallet;

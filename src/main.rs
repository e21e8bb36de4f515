// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing_subscriber::EnvFilter;

use vitalchain_client::config::{ClientConfig, LogFormat, DEFAULT_LOG_FILTER};
use vitalchain_client::error::{ClientError, ClientResult};
use vitalchain_client::fhe::{BackendSelector, SessionManager};
use vitalchain_client::ledger::evm::EvmLedger;
use vitalchain_client::network::{NetworkContext, NetworkKind};
use vitalchain_client::records::{
    RecordCategory, RecordOrchestrator, SubmitOutcome, VitalRecordInput, DEFAULT_RECENT_LIMIT,
};
use vitalchain_client::wallet::WalletSigner;

const USAGE: &str = "usage: vitalchain <command>

commands:
  submit <indicator> [routine|specialist] [YYYY-MM-DD] [checkup type] [facility]
  stats
  badges
  claim <level index>
  history [limit]";

enum Command {
    Submit(VitalRecordInput),
    Stats,
    Badges,
    Claim(usize),
    History(usize),
}

fn parse_command(args: &[String]) -> ClientResult<Command> {
    let invalid = |what: &str| ClientError::InvalidInput(format!("{what}\n\n{USAGE}"));

    match args.first().map(String::as_str) {
        Some("submit") => {
            let indicator = args
                .get(1)
                .ok_or_else(|| invalid("missing indicator"))?
                .parse::<u32>()
                .map_err(|e| invalid(&format!("indicator: {e}")))?;
            let category = match args.get(2) {
                Some(raw) => raw.parse()?,
                None => RecordCategory::Routine,
            };
            let date = match args.get(3) {
                Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|e| invalid(&format!("date: {e}")))?,
                None => Utc::now().date_naive(),
            };
            let checkup_type = args.get(4).map(String::as_str).unwrap_or("");
            let facility = args.get(5).map(String::as_str).unwrap_or("");
            Ok(Command::Submit(
                VitalRecordInput::new(indicator, category, date).with_details(checkup_type, facility),
            ))
        }
        Some("stats") => Ok(Command::Stats),
        Some("badges") => Ok(Command::Badges),
        Some("claim") => {
            let level = args
                .get(1)
                .ok_or_else(|| invalid("missing level index"))?
                .parse::<usize>()
                .map_err(|e| invalid(&format!("level index: {e}")))?;
            Ok(Command::Claim(level))
        }
        Some("history") => {
            let limit = match args.get(1) {
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|e| invalid(&format!("limit: {e}")))?,
                None => DEFAULT_RECENT_LIMIT,
            };
            Ok(Command::History(limit))
        }
        Some(other) => Err(invalid(&format!("unknown command {other:?}"))),
        None => Err(invalid("missing command")),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn log_outcome(action: &str, outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Confirmed(receipt) => tracing::info!(
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number,
            gas_used = receipt.gas_used,
            "{action} confirmed"
        ),
        SubmitOutcome::Pending { tx_hash } => {
            tracing::warn!(tx_hash = %tx_hash, "{action} sent but not yet confirmed")
        }
    }
}

async fn run(config: ClientConfig, command: Command) -> ClientResult<()> {
    let wallet = config
        .key
        .load()
        .map_err(|e| ClientError::InvalidInput(e.to_string()))?;
    let account = wallet.address();

    let ledger = Arc::new(EvmLedger::connect_with_wallet(
        config.rpc_url.as_str(),
        config.chain_id,
        wallet.ethereum_wallet(),
    )?);

    let mut selector = BackendSelector::new();
    if NetworkKind::of(config.chain_id) == NetworkKind::Local {
        selector = selector.with_dev_node(ledger.clone());
    }
    match config.relayer() {
        Some(relayer) => selector = selector.with_relayer(relayer),
        None if NetworkKind::of(config.chain_id) == NetworkKind::Remote => tracing::warn!(
            chain_id = config.chain_id,
            "No relayer for this network; set VITALCHAIN_RELAYER_URL to a v1 relayer on Sepolia"
        ),
        None => {}
    }
    let manager = SessionManager::new(selector);

    let orchestrator = RecordOrchestrator::new(ledger, config.contracts)
        .with_policy(config.confirmation_policy())
        .with_gas_limit(Some(config.gas_limit))
        .with_validity_days(config.validity_days);

    let context = NetworkContext::new(config.chain_id, config.contracts.records, account);
    tracing::info!(context = %context, "Connected");

    match command {
        Command::Submit(record) => {
            let mut session = manager.open_session(context).await?;
            let outcome = orchestrator.submit_record(&mut session, &record).await?;
            log_outcome("Record submission", &outcome);
        }
        Command::Stats => {
            let mut session = manager.open_session(context).await?;
            let stats = orchestrator.read_my_stats(&mut session, &wallet).await?;
            tracing::info!(
                count = stats.count,
                last_value = ?stats.last_value,
                "Your records"
            );
        }
        Command::Badges => {
            let mut session = manager.open_session(context).await?;
            for status in orchestrator.refresh_achievements(&mut session, &wallet).await? {
                tracing::info!(
                    level = status.level_index,
                    name = %status.level.name,
                    threshold = status.level.threshold,
                    unlocked = status.unlocked,
                    progress_percent = status.progress_percent,
                    remaining = status.remaining,
                    "{} {}",
                    status.level.emoji,
                    status.level.description
                );
            }
        }
        Command::Claim(level_index) => {
            let outcome = orchestrator.claim_badge(account, level_index).await?;
            log_outcome("Badge claim", &outcome);
        }
        Command::History(limit) => {
            let records = orchestrator.recent_records(account, limit).await?;
            if records.is_empty() {
                tracing::info!("No records in the recent block window");
            }
            for record in records {
                tracing::info!(
                    block = record.block_number,
                    date = record.date,
                    category = record.category,
                    ipfs_cid = %record.ipfs_cid,
                    handle = %record.handle.short(),
                    "Record"
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::from(2);
        }
    };

    match run(config, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(
                error = %e,
                retryable = e.is_retryable(),
                reauthorize = e.requires_reauthorization(),
                "Command failed"
            );
            ExitCode::FAILURE
        }
    }
}

use std::path::Path;

use num_bigint::BigUint;
use rollup_common::constants::ETH_ADDRESS_LEN;
use rollup_common::encoding::to_hex_prefixed;
use rollup_common::{decimal, decimal_vec, EthAddress, Transaction, TxRequest, ValidationError};
use rollup_core::{BatchBuilder, RollupError, Store};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed transaction file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Transaction {index}: {source}")]
    Invalid {
        index: usize,
        source: ValidationError,
    },
    #[error("Invalid Ethereum address: {0}")]
    InvalidAddress(String),
}

/// Parses a JSON array of transaction requests and resolves each one into a
/// typed transaction, stopping at the first invalid entry.
pub fn parse_transactions(json: &str) -> Result<Vec<Transaction>, ScriptError> {
    let requests: Vec<TxRequest> = serde_json::from_str(json)?;
    requests
        .into_iter()
        .enumerate()
        .map(|(index, req)| Transaction::try_from(req).map_err(|source| ScriptError::Invalid { index, source }))
        .collect()
}

pub fn load_transactions(path: &Path) -> Result<Vec<Transaction>, ScriptError> {
    let json = std::fs::read_to_string(path)?;
    parse_transactions(&json)
}

pub fn parse_eth_address(s: &str) -> Result<EthAddress, ScriptError> {
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|_| ScriptError::InvalidAddress(s.to_string()))?;
    let address: [u8; ETH_ADDRESS_LEN] = bytes
        .try_into()
        .map_err(|_| ScriptError::InvalidAddress(s.to_string()))?;
    Ok(address)
}

/// Public outputs of a built batch, as handed to the on-chain submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_number: u64,
    #[serde(with = "decimal")]
    pub old_state_root: BigUint,
    #[serde(with = "decimal")]
    pub new_state_root: BigUint,
    #[serde(with = "decimal")]
    pub new_exit_root: BigUint,
    #[serde(with = "decimal")]
    pub on_chain_hash: BigUint,
    #[serde(with = "decimal")]
    pub off_chain_hash: BigUint,
    pub data_available: String,
    pub deposit_off_chain_data: String,
    #[serde(with = "decimal_vec")]
    pub fee_plan_coins: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub fee_totals: Vec<BigUint>,
    pub initial_idx: u64,
    pub final_idx: u64,
    pub tx_count: usize,
}

impl BatchReport {
    pub fn from_batch<S: Store>(batch: &BatchBuilder<S>) -> Result<Self, RollupError> {
        Ok(Self {
            batch_number: batch.batch_number(),
            old_state_root: batch.old_state_root()?.clone(),
            new_state_root: batch.new_state_root()?.clone(),
            new_exit_root: batch.new_exit_root()?.clone(),
            on_chain_hash: batch.on_chain_hash()?.clone(),
            off_chain_hash: batch.off_chain_hash()?.clone(),
            data_available: batch.data_available_sm()?,
            deposit_off_chain_data: to_hex_prefixed(&batch.deposit_off_chain_data()?),
            fee_plan_coins: batch.fee_plan_coins()?.to_vec(),
            fee_totals: batch.fee_totals()?.to_vec(),
            initial_idx: batch.initial_idx(),
            final_idx: batch.final_idx()?,
            tx_count: batch.tx_count(),
        })
    }
}

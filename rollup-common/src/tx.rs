use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{EXIT_IDX, NONCE_BITS};
use crate::float16::{fix2float, Float16Error};
use crate::{decimal, decimal_opt, hex_array, hex_array_opt, EthAddress};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Load amount must be 0 for off-chain transactions")]
    LoadAmountOffChain,
    #[error("Missing field for {kind} transaction: {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] Float16Error),
    #[error("Invalid nonce: {0}")]
    InvalidNonce(u64),
    #[error("Off-chain transaction cannot originate from the exit index")]
    InvalidSender,
}

/// EdDSA signature fields carried into the witness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignature {
    #[serde(with = "decimal")]
    pub r8x: BigUint,
    #[serde(with = "decimal")]
    pub r8y: BigUint,
    #[serde(with = "decimal")]
    pub s: BigUint,
}

/// Transfer authorised by a base-chain contract call. The sender's index is
/// resolved from `(coin, fromEthAddr)` when the batch is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainTx {
    pub coin: u32,
    #[serde(with = "decimal")]
    pub from_ax: BigUint,
    #[serde(with = "decimal")]
    pub from_ay: BigUint,
    #[serde(with = "hex_array")]
    pub from_eth_addr: EthAddress,
    pub to_idx: u64,
    #[serde(with = "decimal")]
    pub to_ax: BigUint,
    #[serde(with = "decimal")]
    pub to_ay: BigUint,
    #[serde(with = "hex_array")]
    pub to_eth_addr: EthAddress,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    #[serde(with = "decimal")]
    pub load_amount: BigUint,
}

/// Transfer signed by the account owner and collected by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffChainTx {
    pub from_idx: u64,
    pub to_idx: u64,
    pub coin: u32,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    #[serde(with = "decimal")]
    pub user_fee: BigUint,
    pub nonce: u64,
    #[serde(with = "decimal")]
    pub from_ax: BigUint,
    #[serde(with = "decimal")]
    pub from_ay: BigUint,
    pub signature: TxSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Transaction {
    OnChain(OnChainTx),
    OffChain(OffChainTx),
}

impl Transaction {
    pub fn is_on_chain(&self) -> bool {
        matches!(self, Transaction::OnChain(_))
    }

    pub fn coin(&self) -> u32 {
        match self {
            Transaction::OnChain(tx) => tx.coin,
            Transaction::OffChain(tx) => tx.coin,
        }
    }

    pub fn to_idx(&self) -> u64 {
        match self {
            Transaction::OnChain(tx) => tx.to_idx,
            Transaction::OffChain(tx) => tx.to_idx,
        }
    }

    pub fn is_exit(&self) -> bool {
        self.to_idx() == EXIT_IDX
    }
}

/// Account creation collected off-chain by the operator. It is applied in
/// the on-chain section of the batch with no amount and no load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositOffChain {
    pub coin: u32,
    #[serde(with = "decimal")]
    pub ax: BigUint,
    #[serde(with = "decimal")]
    pub ay: BigUint,
    #[serde(with = "hex_array")]
    pub eth_address: EthAddress,
}

impl From<&DepositOffChain> for OnChainTx {
    fn from(deposit: &DepositOffChain) -> Self {
        OnChainTx {
            coin: deposit.coin,
            from_ax: deposit.ax.clone(),
            from_ay: deposit.ay.clone(),
            from_eth_addr: deposit.eth_address,
            to_idx: EXIT_IDX,
            to_ax: BigUint::zero(),
            to_ay: BigUint::zero(),
            to_eth_addr: [0u8; 20],
            amount: BigUint::zero(),
            load_amount: BigUint::zero(),
        }
    }
}

/// Loosely typed transaction as submitted by tools and collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TxRequest {
    pub on_chain: bool,
    pub from_idx: Option<u64>,
    pub to_idx: Option<u64>,
    pub coin: u32,
    #[serde(with = "decimal_opt")]
    pub amount: Option<BigUint>,
    #[serde(with = "decimal_opt")]
    pub load_amount: Option<BigUint>,
    #[serde(with = "decimal_opt")]
    pub user_fee: Option<BigUint>,
    pub nonce: Option<u64>,
    #[serde(with = "decimal_opt")]
    pub from_ax: Option<BigUint>,
    #[serde(with = "decimal_opt")]
    pub from_ay: Option<BigUint>,
    #[serde(with = "hex_array_opt")]
    pub from_eth_addr: Option<EthAddress>,
    #[serde(with = "decimal_opt")]
    pub to_ax: Option<BigUint>,
    #[serde(with = "decimal_opt")]
    pub to_ay: Option<BigUint>,
    #[serde(with = "hex_array_opt")]
    pub to_eth_addr: Option<EthAddress>,
    #[serde(with = "decimal_opt")]
    pub r8x: Option<BigUint>,
    #[serde(with = "decimal_opt")]
    pub r8y: Option<BigUint>,
    #[serde(with = "decimal_opt")]
    pub s: Option<BigUint>,
}

impl TryFrom<TxRequest> for Transaction {
    type Error = ValidationError;

    fn try_from(req: TxRequest) -> Result<Self, Self::Error> {
        let amount = req.amount.unwrap_or_default();
        fix2float(&amount)?;
        let load_amount = req.load_amount.unwrap_or_default();

        if req.on_chain {
            let from_eth_addr = req.from_eth_addr.ok_or(ValidationError::MissingField {
                kind: "on-chain",
                field: "fromEthAddr",
            })?;
            return Ok(Transaction::OnChain(OnChainTx {
                coin: req.coin,
                from_ax: req.from_ax.unwrap_or_default(),
                from_ay: req.from_ay.unwrap_or_default(),
                from_eth_addr,
                to_idx: req.to_idx.unwrap_or(EXIT_IDX),
                to_ax: req.to_ax.unwrap_or_default(),
                to_ay: req.to_ay.unwrap_or_default(),
                to_eth_addr: req.to_eth_addr.unwrap_or_default(),
                amount,
                load_amount,
            }));
        }

        if !load_amount.is_zero() {
            return Err(ValidationError::LoadAmountOffChain);
        }
        let from_idx = req.from_idx.ok_or(ValidationError::MissingField {
            kind: "off-chain",
            field: "fromIdx",
        })?;
        if from_idx == EXIT_IDX {
            return Err(ValidationError::InvalidSender);
        }
        let nonce = req.nonce.unwrap_or(0);
        if nonce >> NONCE_BITS != 0 {
            return Err(ValidationError::InvalidNonce(nonce));
        }
        let user_fee = req.user_fee.unwrap_or_default();
        fix2float(&user_fee)?;

        Ok(Transaction::OffChain(OffChainTx {
            from_idx,
            to_idx: req.to_idx.unwrap_or(EXIT_IDX),
            coin: req.coin,
            amount,
            user_fee,
            nonce,
            from_ax: req.from_ax.unwrap_or_default(),
            from_ay: req.from_ay.unwrap_or_default(),
            signature: TxSignature {
                r8x: req.r8x.unwrap_or_default(),
                r8y: req.r8y.unwrap_or_default(),
                s: req.s.unwrap_or_default(),
            },
        }))
    }
}

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod constants;
pub mod encoding;
pub mod float16;
pub mod hash;
pub mod tx;

pub use float16::{fix2float, float2fix, Float16Error};
pub use hash::{poseidon, sha256_field, HashError};
pub use tx::{
    DepositOffChain, OffChainTx, OnChainTx, Transaction, TxRequest, TxSignature, ValidationError,
};

use constants::{COIN_BITS, ETH_ADDRESS_LEN, NONCE_BITS};

pub type EthAddress = [u8; ETH_ADDRESS_LEN];

pub fn eth_to_field(address: &EthAddress) -> BigUint {
    BigUint::from_bytes_be(address)
}

pub fn eth_from_field(value: &BigUint) -> Option<EthAddress> {
    let bytes = value.to_bytes_be();
    if bytes.len() > ETH_ADDRESS_LEN {
        return None;
    }
    let mut address = [0u8; ETH_ADDRESS_LEN];
    address[ETH_ADDRESS_LEN - bytes.len()..].copy_from_slice(&bytes);
    Some(address)
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Invalid state array length: expected 5, got {0}")]
    InvalidLength(usize),
    #[error("State field out of range: {0}")]
    OutOfRange(&'static str),
}

/// A leaf of the balance tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    pub coin: u32,
    pub nonce: u64,
    #[serde(with = "decimal")]
    pub amount: BigUint,
    #[serde(with = "decimal")]
    pub ax: BigUint,
    #[serde(with = "decimal")]
    pub ay: BigUint,
    #[serde(with = "hex_array")]
    pub eth_address: EthAddress,
}

impl AccountState {
    /// Empty account as seen before its first deposit.
    pub fn empty(coin: u32, ax: BigUint, ay: BigUint, eth_address: EthAddress) -> Self {
        Self {
            coin,
            nonce: 0,
            amount: BigUint::zero(),
            ax,
            ay,
            eth_address,
        }
    }

    /// `[coin | nonce << 32, amount, ax, ay, ethAddress]`
    pub fn to_array(&self) -> Vec<BigUint> {
        let data = BigUint::from(self.coin) + (BigUint::from(self.nonce) << COIN_BITS);
        vec![
            data,
            self.amount.clone(),
            self.ax.clone(),
            self.ay.clone(),
            eth_to_field(&self.eth_address),
        ]
    }

    pub fn from_array(values: &[BigUint]) -> Result<Self, StateError> {
        if values.len() != 5 {
            return Err(StateError::InvalidLength(values.len()));
        }

        let data = &values[0];
        let coin_mask = (BigUint::from(1u32) << COIN_BITS) - 1u32;
        let coin = (data & &coin_mask)
            .to_u32()
            .ok_or(StateError::OutOfRange("coin"))?;
        let nonce_bits = data >> COIN_BITS;
        if nonce_bits.bits() > NONCE_BITS as u64 {
            return Err(StateError::OutOfRange("nonce"));
        }
        let nonce = nonce_bits.to_u64().ok_or(StateError::OutOfRange("nonce"))?;
        let eth_address =
            eth_from_field(&values[4]).ok_or(StateError::OutOfRange("ethAddress"))?;

        Ok(Self {
            coin,
            nonce,
            amount: values[1].clone(),
            ax: values[2].clone(),
            ay: values[3].clone(),
            eth_address,
        })
    }

    /// Poseidon hash of the array form; this is the value stored in the tree.
    pub fn hash(&self) -> Result<BigUint, HashError> {
        poseidon(&self.to_array())
    }
}

pub mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| {
            serde::de::Error::custom(format!("Expected {} bytes but got {}", N, len))
        })
    }
}

pub mod hex_array_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &Option<[u8; N]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => super::hex_array::serialize(bytes, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<Option<[u8; N]>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => {
                let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s))
                    .map_err(serde::de::Error::custom)?;
                let bytes = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("Invalid byte array length"))?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }
}

/// Big integers as decimal strings, the format circuit inputs are read in.
pub mod decimal {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Accepts decimal or `0x`-prefixed hex.
    pub fn parse(s: &str) -> Result<BigUint, String> {
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => BigUint::parse_bytes(hex.as_bytes(), 16),
            None => BigUint::parse_bytes(s.as_bytes(), 10),
        };
        parsed.ok_or_else(|| format!("Invalid integer: {}", s))
    }
}

pub mod decimal_opt {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => super::decimal::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BigUint>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| super::decimal::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

pub mod decimal_vec {
    use num_bigint::BigUint;
    use serde::{ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        values: &[BigUint],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.to_str_radix(10))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<BigUint>, D::Error> {
        let strings: Vec<String> = Vec::deserialize(deserializer)?;
        strings
            .iter()
            .map(|s| super::decimal::parse(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

pub mod decimal_matrix {
    use num_bigint::BigUint;
    use serde::{ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        rows: &[Vec<BigUint>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(rows.len()))?;
        for row in rows {
            let row: Vec<String> = row.iter().map(|v| v.to_str_radix(10)).collect();
            seq.serialize_element(&row)?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<BigUint>>, D::Error> {
        let rows: Vec<Vec<String>> = Vec::deserialize(deserializer)?;
        rows.iter()
            .map(|row| {
                row.iter()
                    .map(|s| super::decimal::parse(s).map_err(serde::de::Error::custom))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> AccountState {
        AccountState {
            coin: 3,
            nonce: 4,
            amount: BigUint::from(2u32),
            ax: BigUint::from(0x1234u32),
            ay: BigUint::from(0x5678u32),
            eth_address: [0xAB; 20],
        }
    }

    #[test]
    fn test_state_array_round_trip() {
        let state = sample_state();
        let array = state.to_array();
        assert_eq!(array[0], BigUint::from(3u64 + (4u64 << 32)));
        assert_eq!(AccountState::from_array(&array).unwrap(), state);
    }

    #[test]
    fn test_state_array_rejects_bad_length() {
        let array = sample_state().to_array();
        assert_eq!(
            AccountState::from_array(&array[..4]),
            Err(StateError::InvalidLength(4))
        );
    }

    #[test]
    fn test_state_hash_depends_on_nonce() {
        let state = sample_state();
        let mut next = state.clone();
        next.nonce += 1;
        assert_ne!(state.hash().unwrap(), next.hash().unwrap());
    }

    #[test]
    fn test_state_json_uses_decimal_and_hex() {
        let json = serde_json::to_value(sample_state()).unwrap();
        assert_eq!(json["amount"], "2");
        assert_eq!(json["ax"], "4660");
        assert_eq!(json["ethAddress"], format!("0x{}", "ab".repeat(20)));

        let back: AccountState = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample_state());
    }

    #[test]
    fn test_eth_field_conversion() {
        let mut address = [0u8; 20];
        address[19] = 1;
        assert_eq!(eth_to_field(&address), BigUint::from(1u32));
        assert_eq!(eth_from_field(&BigUint::from(1u32)), Some(address));
        assert_eq!(eth_from_field(&(BigUint::from(1u32) << 160)), None);
    }
}

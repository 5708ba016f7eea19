use num_bigint::BigUint;
use num_traits::Zero;

use crate::constants::{
    AMOUNT_F_BITS, FEE_F_BITS, TX_DATA_AMOUNT_OFFSET, TX_DATA_COIN_OFFSET, TX_DATA_FEE_OFFSET,
    TX_DATA_NEW_ACCOUNT_OFFSET, TX_DATA_NONCE_OFFSET, TX_DATA_ON_CHAIN_OFFSET, TX_DATA_TAG,
};
use crate::hash::sha256_field;

/// Fields packed into the per-slot transaction data word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxDataFields {
    pub amount_f: u16,
    pub coin: u32,
    pub nonce: u64,
    pub fee_f: u16,
    pub on_chain: bool,
    pub new_account: bool,
}

pub fn build_tx_data(fields: &TxDataFields) -> BigUint {
    let mut res = BigUint::from(TX_DATA_TAG);
    res += BigUint::from(fields.amount_f) << TX_DATA_AMOUNT_OFFSET;
    res += BigUint::from(fields.coin) << TX_DATA_COIN_OFFSET;
    res += BigUint::from(fields.nonce) << TX_DATA_NONCE_OFFSET;
    res += BigUint::from(fields.fee_f) << TX_DATA_FEE_OFFSET;
    if fields.on_chain {
        res += BigUint::from(1u32) << TX_DATA_ON_CHAIN_OFFSET;
    }
    if fields.new_account {
        res += BigUint::from(1u32) << TX_DATA_NEW_ACCOUNT_OFFSET;
    }
    res
}

/// Bits published per off-chain transaction.
pub fn da_row_bits(n_levels: usize) -> usize {
    n_levels * 2 + AMOUNT_F_BITS + FEE_F_BITS
}

/// `fromIdx | toIdx | amountF | feeF`, most significant field first.
pub fn da_row(from_idx: u64, to_idx: u64, amount_f: u16, fee_f: u16, n_levels: usize) -> BigUint {
    let mut row = BigUint::from(from_idx);
    row = (row << n_levels) + BigUint::from(to_idx);
    row = (row << AMOUNT_F_BITS) + BigUint::from(amount_f);
    (row << FEE_F_BITS) + BigUint::from(fee_f)
}

/// Concatenates rows of `row_bits` each into the smallest whole number of
/// bytes, zero-padded on the left.
pub fn pack_rows(rows: &[BigUint], row_bits: usize) -> Vec<u8> {
    let total_bits = rows.len() * row_bits;
    let n_bytes = (total_bits + 7) / 8;
    let acc = rows
        .iter()
        .fold(BigUint::zero(), |acc, row| (acc << row_bits) + row);
    to_bytes_padded(&acc, n_bytes)
}

pub fn to_bytes_padded(value: &BigUint, n_bytes: usize) -> Vec<u8> {
    let mut out = vec![0u8; n_bytes];
    if value.is_zero() {
        return out;
    }
    let bytes = value.to_bytes_be();
    let start = n_bytes.saturating_sub(bytes.len());
    let skip = bytes.len().saturating_sub(n_bytes);
    out[start..].copy_from_slice(&bytes[skip..]);
    out
}

/// `0x`-prefixed hex; a leading zero nibble appears when the rows cover an
/// odd number of nibbles.
pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// SHA-256 over all `max_n_tx` rows, the unused ones zero and in front,
/// reduced modulo the field prime.
pub fn off_chain_hash(rows: &[BigUint], max_n_tx: usize, n_levels: usize) -> BigUint {
    let row_bits = da_row_bits(n_levels);
    let padding = max_n_tx.saturating_sub(rows.len());
    let padded: Vec<BigUint> = std::iter::repeat(BigUint::zero())
        .take(padding)
        .chain(rows.iter().cloned())
        .collect();
    sha256_field(&pack_rows(&padded, row_bits))
}

/// Packs small values into words of `per_word` slots of `slot_bits` each,
/// lowest slot in the lowest bits. Always yields `n_words` words.
pub fn pack_words(values: &[BigUint], slot_bits: usize, per_word: usize, n_words: usize) -> Vec<BigUint> {
    let mut words = vec![BigUint::zero(); n_words];
    for (i, value) in values.iter().enumerate() {
        let word = i / per_word;
        if word >= n_words {
            break;
        }
        words[word] += value << (slot_bits * (i % per_word));
    }
    words
}

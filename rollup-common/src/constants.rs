use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

/// Scalar field of BN254, the proving field of the rollup circuit.
pub const FIELD_PRIME: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Tag placed in the low 64 bits of every transaction data word.
pub const TX_DATA_TAG: u64 = 4839017969649077913;

pub const AMOUNT_F_BITS: usize = 16;
pub const FEE_F_BITS: usize = 16;
pub const COIN_BITS: usize = 32;
pub const NONCE_BITS: usize = 48;

/// Offsets inside the transaction data word.
pub const TX_DATA_AMOUNT_OFFSET: usize = 64;
pub const TX_DATA_COIN_OFFSET: usize = TX_DATA_AMOUNT_OFFSET + AMOUNT_F_BITS;
pub const TX_DATA_NONCE_OFFSET: usize = TX_DATA_COIN_OFFSET + COIN_BITS;
pub const TX_DATA_FEE_OFFSET: usize = TX_DATA_NONCE_OFFSET + NONCE_BITS;
pub const TX_DATA_ON_CHAIN_OFFSET: usize = TX_DATA_FEE_OFFSET + FEE_F_BITS;
pub const TX_DATA_NEW_ACCOUNT_OFFSET: usize = TX_DATA_ON_CHAIN_OFFSET + 1;

// Float16 layout: 10-bit mantissa, half-unit flag, 5-bit decimal exponent.
pub const FLOAT_MANTISSA_BITS: u32 = 10;
pub const FLOAT_MANTISSA_MASK: u16 = 0x3FF;
pub const FLOAT_HALF_FLAG: u16 = 0x400;
pub const FLOAT_EXPONENT_SHIFT: u32 = 11;
pub const FLOAT_MAX_EXPONENT: u32 = 31;

pub const MAX_FEE_PLAN_COINS: usize = 64;
pub const FEE_PLAN_SLOTS_PER_WORD: usize = 16;
pub const FEE_PLAN_SLOT_BITS: usize = 16;
pub const FEE_PLAN_WORDS: usize = MAX_FEE_PLAN_COINS / FEE_PLAN_SLOTS_PER_WORD;
/// The top slot of a packed word only has 253 - 240 bits left inside the field.
pub const FEE_PLAN_LAST_SLOT_BITS: usize = 13;

/// Leaf key reserved for "no account" and used as the exit target.
pub const EXIT_IDX: u64 = 0;
pub const FIRST_IDX: u64 = 1;

pub const ETH_ADDRESS_LEN: usize = 20;

// Key tags for records kept next to the tree nodes in the backing store.
pub const DB_MASTER_TAG: u64 = 0x726f6c6c75702d6d;
pub const DB_BATCH_TAG: u64 = 0x726f6c6c75702d62;
pub const DB_IDX_TAG: u64 = 0x726f6c6c75702d69;
pub const DB_STATE_TAG: u64 = 0x726f6c6c75702d73;

/// The field prime as an integer, read from the curve parameters.
pub fn field_prime() -> BigUint {
    BigUint::from_bytes_be(&Fr::MODULUS.to_bytes_be())
}

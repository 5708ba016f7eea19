use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonError, PoseidonHasher};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::constants::field_prime;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("Poseidon error: {0}")]
    Poseidon(#[from] PoseidonError),
}

fn to_field(n: &BigUint) -> Fr {
    Fr::from_be_bytes_mod_order(&n.to_bytes_be())
}

fn from_field(f: Fr) -> BigUint {
    BigUint::from_bytes_be(&f.into_bigint().to_bytes_be())
}

/// Circom-compatible Poseidon hash. Inputs are reduced into the field.
pub fn poseidon(inputs: &[BigUint]) -> Result<BigUint, HashError> {
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())?;
    let elements: Vec<Fr> = inputs.iter().map(to_field).collect();
    Ok(from_field(hasher.hash(&elements)?))
}

/// SHA-256 of `data` read as a big-endian integer, reduced into the field.
pub fn sha256_field(data: &[u8]) -> BigUint {
    let digest = Sha256::digest(data);
    BigUint::from_bytes_be(&digest) % field_prime()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poseidon_is_deterministic() {
        let a = BigUint::from(1u32);
        let b = BigUint::from(2u32);
        let h1 = poseidon(&[a.clone(), b.clone()]).unwrap();
        let h2 = poseidon(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, poseidon(&[b, a]).unwrap());
        assert!(h1 < field_prime());
    }

    #[test]
    fn test_poseidon_reduces_inputs() {
        let x = BigUint::from(7u32);
        let wrapped = &x + field_prime();
        assert_eq!(poseidon(&[x]).unwrap(), poseidon(&[wrapped]).unwrap());
    }

    #[test]
    fn test_sha256_field_in_range() {
        let h = sha256_field(&[0u8; 64]);
        assert!(h < field_prime());
        assert_eq!(h, sha256_field(&[0u8; 64]));
    }
}

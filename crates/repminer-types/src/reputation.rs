//! Reputation keys, values and proofs.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing or decoding reputation data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// An address component could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The skill id could not be parsed.
    #[error("invalid skill id: {0}")]
    InvalidSkillId(String),

    /// The encoded data had the wrong length.
    #[error("invalid encoding length: expected {expected}, got {got}")]
    InvalidLength {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        got: usize,
    },
}

/// Identifies one reputation entry in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationKey {
    /// Colony the reputation belongs to.
    pub colony: Address,
    /// Skill the reputation is held in.
    pub skill_id: U256,
    /// Holder of the reputation; zero for colony-wide totals.
    pub user: Address,
}

impl ReputationKey {
    /// Packed length: address, uint256, address.
    pub const ENCODED_LEN: usize = 20 + 32 + 20;

    /// Creates a key.
    pub fn new(colony: Address, skill_id: U256, user: Address) -> Self {
        Self {
            colony,
            skill_id,
            user,
        }
    }

    /// Parses a key from its three path components.
    pub fn parse(colony: &str, skill_id: &str, user: &str) -> Result<Self, KeyError> {
        let colony =
            Address::from_str(colony).map_err(|_| KeyError::InvalidAddress(colony.to_string()))?;
        let skill_id = U256::from_str(skill_id)
            .map_err(|_| KeyError::InvalidSkillId(skill_id.to_string()))?;
        let user =
            Address::from_str(user).map_err(|_| KeyError::InvalidAddress(user.to_string()))?;
        Ok(Self::new(colony, skill_id, user))
    }

    /// Tightly packed encoding used as the tree key.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(self.colony.as_slice());
        out.extend_from_slice(&self.skill_id.to_be_bytes::<32>());
        out.extend_from_slice(self.user.as_slice());
        out.into()
    }

    /// Decodes a tightly packed key.
    pub fn decode(data: &[u8]) -> Result<Self, KeyError> {
        if data.len() != Self::ENCODED_LEN {
            return Err(KeyError::InvalidLength {
                expected: Self::ENCODED_LEN,
                got: data.len(),
            });
        }
        Ok(Self {
            colony: Address::from_slice(&data[..20]),
            skill_id: U256::from_be_slice(&data[20..52]),
            user: Address::from_slice(&data[52..]),
        })
    }
}

/// A reputation amount together with its unique id in the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationValue {
    /// Reputation amount.
    pub amount: U256,
    /// Unique id of the entry.
    pub uid: U256,
}

impl ReputationValue {
    /// Packed length: two uint256 words.
    pub const ENCODED_LEN: usize = 64;

    /// Tightly packed encoding stored as the tree value.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.amount.to_be_bytes::<32>());
        out.extend_from_slice(&self.uid.to_be_bytes::<32>());
        out.into()
    }

    /// Decodes a tree value.
    pub fn decode(data: &[u8]) -> Result<Self, KeyError> {
        if data.len() != Self::ENCODED_LEN {
            return Err(KeyError::InvalidLength {
                expected: Self::ENCODED_LEN,
                got: data.len(),
            });
        }
        Ok(Self {
            amount: U256::from_be_slice(&data[..32]),
            uid: U256::from_be_slice(&data[32..]),
        })
    }
}

/// Merkle proof of a single reputation under some root hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationProof {
    /// Branch mask of the path to the leaf.
    pub branch_mask: U256,
    /// Sibling hashes from leaf to root.
    pub siblings: Vec<B256>,
    /// Encoded key.
    pub key: Bytes,
    /// Encoded value.
    pub value: Bytes,
}

impl ReputationProof {
    /// Decodes the numeric reputation carried by this proof.
    pub fn reputation(&self) -> Result<ReputationValue, KeyError> {
        ReputationValue::decode(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLONY: &str = "0x1111111111111111111111111111111111111111";
    const USER: &str = "0x2222222222222222222222222222222222222222";

    #[test]
    fn test_key_parse_and_encode() {
        let key = ReputationKey::parse(COLONY, "7", USER).unwrap();
        assert_eq!(key.skill_id, U256::from(7));

        let encoded = key.encode();
        assert_eq!(encoded.len(), ReputationKey::ENCODED_LEN);
        assert_eq!(&encoded[..20], key.colony.as_slice());
        assert_eq!(encoded[51], 7);
        assert_eq!(ReputationKey::decode(&encoded).unwrap(), key);
    }

    #[test]
    fn test_key_parse_rejects_garbage() {
        assert!(matches!(
            ReputationKey::parse("not-an-address", "1", USER),
            Err(KeyError::InvalidAddress(_))
        ));
        assert!(matches!(
            ReputationKey::parse(COLONY, "one", USER),
            Err(KeyError::InvalidSkillId(_))
        ));
    }

    #[test]
    fn test_value_decode_wrong_length() {
        assert_eq!(
            ReputationValue::decode(&[0u8; 10]),
            Err(KeyError::InvalidLength {
                expected: 64,
                got: 10
            })
        );
    }

    #[test]
    fn test_proof_decodes_amount() {
        let value = ReputationValue {
            amount: U256::from(1_000_000u64),
            uid: U256::from(3),
        };
        let proof = ReputationProof {
            branch_mask: U256::ZERO,
            siblings: vec![],
            key: ReputationKey::parse(COLONY, "1", USER).unwrap().encode(),
            value: value.encode(),
        };
        assert_eq!(proof.reputation().unwrap(), value);
    }
}

/// Transaction types for HelixChain
use crate::crypto::{self, Address, Hash, KeyPair};
use crate::error::ChainError;
use sha2::{Digest, Sha256};

/// Maximum transaction size in bytes to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// A value transfer from the key behind `sender_pubkey` to `recipient`.
/// Immutable once constructed; replay protection comes from the validity
/// window, not a per-transaction nonce.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    #[serde(with = "serde_bytes")]
    pub sender_pubkey: Vec<u8>,
    pub recipient: Address,
    pub value: u64,
    pub fee: u64,
    pub validity_start_height: u32,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Build and sign a transaction with the given key pair.
    pub fn sign(
        keypair: &KeyPair,
        recipient: Address,
        value: u64,
        fee: u64,
        validity_start_height: u32,
    ) -> Result<Self, ChainError> {
        let mut tx = Transaction {
            sender_pubkey: keypair.public_key_bytes().to_vec(),
            recipient,
            value,
            fee,
            validity_start_height,
            signature: Vec::new(),
        };
        tx.signature = keypair.sign(&tx.signable_message())?.to_vec();
        Ok(tx)
    }

    /// Address derived from the sender public key.
    pub fn sender_address(&self) -> Result<Address, ChainError> {
        crypto::address_from_pubkey(&self.sender_pubkey)
    }

    /// The bytes covered by the signature.
    pub fn signable_message(&self) -> Vec<u8> {
        let mut message = Vec::new();
        message.extend_from_slice("TRANSFER:".as_bytes());
        message.extend_from_slice(&self.sender_pubkey);
        message.extend_from_slice(&self.recipient);
        message.extend_from_slice(&self.value.to_be_bytes());
        message.extend_from_slice(&self.fee.to_be_bytes());
        message.extend_from_slice(&self.validity_start_height.to_be_bytes());
        message
    }

    /// Calculate the hash of this transaction.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.signable_message());
        hasher.update(&self.signature);
        hasher.finalize().into()
    }

    pub fn hash_str(&self) -> String {
        hex::encode(self.hash())
    }

    /// Serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        bincode::serialized_size(self).unwrap_or(0) as usize
    }

    /// Fee per byte scaled by 1000 so small transactions still produce a
    /// usable integer ordering key.
    pub fn fee_per_byte(&self) -> u64 {
        let size = self.serialized_size().max(1) as u64;
        self.fee.saturating_mul(1000) / size
    }

    /// Value plus fee, the amount debited from the sender.
    pub fn total_value(&self) -> Result<u64, ChainError> {
        self.value.checked_add(self.fee).ok_or_else(|| {
            ChainError::InvalidTransaction("value + fee overflows".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::address_from_string;

    #[test]
    fn test_hash_covers_signature() {
        let keypair = KeyPair::generate();
        let recipient = address_from_string("recipient");
        let tx = Transaction::sign(&keypair, recipient, 100, 2, 1).unwrap();

        let mut tampered = tx.clone();
        tampered.signature[0] ^= 0x01;
        assert_ne!(tx.hash(), tampered.hash());
    }

    #[test]
    fn test_fee_per_byte_ordering() {
        let keypair = KeyPair::generate();
        let recipient = address_from_string("recipient");
        let cheap = Transaction::sign(&keypair, recipient, 100, 1, 1).unwrap();
        let pricey = Transaction::sign(&keypair, recipient, 100, 1000, 1).unwrap();
        assert!(pricey.fee_per_byte() > cheap.fee_per_byte());
    }

    #[test]
    fn test_total_value_overflow() {
        let keypair = KeyPair::generate();
        let recipient = address_from_string("recipient");
        let mut tx = Transaction::sign(&keypair, recipient, u64::MAX, 0, 1).unwrap();
        tx.fee = 1;
        assert!(tx.total_value().is_err());
    }
}

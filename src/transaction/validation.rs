/// Validation logic for transactions separated from type definitions
use crate::error::ChainError;
use crate::policy;
use crate::transaction::types::{Transaction, MAX_TRANSACTION_SIZE};

impl Transaction {
    /// Context-free validation: well-formedness, value bounds and the
    /// signature. Does not touch chain state.
    pub fn verify(&self) -> Result<(), ChainError> {
        if self.value == 0 {
            return Err(ChainError::InvalidTransaction(
                "Transaction value must be greater than zero".to_string(),
            ));
        }

        let sender = self.sender_address()?;
        if sender == self.recipient {
            return Err(ChainError::InvalidTransaction(
                "Sender and recipient cannot be the same".to_string(),
            ));
        }

        self.total_value()?;

        let size = self.serialized_size();
        if size > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                size, MAX_TRANSACTION_SIZE
            )));
        }

        let message = self.signable_message();
        crate::crypto::verify_signature(&self.sender_pubkey, &message, &self.signature)?;

        Ok(())
    }

    /// Whether this transaction is eligible for inclusion in a block at the
    /// given height: the height must fall inside the validity window that
    /// starts at `validity_start_height`.
    pub fn is_valid_at(&self, block_height: u32) -> bool {
        block_height >= self.validity_start_height
            && block_height
                < self
                    .validity_start_height
                    .saturating_add(policy::TRANSACTION_VALIDITY_WINDOW)
    }
}

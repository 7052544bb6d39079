//! The consensus entry points the networking layer consumes.

use std::collections::HashSet;

use strand_types::{Block, SubBlock};

use crate::ConsensusError;

/// Validate/finalize surface of the consensus engine.
pub trait Consensus: Send + Sync {
    /// Whether the chain's proofs are acceptable. Link structure is checked
    /// separately by the caller.
    fn validate_chain(&self, blocks: &[Block]) -> bool;

    /// Whether `sub_block` should be proven by stake rather than history.
    fn should_use_pos(&self, sub_block: &SubBlock) -> bool;

    /// Approve `block` for appending to the ledger.
    fn finalize_block(&self, block: &Block) -> Result<(), ConsensusError>;
}

/// Accepts blocks from a fixed validator set.
///
/// An empty set admits any validator. Sub-blocks with at most
/// `pos_batch_limit` transactions are proven by stake; larger ones by history.
#[derive(Clone, Debug)]
pub struct ValidatorSetConsensus {
    validators: HashSet<String>,
    pos_batch_limit: usize,
}

impl ValidatorSetConsensus {
    pub fn new(validators: impl IntoIterator<Item = String>, pos_batch_limit: usize) -> Self {
        Self {
            validators: validators.into_iter().collect(),
            pos_batch_limit,
        }
    }

    /// No validator restriction.
    pub fn permissive() -> Self {
        Self::new(Vec::new(), usize::MAX)
    }

    fn authorized(&self, validator: &str) -> bool {
        self.validators.is_empty() || self.validators.contains(validator)
    }

    fn check_block(&self, block: &Block) -> Result<(), ConsensusError> {
        if block.index > 0 && !self.authorized(&block.validator) {
            return Err(ConsensusError::UnauthorizedValidator(block.validator.clone()));
        }
        if let Some(sub) = block.sub_blocks.iter().find(|s| s.hash != s.compute_hash()) {
            return Err(ConsensusError::InvalidProof(format!(
                "sub-block {} in block {} has a bad hash",
                sub.index, block.index
            )));
        }
        Ok(())
    }
}

impl Consensus for ValidatorSetConsensus {
    fn validate_chain(&self, blocks: &[Block]) -> bool {
        match blocks.iter().try_for_each(|b| self.check_block(b)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("chain rejected by consensus: {e}");
                false
            }
        }
    }

    fn should_use_pos(&self, sub_block: &SubBlock) -> bool {
        sub_block.len() <= self.pos_batch_limit
    }

    fn finalize_block(&self, block: &Block) -> Result<(), ConsensusError> {
        self.check_block(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_types::{BlockHash, ProofKind, Timestamp, Transaction};

    fn tx(n: u64) -> Transaction {
        Transaction::new("a", "b", n, 0, n, Timestamp::new(1))
    }

    #[test]
    fn permissive_accepts_any_validator() {
        let c = ValidatorSetConsensus::permissive();
        let block = Block::new(1, BlockHash::ZERO, "anyone", vec![], Timestamp::new(1));
        assert!(c.finalize_block(&block).is_ok());
        assert!(c.validate_chain(&[block]));
    }

    #[test]
    fn unknown_validator_rejected() {
        let c = ValidatorSetConsensus::new(vec!["v1".to_string()], 10);
        let ok = Block::new(1, BlockHash::ZERO, "v1", vec![], Timestamp::new(1));
        let bad = Block::new(2, ok.hash, "v2", vec![], Timestamp::new(2));
        assert!(c.finalize_block(&ok).is_ok());
        assert_eq!(
            c.finalize_block(&bad),
            Err(ConsensusError::UnauthorizedValidator("v2".into()))
        );
        assert!(!c.validate_chain(&[ok, bad]));
    }

    #[test]
    fn genesis_validator_is_exempt() {
        let c = ValidatorSetConsensus::new(vec!["v1".to_string()], 10);
        assert!(c.validate_chain(&[Block::genesis("genesis-dev", Timestamp::EPOCH)]));
    }

    #[test]
    fn tampered_sub_block_rejected() {
        let c = ValidatorSetConsensus::permissive();
        let mut sub = SubBlock::new(0, vec![tx(1)], ProofKind::Stake, Timestamp::new(1));
        sub.transactions.push(tx(2));
        let block = Block::new(1, BlockHash::ZERO, "v", vec![sub], Timestamp::new(1));
        assert!(matches!(c.finalize_block(&block), Err(ConsensusError::InvalidProof(_))));
    }

    #[test]
    fn proof_kind_follows_batch_size() {
        let c = ValidatorSetConsensus::new(Vec::new(), 2);
        let small = SubBlock::new(0, vec![tx(1), tx(2)], ProofKind::Stake, Timestamp::new(1));
        let large = SubBlock::new(0, vec![tx(1), tx(2), tx(3)], ProofKind::Stake, Timestamp::new(1));
        assert!(c.should_use_pos(&small));
        assert!(!c.should_use_pos(&large));
    }
}

//! Validation walk over a candidate chain.
//!
//! The walk is iterative and bounded: it moves forward from genesis and
//! compares each block with the one stored before it, so a long chain cannot
//! exhaust the stack and a reordered chain fails at the first misplaced block.

use strand_types::Block;

use crate::LedgerError;

/// Upper bound on the number of blocks a single walk may visit.
pub const MAX_CHAIN_WALK: usize = 10_000_000;

/// Check that `blocks` form one chain from genesis to the last block.
///
/// The block at position `i` must carry index `i` and a valid stored hash.
/// Its `prev_hash` must name the hash of the block at `i - 1`.
pub fn validate_links(blocks: &[Block]) -> Result<(), LedgerError> {
    let genesis = blocks.first().ok_or(LedgerError::EmptyChain)?;
    if blocks.len() > MAX_CHAIN_WALK {
        return Err(LedgerError::WalkLimit(MAX_CHAIN_WALK));
    }
    if genesis.index != 0 || !genesis.prev_hash.is_zero() {
        return Err(LedgerError::MissingGenesis {
            index: genesis.index,
        });
    }

    let mut prev: Option<&Block> = None;
    for (position, current) in blocks.iter().enumerate() {
        if !current.hash_is_valid() {
            return Err(LedgerError::InvalidHash {
                index: current.index,
            });
        }
        if current.index != position as u64 {
            return Err(LedgerError::IndexMismatch {
                expected: position as u64,
                got: current.index,
            });
        }
        if let Some(prev) = prev {
            if current.prev_hash != prev.hash {
                return Err(LedgerError::BrokenLink {
                    index: current.index,
                    expected: current.prev_hash,
                });
            }
        }
        prev = Some(current);
    }
    Ok(())
}

/// Index of the last block the two chains share, or `None` if even their
/// genesis blocks differ.
pub fn common_ancestor(local: &[Block], candidate: &[Block]) -> Option<u64> {
    local
        .iter()
        .zip(candidate.iter())
        .take_while(|(a, b)| a.hash == b.hash)
        .last()
        .map(|(a, _)| a.index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_types::{BlockHash, Timestamp};

    fn chain(len: u64, validator: &str) -> Vec<Block> {
        let mut blocks = vec![Block::genesis("genesis", Timestamp::EPOCH)];
        for i in 1..len {
            let prev = blocks[(i - 1) as usize].hash;
            blocks.push(Block::new(i, prev, validator, vec![], Timestamp::new(i)));
        }
        blocks
    }

    #[test]
    fn well_formed_chain_validates() {
        assert_eq!(validate_links(&chain(12, "v")), Ok(()));
        assert_eq!(validate_links(&chain(1, "v")), Ok(()));
    }

    #[test]
    fn empty_chain_is_rejected() {
        assert_eq!(validate_links(&[]), Err(LedgerError::EmptyChain));
    }

    #[test]
    fn broken_prev_hash_is_rejected() {
        let mut blocks = chain(6, "v");
        blocks[3].prev_hash = BlockHash::new([9; 32]);
        blocks[3].seal();
        // Block 3 now points at a hash nobody has.
        assert!(matches!(
            validate_links(&blocks),
            Err(LedgerError::BrokenLink { index: 3, .. })
        ));
    }

    #[test]
    fn tampered_contents_are_rejected() {
        let mut blocks = chain(5, "v");
        blocks[2].validator = "mallory".into();
        assert!(validate_links(&blocks).is_err());
    }

    #[test]
    fn stray_branch_block_is_rejected() {
        let mut blocks = chain(5, "v");
        let stray = Block::new(2, blocks[1].hash, "other", vec![], Timestamp::new(99));
        blocks.insert(2, stray);
        assert!(validate_links(&blocks).is_err());
    }

    #[test]
    fn swapped_blocks_are_rejected() {
        let mut blocks = chain(4, "v");
        blocks.swap(1, 2);
        assert_eq!(
            validate_links(&blocks),
            Err(LedgerError::IndexMismatch {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn maximal_index_does_not_overflow() {
        let blocks = chain(2, "v");
        let huge = Block::new(u64::MAX, blocks[1].hash, "v", vec![], Timestamp::new(7));
        let next = Block::new(5, huge.hash, "v", vec![], Timestamp::new(8));
        let candidate = vec![blocks[0].clone(), huge, next];
        assert_eq!(
            validate_links(&candidate),
            Err(LedgerError::IndexMismatch {
                expected: 1,
                got: u64::MAX
            })
        );
    }

    #[test]
    fn non_genesis_root_is_rejected() {
        let blocks = chain(5, "v");
        assert!(validate_links(&blocks[2..]).is_err());
    }

    #[test]
    fn ancestor_of_diverging_chains() {
        let a = chain(8, "a");
        let b = chain(10, "b");
        assert_eq!(common_ancestor(&a, &b), Some(0));
        assert_eq!(common_ancestor(&a, &a[..5]), Some(4));

        let other = vec![Block::genesis("elsewhere", Timestamp::new(1))];
        assert_eq!(common_ancestor(&a, &other), None);
    }
}

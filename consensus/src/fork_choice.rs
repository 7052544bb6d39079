//! Fork choice: strictly-longer chain wins.
//!
//! Equal-length candidates are rejected so two nodes holding different
//! chains of the same length do not keep swapping.

use strand_types::ChainTip;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkDecision {
    /// The candidate is longer; adopt it once validated.
    Adopt,
    /// Same length as the local chain.
    RejectEqual,
    /// Shorter than the local chain.
    RejectShorter,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ForkChoice;

impl ForkChoice {
    /// Compare block counts (genesis included).
    pub fn decide(local_len: u64, candidate_len: u64) -> ForkDecision {
        match candidate_len.cmp(&local_len) {
            std::cmp::Ordering::Greater => ForkDecision::Adopt,
            std::cmp::Ordering::Equal => ForkDecision::RejectEqual,
            std::cmp::Ordering::Less => ForkDecision::RejectShorter,
        }
    }

    /// Among peer-reported tips, the one with the highest index strictly
    /// above `local_index`. Equal indices go to the lowest peer id so every
    /// node picks the same source.
    pub fn best_tip<'a, I>(local_index: u64, reports: I) -> Option<(String, ChainTip)>
    where
        I: IntoIterator<Item = (&'a str, ChainTip)>,
    {
        reports
            .into_iter()
            .filter(|(_, tip)| tip.index > local_index)
            .min_by(|(a_id, a), (b_id, b)| b.index.cmp(&a.index).then_with(|| a_id.cmp(b_id)))
            .map(|(id, tip)| (id.to_string(), tip))
    }
}

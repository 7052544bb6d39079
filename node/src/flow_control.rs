//! Flow control: batching transactions into sub-blocks and sub-blocks into
//! blocks under fixed capacity limits.
//!
//! Both pools live under one lock, so a transaction moves from the pending
//! pool into exactly one sub-block (and a sub-block into exactly one block)
//! within a single critical section. Producers that hit the pending limit get
//! [`FlowError::Backpressure`] instead of unbounded buffering.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use strand_consensus::Consensus;
use strand_ledger::Ledger;
use strand_types::{Block, Clock, ProofKind, SubBlock, Transaction, TxHash};

use crate::FlowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowLimits {
    pub max_pending_transactions: usize,
    pub max_sub_block_size: usize,
    pub max_block_size: usize,
}

impl Default for FlowLimits {
    fn default() -> Self {
        Self {
            max_pending_transactions: 10_000,
            max_sub_block_size: 100,
            max_block_size: 10,
        }
    }
}

/// Lengths of both pools at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolSizes {
    pub pending: usize,
    pub sub_blocks: usize,
}

/// Output of one [`FlowControlManager::flush`].
#[derive(Clone, Debug, Default)]
pub struct FlushReport {
    pub sub_blocks: usize,
    pub blocks: Vec<Block>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.sub_blocks == 0 && self.blocks.is_empty()
    }

    fn or_error(self, error: FlowError) -> Result<Self, FlowError> {
        if self.is_empty() {
            Err(error)
        } else {
            tracing::warn!("flush stopped early: {error}");
            Ok(self)
        }
    }
}

#[derive(Default)]
struct Pools {
    pending: VecDeque<Transaction>,
    sub_blocks: VecDeque<SubBlock>,
    next_sub_index: u64,
    /// Bumped on every accepted transaction; the monitor compares it between
    /// ticks to spot idle pools.
    generation: u64,
}

pub struct FlowControlManager {
    limits: FlowLimits,
    validator: String,
    pools: Mutex<Pools>,
    ledger: Arc<dyn Ledger>,
    consensus: Arc<dyn Consensus>,
    clock: Arc<dyn Clock>,
}

impl FlowControlManager {
    pub fn new(
        limits: FlowLimits,
        validator: impl Into<String>,
        ledger: Arc<dyn Ledger>,
        consensus: Arc<dyn Consensus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limits,
            validator: validator.into(),
            pools: Mutex::new(Pools::default()),
            ledger,
            consensus,
            clock,
        }
    }

    pub fn limits(&self) -> FlowLimits {
        self.limits
    }

    pub fn sizes(&self) -> PoolSizes {
        let pools = self.pools.lock();
        PoolSizes {
            pending: pools.pending.len(),
            sub_blocks: pools.sub_blocks.len(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pools.lock().pending.len()
    }

    pub fn sub_block_len(&self) -> usize {
        self.pools.lock().sub_blocks.len()
    }

    /// Append `tx` to the pending pool.
    pub fn add_transaction(&self, tx: Transaction) -> Result<TxHash, FlowError> {
        let hash = tx.hash();
        let mut pools = self.pools.lock();
        if pools.pending.len() >= self.limits.max_pending_transactions {
            return Err(FlowError::Backpressure {
                limit: self.limits.max_pending_transactions,
            });
        }
        pools.pending.push_back(tx);
        pools.generation += 1;
        tracing::trace!(tx = %hash, pending = pools.pending.len(), "transaction queued");
        Ok(hash)
    }

    /// Move up to `max_sub_block_size` pending transactions (oldest first)
    /// into a new sub-block.
    pub fn create_sub_block(&self) -> Result<SubBlock, FlowError> {
        let mut pools = self.pools.lock();
        self.cut_sub_block(&mut pools)
    }

    fn cut_sub_block(&self, pools: &mut Pools) -> Result<SubBlock, FlowError> {
        if pools.pending.is_empty() {
            return Err(FlowError::EmptyPending);
        }
        let take = pools.pending.len().min(self.limits.max_sub_block_size);
        let transactions: Vec<Transaction> = pools.pending.drain(..take).collect();
        let index = pools.next_sub_index;
        let now = self.clock.now();

        let draft = SubBlock::new(index, transactions, ProofKind::History, now);
        let sub_block = if self.consensus.should_use_pos(&draft) {
            SubBlock::new(index, draft.transactions, ProofKind::Stake, now)
        } else {
            draft
        };

        if let Err(e) = self.ledger.add_sub_block(sub_block.clone()) {
            // Put the batch back in its original position.
            for tx in sub_block.transactions.into_iter().rev() {
                pools.pending.push_front(tx);
            }
            return Err(e.into());
        }
        pools.next_sub_index += 1;
        pools.sub_blocks.push_back(sub_block.clone());
        tracing::debug!(
            index,
            txs = sub_block.len(),
            proof = ?sub_block.proof,
            "sub-block created"
        );
        Ok(sub_block)
    }

    /// Move up to `max_block_size` sub-blocks (oldest first) into a block at
    /// the current ledger height and finalize it. On refusal the sub-blocks
    /// return to the pool unchanged.
    pub fn create_block(&self) -> Result<Block, FlowError> {
        let mut pools = self.pools.lock();
        self.cut_block(&mut pools)
    }

    fn cut_block(&self, pools: &mut Pools) -> Result<Block, FlowError> {
        if pools.sub_blocks.is_empty() {
            return Err(FlowError::EmptySubBlocks);
        }
        let take = pools.sub_blocks.len().min(self.limits.max_block_size);
        let batch: Vec<SubBlock> = pools.sub_blocks.drain(..take).collect();

        let tip = self.ledger.tip();
        let block = Block::new(
            self.ledger.height(),
            tip.hash,
            self.validator.clone(),
            batch,
            self.clock.now(),
        );

        let finalized = self
            .consensus
            .finalize_block(&block)
            .map_err(FlowError::from)
            .and_then(|()| self.ledger.finalize_block(block.clone()).map_err(FlowError::from));
        if let Err(e) = finalized {
            for sub in block.sub_blocks.into_iter().rev() {
                pools.sub_blocks.push_front(sub);
            }
            tracing::warn!("block creation refused: {e}");
            return Err(e);
        }

        tracing::info!(
            index = block.index,
            hash = %block.hash,
            sub_blocks = block.sub_blocks.len(),
            txs = block.transaction_count(),
            "block created"
        );
        Ok(block)
    }

    /// Cut every full batch. With `force`, partial batches are cut too so
    /// both pools end empty.
    ///
    /// A refusal stops the flush. It is returned as an error only when nothing
    /// was cut before it, so blocks already finalized are always reported.
    pub fn flush(&self, force: bool) -> Result<FlushReport, FlowError> {
        let mut report = FlushReport::default();
        let mut pools = self.pools.lock();

        while pools.pending.len() >= self.limits.max_sub_block_size
            || (force && !pools.pending.is_empty())
        {
            match self.cut_sub_block(&mut pools) {
                Ok(_) => report.sub_blocks += 1,
                Err(e) => return report.or_error(e),
            }
        }
        while pools.sub_blocks.len() >= self.limits.max_block_size
            || (force && !pools.sub_blocks.is_empty())
        {
            match self.cut_block(&mut pools) {
                Ok(block) => report.blocks.push(block),
                Err(e) => return report.or_error(e),
            }
        }
        Ok(report)
    }

    fn generation(&self) -> u64 {
        self.pools.lock().generation
    }
}

/// Monitor state carried between ticks.
///
/// Full batches are cut on every tick. Pools that received nothing since the
/// previous tick are drained completely so a trickle of transactions never
/// waits forever for a batch to fill.
pub struct FlowMonitor {
    flow: Arc<FlowControlManager>,
    last_generation: Option<u64>,
}

impl FlowMonitor {
    pub fn new(flow: Arc<FlowControlManager>) -> Self {
        Self {
            flow,
            last_generation: None,
        }
    }

    pub fn tick(&mut self) -> Result<FlushReport, FlowError> {
        let generation = self.flow.generation();
        let idle = self.last_generation == Some(generation);
        self.last_generation = Some(generation);

        let started = Instant::now();
        let report = self.flow.flush(idle)?;
        if report.sub_blocks > 0 || !report.blocks.is_empty() {
            tracing::debug!(
                sub_blocks = report.sub_blocks,
                blocks = report.blocks.len(),
                forced = idle,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "flow monitor flushed"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_consensus::ValidatorSetConsensus;
    use strand_ledger::{GenesisConfig, MemoryLedger};
    use strand_nullables::NullClock;
    use strand_types::{NetworkId, Timestamp};

    fn tx(n: u64) -> Transaction {
        Transaction::new("alice", "bob", n, 1, n, Timestamp::new(n))
    }

    fn manager(limits: FlowLimits) -> (FlowControlManager, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::from_config(&GenesisConfig::new(NetworkId::Dev)));
        let flow = FlowControlManager::new(
            limits,
            "validator-1",
            ledger.clone(),
            Arc::new(ValidatorSetConsensus::new(Vec::new(), 2)),
            Arc::new(NullClock::new(500)),
        );
        (flow, ledger)
    }

    fn limits(pending: usize, sub: usize, block: usize) -> FlowLimits {
        FlowLimits {
            max_pending_transactions: pending,
            max_sub_block_size: sub,
            max_block_size: block,
        }
    }

    #[test]
    fn sub_blocks_take_fifo_batches() {
        let (flow, _) = manager(limits(10, 2, 10));
        for n in 0..5 {
            flow.add_transaction(tx(n)).unwrap();
        }

        let first = flow.create_sub_block().unwrap();
        assert_eq!(first.transactions, vec![tx(0), tx(1)]);
        assert_eq!(flow.pending_len(), 3);

        flow.create_sub_block().unwrap();
        let last = flow.create_sub_block().unwrap();
        assert_eq!(last.transactions, vec![tx(4)]);
        assert_eq!(flow.pending_len(), 0);
        assert_eq!(flow.sub_block_len(), 3);
        assert!(matches!(flow.create_sub_block(), Err(FlowError::EmptyPending)));
    }

    #[test]
    fn backpressure_at_capacity() {
        let (flow, _) = manager(limits(3, 2, 2));
        for n in 0..3 {
            flow.add_transaction(tx(n)).unwrap();
        }
        assert!(matches!(
            flow.add_transaction(tx(9)),
            Err(FlowError::Backpressure { limit: 3 })
        ));
        assert_eq!(flow.pending_len(), 3);
    }

    #[test]
    fn concurrent_producers_never_exceed_capacity() {
        const LIMIT: usize = 25;
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 10;

        let (flow, _) = manager(limits(LIMIT, 5, 5));
        let flow = Arc::new(flow);
        let outcomes: Vec<(usize, usize)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|thread| {
                    let flow = Arc::clone(&flow);
                    scope.spawn(move || {
                        let (mut accepted, mut rejected) = (0, 0);
                        for n in 0..PER_THREAD {
                            match flow.add_transaction(tx(thread * PER_THREAD + n)) {
                                Ok(_) => accepted += 1,
                                Err(FlowError::Backpressure { limit }) => {
                                    assert_eq!(limit, LIMIT);
                                    rejected += 1;
                                }
                                Err(other) => panic!("unexpected error: {other}"),
                            }
                        }
                        (accepted, rejected)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let accepted: usize = outcomes.iter().map(|(a, _)| a).sum();
        let rejected: usize = outcomes.iter().map(|(_, r)| r).sum();
        assert_eq!(accepted, LIMIT);
        assert_eq!(rejected, (THREADS * PER_THREAD) as usize - LIMIT);
        assert_eq!(flow.pending_len(), LIMIT);
    }

    #[test]
    fn proof_kind_follows_consensus() {
        let (flow, _) = manager(limits(10, 3, 10));
        for n in 0..5 {
            flow.add_transaction(tx(n)).unwrap();
        }
        // pos_batch_limit is 2: three transactions go to history, two to stake.
        assert_eq!(flow.create_sub_block().unwrap().proof, ProofKind::History);
        assert_eq!(flow.create_sub_block().unwrap().proof, ProofKind::Stake);
    }

    #[test]
    fn block_extends_ledger_tip() {
        let (flow, ledger) = manager(limits(10, 2, 2));
        for n in 0..4 {
            flow.add_transaction(tx(n)).unwrap();
        }
        flow.create_sub_block().unwrap();
        flow.create_sub_block().unwrap();
        let genesis = ledger.latest_block();

        let block = flow.create_block().unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.prev_hash, genesis.hash);
        assert_eq!(block.validator, "validator-1");
        assert_eq!(block.transaction_count(), 4);
        assert_eq!(ledger.height(), 2);
        assert!(ledger.staged_sub_blocks().is_empty());
        assert!(matches!(flow.create_block(), Err(FlowError::EmptySubBlocks)));
    }

    #[test]
    fn refused_block_returns_sub_blocks() {
        let ledger = Arc::new(MemoryLedger::from_config(&GenesisConfig::new(NetworkId::Dev)));
        let flow = FlowControlManager::new(
            limits(10, 1, 5),
            "outsider",
            ledger.clone(),
            Arc::new(ValidatorSetConsensus::new(vec!["validator-1".to_string()], 2)),
            Arc::new(NullClock::new(1)),
        );
        flow.add_transaction(tx(1)).unwrap();
        flow.add_transaction(tx(2)).unwrap();
        let a = flow.create_sub_block().unwrap();
        let b = flow.create_sub_block().unwrap();

        assert!(matches!(flow.create_block(), Err(FlowError::Consensus(_))));
        assert_eq!(flow.sub_block_len(), 2);
        assert_eq!(ledger.height(), 1);

        // Order is preserved for the next attempt.
        let pools = flow.pools.lock();
        assert_eq!(pools.sub_blocks[0].hash, a.hash);
        assert_eq!(pools.sub_blocks[1].hash, b.hash);
    }

    #[test]
    fn flush_cuts_only_full_batches_unless_forced() {
        let (flow, ledger) = manager(limits(100, 2, 2));
        for n in 0..5 {
            flow.add_transaction(tx(n)).unwrap();
        }

        let report = flow.flush(false).unwrap();
        assert_eq!(report.sub_blocks, 2);
        assert_eq!(report.blocks.len(), 1);
        assert_eq!(flow.sizes(), PoolSizes { pending: 1, sub_blocks: 0 });

        let report = flow.flush(true).unwrap();
        assert_eq!(report.sub_blocks, 1);
        assert_eq!(report.blocks.len(), 1);
        assert_eq!(flow.sizes(), PoolSizes::default());
        assert_eq!(ledger.height(), 3);
    }

    #[test]
    fn monitor_drains_idle_pools() {
        let (flow, _) = manager(limits(100, 10, 10));
        let flow = Arc::new(flow);
        let mut monitor = FlowMonitor::new(flow.clone());
        flow.add_transaction(tx(1)).unwrap();

        // First sight of this generation: nothing is full, nothing is cut.
        assert!(monitor.tick().unwrap().blocks.is_empty());
        assert_eq!(flow.pending_len(), 1);

        // Unchanged since the last tick: drained.
        let report = monitor.tick().unwrap();
        assert_eq!(report.blocks.len(), 1);
        assert_eq!(flow.sizes(), PoolSizes::default());
    }
}

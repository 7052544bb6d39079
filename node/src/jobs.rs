//! Named periodic jobs bound to the node's shutdown signal.
//!
//! Each maintenance loop (pool sweep, flow monitor, liveness probing, QoS
//! cycle, route validation) runs as one task that ticks on an interval and
//! exits when shutdown is broadcast. [`JobSet::join_all`] waits for every
//! task with a deadline so stopping the node is deterministic.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::NodeError;

/// Spawn `tick` every `period` until `shutdown` fires. The first tick runs
/// one full period after spawning.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => tick().await,
                _ = shutdown.recv() => {
                    tracing::debug!(job = name, "periodic job shutting down");
                    break;
                }
            }
        }
    })
}

/// Handles of the node's background tasks, by name.
#[derive(Default)]
pub struct JobSet {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl JobSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    pub fn spawn<F, Fut>(
        &mut self,
        name: &'static str,
        period: Duration,
        shutdown: broadcast::Receiver<()>,
        tick: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.push(name, spawn_periodic(name, period, shutdown, tick));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Await every task. Tasks still running at `deadline` are aborted and
    /// reported as a timeout.
    pub async fn join_all(self, deadline: Duration) -> Result<(), NodeError> {
        let names = self.names();
        let mut handles: Vec<JoinHandle<()>> = self.handles.into_iter().map(|(_, h)| h).collect();
        let wait = async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        tracing::error!("background job panicked: {e}");
                    }
                }
            }
        };
        if tokio::time::timeout(deadline, wait).await.is_ok() {
            return Ok(());
        }

        for (name, handle) in names.iter().zip(&handles) {
            if !handle.is_finished() {
                tracing::warn!(job = name, "job did not stop in time, aborting");
                handle.abort();
            }
        }
        Err(NodeError::ShutdownTimeout)
    }
}

use crate::error::{PipelineError, Result};
use crate::metrics::{MetricsSnapshot, PipelineCounters};
use crate::order::{Order, OrderStatus};
use crate::queue::{BoundedBlockingQueue, PushTimeoutError};
use crate::store::DeliveredStore;
use crate::worker::{Sink, StageContext, WorkerPool};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Lifecycle states of a [`Pipeline`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Constructed, workers not yet spawned
    Created,
    /// Workers running, submits accepted
    Running,
    /// A shutdown is in progress
    Stopping,
    /// All workers joined; terminal
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Created => "created",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Topology and timing knobs, fixed at construction.
///
/// Capacities and worker counts below one are raised to one when the
/// pipeline is built.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of the producer-facing input queue
    pub q_in_capacity: usize,
    /// Capacity of the prepare-to-pack queue
    pub q_prepare_capacity: usize,
    /// Capacity of the pack-to-deliver queue
    pub q_pack_capacity: usize,
    /// Prepare pool size
    pub prepare_workers: usize,
    /// Pack pool size
    pub pack_workers: usize,
    /// Deliver pool size
    pub deliver_workers: usize,
    /// How long a submit waits for space in the input queue
    pub push_timeout: Duration,
    /// How long a worker waits for an element before re-checking shutdown
    pub pop_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            q_in_capacity: 1024,
            q_prepare_capacity: 1024,
            q_pack_capacity: 1024,
            prepare_workers: 2,
            pack_workers: 2,
            deliver_workers: 2,
            push_timeout: Duration::from_millis(100),
            pop_timeout: Duration::from_millis(20),
        }
    }
}

impl PipelineConfig {
    fn normalized(mut self) -> Self {
        self.q_in_capacity = self.q_in_capacity.max(1);
        self.q_prepare_capacity = self.q_prepare_capacity.max(1);
        self.q_pack_capacity = self.q_pack_capacity.max(1);
        self.prepare_workers = self.prepare_workers.max(1);
        self.pack_workers = self.pack_workers.max(1);
        self.deliver_workers = self.deliver_workers.max(1);
        self
    }
}

struct StagePools {
    prepare: WorkerPool,
    pack: WorkerPool,
    deliver: WorkerPool,
}

/// A three-stage order pipeline: producers push into a bounded input queue,
/// fixed pools of prepare, pack and deliver workers move each order through
/// its status steps, and delivered orders land in an append-only store.
///
/// Orders flow strictly left to right; each queue is the only
/// synchronization point between the stages it joins, and ownership of an
/// order moves through the queues. The input queue is the only place
/// producers experience backpressure.
pub struct Pipeline {
    config: PipelineConfig,
    state: Mutex<PipelineState>,
    state_changed: Condvar,
    cancelled: Arc<AtomicBool>,
    q_in: Arc<BoundedBlockingQueue<Order>>,
    q_prepare: Arc<BoundedBlockingQueue<Order>>,
    q_pack: Arc<BoundedBlockingQueue<Order>>,
    delivered: Arc<DeliveredStore>,
    counters: Arc<PipelineCounters>,
    pools: Mutex<Option<StagePools>>,
}

impl Pipeline {
    /// Build a pipeline in the `Created` state; no threads run yet
    pub fn new(config: PipelineConfig) -> Self {
        let config = config.normalized();
        Self {
            q_in: Arc::new(BoundedBlockingQueue::new(config.q_in_capacity)),
            q_prepare: Arc::new(BoundedBlockingQueue::new(config.q_prepare_capacity)),
            q_pack: Arc::new(BoundedBlockingQueue::new(config.q_pack_capacity)),
            delivered: Arc::new(DeliveredStore::new()),
            counters: Arc::new(PipelineCounters::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(PipelineState::Created),
            state_changed: Condvar::new(),
            pools: Mutex::new(None),
            config,
        }
    }

    /// The configuration the pipeline was built with
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Spawn the three worker pools and move to `Running`.
    ///
    /// Idempotent while `Running`; fails with
    /// [`PipelineError::InvalidState`] once a shutdown has begun.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            PipelineState::Running => Ok(()),
            PipelineState::Created => {
                let pools = self.spawn_pools();
                self.counters.set_workers_used(
                    pools.prepare.len(),
                    pools.pack.len(),
                    pools.deliver.len(),
                );
                info!(
                    prepare_workers = pools.prepare.len(),
                    pack_workers = pools.pack.len(),
                    deliver_workers = pools.deliver.len(),
                    "pipeline started"
                );
                *self.pools.lock() = Some(pools);
                *state = PipelineState::Running;
                Ok(())
            }
            stopped @ (PipelineState::Stopping | PipelineState::Stopped) => {
                Err(PipelineError::InvalidState(stopped))
            }
        }
    }

    fn spawn_pools(&self) -> StagePools {
        let stage = |target, input: &Arc<BoundedBlockingQueue<Order>>, sink| StageContext {
            target,
            input: Arc::clone(input),
            sink,
            counters: Arc::clone(&self.counters),
            cancelled: Arc::clone(&self.cancelled),
            pop_timeout: self.config.pop_timeout,
        };

        StagePools {
            prepare: WorkerPool::spawn(
                "prepare",
                self.config.prepare_workers,
                stage(
                    OrderStatus::Prepared,
                    &self.q_in,
                    Arc::clone(&self.q_prepare) as Arc<dyn Sink>,
                ),
            ),
            pack: WorkerPool::spawn(
                "pack",
                self.config.pack_workers,
                stage(
                    OrderStatus::Packed,
                    &self.q_prepare,
                    Arc::clone(&self.q_pack) as Arc<dyn Sink>,
                ),
            ),
            deliver: WorkerPool::spawn(
                "deliver",
                self.config.deliver_workers,
                stage(
                    OrderStatus::Delivered,
                    &self.q_pack,
                    Arc::clone(&self.delivered) as Arc<dyn Sink>,
                ),
            ),
        }
    }

    /// Try to admit an order.
    ///
    /// Returns true iff the pipeline is `Running` and the order was enqueued
    /// into the input queue within `push_timeout`. A timed-out submit bumps
    /// `submit_timeout_count`; a submit outside `Running` (or one racing a
    /// close of the input queue) returns false without touching counters.
    pub fn submit(&self, order: Order) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.q_in.push_timeout(order, self.config.push_timeout) {
            Ok(()) => true,
            Err(PushTimeoutError::Timeout(_)) => {
                self.counters.record_submit_timeout();
                false
            }
            Err(PushTimeoutError::Closed(_)) => false,
        }
    }

    /// Graceful shutdown: stop admitting, drain every accepted order to the
    /// delivered store, join all workers.
    ///
    /// Queues are closed upstream-first and each pool is joined before the
    /// next queue closes, so nothing in flight is lost. Idempotent; a caller
    /// arriving while another shutdown runs waits for it to finish.
    pub fn shutdown(&self) {
        if !self.begin_stopping() {
            return;
        }

        info!("pipeline draining");
        if let Some(mut pools) = self.pools.lock().take() {
            self.q_in.close();
            pools.prepare.join();
            self.q_prepare.close();
            pools.pack.join();
            self.q_pack.close();
            pools.deliver.join();
        }
        self.finish_stopping();
    }

    /// Immediate shutdown: stop admitting, abandon whatever is still queued,
    /// join all workers.
    ///
    /// Completes within time proportional to `pop_timeout` times the pool
    /// depth, independent of queue occupancy.
    pub fn shutdown_now(&self) {
        if !self.begin_stopping() {
            return;
        }

        info!("pipeline cancelling");
        self.cancelled.store(true, Ordering::Relaxed);
        self.close_all_queues();
        if let Some(mut pools) = self.pools.lock().take() {
            pools.prepare.join();
            pools.pack.join();
            pools.deliver.join();
        }
        self.finish_stopping();
    }

    /// Alias for [`shutdown_now`](Self::shutdown_now)
    pub fn cancel(&self) {
        self.shutdown_now();
    }

    /// Claim the `Running -> Stopping` transition.
    ///
    /// Returns true only for the single caller that must perform the drain
    /// or cancel. From `Created` the queues are closed and the pipeline goes
    /// straight to `Stopped`; from `Stopping` the call blocks until the
    /// owning caller finishes; from `Stopped` it returns at once.
    fn begin_stopping(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            PipelineState::Stopped => false,
            PipelineState::Stopping => {
                while *state != PipelineState::Stopped {
                    self.state_changed.wait(&mut state);
                }
                false
            }
            PipelineState::Created => {
                self.close_all_queues();
                *state = PipelineState::Stopped;
                self.state_changed.notify_all();
                false
            }
            PipelineState::Running => {
                *state = PipelineState::Stopping;
                true
            }
        }
    }

    fn finish_stopping(&self) {
        let mut state = self.state.lock();
        *state = PipelineState::Stopped;
        self.state_changed.notify_all();
        info!(delivered = self.delivered.len(), "pipeline stopped");
    }

    fn close_all_queues(&self) {
        self.q_in.close();
        self.q_prepare.close();
        self.q_pack.close();
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PipelineState::Stopped
    }

    /// Snapshot the pipeline's accounting.
    ///
    /// Downstream counters are read before upstream ones, and each queue's
    /// counters are read under that queue's lock, so the stage chain and the
    /// per-queue `pop <= push` ordering hold inside every snapshot even
    /// while the pipeline is under load.
    pub fn metrics(&self) -> MetricsSnapshot {
        let delivered_count = self.counters.delivered();
        let packed_count = self.counters.packed();
        let prepared_count = self.counters.prepared();
        let total_lead_time = self.counters.total_lead_time();
        let submit_timeout_count = self.counters.submit_timeouts();
        let (prepare_workers_used, pack_workers_used, deliver_workers_used) =
            self.counters.workers_used();

        let q_pack = self.q_pack.counters();
        let q_prepare = self.q_prepare.counters();
        let q_in = self.q_in.counters();

        MetricsSnapshot {
            accepted_count: q_in.push_count,
            prepared_count,
            packed_count,
            delivered_count,
            q_in_push: q_in.push_count,
            q_in_pop: q_in.pop_count,
            q_in_max_size: q_in.max_size,
            q_prepare_push: q_prepare.push_count,
            q_prepare_pop: q_prepare.pop_count,
            q_prepare_max_size: q_prepare.max_size,
            q_pack_push: q_pack.push_count,
            q_pack_pop: q_pack.pop_count,
            q_pack_max_size: q_pack.max_size,
            prepare_workers_used,
            pack_workers_used,
            deliver_workers_used,
            submit_timeout_count,
            total_lead_time,
        }
    }

    /// Consistent copy of the delivered store
    pub fn delivered_orders(&self) -> Vec<Order> {
        self.delivered.snapshot()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.is_stopped() {
            self.shutdown_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_created() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        assert_eq!(pipeline.state(), PipelineState::Created);
        assert!(!pipeline.is_running());
        assert!(!pipeline.is_stopped());

        let m = pipeline.metrics();
        assert_eq!(m.accepted_count, 0);
        assert_eq!(m.prepared_count, 0);
        assert_eq!(m.packed_count, 0);
        assert_eq!(m.delivered_count, 0);
        assert_eq!(m.q_in_push, 0);
        assert_eq!(m.q_prepare_push, 0);
        assert_eq!(m.q_pack_push, 0);
    }

    #[test]
    fn test_start_is_idempotent_while_running() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.start().unwrap();
        assert!(pipeline.is_running());
        pipeline.start().unwrap();
        assert!(pipeline.is_running());

        let m = pipeline.metrics();
        assert!(m.prepare_workers_used > 0);
        assert!(m.pack_workers_used > 0);
        assert!(m.deliver_workers_used > 0);

        pipeline.shutdown_now();
    }

    #[test]
    fn test_start_after_stop_is_invalid_state() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.start().unwrap();
        pipeline.shutdown_now();
        assert!(pipeline.is_stopped());

        assert_eq!(
            pipeline.start(),
            Err(PipelineError::InvalidState(PipelineState::Stopped))
        );
    }

    #[test]
    fn test_submit_requires_running() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        assert!(!pipeline.submit(Order::new(1)));
        assert_eq!(pipeline.metrics().accepted_count, 0);
        assert_eq!(pipeline.metrics().submit_timeout_count, 0);

        pipeline.start().unwrap();
        assert!(pipeline.submit(Order::new(2)));

        pipeline.shutdown();
        assert!(pipeline.is_stopped());
        assert!(!pipeline.submit(Order::new(3)));
        assert_eq!(pipeline.metrics().accepted_count, 1);
    }

    #[test]
    fn test_shutdown_from_created_goes_straight_to_stopped() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.shutdown();
        assert!(pipeline.is_stopped());
        assert_eq!(pipeline.metrics().accepted_count, 0);
        assert!(pipeline.delivered_orders().is_empty());
    }

    #[test]
    fn test_cancel_is_shutdown_now() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.start().unwrap();
        pipeline.cancel();
        assert!(pipeline.is_stopped());
        pipeline.cancel();
        assert!(pipeline.is_stopped());
    }

    #[test]
    fn test_config_is_normalized() {
        let pipeline = Pipeline::new(PipelineConfig {
            q_in_capacity: 0,
            prepare_workers: 0,
            ..PipelineConfig::default()
        });
        assert_eq!(pipeline.config().q_in_capacity, 1);
        assert_eq!(pipeline.config().prepare_workers, 1);
    }
}

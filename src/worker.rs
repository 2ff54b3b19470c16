use crate::metrics::PipelineCounters;
use crate::order::{Order, OrderStatus};
use crate::queue::{BoundedBlockingQueue, PopTimeoutError};
use crate::store::DeliveredStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{spawn, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Where a stage emits orders it has finished with: the next queue for the
/// prepare and pack stages, the delivered store for the terminal stage.
pub(crate) trait Sink: Send + Sync {
    /// Returns false when the sink is closed and the order could not be
    /// emitted; that only happens after cancellation.
    fn emit(&self, order: Order) -> bool;
}

impl Sink for BoundedBlockingQueue<Order> {
    fn emit(&self, order: Order) -> bool {
        // Block as long as it takes: the downstream pool keeps making
        // progress during a graceful drain, and close wakes us on cancel.
        self.push(order).is_ok()
    }
}

impl Sink for DeliveredStore {
    fn emit(&self, order: Order) -> bool {
        self.append(order);
        true
    }
}

/// Everything one stage worker needs to run its loop
#[derive(Clone)]
pub(crate) struct StageContext {
    pub(crate) target: OrderStatus,
    pub(crate) input: Arc<BoundedBlockingQueue<Order>>,
    pub(crate) sink: Arc<dyn Sink>,
    pub(crate) counters: Arc<PipelineCounters>,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) pop_timeout: Duration,
}

/// Per-worker loop: pop one order, advance it by exactly one step, publish
/// the stage counter, emit downstream. Exits when the input queue is closed
/// and drained, or when a pop timeout observes the cancellation flag. A
/// worker holds at most one in-flight order.
pub(crate) fn run_stage(ctx: StageContext) {
    loop {
        match ctx.input.pop_timeout(ctx.pop_timeout) {
            Ok(mut order) => {
                if let Err(err) = order.advance_to(ctx.target) {
                    // The queue topology guarantees the precondition, so
                    // this is a bug; it is fatal to this worker only.
                    error!(order_id = order.id(), %err, "stage cannot advance order");
                    break;
                }
                ctx.counters.record_advance(&order);
                if !ctx.sink.emit(order) {
                    debug!(stage = %ctx.target, "sink closed, abandoning in-flight order");
                    break;
                }
            }
            Err(PopTimeoutError::Closed) => break,
            Err(PopTimeoutError::Timeout) => {
                if ctx.cancelled.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
    }
}

/// A fixed-size pool of stage workers, joined on shutdown
pub(crate) struct WorkerPool {
    stage: &'static str,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers all running the same stage loop
    pub(crate) fn spawn(stage: &'static str, count: usize, ctx: StageContext) -> Self {
        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            let ctx = ctx.clone();
            handles.push(spawn(move || run_stage(ctx)));
        }
        debug!(stage, count, "worker pool spawned");
        Self { stage, handles }
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Join every worker; a panicked worker is logged and skipped so the
    /// shutdown protocol never hangs on it
    pub(crate) fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!(stage = self.stage, "stage worker panicked");
            }
        }
        debug!(stage = self.stage, "worker pool joined");
    }
}

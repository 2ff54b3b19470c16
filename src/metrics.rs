use crate::order::{Order, OrderStatus};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Stage-side counters shared between workers, producers and observers.
///
/// Every counter is monotonically non-decreasing and updated with relaxed
/// atomics; snapshot consistency comes from publication order, not fences.
/// The accepted count has no cell here: it reads through the input queue's
/// push counter, which is bumped inside the push critical section that
/// admits the order.
#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    prepared: AtomicU64,
    packed: AtomicU64,
    delivered: AtomicU64,
    submit_timeouts: AtomicU64,
    lead_time_nanos: AtomicU64,
    prepare_workers: AtomicUsize,
    pack_workers: AtomicUsize,
    deliver_workers: AtomicUsize,
}

impl PipelineCounters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record that an order just advanced into its current status.
    ///
    /// Called by a stage worker after `advance_to` succeeds and before the
    /// order is emitted downstream, so observers never see a later stage
    /// outrun an earlier one.
    pub(crate) fn record_advance(&self, order: &Order) {
        match order.status() {
            OrderStatus::Prepared => {
                self.prepared.fetch_add(1, Ordering::Relaxed);
            }
            OrderStatus::Packed => {
                self.packed.fetch_add(1, Ordering::Relaxed);
            }
            OrderStatus::Delivered => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                if let Some(lead_time) = order.lead_time() {
                    self.lead_time_nanos
                        .fetch_add(lead_time.as_nanos() as u64, Ordering::Relaxed);
                }
            }
            // Orders are accepted by admission, not by a stage
            OrderStatus::Accepted => {}
        }
    }

    pub(crate) fn record_submit_timeout(&self) {
        self.submit_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the pool sizes actually spawned; set once at start
    pub(crate) fn set_workers_used(&self, prepare: usize, pack: usize, deliver: usize) {
        self.prepare_workers.store(prepare, Ordering::Relaxed);
        self.pack_workers.store(pack, Ordering::Relaxed);
        self.deliver_workers.store(deliver, Ordering::Relaxed);
    }

    pub(crate) fn prepared(&self) -> u64 {
        self.prepared.load(Ordering::Relaxed)
    }

    pub(crate) fn packed(&self) -> u64 {
        self.packed.load(Ordering::Relaxed)
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn submit_timeouts(&self) -> u64 {
        self.submit_timeouts.load(Ordering::Relaxed)
    }

    pub(crate) fn total_lead_time(&self) -> Duration {
        Duration::from_nanos(self.lead_time_nanos.load(Ordering::Relaxed))
    }

    pub(crate) fn workers_used(&self) -> (usize, usize, usize) {
        (
            self.prepare_workers.load(Ordering::Relaxed),
            self.pack_workers.load(Ordering::Relaxed),
            self.deliver_workers.load(Ordering::Relaxed),
        )
    }
}

/// A point-in-time view of the pipeline's accounting.
///
/// Counters may tear mildly across a snapshot, but the stage chain
/// `delivered_count <= packed_count <= prepared_count <= accepted_count`
/// and `pop <= push` for every queue hold within each snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Orders admitted into the input queue
    pub accepted_count: u64,
    /// Orders that finished the prepare stage
    pub prepared_count: u64,
    /// Orders that finished the pack stage
    pub packed_count: u64,
    /// Orders that finished the deliver stage
    pub delivered_count: u64,

    /// Pushes into the input queue
    pub q_in_push: u64,
    /// Pops from the input queue
    pub q_in_pop: u64,
    /// Largest size the input queue ever reached
    pub q_in_max_size: usize,
    /// Pushes into the prepare-to-pack queue
    pub q_prepare_push: u64,
    /// Pops from the prepare-to-pack queue
    pub q_prepare_pop: u64,
    /// Largest size the prepare-to-pack queue ever reached
    pub q_prepare_max_size: usize,
    /// Pushes into the pack-to-deliver queue
    pub q_pack_push: u64,
    /// Pops from the pack-to-deliver queue
    pub q_pack_pop: u64,
    /// Largest size the pack-to-deliver queue ever reached
    pub q_pack_max_size: usize,

    /// Prepare workers spawned at start
    pub prepare_workers_used: usize,
    /// Pack workers spawned at start
    pub pack_workers_used: usize,
    /// Deliver workers spawned at start
    pub deliver_workers_used: usize,

    /// Submits rejected because the input queue stayed full past the timeout
    pub submit_timeout_count: u64,

    /// Sum of (delivered - accepted) over all delivered orders
    pub total_lead_time: Duration,
}

impl MetricsSnapshot {
    /// Format the snapshot as a human-readable summary line
    pub fn format(&self) -> String {
        format!(
            "Accepted: {}, Prepared: {}, Packed: {}, Delivered: {}, \
             Rejected: {}, Lead time: {:.2}ms",
            self.accepted_count,
            self.prepared_count,
            self.packed_count,
            self.delivered_count,
            self.submit_timeout_count,
            self.total_lead_time.as_secs_f64() * 1000.0,
        )
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

use crate::error::{PipelineError, Result};
use std::fmt;
use std::time::{Duration, Instant};

/// Identifier assigned by the producer that created the order
pub type OrderId = u64;

/// Processing status of an order, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderStatus {
    /// Admitted into the pipeline, not yet worked on
    Accepted,
    /// Finished the prepare stage
    Prepared,
    /// Finished the pack stage
    Packed,
    /// Finished the deliver stage; terminal
    Delivered,
}

impl OrderStatus {
    /// The only status an order in this status may advance to
    pub fn next(self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Accepted => Some(OrderStatus::Prepared),
            OrderStatus::Prepared => Some(OrderStatus::Packed),
            OrderStatus::Packed => Some(OrderStatus::Delivered),
            OrderStatus::Delivered => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Accepted => "accepted",
            OrderStatus::Prepared => "prepared",
            OrderStatus::Packed => "packed",
            OrderStatus::Delivered => "delivered",
        };
        f.write_str(name)
    }
}

/// A unit of work flowing through the pipeline.
///
/// An order is owned by exactly one thread at a time; ownership moves through
/// the stage queues. Status only ever advances by one step, and each step
/// stamps its timestamp from the monotonic clock exactly once, so
/// `accepted_at <= prepared_at <= packed_at <= delivered_at` for every
/// timestamp that is set.
#[derive(Debug, Clone)]
pub struct Order {
    id: OrderId,
    status: OrderStatus,
    accepted_at: Instant,
    prepared_at: Option<Instant>,
    packed_at: Option<Instant>,
    delivered_at: Option<Instant>,
}

impl Order {
    /// Create a freshly accepted order, stamping `accepted_at` now
    pub fn new(id: OrderId) -> Self {
        Self {
            id,
            status: OrderStatus::Accepted,
            accepted_at: Instant::now(),
            prepared_at: None,
            packed_at: None,
            delivered_at: None,
        }
    }

    /// Producer-assigned identifier
    pub fn id(&self) -> OrderId {
        self.id
    }

    /// Current processing status
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// When the order was created
    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    /// When the order finished the prepare stage, if it has
    pub fn prepared_at(&self) -> Option<Instant> {
        self.prepared_at
    }

    /// When the order finished the pack stage, if it has
    pub fn packed_at(&self) -> Option<Instant> {
        self.packed_at
    }

    /// When the order finished the deliver stage, if it has
    pub fn delivered_at(&self) -> Option<Instant> {
        self.delivered_at
    }

    /// Advance the order to `target`.
    ///
    /// Succeeds only when `target` is the immediate successor of the current
    /// status; the matching timestamp is stamped at that moment. Any other
    /// request fails with [`PipelineError::InvalidTransition`] and leaves the
    /// order untouched.
    pub fn advance_to(&mut self, target: OrderStatus) -> Result<()> {
        if self.status.next() != Some(target) {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }

        let now = Instant::now();
        match target {
            OrderStatus::Prepared => self.prepared_at = Some(now),
            OrderStatus::Packed => self.packed_at = Some(now),
            OrderStatus::Delivered => self.delivered_at = Some(now),
            // next() never yields Accepted; the guard above already rejected it
            OrderStatus::Accepted => {}
        }
        self.status = target;
        Ok(())
    }

    /// Time from acceptance to delivery; `None` until the order is delivered
    pub fn lead_time(&self) -> Option<Duration> {
        self.delivered_at
            .map(|delivered| delivered.duration_since(self.accepted_at))
    }
}

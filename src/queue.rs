use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Why a blocking push handed the value back
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// The queue was closed before space became available
    Closed(T),
}

/// Why a timed push handed the value back
#[derive(Debug, PartialEq, Eq)]
pub enum PushTimeoutError<T> {
    /// No space became available before the deadline
    Timeout(T),
    /// The queue was closed before space became available
    Closed(T),
}

/// Why a blocking pop returned nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// The queue is closed and fully drained
    Closed,
}

/// Why a timed pop returned nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopTimeoutError {
    /// No element arrived before the deadline
    Timeout,
    /// The queue is closed and fully drained
    Closed,
}

/// Accounting counters of a queue, read consistently under one lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounters {
    /// Total elements ever enqueued
    pub push_count: u64,
    /// Total elements ever dequeued
    pub pop_count: u64,
    /// Largest size the buffer ever reached
    pub max_size: usize,
}

#[derive(Debug)]
struct Inner<T> {
    buf: VecDeque<T>,
    closed: bool,
    push_count: u64,
    pop_count: u64,
    max_size: usize,
}

/// A capacity-bounded FIFO with blocking push/pop, timeouts on both sides,
/// and an idempotent close that wakes every waiter.
///
/// The queue is the only synchronization point between the two stages it
/// joins. Closing never discards buffered elements: pops keep succeeding
/// until the buffer is drained, while pushes fail immediately. All waiting
/// sleeps on one of two condition variables (not-full, not-empty) over a
/// single mutex; there is no spinning.
#[derive(Debug)]
pub struct BoundedBlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> BoundedBlockingQueue<T> {
    /// Create a queue holding at most `capacity` elements.
    ///
    /// A capacity below one is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity),
                closed: false,
                push_count: 0,
                pop_count: 0,
                max_size: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    fn enqueue(&self, inner: &mut Inner<T>, value: T) {
        inner.buf.push_back(value);
        inner.push_count += 1;
        if inner.buf.len() > inner.max_size {
            inner.max_size = inner.buf.len();
        }
        self.not_empty.notify_one();
    }

    fn dequeue(&self, inner: &mut Inner<T>) -> Option<T> {
        let value = inner.buf.pop_front()?;
        inner.pop_count += 1;
        self.not_full.notify_one();
        Some(value)
    }

    /// Block until the element is enqueued or the queue is closed.
    ///
    /// On [`PushError::Closed`] the rejected value is handed back.
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(PushError::Closed(value));
            }
            if inner.buf.len() < self.capacity {
                self.enqueue(&mut inner, value);
                return Ok(());
            }
            self.not_full.wait(&mut inner);
        }
    }

    /// Like [`push`](Self::push) but gives up after `timeout`.
    ///
    /// The wait is deadline-based, so spurious wakeups do not extend it. A
    /// zero timeout is a try-push.
    pub fn push_timeout(&self, value: T, timeout: Duration) -> Result<(), PushTimeoutError<T>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(PushTimeoutError::Closed(value));
            }
            if inner.buf.len() < self.capacity {
                self.enqueue(&mut inner, value);
                return Ok(());
            }
            if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                return Err(PushTimeoutError::Timeout(value));
            }
        }
    }

    /// Block until an element is available or the queue is closed and drained.
    pub fn pop(&self) -> Result<T, PopError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = self.dequeue(&mut inner) {
                return Ok(value);
            }
            if inner.closed {
                return Err(PopError::Closed);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    ///
    /// A closed queue keeps draining buffered elements before reporting
    /// [`PopTimeoutError::Closed`].
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = self.dequeue(&mut inner) {
                return Ok(value);
            }
            if inner.closed {
                return Err(PopTimeoutError::Closed);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                return Err(PopTimeoutError::Timeout);
            }
        }
    }

    /// Close the queue and wake every waiter on both sides.
    ///
    /// Idempotent. Buffered elements stay poppable; further pushes fail.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Current number of buffered elements
    pub fn len(&self) -> usize {
        self.inner.lock().buf.len()
    }

    /// Whether the buffer is currently empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().buf.is_empty()
    }

    /// Maximum number of elements the queue can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total elements ever enqueued
    pub fn push_count(&self) -> u64 {
        self.inner.lock().push_count
    }

    /// Total elements ever dequeued
    pub fn pop_count(&self) -> u64 {
        self.inner.lock().pop_count
    }

    /// Largest size the buffer ever reached
    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size
    }

    /// All accounting counters, read under one lock
    pub fn counters(&self) -> QueueCounters {
        let inner = self.inner.lock();
        QueueCounters {
            push_count: inner.push_count,
            pop_count: inner.pop_count,
            max_size: inner.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_single_producer() {
        let queue = BoundedBlockingQueue::new(10);
        for i in 1..=10 {
            queue.push(i).unwrap();
        }
        for i in 1..=10 {
            assert_eq!(queue.pop_timeout(Duration::from_millis(10)), Ok(i));
        }
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let queue = BoundedBlockingQueue::new(3);
        for i in 0..3 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert!(matches!(
            queue.push_timeout(99, Duration::ZERO),
            Err(PushTimeoutError::Timeout(99))
        ));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.max_size(), 3);
    }

    #[test]
    fn test_capacity_is_clamped_to_one() {
        let queue = BoundedBlockingQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(1).unwrap();
        assert!(matches!(
            queue.push_timeout(2, Duration::ZERO),
            Err(PushTimeoutError::Timeout(2))
        ));
    }

    #[test]
    fn test_push_timeout_waits_when_full() {
        let queue = BoundedBlockingQueue::new(2);
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        let start = Instant::now();
        let result = queue.push_timeout(3, Duration::from_millis(80));
        assert!(matches!(result, Err(PushTimeoutError::Timeout(3))));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_pop_timeout_when_empty() {
        let queue: BoundedBlockingQueue<i32> = BoundedBlockingQueue::new(4);

        let start = Instant::now();
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(80)),
            Err(PopTimeoutError::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(BoundedBlockingQueue::new(4));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(30));
        queue.push(42).unwrap();

        assert_eq!(consumer.join().unwrap(), Ok(42));
    }

    #[test]
    fn test_close_wakes_blocked_pop() {
        let queue: Arc<BoundedBlockingQueue<i32>> = Arc::new(BoundedBlockingQueue::new(4));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        queue.close();

        assert_eq!(consumer.join().unwrap(), Err(PopError::Closed));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(queue.is_closed());
    }

    #[test]
    fn test_close_wakes_blocked_push() {
        let queue = Arc::new(BoundedBlockingQueue::new(1));
        queue.push(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };

        thread::sleep(Duration::from_millis(30));
        queue.close();

        assert_eq!(producer.join().unwrap(), Err(PushError::Closed(2)));
    }

    #[test]
    fn test_push_after_close_fails() {
        let queue = BoundedBlockingQueue::new(4);
        queue.close();
        assert_eq!(queue.push(1), Err(PushError::Closed(1)));
        assert!(matches!(
            queue.push_timeout(2, Duration::from_millis(10)),
            Err(PushTimeoutError::Closed(2))
        ));
    }

    #[test]
    fn test_close_is_idempotent_and_drains_in_order() {
        let queue = BoundedBlockingQueue::new(4);
        for i in 1..=3 {
            queue.push(i).unwrap();
        }
        queue.close();
        queue.close();

        for i in 1..=3 {
            assert_eq!(queue.pop(), Ok(i));
        }
        assert_eq!(queue.pop(), Err(PopError::Closed));
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10)),
            Err(PopTimeoutError::Closed)
        );
    }

    #[test]
    fn test_pop_timeout_does_not_spin() {
        let queue: BoundedBlockingQueue<i32> = BoundedBlockingQueue::new(4);

        let mut returns = 0;
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(250) {
            assert_eq!(
                queue.pop_timeout(Duration::from_millis(50)),
                Err(PopTimeoutError::Timeout)
            );
            returns += 1;
        }
        assert!(returns <= 20, "pop_timeout spun: {returns} returns in 250ms");
    }

    #[test]
    fn test_counters_track_pushes_and_pops() {
        let queue = BoundedBlockingQueue::new(8);
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        queue.pop().unwrap();
        queue.pop().unwrap();

        let counters = queue.counters();
        assert_eq!(counters.push_count, 5);
        assert_eq!(counters.pop_count, 2);
        assert_eq!(counters.max_size, 5);
        assert_eq!(queue.len() as u64, counters.push_count - counters.pop_count);
    }
}

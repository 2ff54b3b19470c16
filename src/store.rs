use crate::order::Order;
use parking_lot::Mutex;

/// Append-only sink collecting every order that completed the final stage.
///
/// Appends come from the deliver workers; readers copy a consistent snapshot
/// under the mutex at any time.
#[derive(Debug, Default)]
pub struct DeliveredStore {
    orders: Mutex<Vec<Order>>,
}

impl DeliveredStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&self, order: Order) {
        self.orders.lock().push(order);
    }

    /// Number of delivered orders
    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }

    /// Copy of all delivered orders, in delivery-completion order
    pub fn snapshot(&self) -> Vec<Order> {
        self.orders.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_append_and_snapshot() {
        let store = DeliveredStore::new();
        assert!(store.is_empty());

        store.append(Order::new(1));
        store.append(Order::new(2));

        let snapshot = store.snapshot();
        assert_eq!(store.len(), 2);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id(), 1);
        assert_eq!(snapshot[1].id(), 2);
    }

    #[test]
    fn test_concurrent_appends_keep_every_order() {
        let store = Arc::new(DeliveredStore::new());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..250 {
                        store.append(Order::new(worker * 1000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut ids: Vec<_> = store.snapshot().iter().map(|o| o.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
    }
}

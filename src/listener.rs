//! Listener traits and the connection-event fan-out.
//!
//! Registrations pair a listener with a [`SerialExecutor`]; broadcasts
//! iterate a snapshot of the registration list, so adding or removing a
//! listener while a broadcast is in flight is safe. An add racing a broadcast
//! may or may not observe that event.

use std::sync::{Arc, RwLock};

use crate::error::ClientError;
use crate::executor::SerialExecutor;
use crate::types::{AddressStatus, HistoryTx, RawTransaction, UnspentTx};

/// Connection lifecycle observer. All methods default to no-ops so
/// implementors override only what they care about.
pub trait ConnectionEventListener: Send + Sync {
    fn on_connection(&self) {}
    fn on_disconnect(&self) {}
}

/// Per-call observer for blockchain replies and subscription notifications.
pub trait TransactionEventListener: Send + Sync {
    fn on_address_status_update(&self, _status: AddressStatus) {}
    fn on_unspent_transaction_update(&self, _status: AddressStatus, _unspent: Vec<UnspentTx>) {}
    fn on_transaction_history(&self, _status: AddressStatus, _history: Vec<HistoryTx>) {}
    fn on_transaction_update(&self, _tx: RawTransaction) {}
    fn on_transaction_broadcast(&self, _tx: RawTransaction) {}
    fn on_transaction_broadcast_error(&self, _tx: RawTransaction, _error: ClientError) {}
}

/// A [`TransactionEventListener`] bound to its executor. Cheap to clone, so
/// each RPC call and each subscription closure can carry its own copy.
#[derive(Clone)]
pub struct TxEventSink {
    listener: Arc<dyn TransactionEventListener>,
    executor: SerialExecutor,
}

impl TxEventSink {
    pub fn new(listener: Arc<dyn TransactionEventListener>, executor: SerialExecutor) -> Self {
        Self { listener, executor }
    }

    pub(crate) fn address_status(&self, status: AddressStatus) {
        let listener = self.listener.clone();
        self.executor.execute(move || listener.on_address_status_update(status));
    }

    pub(crate) fn unspent(&self, status: AddressStatus, unspent: Vec<UnspentTx>) {
        let listener = self.listener.clone();
        self.executor.execute(move || listener.on_unspent_transaction_update(status, unspent));
    }

    pub(crate) fn history(&self, status: AddressStatus, history: Vec<HistoryTx>) {
        let listener = self.listener.clone();
        self.executor.execute(move || listener.on_transaction_history(status, history));
    }

    pub(crate) fn transaction(&self, tx: RawTransaction) {
        let listener = self.listener.clone();
        self.executor.execute(move || listener.on_transaction_update(tx));
    }

    pub(crate) fn broadcast(&self, tx: RawTransaction) {
        let listener = self.listener.clone();
        self.executor.execute(move || listener.on_transaction_broadcast(tx));
    }

    pub(crate) fn broadcast_error(&self, tx: RawTransaction, error: ClientError) {
        let listener = self.listener.clone();
        self.executor.execute(move || listener.on_transaction_broadcast_error(tx, error));
    }
}

#[derive(Clone)]
struct Registration {
    listener: Arc<dyn ConnectionEventListener>,
    executor: SerialExecutor,
}

/// Registered connection-event listeners, iterated by snapshot.
pub(crate) struct ConnectionListeners {
    entries: RwLock<Vec<Registration>>,
}

impl ConnectionListeners {
    pub(crate) fn new() -> Self {
        Self { entries: RwLock::new(Vec::new()) }
    }

    pub(crate) fn add(&self, listener: Arc<dyn ConnectionEventListener>, executor: SerialExecutor) {
        self.entries.write().unwrap().push(Registration { listener, executor });
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn ConnectionEventListener>) {
        self.entries
            .write()
            .unwrap()
            .retain(|entry| !Arc::ptr_eq(&entry.listener, listener));
    }

    pub(crate) fn broadcast_connected(&self) {
        for entry in self.snapshot() {
            let listener = entry.listener.clone();
            entry.executor.execute(move || listener.on_connection());
        }
    }

    pub(crate) fn broadcast_disconnected(&self) {
        for entry in self.snapshot() {
            let listener = entry.listener.clone();
            entry.executor.execute(move || listener.on_disconnect());
        }
    }

    fn snapshot(&self) -> Vec<Registration> {
        self.entries.read().unwrap().clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        connections: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl ConnectionEventListener for Counting {
        fn on_connection(&self) {
            self.connections.fetch_add(1, Ordering::SeqCst);
        }
        fn on_disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn settle(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("listener events not delivered within 2s");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registration() {
        let listeners = ConnectionListeners::new();
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());

        listeners.add(a.clone(), SerialExecutor::new());
        listeners.add(b.clone(), SerialExecutor::new());

        listeners.broadcast_connected();
        listeners.broadcast_disconnected();

        settle(|| {
            a.connections.load(Ordering::SeqCst) == 1
                && b.connections.load(Ordering::SeqCst) == 1
                && a.disconnects.load(Ordering::SeqCst) == 1
                && b.disconnects.load(Ordering::SeqCst) == 1
        })
        .await;
    }

    #[tokio::test]
    async fn add_then_remove_restores_prior_state() {
        let listeners = ConnectionListeners::new();
        let listener: Arc<dyn ConnectionEventListener> = Arc::new(Counting::default());

        assert_eq!(listeners.len(), 0);
        listeners.add(listener.clone(), SerialExecutor::new());
        assert_eq!(listeners.len(), 1);
        listeners.remove(&listener);
        assert_eq!(listeners.len(), 0);
    }

    #[tokio::test]
    async fn removed_listener_no_longer_hears_broadcasts() {
        let listeners = ConnectionListeners::new();
        let kept = Arc::new(Counting::default());
        let dropped = Arc::new(Counting::default());
        let dropped_dyn: Arc<dyn ConnectionEventListener> = dropped.clone();

        listeners.add(kept.clone(), SerialExecutor::new());
        listeners.add(dropped_dyn.clone(), SerialExecutor::new());
        listeners.remove(&dropped_dyn);

        listeners.broadcast_connected();

        settle(|| kept.connections.load(Ordering::SeqCst) == 1).await;
        assert_eq!(dropped.connections.load(Ordering::SeqCst), 0);
    }
}

//! Transaction subscribers.

use parking_lot::Mutex;
use std::sync::Arc;
use tidesync_protocol::Transaction;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Receives every transaction applied by the engine.
pub trait TransactionHandler: Send + Sync + 'static {
    /// Called once per transaction, in delivery order.
    fn on_transaction(&self, transaction: &Transaction);
}

impl<F> TransactionHandler for F
where
    F: Fn(&Transaction) + Send + Sync + 'static,
{
    fn on_transaction(&self, transaction: &Transaction) {
        self(transaction)
    }
}

/// Identifies a subscription for `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscriber {
    token: SubscriptionToken,
    sender: mpsc::UnboundedSender<Transaction>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    next_token: u64,
    subscribers: Vec<Subscriber>,
}

/// Subscribers in registration order, each with its own delivery task.
#[derive(Default)]
pub(crate) struct Subscribers {
    registry: Mutex<Registry>,
}

impl Subscribers {
    /// Registers a handler whose delivery task runs on `runtime`.
    pub(crate) fn add(
        &self,
        runtime: &Handle,
        handler: Arc<dyn TransactionHandler>,
    ) -> SubscriptionToken {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Transaction>();
        let task = runtime.spawn(async move {
            while let Some(tx) = receiver.recv().await {
                handler.on_transaction(&tx);
            }
        });

        let mut registry = self.registry.lock();
        registry.next_token += 1;
        let token = SubscriptionToken(registry.next_token);
        registry.subscribers.push(Subscriber {
            token,
            sender,
            task,
        });
        token
    }

    /// Removes a handler. Transactions already handed to it are still delivered.
    pub(crate) fn remove(&self, token: SubscriptionToken) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|s| s.token != token);
        registry.subscribers.len() != before
    }

    /// Hands each transaction to every subscriber in registration order.
    pub(crate) fn notify(&self, transactions: &[Transaction]) {
        if transactions.is_empty() {
            return;
        }
        let registry = self.registry.lock();
        for subscriber in &registry.subscribers {
            for tx in transactions {
                // A closed channel means the task was aborted by `clear`.
                let _ = subscriber.sender.send(tx.clone());
            }
        }
    }

    /// Drops every subscriber and aborts their delivery tasks.
    pub(crate) fn clear(&self) {
        let drained: Vec<Subscriber> = std::mem::take(&mut self.registry.lock().subscribers);
        for subscriber in drained {
            subscriber.task.abort();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.lock().subscribers.len()
    }
}

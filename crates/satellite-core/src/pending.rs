use std::{fmt, sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::HttpMessage;

/// How a [`Pending`] cell was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Ready(T),
    /// The producer failed; the text is what gets reported upstream.
    Failed(String),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// A single-assignment cell shared between one producer and any number of
/// waiters.
///
/// The first call to [`Pending::resolve`], [`Pending::fail`] or
/// [`Pending::cancel`] wins; every later attempt returns `false` and leaves the
/// stored outcome untouched. Settlement and waiting are race-free across tasks:
/// a waiter that subscribes after the cell was settled observes the stored
/// outcome immediately.
pub struct Pending<T> {
    slot: Arc<watch::Sender<Option<Outcome<T>>>>,
}

/// Script outcome handed from the debugger's evaluator to the gateway stream.
pub type PendingResult = Pending<HttpMessage>;

impl<T> Clone for Pending<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T> Default for Pending<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.borrow() {
            None => "pending",
            Some(Outcome::Ready(_)) => "ready",
            Some(Outcome::Failed(_)) => "failed",
            Some(Outcome::Cancelled) => "cancelled",
        };
        f.debug_struct("Pending").field("state", &state).finish()
    }
}

impl<T> Pending<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    pub fn resolve(&self, value: T) -> bool {
        self.settle(Outcome::Ready(value))
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.settle(Outcome::Failed(message.into()))
    }

    pub fn cancel(&self) -> bool {
        self.settle(Outcome::Cancelled)
    }

    /// Store `outcome` unless the cell is already settled.
    ///
    /// Returns `true` if this call settled the cell.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        let mut outcome = Some(outcome);
        let accepted = self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        });
        if !accepted {
            tracing::trace!(target: "satellite.core", "ignoring settlement of an already settled cell");
        }
        accepted
    }

    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The stored outcome, if any, without waiting.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.slot.borrow().clone()
    }

    /// Wait until the cell is settled.
    pub async fn wait(&self) -> Outcome<T> {
        let mut rx = self.slot.subscribe();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            // The sender lives as long as `self`, so the channel cannot close
            // while we are waiting on it.
            Err(_) => None,
        };
        settled.unwrap_or(Outcome::Cancelled)
    }

    /// Like [`Pending::wait`], giving up after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_settlement_wins() {
        let pending = Pending::<u32>::new();
        assert!(!pending.is_settled());
        assert!(pending.resolve(1));
        assert!(!pending.resolve(2));
        assert!(!pending.fail("late"));
        assert!(!pending.cancel());
        assert_eq!(pending.outcome(), Some(Outcome::Ready(1)));
    }

    #[tokio::test]
    async fn waiter_observes_settlement_from_another_task() {
        let pending = Pending::<String>::new();
        let producer = pending.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.fail("boom");
        });

        assert_eq!(pending.wait().await, Outcome::Failed("boom".to_string()));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn late_waiter_sees_stored_outcome() {
        let pending = Pending::<u32>::new();
        pending.cancel();
        assert!(pending.wait().await.is_cancelled());
    }

    #[tokio::test]
    async fn wait_timeout_returns_none_while_pending() {
        let pending = Pending::<u32>::new();
        assert_eq!(pending.wait_timeout(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn racing_settlements_store_exactly_one_outcome() {
        let pending = Pending::<u32>::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let pending = pending.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    pending.resolve(i)
                } else {
                    pending.cancel()
                }
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(pending.is_settled());
    }
}

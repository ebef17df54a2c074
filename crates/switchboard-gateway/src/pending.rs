//! Calls waiting on the store or the upstream origin.
//!
//! An entry is created when a handler issues a call and removed by whichever
//! arrives first: the completion or the call's timeout timer. The later
//! arrival finds nothing and is dropped, so each call is answered at most
//! once.

use std::collections::HashMap;

use switchboard_store::{BackendError, Operation};
use switchboard_types::{CallId, ConnectionId, CorrelationId, MessageType, RetryPolicy};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::reactor::TimerId;

/// What a pending call is waiting on.
#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    /// A store operation; kept so it can be resubmitted.
    Store {
        /// Operation sent.
        op: Operation,
        /// Response type on success.
        reply: MessageType,
    },
    /// An upstream HTTP call.
    Fetch,
}

/// One in-flight call.
#[derive(Debug)]
pub struct PendingCall {
    /// Connection that issued the call.
    pub connection: ConnectionId,
    /// Correlation id to answer with; `None` for fire-and-forget requests.
    pub correlation: Option<CorrelationId>,
    /// What is being waited on.
    pub kind: CallKind,
    /// Attempt currently in flight, starting at 1.
    pub attempt: u32,
    /// Timer that fails the call when it fires.
    pub timeout: Option<TimerId>,
    /// Task running the current attempt.
    pub task: Option<AbortHandle>,
    /// When the call was issued.
    pub started: Instant,
}

impl PendingCall {
    /// Whether a store failure on the current attempt should be retried.
    ///
    /// `Unavailable` means the operation never left the gateway, so any
    /// operation may go again. `ConnectionLost` leaves the outcome unknown,
    /// so only reads are resubmitted.
    pub fn should_retry(&self, error: &BackendError, policy: &RetryPolicy) -> bool {
        let CallKind::Store { op, .. } = &self.kind else {
            return false;
        };
        let retryable = match error {
            BackendError::Unavailable => true,
            BackendError::ConnectionLost => op.is_read(),
            _ => false,
        };
        retryable && policy.allows_retry(self.attempt)
    }

    /// Stop the task running the current attempt. A store operation still
    /// waiting in the adapter's queue is dropped with it.
    pub fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Pending calls by id.
#[derive(Debug, Default)]
pub struct PendingCalls {
    next: u64,
    calls: HashMap<CallId, PendingCall>,
}

impl PendingCalls {
    /// Register a call and return its id.
    pub fn insert(
        &mut self,
        connection: ConnectionId,
        correlation: Option<CorrelationId>,
        kind: CallKind,
    ) -> CallId {
        self.next = self.next.wrapping_add(1);
        let id = CallId(self.next);
        self.calls.insert(
            id,
            PendingCall {
                connection,
                correlation,
                kind,
                attempt: 1,
                timeout: None,
                task: None,
                started: Instant::now(),
            },
        );
        id
    }

    /// The call, if still pending.
    pub fn get(&self, id: CallId) -> Option<&PendingCall> {
        self.calls.get(&id)
    }

    /// Mutable access to the call, if still pending.
    pub fn get_mut(&mut self, id: CallId) -> Option<&mut PendingCall> {
        self.calls.get_mut(&id)
    }

    /// Remove the call. Only the first caller gets it.
    pub fn take(&mut self, id: CallId) -> Option<PendingCall> {
        self.calls.remove(&id)
    }

    /// Number of pending calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    const fn store_call(op: Operation) -> CallKind {
        CallKind::Store {
            op,
            reply: MessageType::GetResult,
        }
    }

    const fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter: false,
        }
    }

    #[test]
    fn first_taker_wins() {
        let mut calls = PendingCalls::default();
        let id = calls.insert(ConnectionId::new(0, 0), None, CallKind::Fetch);
        assert!(calls.take(id).is_some());
        assert!(calls.take(id).is_none());
        assert!(calls.is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let mut calls = PendingCalls::default();
        let a = calls.insert(ConnectionId::new(0, 0), None, CallKind::Fetch);
        let b = calls.insert(ConnectionId::new(0, 0), None, CallKind::Fetch);
        assert_ne!(a, b);
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn lost_writes_are_not_retried() {
        let mut calls = PendingCalls::default();
        let read = calls.insert(
            ConnectionId::new(0, 0),
            None,
            store_call(Operation::Get { key: "k".into() }),
        );
        let write = calls.insert(
            ConnectionId::new(0, 0),
            None,
            store_call(Operation::Incr {
                key: "k".into(),
                by: 1,
            }),
        );
        let lost = BackendError::ConnectionLost;
        assert!(calls.get(read).unwrap().should_retry(&lost, &policy()));
        assert!(!calls.get(write).unwrap().should_retry(&lost, &policy()));
        assert!(
            calls
                .get(write)
                .unwrap()
                .should_retry(&BackendError::Unavailable, &policy())
        );
    }

    #[test]
    fn retries_stop_at_policy_limit() {
        let mut calls = PendingCalls::default();
        let id = calls.insert(
            ConnectionId::new(0, 0),
            None,
            store_call(Operation::Get { key: "k".into() }),
        );
        let call = calls.get_mut(id).unwrap();
        call.attempt = 3;
        assert!(!call.should_retry(&BackendError::Unavailable, &policy()));
        assert!(!call.should_retry(&BackendError::Timeout, &policy()));
    }

    #[tokio::test]
    async fn abort_stops_the_running_attempt() {
        let mut calls = PendingCalls::default();
        let id = calls.insert(ConnectionId::new(0, 0), None, CallKind::Fetch);
        let task = tokio::spawn(std::future::pending::<()>());
        let call = calls.get_mut(id).unwrap();
        call.task = Some(task.abort_handle());
        call.abort();
        assert!(call.task.is_none());
        assert!(task.await.unwrap_err().is_cancelled());
    }
}

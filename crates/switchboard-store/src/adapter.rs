//! Supervised access to the store.
//!
//! [`StoreAdapter`] is a cheap, cloneable handle. Every call is sent to a
//! single supervisor task that owns the link and its state:
//!
//! ```text
//! Connecting --ok--> Up --lost--> Backoff --timer--> Connecting
//!      |                                 ^
//!      +-------------fail----------------+
//! ```
//!
//! While the link is `Up`, each call runs on its own task so many commands
//! are in flight at once over the one pipelined connection. While it is not,
//! calls are queued or rejected according to [`DisconnectPolicy`].
//!
//! Delivery is at-most-once. A call that was sent and lost its connection
//! reports [`BackendError::ConnectionLost`] and is never replayed; a queued
//! call that was never sent runs exactly once after reconnecting, unless its
//! caller stopped waiting, in which case it is skipped.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use switchboard_types::RetryPolicy;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::backend::{Backend, Link};
use crate::config::{DisconnectPolicy, StoreConfig};
use crate::error::BackendError;
use crate::operation::{Operation, Reply};

/// Supervisor view of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// A connection attempt is in progress.
    Connecting,
    /// Commands are being sent.
    Up,
    /// Waiting before the next connection attempt.
    Backoff,
}

impl core::fmt::Display for LinkState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Up => "up",
            Self::Backoff => "backoff",
        })
    }
}

struct Job {
    op: Operation,
    reply: oneshot::Sender<Result<Reply, BackendError>>,
}

enum LinkEvent {
    Connected { epoch: u64, link: Link },
    ConnectFailed { epoch: u64, error: BackendError },
    Lost { epoch: u64 },
}

/// Handle for submitting operations to the store.
#[derive(Debug, Clone)]
pub struct StoreAdapter {
    jobs: mpsc::UnboundedSender<Job>,
    state: watch::Receiver<LinkState>,
    backend_kind: &'static str,
}

impl core::fmt::Debug for Job {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Job").field("op", &self.op).finish_non_exhaustive()
    }
}

impl StoreAdapter {
    /// Spawn the supervisor and begin connecting. Must be called inside a
    /// Tokio runtime. The supervisor exits when every handle is dropped.
    pub fn start(backend: Backend, config: &StoreConfig) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let backend_kind = backend.kind();

        let supervisor = Supervisor {
            backend,
            reconnect: config.reconnect,
            policy: config.disconnect_policy,
            command_timeout: config.command_timeout,
            state: state_tx,
            link: None,
            epoch: 0,
            failures: 0,
            queue: VecDeque::new(),
            events: events_tx,
            retry_at: None,
        };
        tokio::spawn(supervisor.run(jobs_rx, events_rx));

        Self {
            jobs: jobs_tx,
            state: state_rx,
            backend_kind,
        }
    }

    /// Submit one operation and wait for its outcome.
    ///
    /// Dropping the returned future before it resolves abandons the call: if
    /// it is still queued it will not be sent.
    pub async fn execute(&self, op: Operation) -> Result<Reply, BackendError> {
        let (reply, outcome) = oneshot::channel();
        if self.jobs.send(Job { op, reply }).is_err() {
            return Err(BackendError::Shutdown);
        }
        outcome.await.unwrap_or(Err(BackendError::Shutdown))
    }

    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Backend name (`redis` or `memory`).
    pub const fn backend_kind(&self) -> &'static str {
        self.backend_kind
    }

    /// Wait until the link reaches `wanted`. Returns immediately if it
    /// already has, and returns early if the supervisor stops.
    pub async fn wait_for_state(&self, wanted: LinkState) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|current| *current == wanted).await;
    }
}

struct Supervisor {
    backend: Backend,
    reconnect: RetryPolicy,
    policy: DisconnectPolicy,
    command_timeout: Duration,
    state: watch::Sender<LinkState>,
    link: Option<Link>,
    /// Bumped on every connect attempt and every loss, so reports about an
    /// older link are recognised and ignored.
    epoch: u64,
    failures: u32,
    queue: VecDeque<Job>,
    events: mpsc::UnboundedSender<LinkEvent>,
    retry_at: Option<Instant>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut jobs: mpsc::UnboundedReceiver<Job>,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        self.begin_connect();
        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                job = jobs.recv() => match job {
                    Some(job) => self.submit(job),
                    None => break,
                },
                Some(event) = events.recv() => self.on_event(event),
                () = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)),
                    if retry_at.is_some() =>
                {
                    self.retry_at = None;
                    self.begin_connect();
                }
            }
        }
        self.shutdown().await;
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    fn begin_connect(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.set_state(LinkState::Connecting);
        tracing::debug!(backend = self.backend.kind(), attempt = self.failures, "Connecting to store");

        let epoch = self.epoch;
        let backend = self.backend.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let lost = events.clone();
            let on_lost = move || {
                let _ = lost.send(LinkEvent::Lost { epoch });
            };
            let event = match backend.connect(on_lost).await {
                Ok(link) => LinkEvent::Connected { epoch, link },
                Err(error) => LinkEvent::ConnectFailed { epoch, error },
            };
            let _ = events.send(event);
        });
    }

    fn on_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected { epoch, link } if epoch == self.epoch => {
                tracing::info!(backend = self.backend.kind(), "Store link up");
                self.link = Some(link);
                self.failures = 0;
                self.set_state(LinkState::Up);
                self.flush_queue();
            }
            LinkEvent::Connected { link, .. } => {
                tokio::spawn(async move { link.close().await });
            }
            LinkEvent::ConnectFailed { epoch, error } if epoch == self.epoch => {
                tracing::warn!(error = %error, "Store connection attempt failed");
                self.schedule_retry();
            }
            LinkEvent::Lost { epoch } if epoch == self.epoch => {
                tracing::warn!(
                    backend = self.backend.kind(),
                    queued = self.queue.len(),
                    "Store link lost"
                );
                self.epoch = self.epoch.wrapping_add(1);
                if let Some(link) = self.link.take() {
                    tokio::spawn(async move { link.close().await });
                }
                self.schedule_retry();
            }
            LinkEvent::ConnectFailed { .. } | LinkEvent::Lost { .. } => {}
        }
    }

    fn schedule_retry(&mut self) {
        let delay = self.reconnect.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        let now = Instant::now();
        self.retry_at = Some(now.checked_add(delay).unwrap_or(now));
        self.set_state(LinkState::Backoff);
        tracing::debug!(delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "Store reconnect scheduled");
    }

    fn submit(&mut self, job: Job) {
        if self.link.is_some() {
            self.dispatch(job);
            return;
        }
        match self.policy {
            DisconnectPolicy::FailFast => {
                let _ = job.reply.send(Err(BackendError::Unavailable));
            }
            DisconnectPolicy::Queue { max } => {
                self.queue.retain(|queued| !queued.reply.is_closed());
                if self.queue.len() >= max {
                    tracing::warn!(op = job.op.name(), max, "Store queue full, rejecting call");
                    let _ = job.reply.send(Err(BackendError::Unavailable));
                } else {
                    self.queue.push_back(job);
                }
            }
        }
    }

    fn flush_queue(&mut self) {
        let queued = std::mem::take(&mut self.queue);
        let mut skipped = 0_usize;
        for job in queued {
            if job.reply.is_closed() {
                skipped = skipped.saturating_add(1);
            } else {
                self.dispatch(job);
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "Skipped queued calls whose callers gave up");
        }
    }

    fn dispatch(&self, job: Job) {
        let Some(link) = self.link.clone() else {
            let _ = job.reply.send(Err(BackendError::Unavailable));
            return;
        };
        let epoch = self.epoch;
        let events = self.events.clone();
        let timeout = self.command_timeout;
        tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, link.execute(&job.op))
                .await
                .unwrap_or(Err(BackendError::Timeout));
            if result.as_ref().is_err_and(BackendError::is_link_failure) {
                let _ = events.send(LinkEvent::Lost { epoch });
            }
            if let Err(e) = &result {
                tracing::debug!(op = job.op.name(), key = job.op.key(), error = %e, "Store call failed");
            }
            let _ = job.reply.send(result);
        });
    }

    async fn shutdown(mut self) {
        for job in self.queue.drain(..) {
            let _ = job.reply.send(Err(BackendError::Shutdown));
        }
        if let Some(link) = self.link.take() {
            link.close().await;
        }
        tracing::info!("Store adapter stopped");
    }
}

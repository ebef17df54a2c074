//! Single-task cooperative reactor.
//!
//! A [`Reactor`] owns an unbounded event queue and a timer heap and hands
//! every event to one [`EventHandler`], strictly one at a time, on its own
//! task. Everything the handler owns is therefore single-writer and needs no
//! locks. Slow work (store calls, HTTP calls, socket writes) happens on other
//! tasks, which report back by posting an event through a cloned
//! [`ReactorHandle`].
//!
//! A handler callback that returns an error is logged and passed to
//! [`EventHandler::on_error`]; it never stops the loop.
//!
//! # Shutdown
//!
//! [`ReactorHandle::shutdown`] asks the loop to stop. The handler's
//! [`EventHandler::on_shutdown`] runs first, then queued and newly arriving
//! events are drained until the handler reports [`EventHandler::is_drained`],
//! `drain_limit` events have been dispatched, or `drain_timeout` passes.
//! Timers do not fire while draining.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_types::duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Timers further out than this are clamped to it.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `from + after` without overflowing the clock.
fn deadline_after(from: Instant, after: Duration) -> Instant {
    from.checked_add(after.min(FAR_FUTURE)).unwrap_or(from)
}

/// Identifier of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// Reactor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Maximum events dispatched while draining at shutdown.
    pub drain_limit: u64,
    /// Maximum time spent draining at shutdown.
    #[serde(with = "duration::millis", rename = "drain_timeout_ms")]
    pub drain_timeout: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            drain_limit: 10_000,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters describing a reactor's work so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReactorStats {
    /// Events handed to the handler, including timer events.
    pub events_dispatched: u64,
    /// Timers that fired.
    pub timers_fired: u64,
    /// Callbacks that returned an error.
    pub callback_errors: u64,
    /// Timers currently scheduled.
    pub timers_pending: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_dispatched: AtomicU64,
    timers_fired: AtomicU64,
    callback_errors: AtomicU64,
    timers_pending: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ReactorStats {
        ReactorStats {
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            timers_pending: self.timers_pending.load(Ordering::Relaxed),
        }
    }
}

enum Command<E> {
    Event(E),
    Shutdown,
}

/// Cloneable, `Send` handle for posting events into a reactor.
pub struct ReactorHandle<E> {
    tx: mpsc::UnboundedSender<Command<E>>,
    counters: Arc<Counters>,
}

impl<E> Clone for ReactorHandle<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<E> core::fmt::Debug for ReactorHandle<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl<E> ReactorHandle<E> {
    /// Queue an event. Returns `false` if the reactor has stopped.
    pub fn post(&self, event: E) -> bool {
        self.tx.send(Command::Event(event)).is_ok()
    }

    /// Ask the reactor to shut down after the events already queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    /// Whether the reactor has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Snapshot of the reactor's counters.
    pub fn stats(&self) -> ReactorStats {
        self.counters.snapshot()
    }
}

enum TimerKind<E> {
    Once(E),
    Repeating {
        period: Duration,
        factory: Box<dyn FnMut() -> E + Send>,
    },
}

struct Timers<E> {
    next_id: u64,
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    entries: HashMap<TimerId, TimerKind<E>>,
}

impl<E> Timers<E> {
    fn new() -> Self {
        Self {
            next_id: 0,
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, at: Instant, kind: TimerKind<E>) -> TimerId {
        self.next_id = self.next_id.wrapping_add(1);
        let id = TimerId(self.next_id);
        self.heap.push(Reverse((at, id)));
        self.entries.insert(id, kind);
        id
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        // Drop heap entries whose timers were cancelled.
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            if self.entries.contains_key(&id) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop one due timer and produce its event, rescheduling repeats.
    fn pop_due(&mut self, now: Instant) -> Option<E> {
        loop {
            let Reverse((at, id)) = self.heap.peek().copied()?;
            if at > now {
                return None;
            }
            self.heap.pop();
            match self.entries.remove(&id) {
                None => {}
                Some(TimerKind::Once(event)) => return Some(event),
                Some(TimerKind::Repeating {
                    period,
                    mut factory,
                }) => {
                    let event = factory();
                    // Skip missed periods instead of firing a burst.
                    let next = deadline_after(at, period).max(now);
                    self.heap.push(Reverse((next, id)));
                    self.entries
                        .insert(id, TimerKind::Repeating { period, factory });
                    return Some(event);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Scheduling access handed to the handler with every event.
pub struct Context<'a, E> {
    timers: &'a mut Timers<E>,
    handle: &'a ReactorHandle<E>,
}

impl<E> Context<'_, E> {
    /// Fire `event` once after `delay`.
    pub fn schedule_once(&mut self, delay: Duration, event: E) -> TimerId {
        self.timers
            .insert(deadline_after(Instant::now(), delay), TimerKind::Once(event))
    }

    /// Fire an event from `factory` every `period`, starting one period from
    /// now, until cancelled.
    pub fn schedule_repeating<F>(&mut self, period: Duration, factory: F) -> TimerId
    where
        F: FnMut() -> E + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        self.timers.insert(
            deadline_after(Instant::now(), period),
            TimerKind::Repeating {
                period,
                factory: Box::new(factory),
            },
        )
    }

    /// Cancel a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.timers.entries.remove(&id).is_some()
    }

    /// Handle for posting events from spawned tasks.
    pub const fn handle(&self) -> &ReactorHandle<E> {
        self.handle
    }
}

/// Receiver of reactor events.
pub trait EventHandler: Send {
    /// Event type posted to this handler.
    type Event: Send + 'static;
    /// Error a callback may fail with.
    type Error: core::fmt::Display;

    /// Called once before the first event.
    fn on_start(&mut self, _cx: &mut Context<'_, Self::Event>) {}

    /// Handle one event.
    fn handle(
        &mut self,
        event: Self::Event,
        cx: &mut Context<'_, Self::Event>,
    ) -> Result<(), Self::Error>;

    /// Called after [`EventHandler::handle`] failed. The error has already
    /// been logged.
    fn on_error(&mut self, _error: Self::Error, _cx: &mut Context<'_, Self::Event>) {}

    /// Called when shutdown begins, before draining.
    fn on_shutdown(&mut self, _cx: &mut Context<'_, Self::Event>) {}

    /// Whether draining can stop early.
    fn is_drained(&self) -> bool {
        false
    }
}

/// The event loop.
pub struct Reactor<E> {
    rx: mpsc::UnboundedReceiver<Command<E>>,
    handle: ReactorHandle<E>,
    timers: Timers<E>,
    config: ReactorConfig,
}

impl<E: Send + 'static> Reactor<E> {
    /// Create a reactor. Nothing runs until [`Reactor::run`].
    pub fn new(config: ReactorConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            handle: ReactorHandle {
                tx,
                counters: Arc::new(Counters::default()),
            },
            timers: Timers::new(),
            config,
        }
    }

    /// A handle for posting events.
    pub fn handle(&self) -> ReactorHandle<E> {
        self.handle.clone()
    }

    /// Run until shutdown is requested, then drain and return the counters.
    pub async fn run<H>(mut self, mut handler: H) -> ReactorStats
    where
        H: EventHandler<Event = E>,
    {
        {
            let mut cx = Context {
                timers: &mut self.timers,
                handle: &self.handle,
            };
            handler.on_start(&mut cx);
        }

        loop {
            self.sync_pending();
            let deadline = self.timers.next_deadline();
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Event(event)) => self.dispatch(&mut handler, event),
                    Some(Command::Shutdown) | None => break,
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.fire_due(&mut handler);
                }
            }
        }

        self.drain(&mut handler).await;
        self.sync_pending();
        self.handle.stats()
    }

    fn fire_due(&mut self, handler: &mut impl EventHandler<Event = E>) {
        let now = Instant::now();
        while let Some(event) = self.timers.pop_due(now) {
            self.handle
                .counters
                .timers_fired
                .fetch_add(1, Ordering::Relaxed);
            self.dispatch(handler, event);
        }
    }

    fn dispatch(&mut self, handler: &mut impl EventHandler<Event = E>, event: E) {
        let counters = Arc::clone(&self.handle.counters);
        counters.events_dispatched.fetch_add(1, Ordering::Relaxed);
        let mut cx = Context {
            timers: &mut self.timers,
            handle: &self.handle,
        };
        if let Err(error) = handler.handle(event, &mut cx) {
            counters.callback_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %error, "Reactor callback failed");
            handler.on_error(error, &mut cx);
        }
    }

    async fn drain(&mut self, handler: &mut impl EventHandler<Event = E>) {
        {
            let mut cx = Context {
                timers: &mut self.timers,
                handle: &self.handle,
            };
            handler.on_shutdown(&mut cx);
        }

        let deadline = deadline_after(Instant::now(), self.config.drain_timeout);
        let mut drained = 0_u64;
        while !handler.is_drained() && drained < self.config.drain_limit {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(Command::Event(event))) => {
                    self.dispatch(handler, event);
                    drained = drained.saturating_add(1);
                }
                Ok(Some(Command::Shutdown)) => {}
                Ok(None) | Err(_) => break,
            }
        }
        tracing::debug!(drained, complete = handler.is_drained(), "Reactor drained");
        self.rx.close();
    }

    fn sync_pending(&self) {
        let pending = u64::try_from(self.timers.len()).unwrap_or(u64::MAX);
        self.handle
            .counters
            .timers_pending
            .store(pending, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Ev {
        Push(u32),
        Fail,
        Tick,
        StartTimer(u64),
        CancelLast,
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<Ev>,
        errors: u32,
        last_timer: Option<TimerId>,
        shutdown_called: bool,
        log: Option<tokio::sync::mpsc::UnboundedSender<Ev>>,
    }

    impl EventHandler for Recorder {
        type Event = Ev;
        type Error = String;

        fn handle(&mut self, event: Ev, cx: &mut Context<'_, Ev>) -> Result<(), String> {
            if let Some(log) = &self.log {
                let _ = log.send(event.clone());
            }
            self.seen.push(event.clone());
            match event {
                Ev::Fail => Err("boom".to_owned()),
                Ev::StartTimer(ms) => {
                    self.last_timer =
                        Some(cx.schedule_once(Duration::from_millis(ms), Ev::Push(99)));
                    Ok(())
                }
                Ev::CancelLast => {
                    if let Some(id) = self.last_timer.take() {
                        cx.cancel(id);
                    }
                    Ok(())
                }
                Ev::Push(_) | Ev::Tick => Ok(()),
            }
        }

        fn on_error(&mut self, _error: String, _cx: &mut Context<'_, Ev>) {
            self.errors += 1;
        }

        fn on_shutdown(&mut self, _cx: &mut Context<'_, Ev>) {
            self.shutdown_called = true;
        }

        fn is_drained(&self) -> bool {
            true
        }
    }

    fn spawn(
        handler: Recorder,
    ) -> (
        ReactorHandle<Ev>,
        tokio::task::JoinHandle<ReactorStats>,
        tokio::sync::mpsc::UnboundedReceiver<Ev>,
    ) {
        let (log_tx, log_rx) = tokio::sync::mpsc::unbounded_channel();
        let reactor = Reactor::new(ReactorConfig::default());
        let handle = reactor.handle();
        let task = tokio::spawn(reactor.run(Recorder {
            log: Some(log_tx),
            ..handler
        }));
        (handle, task, log_rx)
    }

    #[tokio::test]
    async fn events_are_dispatched_in_post_order() {
        let (handle, task, mut log) = spawn(Recorder::default());
        for i in 0..5 {
            assert!(handle.post(Ev::Push(i)));
        }
        handle.shutdown();
        let stats = task.await.unwrap();

        let mut seen = Vec::new();
        while let Ok(ev) = log.try_recv() {
            seen.push(ev);
        }
        assert_eq!(seen, (0..5).map(Ev::Push).collect::<Vec<_>>());
        assert_eq!(stats.events_dispatched, 5);
        assert!(handle.is_closed());
        assert!(!handle.post(Ev::Push(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_timer_fires_after_delay() {
        let (handle, task, mut log) = spawn(Recorder::default());
        handle.post(Ev::StartTimer(100));
        assert_eq!(log.recv().await, Some(Ev::StartTimer(100)));

        let started = Instant::now();
        assert_eq!(log.recv().await, Some(Ev::Push(99)));
        assert!(started.elapsed() >= Duration::from_millis(100));

        handle.shutdown();
        let stats = task.await.unwrap();
        assert_eq!(stats.timers_fired, 1);
        assert_eq!(stats.timers_pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (handle, task, mut log) = spawn(Recorder::default());
        handle.post(Ev::StartTimer(100));
        handle.post(Ev::CancelLast);
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.post(Ev::Push(1));
        handle.shutdown();
        let stats = task.await.unwrap();

        let mut seen = Vec::new();
        while let Ok(ev) = log.try_recv() {
            seen.push(ev);
        }
        assert_eq!(seen, [Ev::StartTimer(100), Ev::CancelLast, Ev::Push(1)]);
        assert_eq!(stats.timers_fired, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_timer_fires_each_period() {
        struct Repeater {
            ticks: tokio::sync::mpsc::UnboundedSender<()>,
        }
        impl EventHandler for Repeater {
            type Event = Ev;
            type Error = String;
            fn on_start(&mut self, cx: &mut Context<'_, Ev>) {
                cx.schedule_repeating(Duration::from_millis(10), || Ev::Tick);
            }
            fn handle(&mut self, event: Ev, _cx: &mut Context<'_, Ev>) -> Result<(), String> {
                if event == Ev::Tick {
                    let _ = self.ticks.send(());
                }
                Ok(())
            }
        }

        let (ticks, mut ticked) = tokio::sync::mpsc::unbounded_channel();
        let reactor = Reactor::new(ReactorConfig::default());
        let handle = reactor.handle();
        let task = tokio::spawn(reactor.run(Repeater { ticks }));
        for _ in 0..3 {
            ticked.recv().await.unwrap();
        }
        handle.shutdown();
        let stats = task.await.unwrap();
        assert!(stats.timers_fired >= 3);
        assert_eq!(stats.timers_pending, 1);
    }

    #[tokio::test]
    async fn failing_callback_does_not_stop_the_loop() {
        let (handle, task, mut log) = spawn(Recorder::default());
        handle.post(Ev::Fail);
        handle.post(Ev::Push(1));
        assert_eq!(log.recv().await, Some(Ev::Fail));
        assert_eq!(log.recv().await, Some(Ev::Push(1)));
        handle.shutdown();
        let stats = task.await.unwrap();
        assert_eq!(stats.callback_errors, 1);
        assert_eq!(stats.events_dispatched, 2);
    }

    #[tokio::test]
    async fn drain_is_bounded() {
        struct Never;
        impl EventHandler for Never {
            type Event = Ev;
            type Error = String;
            fn handle(&mut self, _event: Ev, _cx: &mut Context<'_, Ev>) -> Result<(), String> {
                Ok(())
            }
        }

        let reactor = Reactor::new(ReactorConfig {
            drain_limit: 3,
            drain_timeout: Duration::from_secs(60),
        });
        let handle = reactor.handle();
        handle.shutdown();
        for i in 0..10 {
            handle.post(Ev::Push(i));
        }
        let stats = reactor.run(Never).await;
        assert_eq!(stats.events_dispatched, 3);
    }
}

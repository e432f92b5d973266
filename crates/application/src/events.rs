//! In-process delivery of committed domain events.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, Version};
use parking_lot::Mutex as SyncMutex;
use store::{EventEnvelope, MessageId};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, oneshot};
use tokio_util::task::TaskTracker;

/// Upper bound of failures kept for inspection; older ones are dropped.
const MAX_RECORDED_FAILURES: usize = 1024;

/// Error returned by an [`EventHandler`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("could not decode event payload: {e}"))
    }
}

/// A subscriber to committed domain events.
///
/// Handlers see each event after its transaction committed. They get no
/// access to that transaction; follow-up work must go through a new
/// command.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns true if the handler wants events of this type.
    fn handles(&self, _event_type: &str) -> bool {
        true
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError>;
}

/// A handler that failed on one event.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerDeliveryFailure {
    pub handler: &'static str,
    pub message_id: MessageId,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub sequence: Version,
    pub error: HandlerError,
}

impl std::fmt::Display for HandlerDeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "handler {} failed on {} #{} of {}: {}",
            self.handler, self.event_type, self.sequence, self.aggregate_id, self.error
        )
    }
}

/// Outcome of delivering one commit's events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    /// Successful handler invocations.
    pub delivered: usize,
    pub failures: Vec<HandlerDeliveryFailure>,
    /// Delivery was handed to a background task and is not reflected here.
    pub deferred: bool,
}

impl DeliveryReport {
    fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// When handlers run relative to the command returning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Before the dispatcher returns the acknowledgement.
    #[default]
    Inline,
    /// On a spawned task; the acknowledgement does not wait.
    Background,
}

/// A place in the delivery order of one aggregate.
///
/// Slots are taken before the commit, so for one aggregate they are handed
/// out in commit order. Each slot is later filled with its commit's events
/// or released empty; deliveries then run strictly in slot order. Dropping
/// an unused slot releases it.
pub struct DeliverySlot {
    aggregate_id: AggregateId,
    ticket: u64,
    handlers: Handlers,
    lanes: Arc<Lanes>,
    submitted: bool,
}

impl DeliverySlot {
    fn submit(mut self, batch: Option<Batch>) {
        self.submitted = true;
        self.lanes
            .submit(&self.handlers, self.aggregate_id, self.ticket, batch);
    }
}

impl Drop for DeliverySlot {
    fn drop(&mut self) {
        if !self.submitted {
            self.lanes
                .submit(&self.handlers, self.aggregate_id, self.ticket, None);
        }
    }
}

impl std::fmt::Debug for DeliverySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliverySlot")
            .field("aggregate_id", &self.aggregate_id)
            .field("ticket", &self.ticket)
            .finish()
    }
}

type Handlers = Arc<Vec<Arc<dyn EventHandler>>>;

tokio::task_local! {
    /// Aggregates whose lanes the current task is draining.
    static DRAINING: Vec<AggregateId>;
}

struct Batch {
    events: Vec<EventEnvelope>,
    reply: Option<oneshot::Sender<DeliveryReport>>,
}

/// Delivery order of one aggregate.
#[derive(Default)]
struct Lane {
    /// Tickets handed out so far.
    issued: u64,
    /// Ticket whose batch runs next.
    next: u64,
    /// Filled or released slots waiting for their turn; `None` is released.
    ready: BTreeMap<u64, Option<Batch>>,
    /// A task is currently draining this lane.
    draining: bool,
}

struct Lanes {
    lanes: SyncMutex<HashMap<AggregateId, Lane>>,
    failures: Mutex<Vec<HandlerDeliveryFailure>>,
    tasks: TaskTracker,
}

impl Lanes {
    fn issue(&self, aggregate_id: AggregateId) -> u64 {
        let mut lanes = self.lanes.lock();
        let lane = lanes.entry(aggregate_id).or_default();
        let ticket = lane.issued;
        lane.issued += 1;
        ticket
    }

    fn submit(
        self: &Arc<Self>,
        handlers: &Handlers,
        aggregate_id: AggregateId,
        ticket: u64,
        batch: Option<Batch>,
    ) {
        let start = {
            let mut lanes = self.lanes.lock();
            let Some(lane) = lanes.get_mut(&aggregate_id) else {
                return;
            };
            lane.ready.insert(ticket, batch);
            let start = !lane.draining && lane.ready.contains_key(&lane.next);
            if start {
                lane.draining = true;
            }
            start
        };
        if start {
            self.spawn_drain(Arc::clone(handlers), aggregate_id);
        }
    }

    /// Starts a task delivering the lane's batches in ticket order.
    ///
    /// The task remembers which lanes its callers were draining, so a
    /// handler that dispatches a command on the same aggregate queues its
    /// events behind the running batch instead of waiting for it.
    fn spawn_drain(self: &Arc<Self>, handlers: Handlers, aggregate_id: AggregateId) {
        let mut draining = DRAINING.try_with(Clone::clone).unwrap_or_default();
        draining.push(aggregate_id);

        let lanes = Arc::clone(self);
        let task = DRAINING.scope(draining, async move {
            lanes.drain(&handlers, aggregate_id).await;
        });
        match Handle::try_current() {
            Ok(runtime) => {
                self.tasks.spawn_on(task, &runtime);
            }
            Err(e) => {
                tracing::error!(%aggregate_id, error = %e, "no runtime to deliver events on");
            }
        }
    }

    async fn drain(&self, handlers: &[Arc<dyn EventHandler>], aggregate_id: AggregateId) {
        loop {
            let batch = {
                let mut lanes = self.lanes.lock();
                let Some(lane) = lanes.get_mut(&aggregate_id) else {
                    return;
                };
                match lane.ready.remove(&lane.next) {
                    Some(batch) => {
                        lane.next += 1;
                        batch
                    }
                    None => {
                        lane.draining = false;
                        if lane.next == lane.issued {
                            lanes.remove(&aggregate_id);
                        }
                        return;
                    }
                }
            };

            let Some(Batch { events, reply }) = batch else {
                continue;
            };
            let report = deliver_all(handlers, &events, &self.failures).await;
            if let Some(reply) = reply {
                // The caller may have stopped waiting.
                let _ = reply.send(report);
            }
        }
    }
}

/// Calls registered handlers for committed events.
///
/// Events are delivered in the order given, one at a time. For each event
/// every interested handler is awaited in registration order. A failing
/// handler is recorded and skipped; it never undoes the commit and never
/// stops the other handlers.
///
/// Commits of one aggregate are delivered in commit order in both modes.
/// No lock is held while handlers run, so a handler may dispatch further
/// commands, including ones on the same aggregate; their events are
/// delivered after the current batch.
pub struct EventDispatcher {
    handlers: Handlers,
    mode: DeliveryMode,
    lanes: Arc<Lanes>,
}

impl EventDispatcher {
    pub fn new(mode: DeliveryMode) -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
            mode,
            lanes: Arc::new(Lanes {
                lanes: SyncMutex::new(HashMap::new()),
                failures: Mutex::new(Vec::new()),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Registers a handler after the existing ones.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        Arc::make_mut(&mut self.handlers).push(handler);
        self
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Takes the next place in an aggregate's delivery order.
    ///
    /// Must be called before the commit it stands for.
    pub fn reserve(&self, aggregate_id: AggregateId) -> DeliverySlot {
        DeliverySlot {
            aggregate_id,
            ticket: self.lanes.issue(aggregate_id),
            handlers: Arc::clone(&self.handlers),
            lanes: Arc::clone(&self.lanes),
            submitted: false,
        }
    }

    /// Gives back a slot whose commit did not happen.
    pub fn release(&self, slot: DeliverySlot) {
        slot.submit(None);
    }

    /// Delivers the events of one commit.
    ///
    /// Inline, this waits for every earlier commit of the aggregate and then
    /// for its own handlers. The one exception is a command dispatched from
    /// a handler of the same aggregate: its events are queued behind the
    /// running batch and the report comes back deferred.
    #[tracing::instrument(skip(self, slot, events), fields(aggregate_id = %slot.aggregate_id, events = events.len()))]
    pub async fn deliver(&self, slot: DeliverySlot, events: Vec<EventEnvelope>) -> DeliveryReport {
        let nested = DRAINING
            .try_with(|ids| ids.contains(&slot.aggregate_id))
            .unwrap_or(false);

        if self.mode == DeliveryMode::Background || nested {
            slot.submit(Some(Batch {
                events,
                reply: None,
            }));
            return DeliveryReport::deferred();
        }

        let (reply, report) = oneshot::channel();
        slot.submit(Some(Batch {
            events,
            reply: Some(reply),
        }));
        report.await.unwrap_or_else(|_| {
            tracing::warn!("event delivery stopped before reporting");
            DeliveryReport::deferred()
        })
    }

    /// Failures seen so far, oldest first.
    pub async fn recorded_failures(&self) -> Vec<HandlerDeliveryFailure> {
        self.lanes.failures.lock().await.clone()
    }

    /// Waits until every delivery started so far has finished.
    pub async fn wait_idle(&self) {
        self.lanes.tasks.close();
        self.lanes.tasks.wait().await;
        self.lanes.tasks.reopen();
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DeliveryMode::default())
    }
}

async fn deliver_all(
    handlers: &[Arc<dyn EventHandler>],
    events: &[EventEnvelope],
    log: &Mutex<Vec<HandlerDeliveryFailure>>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    for event in events {
        for handler in handlers.iter().filter(|h| h.handles(&event.event_type)) {
            match handler.handle(event).await {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    tracing::warn!(
                        handler = handler.name(),
                        event_type = %event.event_type,
                        aggregate_id = %event.aggregate_id,
                        sequence = %event.sequence,
                        error = %error,
                        "event handler failed"
                    );
                    metrics::counter!("event_handler_failures_total", "handler" => handler.name())
                        .increment(1);
                    report.failures.push(HandlerDeliveryFailure {
                        handler: handler.name(),
                        message_id: event.message_id,
                        aggregate_id: event.aggregate_id,
                        event_type: event.event_type.clone(),
                        sequence: event.sequence,
                        error,
                    });
                }
            }
        }
    }

    if !report.failures.is_empty() {
        let mut log = log.lock().await;
        log.extend(report.failures.iter().cloned());
        let excess = log.len().saturating_sub(MAX_RECORDED_FAILURES);
        log.drain(..excess);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
        fail_on: Option<&'static str>,
        only: Option<&'static str>,
        delay: Duration,
    }

    impl Recorder {
        fn new(name: &'static str, seen: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                seen: Arc::clone(seen),
                fail_on: None,
                only: None,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn handles(&self, event_type: &str) -> bool {
            self.only.is_none_or(|t| t == event_type)
        }

        async fn handle(&self, event: &EventEnvelope) -> Result<(), HandlerError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.seen
                .lock()
                .await
                .push(format!("{}:{}#{}", self.name, event.event_type, event.sequence));
            if self.fail_on == Some(event.event_type.as_str()) {
                return Err(HandlerError::new("boom"));
            }
            Ok(())
        }
    }

    fn event(aggregate_id: AggregateId, sequence: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type("Account")
            .event_type(event_type)
            .sequence(Version::new(sequence))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn inline_delivers_in_event_then_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new(DeliveryMode::Inline)
            .with_handler(Arc::new(Recorder::new("h1", &seen)))
            .with_handler(Arc::new(Recorder::new("h2", &seen)));
        let id = AggregateId::new();

        let slot = dispatcher.reserve(id);
        let report = dispatcher
            .deliver(slot, vec![event(id, 1, "A"), event(id, 2, "B")])
            .await;

        assert!(report.is_clean());
        assert!(!report.deferred);
        assert_eq!(report.delivered, 4);
        assert_eq!(
            *seen.lock().await,
            vec!["h1:A#1", "h2:A#1", "h1:B#2", "h2:B#2"]
        );
    }

    #[tokio::test]
    async fn failing_handler_is_recorded_and_others_still_run() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut failing = Recorder::new("failing", &seen);
        failing.fail_on = Some("A");
        let dispatcher = EventDispatcher::new(DeliveryMode::Inline)
            .with_handler(Arc::new(failing))
            .with_handler(Arc::new(Recorder::new("ok", &seen)));
        let id = AggregateId::new();

        let slot = dispatcher.reserve(id);
        let report = dispatcher.deliver(slot, vec![event(id, 1, "A")]).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].handler, "failing");
        assert_eq!(report.failures[0].sequence, Version::new(1));
        assert_eq!(*seen.lock().await, vec!["failing:A#1", "ok:A#1"]);
        assert_eq!(dispatcher.recorded_failures().await.len(), 1);
    }

    #[tokio::test]
    async fn handlers_only_see_types_they_handle() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut picky = Recorder::new("picky", &seen);
        picky.only = Some("B");
        let dispatcher = EventDispatcher::new(DeliveryMode::Inline).with_handler(Arc::new(picky));
        let id = AggregateId::new();

        let slot = dispatcher.reserve(id);
        dispatcher
            .deliver(slot, vec![event(id, 1, "A"), event(id, 2, "B")])
            .await;

        assert_eq!(*seen.lock().await, vec!["picky:B#2"]);
    }

    #[tokio::test]
    async fn background_delivers_in_reservation_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new(DeliveryMode::Background)
            .with_handler(Arc::new(Recorder::new("h", &seen)));
        let id = AggregateId::new();

        let first = dispatcher.reserve(id);
        let second = dispatcher.reserve(id);

        // The later commit is handed over first.
        let report = dispatcher.deliver(second, vec![event(id, 2, "B")]).await;
        assert!(report.deferred);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.lock().await.is_empty());

        dispatcher.deliver(first, vec![event(id, 1, "A")]).await;
        dispatcher.wait_idle().await;

        assert_eq!(*seen.lock().await, vec!["h:A#1", "h:B#2"]);
        assert!(dispatcher.lanes.lanes.lock().is_empty());
    }

    #[tokio::test]
    async fn inline_waits_for_slower_earlier_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut slow = Recorder::new("slow", &seen);
        slow.only = Some("A");
        slow.delay = Duration::from_millis(50);
        let dispatcher = Arc::new(
            EventDispatcher::new(DeliveryMode::Inline)
                .with_handler(Arc::new(slow))
                .with_handler(Arc::new(Recorder::new("view", &seen))),
        );
        let id = AggregateId::new();

        let first = dispatcher.reserve(id);
        let second = dispatcher.reserve(id);

        let earlier = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.deliver(first, vec![event(id, 1, "A")]).await })
        };
        tokio::task::yield_now().await;
        let later = dispatcher.deliver(second, vec![event(id, 2, "B")]).await;
        let earlier = earlier.await.unwrap();

        assert_eq!(earlier.delivered, 2);
        assert_eq!(later.delivered, 1);
        assert!(!later.deferred);
        assert_eq!(
            *seen.lock().await,
            vec!["slow:A#1", "view:A#1", "view:B#2"]
        );
    }

    #[tokio::test]
    async fn other_aggregates_are_not_held_up() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new(DeliveryMode::Inline)
            .with_handler(Arc::new(Recorder::new("h", &seen)));
        let stalled = AggregateId::new();
        let other = AggregateId::new();

        let _pending = dispatcher.reserve(stalled);
        let slot = dispatcher.reserve(other);
        let report = tokio::time::timeout(
            Duration::from_secs(1),
            dispatcher.deliver(slot, vec![event(other, 1, "A")]),
        )
        .await
        .unwrap();

        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn released_slot_unblocks_the_next_writer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = EventDispatcher::new(DeliveryMode::Inline)
            .with_handler(Arc::new(Recorder::new("h", &seen)));
        let id = AggregateId::new();

        let failed = dispatcher.reserve(id);
        let abandoned = dispatcher.reserve(id);
        let next = dispatcher.reserve(id);
        dispatcher.release(failed);
        drop(abandoned);

        let report = tokio::time::timeout(
            Duration::from_secs(1),
            dispatcher.deliver(next, vec![event(id, 3, "C")]),
        )
        .await
        .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(*seen.lock().await, vec!["h:C#3"]);
        dispatcher.wait_idle().await;
        assert!(dispatcher.lanes.lanes.lock().is_empty());
    }

    /// Reserves and delivers a follow-up event for the same aggregate from
    /// inside a handler, like a handler dispatching a command would.
    struct FollowUp {
        dispatcher: Arc<std::sync::OnceLock<Arc<EventDispatcher>>>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for FollowUp {
        fn name(&self) -> &'static str {
            "follow_up"
        }

        async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
            self.seen
                .lock()
                .await
                .push(format!("{}#{}", envelope.event_type, envelope.sequence));
            if envelope.event_type == "A" {
                let dispatcher = self
                    .dispatcher
                    .get()
                    .ok_or_else(|| HandlerError::new("not wired"))?;
                let slot = dispatcher.reserve(envelope.aggregate_id);
                let report = dispatcher
                    .deliver(slot, vec![event(envelope.aggregate_id, 2, "B")])
                    .await;
                if !report.deferred {
                    return Err(HandlerError::new("follow-up was not queued"));
                }
            }
            Ok(())
        }
    }

    async fn follow_up_is_delivered_after_current_batch(mode: DeliveryMode) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cell = Arc::new(std::sync::OnceLock::new());
        let dispatcher = Arc::new(EventDispatcher::new(mode).with_handler(Arc::new(FollowUp {
            dispatcher: Arc::clone(&cell),
            seen: Arc::clone(&seen),
        })));
        let _ = cell.set(Arc::clone(&dispatcher));
        let id = AggregateId::new();

        let slot = dispatcher.reserve(id);
        tokio::time::timeout(Duration::from_secs(2), async {
            dispatcher.deliver(slot, vec![event(id, 1, "A")]).await;
            dispatcher.wait_idle().await;
        })
        .await
        .unwrap();

        assert_eq!(*seen.lock().await, vec!["A#1", "B#2"]);

        // The aggregate still accepts deliveries afterwards.
        let slot = dispatcher.reserve(id);
        tokio::time::timeout(Duration::from_secs(2), async {
            dispatcher.deliver(slot, vec![event(id, 3, "C")]).await;
            dispatcher.wait_idle().await;
        })
        .await
        .unwrap();
        assert_eq!(seen.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn inline_handler_can_trigger_same_aggregate() {
        follow_up_is_delivered_after_current_batch(DeliveryMode::Inline).await;
    }

    #[tokio::test]
    async fn background_handler_can_trigger_same_aggregate() {
        follow_up_is_delivered_after_current_batch(DeliveryMode::Background).await;
    }

    #[test]
    fn failure_display_names_handler_and_event() {
        let failure = HandlerDeliveryFailure {
            handler: "summary",
            message_id: MessageId::new(),
            aggregate_id: AggregateId::new(),
            event_type: "FundsDeposited".to_string(),
            sequence: Version::new(3),
            error: HandlerError::new("view offline"),
        };
        let text = failure.to_string();
        assert!(text.contains("summary"));
        assert!(text.contains("FundsDeposited #3"));
        assert!(text.contains("view offline"));
    }
}

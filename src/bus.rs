//! Publish/subscribe channel between the host application and the engines.
//!
//! Topics are typed ([`Topic`]) and payloads are carried by [`Event`]
//! variants. Dispatch is synchronous and strictly FIFO: an event published
//! from inside a handler is queued and delivered after the current event
//! finishes, never interleaved.
//!
//! The host publishes the [`Topic::CONSUMED`] topics; a coordinator wired
//! with `ExperimentCoordinator::attach` reacts to them and publishes `idle`,
//! `timeout` and `force-end-session` in return.

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::experiment::SessionStartInfo;

/// Event topic names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// A session began.
    SessionStarted,
    /// The active session ended.
    SessionEnded,
    /// The page is about to be suspended or unloaded.
    PageSuspend,
    /// Tab visibility changed.
    VisibilityChanged,
    /// Participant activity.
    Activity,
    /// Something worth backing up happened in the session.
    SignificantEvent,
    /// Participant inactive past the idle threshold.
    Idle,
    /// Session ran past its maximum duration.
    Timeout,
    /// The host must terminate the active session.
    ForceEndSession,
}

impl Topic {
    /// Topics the host publishes and the coordinator reacts to.
    pub const CONSUMED: [Self; 6] = [
        Self::SessionStarted,
        Self::SessionEnded,
        Self::PageSuspend,
        Self::VisibilityChanged,
        Self::Activity,
        Self::SignificantEvent,
    ];

    /// Wire name of the topic.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session-started",
            Self::SessionEnded => "session-ended",
            Self::PageSuspend => "page-suspend",
            Self::VisibilityChanged => "visibility-changed",
            Self::Activity => "activity",
            Self::SignificantEvent => "significant-event",
            Self::Idle => "idle",
            Self::Timeout => "timeout",
            Self::ForceEndSession => "force-end-session",
        }
    }
}

/// An event and its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "kebab-case")]
pub enum Event {
    /// `session-started{sessionId, speedConfig, ...}`
    SessionStarted(SessionStartInfo),
    /// `session-ended{}`
    SessionEnded,
    /// `page-suspend{}`
    PageSuspend,
    /// `visibility-changed{hidden}`
    VisibilityChanged {
        /// Whether the tab became hidden.
        hidden: bool,
    },
    /// `activity{}`
    Activity,
    /// `significant-event{type}`
    SignificantEvent {
        /// Event type, e.g. `game_over` or `point_scored`.
        #[serde(rename = "type")]
        event_type: String,
    },
    /// `idle{idleTimeMs}`
    Idle {
        /// How long the participant has been inactive.
        #[serde(rename = "idleTimeMs")]
        idle_time_ms: i64,
    },
    /// `timeout{sessionTimeMs}`
    Timeout {
        /// How long the session has been running.
        #[serde(rename = "sessionTimeMs")]
        session_time_ms: i64,
    },
    /// `force-end-session{reason}`
    ForceEndSession {
        /// Why the session must end.
        reason: String,
    },
}

impl Event {
    /// Topic this event is published on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::SessionStarted(_) => Topic::SessionStarted,
            Self::SessionEnded => Topic::SessionEnded,
            Self::PageSuspend => Topic::PageSuspend,
            Self::VisibilityChanged { .. } => Topic::VisibilityChanged,
            Self::Activity => Topic::Activity,
            Self::SignificantEvent { .. } => Topic::SignificantEvent,
            Self::Idle { .. } => Topic::Idle,
            Self::Timeout { .. } => Topic::Timeout,
            Self::ForceEndSession { .. } => Topic::ForceEndSession,
        }
    }
}

/// Subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Event handler.
pub type Handler = Box<dyn Fn(&Event)>;

/// Synchronous publish/subscribe channel.
pub trait EventBus {
    /// Deliver `event` to every subscriber of its topic.
    fn publish(&self, event: Event);

    /// Register a handler for `topic`.
    fn subscribe(&self, topic: Topic, handler: Handler) -> SubscriptionId;

    /// Remove a handler. Returns false if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

struct Subscriber {
    id: SubscriptionId,
    topic: Topic,
    handler: Rc<dyn Fn(&Event)>,
}

/// Single-threaded in-process bus, owned by the composition root.
#[derive(Default)]
pub struct LocalBus {
    subscribers: RefCell<Vec<Subscriber>>,
    pending: RefCell<VecDeque<Event>>,
    dispatching: Cell<bool>,
    next_id: Cell<u64>,
}

impl LocalBus {
    /// Create a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn handlers_for(&self, topic: Topic) -> Vec<Rc<dyn Fn(&Event)>> {
        self.subscribers
            .borrow()
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| Rc::clone(&s.handler))
            .collect()
    }
}

impl EventBus for LocalBus {
    fn publish(&self, event: Event) {
        self.pending.borrow_mut().push_back(event);
        if self.dispatching.replace(true) {
            return;
        }
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(event) = next else { break };
            for handler in self.handlers_for(event.topic()) {
                handler(&event);
            }
        }
        self.dispatching.set(false);
    }

    fn subscribe(&self, topic: Topic, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers.borrow_mut().push(Subscriber {
            id,
            topic,
            handler: Rc::from(handler),
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }
}

/// Bus that records everything published, for tests and replay.
#[derive(Default)]
pub struct RecordingBus {
    inner: LocalBus,
    log: RefCell<Vec<Event>>,
}

impl RecordingBus {
    /// Create an empty recording bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }

    /// Events published so far on `topic`.
    #[must_use]
    pub fn published_on(&self, topic: Topic) -> Vec<Event> {
        self.log
            .borrow()
            .iter()
            .filter(|e| e.topic() == topic)
            .cloned()
            .collect()
    }
}

impl EventBus for RecordingBus {
    fn publish(&self, event: Event) {
        self.log.borrow_mut().push(event.clone());
        self.inner.publish(event);
    }

    fn subscribe(&self, topic: Topic, handler: Handler) -> SubscriptionId {
        self.inner.subscribe(topic, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(Event::SessionEnded.topic().as_str(), "session-ended");
        assert_eq!(
            Event::ForceEndSession {
                reason: "timeout".into()
            }
            .topic()
            .as_str(),
            "force-end-session"
        );
    }

    #[test]
    fn test_publish_reaches_only_matching_topic() {
        let bus = LocalBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        bus.subscribe(
            Topic::Idle,
            Box::new(move |e: &Event| sink.borrow_mut().push(e.clone())),
        );

        bus.publish(Event::Activity);
        bus.publish(Event::Idle { idle_time_ms: 10 });

        assert_eq!(*seen.borrow(), vec![Event::Idle { idle_time_ms: 10 }]);
    }

    #[test]
    fn test_nested_publish_is_fifo() {
        let bus = Rc::new(LocalBus::new());
        let order = Rc::new(RefCell::new(Vec::new()));

        let inner_bus = Rc::clone(&bus);
        let o1 = Rc::clone(&order);
        bus.subscribe(
            Topic::Timeout,
            Box::new(move |_: &Event| {
                o1.borrow_mut().push("timeout");
                inner_bus.publish(Event::ForceEndSession {
                    reason: "timeout".into(),
                });
                o1.borrow_mut().push("timeout-done");
            }),
        );
        let o2 = Rc::clone(&order);
        bus.subscribe(
            Topic::ForceEndSession,
            Box::new(move |_: &Event| o2.borrow_mut().push("force-end")),
        );

        bus.publish(Event::Timeout { session_time_ms: 1 });

        assert_eq!(
            *order.borrow(),
            vec!["timeout", "timeout-done", "force-end"]
        );
    }

    #[test]
    fn test_recording_bus_logs_and_delivers() {
        let bus = RecordingBus::new();
        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        bus.subscribe(
            Topic::Activity,
            Box::new(move |_: &Event| counter.set(counter.get() + 1)),
        );

        bus.publish(Event::Activity);
        bus.publish(Event::SessionEnded);

        assert_eq!(seen.get(), 1);
        assert_eq!(bus.published(), vec![Event::Activity, Event::SessionEnded]);
        assert_eq!(bus.published_on(Topic::SessionEnded).len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = LocalBus::new();
        let id = bus.subscribe(Topic::Activity, Box::new(|_: &Event| {}));
        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(Event::SignificantEvent {
            event_type: "game_over".into(),
        })
        .unwrap();
        assert_eq!(json["topic"], "significant-event");
        assert_eq!(json["type"], "game_over");
    }
}

// src/event.rs - Structured events and the per-session event bus
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::device::gpio::{NumberingMode, PinMode, Pull};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PwmAction {
    Init,
    Start,
    DutyChange,
    FreqChange,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpiAction {
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum I2cAction {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemAction {
    StateUpdate,
    ComponentAdded,
    ComponentRemoved,
    ConnectionAdded,
    ConnectionRemoved,
    Snapshot,
    Pong,
}

/// Event payloads, tagged with their wire `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    GpioSetmode {
        mode: NumberingMode,
    },
    GpioSetup {
        pin: u8,
        mode: PinMode,
        pull: Pull,
    },
    GpioCleanup {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        pin: Option<u8>,
    },
    DigitalOutput {
        pin: u8,
        value: bool,
    },
    DigitalInput {
        pin: u8,
        value: bool,
    },
    PwmEvent {
        event: PwmAction,
        pin: u8,
        frequency: f64,
        duty_cycle: f64,
    },
    SpiEvent {
        event: SpiAction,
        bus: u8,
        device: u8,
        data: Vec<u8>,
    },
    I2cEvent {
        event: I2cAction,
        address: u8,
        register: u8,
        value: u8,
    },
    SystemEvent {
        event: SystemAction,
        data: Value,
    },
    Log {
        content: String,
    },
    Output {
        content: String,
    },
    Error {
        message: String,
    },
    ExecutionStarted {
        message: String,
    },
    ExecutionCompleted {
        message: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        exit_code: Option<i32>,
    },
    ExecutionStopped {
        message: String,
    },
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::GpioSetmode { .. } => "gpio_setmode",
            EventKind::GpioSetup { .. } => "gpio_setup",
            EventKind::GpioCleanup { .. } => "gpio_cleanup",
            EventKind::DigitalOutput { .. } => "digital_output",
            EventKind::DigitalInput { .. } => "digital_input",
            EventKind::PwmEvent { .. } => "pwm_event",
            EventKind::SpiEvent { .. } => "spi_event",
            EventKind::I2cEvent { .. } => "i2c_event",
            EventKind::SystemEvent { .. } => "system_event",
            EventKind::Log { .. } => "log",
            EventKind::Output { .. } => "output",
            EventKind::Error { .. } => "error",
            EventKind::ExecutionStarted { .. } => "execution_started",
            EventKind::ExecutionCompleted { .. } => "execution_completed",
            EventKind::ExecutionStopped { .. } => "execution_stopped",
        }
    }

    /// Events after which nothing more is emitted for a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::ExecutionCompleted { .. } | EventKind::ExecutionStopped { .. }
        )
    }

    pub fn system(event: SystemAction, data: Value) -> Self {
        EventKind::SystemEvent { event, data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        EventKind::Error { message: message.into() }
    }
}

/// One immutable record of a state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub component_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize event {}: {}", self.seq, e);
            String::from("{}")
        })
    }
}

#[derive(Debug)]
struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<Event>,
}

/// Ordered, append-only stream of events for one session.
///
/// Emission never blocks: each subscriber has a bounded queue and events
/// that do not fit are dropped for that subscriber only.
#[derive(Debug)]
pub struct EventBus {
    session_id: String,
    next_seq: u64,
    history: VecDeque<Event>,
    history_limit: usize,
    buffer: usize,
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new(session_id: impl Into<String>, history_limit: usize, buffer: usize) -> Self {
        Self {
            session_id: session_id.into(),
            next_seq: 1,
            history: VecDeque::with_capacity(history_limit.min(1024)),
            history_limit,
            buffer: buffer.max(1),
            subscribers: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn emit(&mut self, component_id: impl Into<String>, kind: EventKind) -> &Event {
        let event = Event {
            seq: self.next_seq,
            component_id: component_id.into(),
            kind,
            timestamp: Utc::now(),
        };
        self.next_seq += 1;
        tracing::debug!(
            session = %self.session_id,
            seq = event.seq,
            "event {}",
            event.kind.type_name()
        );

        let session_id = &self.session_id;
        self.subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    "Subscriber {} of session {} is lagging; dropped event {}",
                    sub.id,
                    session_id,
                    event.seq
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Subscriber {} of session {} went away", sub.id, session_id);
                false
            }
        });

        if self.history_limit == 0 {
            self.history.clear();
        } else if self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(event);
        // history_limit == 0 keeps only the latest event so a reference can be returned.
        &self.history[self.history.len() - 1]
    }

    pub fn subscribe(&mut self) -> (Uuid, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.subscribers.push(Subscriber { id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&mut self, id: Uuid) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|sub| sub.id != id);
        before != self.subscribers.len()
    }

    /// Drop every subscriber; their receivers see the stream end.
    pub fn clear_subscribers(&mut self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn history(&self) -> impl Iterator<Item = &Event> {
        self.history.iter()
    }

    pub fn events_since(&self, seq: u64) -> Vec<Event> {
        self.history.iter().filter(|e| e.seq > seq).cloned().collect()
    }

    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let mut bus = EventBus::new("s", 16, 4);
        let event = bus
            .emit(
                "GPIO17",
                EventKind::DigitalOutput { pin: 17, value: true },
            )
            .clone();
        let wire: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(wire["type"], "digital_output");
        assert_eq!(wire["pin"], 17);
        assert_eq!(wire["value"], true);
        assert_eq!(wire["component_id"], "GPIO17");
        assert!(wire["timestamp"].as_str().unwrap().contains('T'));

        let pwm = EventKind::PwmEvent {
            event: PwmAction::DutyChange,
            pin: 18,
            frequency: 50.0,
            duty_cycle: 7.5,
        };
        let wire = serde_json::to_value(&pwm).unwrap();
        assert_eq!(wire, json!({"type": "pwm_event", "event": "duty_change", "pin": 18, "frequency": 50.0, "duty_cycle": 7.5}));
    }

    #[tokio::test]
    async fn test_subscribers_see_emission_order() {
        let mut bus = EventBus::new("s", 16, 8);
        let (_, mut rx) = bus.subscribe();
        for pin in 0..3 {
            bus.emit("", EventKind::DigitalOutput { pin, value: true });
        }
        for expected in 1..=3 {
            assert_eq!(rx.recv().await.unwrap().seq, expected);
        }
    }

    #[test]
    fn test_full_subscriber_does_not_block() {
        let mut bus = EventBus::new("s", 2, 1);
        let (_, _rx) = bus.subscribe();
        for _ in 0..5 {
            bus.emit("", EventKind::Log { content: "x".into() });
        }
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.history().count(), 2);
        assert_eq!(bus.events_since(4).len(), 1);
    }

    #[test]
    fn test_closed_subscriber_is_pruned() {
        let mut bus = EventBus::new("s", 4, 4);
        let (id, rx) = bus.subscribe();
        drop(rx);
        bus.emit("", EventKind::Output { content: "hi".into() });
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.unsubscribe(id));
    }
}

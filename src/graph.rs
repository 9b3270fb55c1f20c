// src/graph.rs - Component graph and signal propagation
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::device::actuator::Direction;
use crate::error::{EmuError, EmuResult};
use crate::event::{EventBus, EventKind, SystemAction};

pub type StateMap = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Gpio,
    Pwm,
    Led,
    Button,
    Motor,
    Stepper,
    Sensor,
    Lcd,
    Adc,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentType::Gpio => "gpio",
            ComponentType::Pwm => "pwm",
            ComponentType::Led => "led",
            ComponentType::Button => "button",
            ComponentType::Motor => "motor",
            ComponentType::Stepper => "stepper",
            ComponentType::Sensor => "sensor",
            ComponentType::Lcd => "lcd",
            ComponentType::Adc => "adc",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    #[serde(default)]
    pub state: StateMap,
    #[serde(default)]
    pub config: StateMap,
}

fn default_connection_kind() -> String {
    "wire".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub from: String,
    pub to: String,
    #[serde(default = "default_connection_kind")]
    pub kind: String,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransferError {
    #[error("field '{field}' has non-numeric value {value}")]
    NotNumeric { field: String, value: Value },
    #[error("{0}")]
    Other(String),
}

/// Derives the state change of a target from the change of its source.
///
/// Returns `Ok(None)` when the source change does not concern the target.
pub trait Transfer: Send + Sync {
    fn apply(
        &self,
        source: &Component,
        delta: &StateMap,
        target: &Component,
    ) -> Result<Option<StateMap>, TransferError>;
}

impl<F> Transfer for F
where
    F: Fn(&Component, &StateMap, &Component) -> Result<Option<StateMap>, TransferError> + Send + Sync,
{
    fn apply(
        &self,
        source: &Component,
        delta: &StateMap,
        target: &Component,
    ) -> Result<Option<StateMap>, TransferError> {
        self(source, delta, target)
    }
}

/// Python-like truthiness for loosely typed state values.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn numeric(field: &str, value: &Value) -> Result<f64, TransferError> {
    match value {
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64().ok_or_else(|| TransferError::NotNumeric {
            field: field.to_string(),
            value: value.clone(),
        }),
        _ => Err(TransferError::NotNumeric { field: field.to_string(), value: value.clone() }),
    }
}

fn led_transfer(_: &Component, delta: &StateMap, _: &Component) -> Result<Option<StateMap>, TransferError> {
    Ok(delta.get("value").map(|value| {
        let mut out = StateMap::new();
        out.insert("on".into(), Value::Bool(truthy(value)));
        out
    }))
}

fn motor_transfer(_: &Component, delta: &StateMap, _: &Component) -> Result<Option<StateMap>, TransferError> {
    let Some(value) = delta.get("value") else {
        return Ok(None);
    };
    let speed = (numeric("value", value)? * 100.0).clamp(-100.0, 100.0);
    let mut out = StateMap::new();
    out.insert("speed".into(), json!(speed));
    out.insert("direction".into(), json!(Direction::of(speed)));
    out.insert("running".into(), Value::Bool(true));
    Ok(Some(out))
}

/// Transfer functions keyed by target component type.
#[derive(Clone)]
pub struct TransferRegistry {
    transfers: HashMap<ComponentType, Arc<dyn Transfer>>,
}

impl fmt::Debug for TransferRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRegistry")
            .field("targets", &self.transfers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        let mut registry = Self { transfers: HashMap::new() };
        registry.register(ComponentType::Led, led_transfer);
        registry.register(ComponentType::Motor, motor_transfer);
        registry
    }
}

impl TransferRegistry {
    /// Install (or replace) the transfer for a target type.
    pub fn register(&mut self, target: ComponentType, transfer: impl Transfer + 'static) {
        self.transfers.insert(target, Arc::new(transfer));
    }

    pub fn get(&self, target: ComponentType) -> Option<&Arc<dyn Transfer>> {
        self.transfers.get(&target)
    }
}

/// Persistable form of the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub components: BTreeMap<String, Component>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug)]
pub struct SignalGraph {
    components: BTreeMap<String, Component>,
    connections: Vec<Connection>,
    transfers: TransferRegistry,
    max_depth: usize,
}

impl SignalGraph {
    pub fn new(max_depth: usize) -> Self {
        Self {
            components: BTreeMap::new(),
            connections: Vec::new(),
            transfers: TransferRegistry::default(),
            max_depth: max_depth.max(1),
        }
    }

    pub fn transfers_mut(&mut self) -> &mut TransferRegistry {
        &mut self.transfers
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.get(id)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    fn require(&self, id: &str) -> EmuResult<&Component> {
        self.components
            .get(id)
            .ok_or_else(|| EmuError::UnknownComponent(id.to_string()))
    }

    pub fn add_component(&mut self, component: Component, bus: &mut EventBus) -> EmuResult<()> {
        if component.id.trim().is_empty() {
            return Err(EmuError::validation("component id must not be empty"));
        }
        if self.components.contains_key(&component.id) {
            return Err(EmuError::validation(format!(
                "component '{}' already exists",
                component.id
            )));
        }
        let data = serde_json::to_value(&component).unwrap_or(Value::Null);
        let id = component.id.clone();
        self.components.insert(id.clone(), component);
        bus.emit(id, EventKind::system(SystemAction::ComponentAdded, data));
        Ok(())
    }

    /// Remove a component together with every connection touching it.
    pub fn remove_component(&mut self, id: &str, bus: &mut EventBus) -> EmuResult<Component> {
        self.require(id)?;
        let (incident, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.connections)
            .into_iter()
            .partition(|c| c.from == id || c.to == id);
        self.connections = kept;
        for connection in incident {
            bus.emit(
                id,
                EventKind::system(SystemAction::ConnectionRemoved, json!(connection)),
            );
        }
        let removed = self
            .components
            .remove(id)
            .ok_or_else(|| EmuError::UnknownComponent(id.to_string()))?;
        bus.emit(id, EventKind::system(SystemAction::ComponentRemoved, json!({ "id": id })));
        Ok(removed)
    }

    pub fn connect(&mut self, connection: Connection, bus: &mut EventBus) -> EmuResult<()> {
        self.require(&connection.from)?;
        self.require(&connection.to)?;
        if self.connections.contains(&connection) {
            return Ok(());
        }
        bus.emit(
            connection.from.clone(),
            EventKind::system(SystemAction::ConnectionAdded, json!(connection)),
        );
        self.connections.push(connection);
        Ok(())
    }

    /// Remove every edge `from -> to`. Returns how many were removed.
    pub fn disconnect(&mut self, from: &str, to: &str, bus: &mut EventBus) -> EmuResult<usize> {
        self.require(from)?;
        self.require(to)?;
        let before = self.connections.len();
        self.connections.retain(|c| !(c.from == from && c.to == to));
        let removed = before - self.connections.len();
        if removed > 0 {
            bus.emit(
                from,
                EventKind::system(SystemAction::ConnectionRemoved, json!({ "from": from, "to": to })),
            );
        }
        Ok(removed)
    }

    /// Merge `delta` into a component's state and cascade it downstream.
    pub fn update_component_state(
        &mut self,
        id: &str,
        delta: StateMap,
        bus: &mut EventBus,
    ) -> EmuResult<()> {
        self.require(id)?;
        let mut path = HashSet::new();
        self.apply_update(id, delta, bus, &mut path);
        Ok(())
    }

    fn apply_update(&mut self, id: &str, delta: StateMap, bus: &mut EventBus, path: &mut HashSet<String>) {
        let Some(component) = self.components.get_mut(id) else {
            return;
        };
        for (key, value) in &delta {
            component.state.insert(key.clone(), value.clone());
        }
        let data = json!({
            "id": component.id,
            "type": component.component_type,
            "state": component.state,
        });
        bus.emit(id, EventKind::system(SystemAction::StateUpdate, data));

        if path.len() >= self.max_depth {
            tracing::warn!(
                "Propagation from '{}' stopped at depth {}",
                id,
                self.max_depth
            );
            return;
        }
        path.insert(id.to_string());

        let Some(source) = self.components.get(id).cloned() else {
            return;
        };
        let targets: Vec<String> = self
            .connections
            .iter()
            .filter(|c| c.from == id)
            .map(|c| c.to.clone())
            .collect();

        for target_id in targets {
            if path.contains(&target_id) {
                tracing::debug!("Skipping cycle {} -> {}", id, target_id);
                continue;
            }
            let Some(target) = self.components.get(&target_id) else {
                continue;
            };
            let Some(transfer) = self.transfers.get(target.component_type).cloned() else {
                continue;
            };
            match transfer.apply(&source, &delta, target) {
                Ok(Some(derived)) => self.apply_update(&target_id, derived, bus, path),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Transfer {} -> {} failed: {}", id, target_id, e);
                    bus.emit(
                        target_id.clone(),
                        EventKind::error(format!("Propagation to '{target_id}' failed: {e}")),
                    );
                }
            }
        }
        path.remove(id);
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            components: self.components.clone(),
            connections: self.connections.clone(),
        }
    }

    /// Replace the graph wholesale. Edges whose endpoints are missing are dropped.
    pub fn restore(&mut self, snapshot: GraphSnapshot) {
        self.components = snapshot.components;
        let components = &self.components;
        self.connections = snapshot
            .connections
            .into_iter()
            .filter(|c| components.contains_key(&c.from) && components.contains_key(&c.to))
            .collect();
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

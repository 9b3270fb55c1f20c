// src/device/actuator.rs - DC motors and steppers
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::StateMap;

pub const MAX_SPEED: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Stopped,
    Forward,
    Reverse,
}

impl Direction {
    pub(crate) fn of(speed: f64) -> Self {
        if speed > 0.0 {
            Direction::Forward
        } else if speed < 0.0 {
            Direction::Reverse
        } else {
            Direction::Stopped
        }
    }
}

/// Clamp to [-100, 100]; NaN counts as stopped.
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        0.0
    } else {
        speed.clamp(-MAX_SPEED, MAX_SPEED)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorState {
    pub name: String,
    pub speed: f64,
    pub direction: Direction,
    pub running: bool,
    /// Revolutions in arbitrary units, integrated from speed on every tick.
    pub position: f64,
}

impl MotorState {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = clamp_speed(speed);
        self.direction = Direction::of(self.speed);
        self.running = self.speed != 0.0;
    }

    pub fn stop(&mut self) {
        self.speed = 0.0;
        self.direction = Direction::Stopped;
        self.running = false;
    }

    /// Advance position by `dt` seconds at the current speed.
    pub fn integrate(&mut self, dt: f64) {
        if self.running {
            self.position += self.speed / MAX_SPEED * dt;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepperState {
    pub name: String,
    pub speed: f64,
    pub direction: Direction,
    pub running: bool,
    pub position: i64,
}

impl StepperState {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Move by a signed number of steps. Returns the new position.
    pub fn step(&mut self, steps: i64) -> i64 {
        self.position = self.position.saturating_add(steps);
        self.direction = match steps.signum() {
            1 => Direction::Forward,
            -1 => Direction::Reverse,
            _ => self.direction,
        };
        self.running = false;
        self.position
    }
}

/// Serialize into the string-keyed state a graph component carries.
pub fn to_state<T: Serialize>(value: &T) -> StateMap {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => StateMap::new(),
    }
}

/// Read typed state back out of a component; unknown keys are ignored and
/// missing ones take their defaults.
pub fn from_state<T: for<'de> Deserialize<'de> + Default>(state: &StateMap) -> T {
    serde_json::from_value(Value::Object(state.clone())).unwrap_or_default()
}

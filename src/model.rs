// src/model.rs - Per-session owner of all device and graph state
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{Config, I2cChip, SpiChip};
use crate::device::actuator::{self, MotorState, StepperState};
use crate::device::i2c::{Bmp280, CharacterLcd, I2cBus, RegisterFile, Registers};
use crate::device::sensor::{SensorKind, SensorState};
use crate::device::spi::{Mcp3008, SpiBus, Ws2812};
use crate::device::{GpioBank, PwmBank};
use crate::error::{EmuError, EmuResult};
use crate::event::{EventBus, EventKind, SystemAction};
use crate::graph::{Component, ComponentType, Connection, GraphSnapshot, SignalGraph, StateMap};
use crate::store::SnapshotStore;

/// The single mutual-exclusion boundary around one session's state.
pub type SharedModel = Arc<Mutex<SystemModel>>;

/// Graph id mirroring digital pin `pin`.
pub fn gpio_component_id(pin: u8) -> String {
    format!("GPIO{pin}")
}

/// Graph id mirroring the PWM channel on `pin`.
pub fn pwm_component_id(pin: u8) -> String {
    format!("PWM{pin}")
}

fn state_of(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> StateMap {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Everything one emulation session owns. Only one writer at a time: the
/// session wraps it in a mutex shared by the sandbox bridge, the control
/// handler and the tick loop.
#[derive(Debug)]
pub struct SystemModel {
    pub(crate) gpio: GpioBank,
    pub(crate) pwm: PwmBank,
    pub(crate) spi: SpiBus,
    pub(crate) i2c: I2cBus,
    pub(crate) graph: SignalGraph,
    pub(crate) bus: EventBus,
    pub(crate) rng: StdRng,
    store: Option<SnapshotStore>,
}

impl SystemModel {
    pub fn new(session_id: &str, config: &Config) -> Self {
        let rng = match config.session.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut model = Self {
            gpio: GpioBank::new(),
            pwm: PwmBank::new(),
            spi: SpiBus::new(),
            i2c: I2cBus::new(),
            graph: SignalGraph::new(config.session.max_propagation_depth),
            bus: EventBus::new(
                session_id,
                config.session.event_history,
                config.session.subscriber_buffer,
            ),
            rng,
            store: config
                .persistence
                .state_dir
                .as_ref()
                .map(|dir| SnapshotStore::for_session(dir, session_id)),
        };
        model.wire_board(config);
        model.load_graph(config);
        model
    }

    fn wire_board(&mut self, config: &Config) {
        for attachment in &config.board.spi {
            match attachment.chip {
                SpiChip::Mcp3008 { vref } => {
                    self.spi.attach(attachment.bus, attachment.device, Box::new(Mcp3008::new(vref)))
                }
                SpiChip::Ws2812 { leds } => {
                    self.spi.attach(attachment.bus, attachment.device, Box::new(Ws2812::new(leds)))
                }
            }
        }
        for attachment in &config.board.i2c {
            let result = match attachment.kind {
                I2cChip::Bmp280 => self.i2c.attach(
                    attachment.bus,
                    attachment.address,
                    Box::new(Bmp280::new()),
                    Bmp280::initial_registers(),
                ),
                I2cChip::Lcd => self.i2c.attach(
                    attachment.bus,
                    attachment.address,
                    Box::new(CharacterLcd::new()),
                    Registers::new(),
                ),
                I2cChip::Registers => self.i2c.attach(
                    attachment.bus,
                    attachment.address,
                    Box::new(RegisterFile),
                    Registers::new(),
                ),
            };
            if let Err(e) = result {
                tracing::warn!("Skipping I2C device 0x{:02X}: {}", attachment.address, e);
            }
        }
    }

    /// A stored snapshot wins over the configured seed graph.
    fn load_graph(&mut self, config: &Config) {
        if let Some(snapshot) = self.store.as_ref().and_then(SnapshotStore::load) {
            tracing::info!(
                "Restored {} components for session {}",
                snapshot.components.len(),
                self.bus.session_id()
            );
            self.graph.restore(snapshot);
            return;
        }
        let seed = GraphSnapshot {
            components: config
                .board
                .components
                .iter()
                .map(|c| (c.id.clone(), c.clone()))
                .collect(),
            connections: config.board.connections.clone(),
        };
        self.graph.restore(seed);
    }

    pub fn session_id(&self) -> &str {
        self.bus.session_id()
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn emit(&mut self, component_id: impl Into<String>, kind: EventKind) {
        self.bus.emit(component_id, kind);
    }

    pub fn gpio(&self) -> &GpioBank {
        &self.gpio
    }

    pub fn pwm(&self) -> &PwmBank {
        &self.pwm
    }

    pub fn spi(&self) -> &SpiBus {
        &self.spi
    }

    pub fn i2c(&self) -> &I2cBus {
        &self.i2c
    }

    pub fn graph(&self) -> &SignalGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SignalGraph {
        &mut self.graph
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.graph.component(id)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.graph.snapshot()
    }

    /// Full view of the board: graph plus raw device state.
    pub fn state_report(&self) -> Value {
        let spi: Vec<Value> = self
            .spi
            .devices()
            .map(|d| json!({ "device": d, "kind": d.kind(), "handler": d.handler_state() }))
            .collect();
        let i2c: Vec<Value> = self
            .i2c
            .devices()
            .map(|d| json!({ "device": d, "handler": d.handler_state() }))
            .collect();
        json!({
            "session_id": self.session_id(),
            "numbering": self.gpio.numbering(),
            "pins": self.gpio.pins().collect::<Vec<_>>(),
            "pwm": self.pwm.channels().collect::<Vec<_>>(),
            "spi": spi,
            "i2c": i2c,
            "graph": self.graph.snapshot(),
        })
    }

    pub(crate) fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.graph.snapshot()) {
            tracing::warn!("Failed to save snapshot {}: {}", store.path().display(), e);
        }
    }

    pub fn add_component(&mut self, component: Component) -> EmuResult<()> {
        self.graph.add_component(component, &mut self.bus)?;
        self.persist();
        Ok(())
    }

    pub fn remove_component(&mut self, id: &str) -> EmuResult<Component> {
        let removed = self.graph.remove_component(id, &mut self.bus)?;
        self.persist();
        Ok(removed)
    }

    pub fn connect(&mut self, connection: Connection) -> EmuResult<()> {
        self.graph.connect(connection, &mut self.bus)?;
        self.persist();
        Ok(())
    }

    pub fn disconnect(&mut self, from: &str, to: &str) -> EmuResult<usize> {
        let removed = self.graph.disconnect(from, to, &mut self.bus)?;
        self.persist();
        Ok(removed)
    }

    pub fn update_component_state(&mut self, id: &str, delta: StateMap) -> EmuResult<()> {
        self.graph.update_component_state(id, delta, &mut self.bus)?;
        self.persist();
        Ok(())
    }

    /// Forward a device change into the graph if a matching component exists.
    pub(crate) fn mirror(&mut self, id: &str, delta: StateMap) {
        if self.graph.component(id).is_none() {
            return;
        }
        if let Err(e) = self.update_component_state(id, delta) {
            tracing::warn!("Mirroring into '{}' failed: {}", id, e);
        }
    }

    pub(crate) fn mirror_gpio(&mut self, pin: u8, value: bool) {
        self.mirror(&gpio_component_id(pin), state_of([("value", Value::Bool(value))]));
    }

    pub(crate) fn mirror_pwm(&mut self, pin: u8) {
        let Ok(channel) = self.pwm.get(pin) else {
            return;
        };
        let delta = state_of([
            ("duty_cycle", json!(channel.duty_cycle)),
            ("frequency", json!(channel.frequency_hz)),
            ("active", Value::Bool(channel.running)),
            ("value", json!(if channel.running { channel.duty_cycle / 100.0 } else { 0.0 })),
        ]);
        self.mirror(&pwm_component_id(pin), delta);
    }

    /// A level driven by the client (button press, toggle) on a BCM pin.
    pub fn drive_input(&mut self, pin: u8, level: bool) -> EmuResult<()> {
        if pin > crate::device::gpio::MAX_BCM_CHANNEL {
            return Err(EmuError::validation(format!("BCM channel {pin} does not exist")));
        }
        self.gpio.drive(pin, level);
        self.bus.emit(
            gpio_component_id(pin),
            EventKind::DigitalInput { pin, value: level },
        );
        self.mirror_gpio(pin, level);
        Ok(())
    }

    pub fn set_adc_channel(&mut self, bus: u8, device: u8, channel: usize, volts: f64) -> EmuResult<()> {
        self.spi.set_channel(bus, device, channel, volts)?;
        let id = format!("ADC{bus}.{device}");
        let key = format!("ch{channel}");
        if self.graph.component(&id).is_some() {
            let mut delta = StateMap::new();
            delta.insert(key, json!(volts));
            self.update_component_state(&id, delta)?;
        }
        Ok(())
    }

    fn ensure_component(&mut self, id: &str, component_type: ComponentType, state: StateMap) -> EmuResult<()> {
        match self.graph.component(id) {
            Some(existing) if existing.component_type == component_type => Ok(()),
            Some(existing) => Err(EmuError::validation(format!(
                "component '{id}' is a {}, not a {component_type}",
                existing.component_type
            ))),
            None => self.add_component(Component {
                id: id.to_string(),
                component_type,
                state,
                config: StateMap::new(),
            }),
        }
    }

    fn typed<T: for<'de> serde::Deserialize<'de> + Default>(
        &self,
        id: &str,
        component_type: ComponentType,
    ) -> EmuResult<T> {
        let component = self
            .graph
            .component(id)
            .ok_or_else(|| EmuError::UnknownComponent(id.to_string()))?;
        if component.component_type != component_type {
            return Err(EmuError::validation(format!(
                "component '{id}' is a {}, not a {component_type}",
                component.component_type
            )));
        }
        Ok(actuator::from_state(&component.state))
    }

    pub fn create_motor(&mut self, name: &str) -> EmuResult<MotorState> {
        self.ensure_component(name, ComponentType::Motor, actuator::to_state(&MotorState::new(name)))?;
        self.typed(name, ComponentType::Motor)
    }

    pub fn set_motor_speed(&mut self, name: &str, speed: f64) -> EmuResult<MotorState> {
        let mut motor: MotorState = self.typed(name, ComponentType::Motor)?;
        motor.name = name.to_string();
        motor.set_speed(speed);
        self.update_component_state(name, actuator::to_state(&motor))?;
        Ok(motor)
    }

    pub fn stop_motor(&mut self, name: &str) -> EmuResult<MotorState> {
        let mut motor: MotorState = self.typed(name, ComponentType::Motor)?;
        motor.name = name.to_string();
        motor.stop();
        self.update_component_state(name, actuator::to_state(&motor))?;
        Ok(motor)
    }

    pub fn motor(&self, name: &str) -> EmuResult<MotorState> {
        self.typed(name, ComponentType::Motor)
    }

    pub fn create_stepper(&mut self, name: &str) -> EmuResult<StepperState> {
        self.ensure_component(name, ComponentType::Stepper, actuator::to_state(&StepperState::new(name)))?;
        self.typed(name, ComponentType::Stepper)
    }

    pub fn step_stepper(&mut self, name: &str, steps: i64) -> EmuResult<StepperState> {
        let mut stepper: StepperState = self.typed(name, ComponentType::Stepper)?;
        stepper.name = name.to_string();
        stepper.step(steps);
        self.update_component_state(name, actuator::to_state(&stepper))?;
        Ok(stepper)
    }

    pub fn stepper(&self, name: &str) -> EmuResult<StepperState> {
        self.typed(name, ComponentType::Stepper)
    }

    /// Read (and perturb) a sensor, creating it on first use.
    pub fn read_sensor(&mut self, name: &str, kind: Option<SensorKind>) -> EmuResult<f64> {
        if self.graph.component(name).is_none() {
            let kind = kind.unwrap_or_else(|| guess_sensor_kind(name));
            self.add_component(Component {
                id: name.to_string(),
                component_type: ComponentType::Sensor,
                state: actuator::to_state(&SensorState::new(name, kind)),
                config: StateMap::new(),
            })?;
        }
        let mut sensor: SensorState = self.typed(name, ComponentType::Sensor)?;
        sensor.name = name.to_string();
        let value = sensor.perturb(&mut self.rng);
        self.update_component_state(name, state_of([("value", json!(value))]))?;
        Ok(value)
    }

    pub fn set_led(&mut self, id: &str, on: bool) -> EmuResult<()> {
        self.ensure_component(id, ComponentType::Led, StateMap::new())?;
        self.update_component_state(id, state_of([("on", Value::Bool(on))]))
    }

    /// Advance time-dependent state by `dt` seconds. Persists once at the end.
    pub fn tick(&mut self, dt: f64) {
        let mut touched = false;
        let ids: Vec<(String, ComponentType)> = self
            .graph
            .components()
            .filter(|c| matches!(c.component_type, ComponentType::Sensor | ComponentType::Motor))
            .map(|c| (c.id.clone(), c.component_type))
            .collect();

        for (id, component_type) in ids {
            let Some(component) = self.graph.component(&id) else {
                continue;
            };
            let delta = match component_type {
                ComponentType::Sensor => {
                    let mut sensor: SensorState = actuator::from_state(&component.state);
                    state_of([("value", json!(sensor.perturb(&mut self.rng)))])
                }
                ComponentType::Motor => {
                    let mut motor: MotorState = actuator::from_state(&component.state);
                    if !motor.running {
                        continue;
                    }
                    motor.integrate(dt);
                    state_of([("position", json!(motor.position))])
                }
                _ => continue,
            };
            if let Err(e) = self.graph.update_component_state(&id, delta, &mut self.bus) {
                tracing::warn!("Tick update of '{}' failed: {}", id, e);
            }
            touched = true;
        }

        self.i2c.tick(dt, &mut self.rng);
        if touched {
            self.persist();
        }
    }

    /// Reset devices that belong to one run. The graph survives.
    pub fn reset_devices(&mut self) {
        self.gpio.reset();
        self.pwm.remove(None);
        self.spi.close_all();
    }

    pub fn emit_snapshot(&mut self) {
        let data = self.state_report();
        self.bus.emit("", EventKind::system(SystemAction::Snapshot, data));
    }
}

fn guess_sensor_kind(name: &str) -> SensorKind {
    let name = name.to_ascii_lowercase();
    if name.contains("humid") {
        SensorKind::Humidity
    } else if name.contains("dist") || name.contains("ultra") || name.contains("sonar") {
        SensorKind::Distance
    } else {
        SensorKind::Temperature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> SystemModel {
        let mut config = Config::default();
        config.session.rng_seed = Some(3);
        SystemModel::new("test", &config)
    }

    fn led(id: &str) -> Component {
        Component {
            id: id.into(),
            component_type: ComponentType::Led,
            state: StateMap::new(),
            config: StateMap::new(),
        }
    }

    #[test]
    fn test_drive_input_mirrors_into_graph() {
        let mut model = model();
        model
            .add_component(Component {
                id: "GPIO4".into(),
                component_type: ComponentType::Button,
                state: StateMap::new(),
                config: StateMap::new(),
            })
            .unwrap();
        model.add_component(led("LED1")).unwrap();
        model
            .connect(Connection { from: "GPIO4".into(), to: "LED1".into(), kind: "wire".into() })
            .unwrap();
        model.drive_input(4, true).unwrap();
        assert_eq!(model.component("LED1").unwrap().state["on"], json!(true));
        assert!(model.drive_input(40, true).is_err());
    }

    #[test]
    fn test_motor_helpers() {
        let mut model = model();
        model.create_motor("left").unwrap();
        assert_eq!(model.set_motor_speed("left", 250.0).unwrap().speed, 100.0);
        model.tick(0.5);
        assert!((model.motor("left").unwrap().position - 0.5).abs() < 1e-9);
        assert!(!model.stop_motor("left").unwrap().running);
        assert!(matches!(model.set_motor_speed("right", 1.0), Err(EmuError::UnknownComponent(_))));
    }

    #[test]
    fn test_stepper_helpers() {
        let mut model = model();
        model.create_stepper("z").unwrap();
        model.step_stepper("z", 200).unwrap();
        assert_eq!(model.step_stepper("z", -20).unwrap().position, 180);
        assert_eq!(model.stepper("z").unwrap().position, 180);
        model.add_component(led("LED1")).unwrap();
        assert!(matches!(model.create_stepper("LED1"), Err(EmuError::Validation(_))));
    }

    #[test]
    fn test_sensors_created_on_read_and_ticked() {
        let mut model = model();
        let value = model.read_sensor("humidity_1", None).unwrap();
        assert!((45.0..=55.0).contains(&value));
        assert_eq!(model.component("humidity_1").unwrap().state["kind"], "humidity");
        let before = model.events().last_seq();
        model.tick(0.1);
        assert!(model.events().last_seq() > before);
    }

    #[test]
    fn test_adc_channel_reaches_device() {
        let mut model = model();
        model.set_adc_channel(0, 0, 2, 1.0).unwrap();
        assert!(model.set_adc_channel(3, 3, 0, 1.0).is_err());
    }

    #[test]
    fn test_snapshot_persisted_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.persistence.state_dir = Some(dir.path().to_path_buf());
        let mut model = SystemModel::new("persist", &config);
        model.add_component(led("LED1")).unwrap();
        model.set_led("LED1", true).unwrap();
        let restored = SystemModel::new("persist", &config);
        assert_eq!(restored.component("LED1").unwrap().state["on"], json!(true));
    }
}

// src/control.rs - Inbound control messages from the client
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::EmuResult;
use crate::event::{EventKind, PwmAction, SystemAction};
use crate::graph::{Component, ComponentType, Connection, StateMap};
use crate::model::SystemModel;
use crate::shim::Level;

fn default_kind() -> String {
    "wire".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PwmCommand {
    Init,
    Start,
    #[serde(alias = "duty_change", alias = "change_duty_cycle")]
    Duty,
    #[serde(alias = "freq_change", alias = "change_frequency")]
    Frequency,
    Stop,
}

impl From<PwmCommand> for PwmAction {
    fn from(command: PwmCommand) -> Self {
        match command {
            PwmCommand::Init => PwmAction::Init,
            PwmCommand::Start => PwmAction::Start,
            PwmCommand::Duty => PwmAction::DutyChange,
            PwmCommand::Frequency => PwmAction::FreqChange,
            PwmCommand::Stop => PwmAction::Stop,
        }
    }
}

/// Messages a client sends over the real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Execute { code: String },
    Stop,
    GpioInput { pin: u8, state: Level },
    PwmControl {
        pin: u8,
        action: PwmCommand,
        #[serde(default)]
        duty_cycle: Option<f64>,
        #[serde(default)]
        frequency: Option<f64>,
    },
    MotorControl { name: String, speed: f64 },
    StepperControl { name: String, steps: i64 },
    CreateComponent {
        id: String,
        component_type: ComponentType,
        #[serde(default)]
        state: StateMap,
        #[serde(default)]
        config: StateMap,
    },
    ConnectComponents {
        from: String,
        to: String,
        #[serde(default = "default_kind")]
        kind: String,
    },
    RemoveComponent { id: String },
    DisconnectComponents { from: String, to: String },
    AdcInput {
        #[serde(default)]
        bus: u8,
        #[serde(default)]
        device: u8,
        channel: usize,
        value: f64,
    },
    GetState,
    Ping,
}

/// Apply a message that only touches the model. `Execute` and `Stop` involve
/// the session's runner and are handled by the session itself.
pub fn apply(model: &mut SystemModel, message: ControlMessage) -> EmuResult<()> {
    match message {
        ControlMessage::Execute { .. } | ControlMessage::Stop => Ok(()),
        ControlMessage::GpioInput { pin, state } => model.drive_input(pin, state.is_high()),
        ControlMessage::PwmControl { pin, action, duty_cycle, frequency } => model
            .shim()
            .pwm_apply(pin, action.into(), duty_cycle, frequency)
            .map(|_| ()),
        ControlMessage::MotorControl { name, speed } => {
            model.set_motor_speed(&name, speed).map(|_| ())
        }
        ControlMessage::StepperControl { name, steps } => {
            model.step_stepper(&name, steps).map(|_| ())
        }
        ControlMessage::CreateComponent { id, component_type, state, config } => {
            model.add_component(Component { id, component_type, state, config })
        }
        ControlMessage::ConnectComponents { from, to, kind } => {
            model.connect(Connection { from, to, kind })
        }
        ControlMessage::RemoveComponent { id } => model.remove_component(&id).map(|_| ()),
        ControlMessage::DisconnectComponents { from, to } => {
            model.disconnect(&from, &to).map(|_| ())
        }
        ControlMessage::AdcInput { bus, device, channel, value } => {
            model.set_adc_channel(bus, device, channel, value)
        }
        ControlMessage::GetState => {
            model.emit_snapshot();
            Ok(())
        }
        ControlMessage::Ping => {
            model.emit("", EventKind::system(SystemAction::Pong, json!({})));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::EmuError;
    use serde_json::Value;

    fn parse(value: Value) -> ControlMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_wire_messages() {
        assert_eq!(parse(json!({"type": "stop"})), ControlMessage::Stop);
        assert_eq!(
            parse(json!({"type": "gpio_input", "pin": 4, "state": true})),
            ControlMessage::GpioInput { pin: 4, state: Level::Bool(true) }
        );
        assert_eq!(
            parse(json!({"type": "pwm_control", "pin": 18, "action": "change_duty_cycle", "duty_cycle": 20.0})),
            ControlMessage::PwmControl { pin: 18, action: PwmCommand::Duty, duty_cycle: Some(20.0), frequency: None }
        );
        assert!(matches!(
            parse(json!({"type": "create_component", "id": "LED1", "component_type": "led"})),
            ControlMessage::CreateComponent { component_type: ComponentType::Led, .. }
        ));
        assert!(serde_json::from_value::<ControlMessage>(json!({"type": "reboot"})).is_err());
    }

    #[test]
    fn test_graph_messages() {
        let mut model = SystemModel::new("control", &Config::default());
        for message in [
            json!({"type": "create_component", "id": "GPIO17", "component_type": "gpio"}),
            json!({"type": "create_component", "id": "LED1", "component_type": "led", "state": {"on": false}}),
            json!({"type": "connect_components", "from": "GPIO17", "to": "LED1"}),
            json!({"type": "gpio_input", "pin": 17, "state": 1}),
        ] {
            apply(&mut model, parse(message)).unwrap();
        }
        assert_eq!(model.component("LED1").unwrap().state["on"], json!(true));

        let err = apply(&mut model, parse(json!({"type": "connect_components", "from": "GPIO17", "to": "X"})));
        assert_eq!(err, Err(EmuError::UnknownComponent("X".into())));

        apply(&mut model, parse(json!({"type": "remove_component", "id": "LED1"}))).unwrap();
        assert!(model.graph().connections().is_empty());
    }

    #[test]
    fn test_pwm_control_uses_bcm_pins() {
        let mut model = SystemModel::new("control", &Config::default());
        apply(&mut model, parse(json!({"type": "pwm_control", "pin": 12, "action": "init", "frequency": 50.0}))).unwrap();
        apply(&mut model, parse(json!({"type": "pwm_control", "pin": 12, "action": "start", "duty_cycle": 7.5}))).unwrap();
        let channel = model.pwm().get(12).unwrap();
        assert_eq!((channel.duty_cycle, channel.running), (7.5, true));
        assert!(apply(&mut model, parse(json!({"type": "pwm_control", "pin": 12, "action": "start"}))).is_err());
    }

    #[test]
    fn test_ping_and_state() {
        let mut model = SystemModel::new("control", &Config::default());
        apply(&mut model, ControlMessage::Ping).unwrap();
        apply(&mut model, ControlMessage::GetState).unwrap();
        let actions: Vec<_> = model
            .events()
            .history()
            .filter_map(|e| match &e.kind {
                EventKind::SystemEvent { event, .. } => Some(*event),
                _ => None,
            })
            .collect();
        assert_eq!(actions, vec![SystemAction::Pong, SystemAction::Snapshot]);
    }
}

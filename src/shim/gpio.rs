// src/shim/gpio.rs - RPi.GPIO-style digital and PWM calls
use serde::{Deserialize, Serialize};

use super::HardwareShim;
use crate::device::gpio::{Edge, NumberingMode, PinMode, Pull};
use crate::device::pwm::PwmChannel;
use crate::error::{EmuError, EmuResult};
use crate::event::{EventKind, PwmAction};
use crate::model::{gpio_component_id, pwm_component_id};

/// A logic level as scripts write it: `True`, `GPIO.HIGH` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Level {
    Bool(bool),
    Int(i64),
}

impl Level {
    pub fn is_high(self) -> bool {
        match self {
            Level::Bool(b) => b,
            Level::Int(i) => i != 0,
        }
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        Level::Bool(value)
    }
}

fn pwm_event(action: PwmAction, channel: &PwmChannel) -> EventKind {
    EventKind::PwmEvent {
        event: action,
        pin: channel.pin,
        frequency: channel.frequency_hz,
        duty_cycle: if action == PwmAction::Stop { 0.0 } else { channel.duty_cycle },
    }
}

impl HardwareShim<'_> {
    pub fn setmode(&mut self, mode: NumberingMode) {
        self.model.gpio.set_numbering(mode);
        tracing::debug!("setmode {:?}", mode);
        self.model.emit("", EventKind::GpioSetmode { mode });
    }

    pub fn setwarnings(&mut self, enabled: bool) {
        self.model.gpio.set_warnings(enabled);
    }

    pub fn setup(&mut self, channel: i32, mode: PinMode, pull: Pull, initial: Option<Level>) -> EmuResult<()> {
        let pin = self.model.gpio.resolve(channel)?;
        let reconfigured = self.model.gpio.pin(pin).is_some();
        if reconfigured && self.model.gpio.warnings() {
            self.model.emit(
                gpio_component_id(pin),
                EventKind::Log { content: format!("RuntimeWarning: channel {channel} is already in use") },
            );
        }
        let value = self
            .model
            .gpio
            .setup(pin, mode, pull, initial.map(Level::is_high))?
            .value;
        self.model.emit(gpio_component_id(pin), EventKind::GpioSetup { pin, mode, pull });
        if mode == PinMode::Out {
            self.model.mirror_gpio(pin, value);
        }
        Ok(())
    }

    pub fn output(&mut self, channel: i32, value: Level) -> EmuResult<()> {
        let pin = self.model.gpio.resolve(channel)?;
        let value = value.is_high();
        self.model.gpio.output(pin, value)?;
        self.model.emit(gpio_component_id(pin), EventKind::DigitalOutput { pin, value });
        self.model.mirror_gpio(pin, value);
        Ok(())
    }

    pub fn input(&mut self, channel: i32) -> EmuResult<bool> {
        let pin = self.model.gpio.resolve(channel)?;
        let value = self.model.gpio.input(pin)?;
        self.model.emit(gpio_component_id(pin), EventKind::DigitalInput { pin, value });
        Ok(value)
    }

    /// Without a channel this works even before `setmode`.
    pub fn cleanup(&mut self, channel: Option<i32>) -> EmuResult<()> {
        let pin = channel.map(|c| self.model.gpio.resolve(c)).transpose()?;
        let cleared = self.model.gpio.cleanup(pin);
        match pin {
            Some(pin) => self.model.pwm.remove(Some(&[pin])),
            None => self.model.pwm.remove(None),
        }
        tracing::debug!("cleanup cleared {} pins", cleared.len());
        self.model.emit(
            pin.map(gpio_component_id).unwrap_or_default(),
            EventKind::GpioCleanup { pin },
        );
        Ok(())
    }

    pub fn add_event_detect(&mut self, channel: i32, edge: Edge) -> EmuResult<()> {
        let pin = self.model.gpio.resolve(channel)?;
        self.model.gpio.add_event_detect(pin, edge)
    }

    pub fn remove_event_detect(&mut self, channel: i32) -> EmuResult<()> {
        let pin = self.model.gpio.resolve(channel)?;
        self.model.gpio.remove_event_detect(pin)
    }

    pub fn event_detected(&mut self, channel: i32) -> EmuResult<bool> {
        let pin = self.model.gpio.resolve(channel)?;
        self.model.gpio.event_detected(pin)
    }

    pub fn pwm_init(&mut self, channel: i32, frequency: f64) -> EmuResult<PwmChannel> {
        let pin = self.model.gpio.resolve(channel)?;
        self.pwm_apply(pin, PwmAction::Init, None, Some(frequency))
    }

    pub fn pwm_start(&mut self, channel: i32, duty_cycle: f64) -> EmuResult<PwmChannel> {
        let pin = self.model.gpio.resolve(channel)?;
        self.pwm_apply(pin, PwmAction::Start, Some(duty_cycle), None)
    }

    pub fn pwm_change_duty_cycle(&mut self, channel: i32, duty_cycle: f64) -> EmuResult<PwmChannel> {
        let pin = self.model.gpio.resolve(channel)?;
        self.pwm_apply(pin, PwmAction::DutyChange, Some(duty_cycle), None)
    }

    pub fn pwm_change_frequency(&mut self, channel: i32, frequency: f64) -> EmuResult<PwmChannel> {
        let pin = self.model.gpio.resolve(channel)?;
        self.pwm_apply(pin, PwmAction::FreqChange, None, Some(frequency))
    }

    pub fn pwm_stop(&mut self, channel: i32) -> EmuResult<PwmChannel> {
        let pin = self.model.gpio.resolve(channel)?;
        self.pwm_apply(pin, PwmAction::Stop, None, None)
    }

    /// Apply a PWM action to a BCM pin, bypassing numbering-mode resolution.
    pub fn pwm_apply(
        &mut self,
        pin: u8,
        action: PwmAction,
        duty_cycle: Option<f64>,
        frequency: Option<f64>,
    ) -> EmuResult<PwmChannel> {
        let missing = |what: &str| EmuError::validation(format!("{what} is required for this PWM action"));
        let pwm = &mut self.model.pwm;
        let state = match action {
            PwmAction::Init => pwm.create(pin, frequency.ok_or_else(|| missing("frequency"))?)?,
            PwmAction::Start => pwm.start(pin, duty_cycle.ok_or_else(|| missing("duty_cycle"))?)?,
            PwmAction::DutyChange => {
                pwm.change_duty_cycle(pin, duty_cycle.ok_or_else(|| missing("duty_cycle"))?)?
            }
            PwmAction::FreqChange => {
                pwm.change_frequency(pin, frequency.ok_or_else(|| missing("frequency"))?)?
            }
            PwmAction::Stop => pwm.stop(pin)?,
        }
        .clone();
        self.model.emit(pwm_component_id(pin), pwm_event(action, &state));
        self.model.mirror_pwm(pin);
        Ok(state)
    }
}

// src/device/pwm.rs - Software PWM channels
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{EmuError, EmuResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PwmChannel {
    pub pin: u8,
    pub frequency_hz: f64,
    /// Percent, always within [0, 100].
    pub duty_cycle: f64,
    pub running: bool,
}

#[derive(Debug, Default)]
pub struct PwmBank {
    channels: BTreeMap<u8, PwmChannel>,
}

/// Clamp a duty cycle into [0, 100]. NaN is rejected.
pub fn clamp_duty(duty_cycle: f64) -> EmuResult<f64> {
    if duty_cycle.is_nan() {
        return Err(EmuError::validation("duty cycle must be a number"));
    }
    Ok(duty_cycle.clamp(0.0, 100.0))
}

fn check_frequency(frequency: f64) -> EmuResult<f64> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(EmuError::validation(format!(
            "frequency must be greater than 0 Hz, got {frequency}"
        )));
    }
    Ok(frequency)
}

impl PwmBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the channel on `pin`; it starts stopped at 0% duty.
    pub fn create(&mut self, pin: u8, frequency: f64) -> EmuResult<&PwmChannel> {
        let frequency_hz = check_frequency(frequency)?;
        self.channels.insert(
            pin,
            PwmChannel { pin, frequency_hz, duty_cycle: 0.0, running: false },
        );
        self.get(pin)
    }

    fn channel_mut(&mut self, pin: u8) -> EmuResult<&mut PwmChannel> {
        self.channels
            .get_mut(&pin)
            .ok_or_else(|| EmuError::NotConfigured(format!("PWM on pin {pin}")))
    }

    pub fn get(&self, pin: u8) -> EmuResult<&PwmChannel> {
        self.channels
            .get(&pin)
            .ok_or_else(|| EmuError::NotConfigured(format!("PWM on pin {pin}")))
    }

    pub fn start(&mut self, pin: u8, duty_cycle: f64) -> EmuResult<&PwmChannel> {
        let duty_cycle = clamp_duty(duty_cycle)?;
        let channel = self.channel_mut(pin)?;
        channel.duty_cycle = duty_cycle;
        channel.running = true;
        Ok(&*channel)
    }

    /// Record a new duty cycle. A stopped channel keeps `running == false`.
    pub fn change_duty_cycle(&mut self, pin: u8, duty_cycle: f64) -> EmuResult<&PwmChannel> {
        let duty_cycle = clamp_duty(duty_cycle)?;
        let channel = self.channel_mut(pin)?;
        channel.duty_cycle = duty_cycle;
        Ok(&*channel)
    }

    pub fn change_frequency(&mut self, pin: u8, frequency: f64) -> EmuResult<&PwmChannel> {
        let frequency_hz = check_frequency(frequency)?;
        let channel = self.channel_mut(pin)?;
        channel.frequency_hz = frequency_hz;
        Ok(&*channel)
    }

    pub fn stop(&mut self, pin: u8) -> EmuResult<&PwmChannel> {
        let channel = self.channel_mut(pin)?;
        channel.running = false;
        Ok(&*channel)
    }

    /// Drop channels on the given pins, or all channels when `pins` is `None`.
    pub fn remove(&mut self, pins: Option<&[u8]>) {
        match pins {
            Some(pins) => {
                for pin in pins {
                    self.channels.remove(pin);
                }
            }
            None => self.channels.clear(),
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = &PwmChannel> {
        self.channels.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_cycle_is_clamped() {
        let mut bank = PwmBank::new();
        bank.create(18, 50.0).unwrap();
        assert_eq!(bank.start(18, 150.0).unwrap().duty_cycle, 100.0);
        assert_eq!(bank.change_duty_cycle(18, -4.0).unwrap().duty_cycle, 0.0);
        assert!(matches!(bank.start(18, f64::NAN), Err(EmuError::Validation(_))));
    }

    #[test]
    fn test_change_after_stop_keeps_channel_stopped() {
        let mut bank = PwmBank::new();
        bank.create(18, 100.0).unwrap();
        bank.start(18, 25.0).unwrap();
        bank.stop(18).unwrap();
        let channel = bank.change_duty_cycle(18, 60.0).unwrap();
        assert_eq!(channel.duty_cycle, 60.0);
        assert!(!channel.running);
    }

    #[test]
    fn test_invalid_frequency() {
        let mut bank = PwmBank::new();
        assert!(bank.create(12, 0.0).is_err());
        bank.create(12, 10.0).unwrap();
        assert!(bank.change_frequency(12, -1.0).is_err());
        assert_eq!(bank.get(12).unwrap().frequency_hz, 10.0);
    }

    #[test]
    fn test_unknown_channel() {
        let mut bank = PwmBank::new();
        assert!(matches!(bank.start(7, 10.0), Err(EmuError::NotConfigured(_))));
        bank.create(7, 10.0).unwrap();
        bank.remove(Some(&[7]));
        assert!(bank.get(7).is_err());
    }
}

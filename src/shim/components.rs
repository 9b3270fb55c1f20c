// src/shim/components.rs - High-level component helpers exposed to scripts
use super::HardwareShim;
use crate::device::actuator::{MotorState, StepperState};
use crate::device::sensor::SensorKind;
use crate::error::EmuResult;

impl HardwareShim<'_> {
    pub fn read_sensor(&mut self, name: &str, kind: Option<SensorKind>) -> EmuResult<f64> {
        self.model.read_sensor(name, kind)
    }

    pub fn set_led(&mut self, id: &str, on: bool) -> EmuResult<()> {
        self.model.set_led(id, on)
    }

    pub fn create_motor(&mut self, name: &str) -> EmuResult<MotorState> {
        self.model.create_motor(name)
    }

    pub fn set_motor_speed(&mut self, name: &str, speed: f64) -> EmuResult<MotorState> {
        self.model.set_motor_speed(name, speed)
    }

    pub fn stop_motor(&mut self, name: &str) -> EmuResult<MotorState> {
        self.model.stop_motor(name)
    }

    pub fn motor_status(&self, name: &str) -> EmuResult<MotorState> {
        self.model.motor(name)
    }

    pub fn create_stepper(&mut self, name: &str) -> EmuResult<StepperState> {
        self.model.create_stepper(name)
    }

    pub fn step(&mut self, name: &str, steps: i64) -> EmuResult<StepperState> {
        self.model.step_stepper(name, steps)
    }

    pub fn stepper_position(&self, name: &str) -> EmuResult<i64> {
        Ok(self.model.stepper(name)?.position)
    }
}

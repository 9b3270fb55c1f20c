// src/shim/call.rs - Serialized shim calls crossing the sandbox boundary
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{HardwareShim, Level};
use crate::device::gpio::{Edge, NumberingMode, PinMode, Pull};
use crate::device::sensor::SensorKind;
use crate::device::spi::SpiSettings;
use crate::error::{EmuError, EmuResult};
use crate::model::SystemModel;

/// One hardware call, as the bridge inside the sandbox encodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ShimCall {
    Setmode { mode: NumberingMode },
    Setwarnings { flag: bool },
    Setup {
        pin: i32,
        mode: PinMode,
        #[serde(default)]
        pull: Pull,
        #[serde(default)]
        initial: Option<Level>,
    },
    Output { pin: i32, value: Level },
    Input { pin: i32 },
    Cleanup {
        #[serde(default)]
        pin: Option<i32>,
    },
    AddEventDetect { pin: i32, edge: Edge },
    RemoveEventDetect { pin: i32 },
    EventDetected { pin: i32 },
    PwmInit { pin: i32, frequency: f64 },
    PwmStart { pin: i32, duty_cycle: f64 },
    PwmChangeDutyCycle { pin: i32, duty_cycle: f64 },
    PwmChangeFrequency { pin: i32, frequency: f64 },
    PwmStop { pin: i32 },
    SpiOpen { bus: u8, device: u8 },
    SpiClose {
        #[serde(default)]
        bus: Option<u8>,
        #[serde(default)]
        device: Option<u8>,
    },
    SpiConfigure {
        #[serde(default)]
        bus: Option<u8>,
        #[serde(default)]
        device: Option<u8>,
        #[serde(default)]
        mode: Option<u8>,
        #[serde(default)]
        max_speed_hz: Option<u32>,
        #[serde(default)]
        bits_per_word: Option<u8>,
    },
    // A handle that was never opened sends null for bus and device.
    SpiXfer {
        #[serde(default)]
        bus: Option<u8>,
        #[serde(default)]
        device: Option<u8>,
        data: Vec<u8>,
    },
    SpiXfer2 {
        #[serde(default)]
        bus: Option<u8>,
        #[serde(default)]
        device: Option<u8>,
        data: Vec<u8>,
    },
    SpiReadbytes {
        #[serde(default)]
        bus: Option<u8>,
        #[serde(default)]
        device: Option<u8>,
        length: usize,
    },
    SpiWritebytes {
        #[serde(default)]
        bus: Option<u8>,
        #[serde(default)]
        device: Option<u8>,
        data: Vec<u8>,
    },
    I2cReadByte { bus: u8, address: u8 },
    I2cWriteByte { bus: u8, address: u8, value: u8 },
    I2cReadByteData { bus: u8, address: u8, register: u8 },
    I2cWriteByteData { bus: u8, address: u8, register: u8, value: u8 },
    I2cReadWordData { bus: u8, address: u8, register: u8 },
    I2cWriteWordData { bus: u8, address: u8, register: u8, value: u16 },
    I2cReadBlockData { bus: u8, address: u8, register: u8, length: usize },
    I2cWriteBlockData { bus: u8, address: u8, register: u8, data: Vec<u8> },
    ReadSensor {
        name: String,
        #[serde(default)]
        kind: Option<SensorKind>,
    },
    SetLed { id: String, on: bool },
    CreateMotor { name: String },
    SetMotorSpeed { name: String, speed: f64 },
    StopMotor { name: String },
    MotorStatus { name: String },
    CreateStepper { name: String },
    Step { name: String, steps: i64 },
    StepperPosition { name: String },
}

fn spi_handle(bus: Option<u8>, device: Option<u8>) -> EmuResult<(u8, u8)> {
    match (bus, device) {
        (Some(bus), Some(device)) => Ok((bus, device)),
        _ => Err(EmuError::NotConfigured("SPI device".to_string())),
    }
}

fn to_value<T: Serialize>(value: T) -> EmuResult<Value> {
    serde_json::to_value(value).map_err(|e| EmuError::Sandbox(format!("unserializable reply: {e}")))
}

impl HardwareShim<'_> {
    /// Run one call and encode its result.
    pub fn dispatch(&mut self, call: ShimCall) -> EmuResult<Value> {
        tracing::debug!("shim call {:?}", call);
        match call {
            ShimCall::Setmode { mode } => {
                self.setmode(mode);
                Ok(Value::Null)
            }
            ShimCall::Setwarnings { flag } => {
                self.setwarnings(flag);
                Ok(Value::Null)
            }
            ShimCall::Setup { pin, mode, pull, initial } => {
                self.setup(pin, mode, pull, initial).map(|_| Value::Null)
            }
            ShimCall::Output { pin, value } => self.output(pin, value).map(|_| Value::Null),
            ShimCall::Input { pin } => self.input(pin).map(Value::Bool),
            ShimCall::Cleanup { pin } => self.cleanup(pin).map(|_| Value::Null),
            ShimCall::AddEventDetect { pin, edge } => self.add_event_detect(pin, edge).map(|_| Value::Null),
            ShimCall::RemoveEventDetect { pin } => self.remove_event_detect(pin).map(|_| Value::Null),
            ShimCall::EventDetected { pin } => self.event_detected(pin).map(Value::Bool),
            ShimCall::PwmInit { pin, frequency } => to_value(self.pwm_init(pin, frequency)?),
            ShimCall::PwmStart { pin, duty_cycle } => to_value(self.pwm_start(pin, duty_cycle)?),
            ShimCall::PwmChangeDutyCycle { pin, duty_cycle } => {
                to_value(self.pwm_change_duty_cycle(pin, duty_cycle)?)
            }
            ShimCall::PwmChangeFrequency { pin, frequency } => {
                to_value(self.pwm_change_frequency(pin, frequency)?)
            }
            ShimCall::PwmStop { pin } => to_value(self.pwm_stop(pin)?),
            ShimCall::SpiOpen { bus, device } => self.spi_open(bus, device).map(|_| Value::Null),
            ShimCall::SpiClose { bus, device } => {
                let (bus, device) = spi_handle(bus, device)?;
                self.spi_close(bus, device).map(|_| Value::Null)
            }
            ShimCall::SpiConfigure { bus, device, mode, max_speed_hz, bits_per_word } => {
                let (bus, device) = spi_handle(bus, device)?;
                self.spi_configure(bus, device, SpiSettings { mode, max_speed_hz, bits_per_word })
                    .map(|_| Value::Null)
            }
            ShimCall::SpiXfer { bus, device, data } | ShimCall::SpiXfer2 { bus, device, data } => {
                let (bus, device) = spi_handle(bus, device)?;
                to_value(self.spi_xfer(bus, device, &data)?)
            }
            ShimCall::SpiReadbytes { bus, device, length } => {
                let (bus, device) = spi_handle(bus, device)?;
                to_value(self.spi_readbytes(bus, device, length)?)
            }
            ShimCall::SpiWritebytes { bus, device, data } => {
                let (bus, device) = spi_handle(bus, device)?;
                self.spi_writebytes(bus, device, &data).map(|_| Value::Null)
            }
            ShimCall::I2cReadByte { bus, address } => Ok(json!(self.i2c_read_byte(bus, address)?)),
            ShimCall::I2cWriteByte { bus, address, value } => {
                self.i2c_write_byte(bus, address, value).map(|_| Value::Null)
            }
            ShimCall::I2cReadByteData { bus, address, register } => {
                Ok(json!(self.i2c_read_byte_data(bus, address, register)?))
            }
            ShimCall::I2cWriteByteData { bus, address, register, value } => self
                .i2c_write_byte_data(bus, address, register, value)
                .map(|_| Value::Null),
            ShimCall::I2cReadWordData { bus, address, register } => {
                Ok(json!(self.i2c_read_word_data(bus, address, register)?))
            }
            ShimCall::I2cWriteWordData { bus, address, register, value } => self
                .i2c_write_word_data(bus, address, register, value)
                .map(|_| Value::Null),
            ShimCall::I2cReadBlockData { bus, address, register, length } => {
                to_value(self.i2c_read_block_data(bus, address, register, length)?)
            }
            ShimCall::I2cWriteBlockData { bus, address, register, data } => self
                .i2c_write_block_data(bus, address, register, &data)
                .map(|_| Value::Null),
            ShimCall::ReadSensor { name, kind } => Ok(json!(self.read_sensor(&name, kind)?)),
            ShimCall::SetLed { id, on } => self.set_led(&id, on).map(|_| Value::Null),
            ShimCall::CreateMotor { name } => to_value(self.create_motor(&name)?),
            ShimCall::SetMotorSpeed { name, speed } => to_value(self.set_motor_speed(&name, speed)?),
            ShimCall::StopMotor { name } => to_value(self.stop_motor(&name)?),
            ShimCall::MotorStatus { name } => to_value(self.motor_status(&name)?),
            ShimCall::CreateStepper { name } => to_value(self.create_stepper(&name)?),
            ShimCall::Step { name, steps } => to_value(self.step(&name, steps)?),
            ShimCall::StepperPosition { name } => Ok(json!(self.stepper_position(&name)?)),
        }
    }
}

/// A call request line, minus its `@@HW ` prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShimRequest {
    pub id: u64,
    #[serde(flatten)]
    pub call: ShimCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

impl From<&EmuError> for WireError {
    fn from(err: &EmuError) -> Self {
        Self { kind: err.kind().to_string(), message: err.to_string() }
    }
}

/// The reply written back on the child's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShimReply {
    Ok { id: u64, ok: Value },
    Err { id: u64, error: WireError },
}

impl ShimReply {
    pub fn id(&self) -> u64 {
        match self {
            ShimReply::Ok { id, .. } | ShimReply::Err { id, .. } => *id,
        }
    }
}

/// Decode one request, run it against `model` and encode the reply.
/// A request that cannot be decoded still gets a reply so the child never
/// blocks on stdin.
pub fn handle_request_line(model: &mut SystemModel, line: &str) -> ShimReply {
    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            let err = EmuError::validation(format!("malformed hardware call: {e}"));
            return ShimReply::Err { id: 0, error: WireError::from(&err) };
        }
    };
    let id = raw.get("id").and_then(Value::as_u64).unwrap_or(0);
    let request: ShimRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            let err = EmuError::validation(format!("unsupported hardware call: {e}"));
            return ShimReply::Err { id, error: WireError::from(&err) };
        }
    };
    match model.shim().dispatch(request.call) {
        Ok(ok) => ShimReply::Ok { id, ok },
        Err(err) => ShimReply::Err { id, error: WireError::from(&err) },
    }
}

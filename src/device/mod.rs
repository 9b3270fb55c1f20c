//! Device models: pure state containers for each emulated peripheral.
//! Nothing here performs I/O or emits events; the shim does that.

pub mod actuator;
pub mod gpio;
pub mod i2c;
pub mod pwm;
pub mod sensor;
pub mod spi;

pub use actuator::{Direction, MotorState, StepperState};
pub use gpio::{Edge, GpioBank, NumberingMode, Pin, PinMode, Pull};
pub use i2c::{Bmp280, CharacterLcd, I2cBus, I2cHandler, RegisterFile};
pub use pwm::{PwmBank, PwmChannel};
pub use sensor::{SensorKind, SensorState};
pub use spi::{FloatingBus, Mcp3008, SpiBus, SpiHandler, SpiSettings, Ws2812};

// src/device/i2c.rs - I2C bus with register-file devices
use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EmuError, EmuResult};

/// Largest payload of an SMBus block transfer.
pub const SMBUS_BLOCK_MAX: usize = 32;

/// Valid 7-bit addresses; the rest are reserved by the bus standard.
pub const ADDRESS_RANGE: std::ops::RangeInclusive<u8> = 0x03..=0x77;

pub type Registers = BTreeMap<u8, u8>;

/// Device-specific behaviour layered over the plain register file.
pub trait I2cHandler: Send + fmt::Debug {
    fn kind(&self) -> &'static str;

    /// Synthesize a register from simulated physical state. `None` falls back
    /// to whatever is stored in the register file.
    fn on_read(&mut self, _register: u8, _registers: &Registers) -> Option<u8> {
        None
    }

    /// Handle a register write; the default stores it.
    fn on_write(&mut self, register: u8, value: u8, registers: &mut Registers) {
        registers.insert(register, value);
    }

    /// A bare byte write without register. Returns the new register pointer,
    /// which by default is the byte itself.
    fn on_send_byte(&mut self, value: u8, _registers: &mut Registers) -> u8 {
        value
    }

    fn tick(&mut self, _dt: f64, _rng: &mut StdRng) {}

    fn state(&self) -> Value {
        Value::Null
    }
}

/// Plain register file with no behaviour of its own.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile;

impl I2cHandler for RegisterFile {
    fn kind(&self) -> &'static str {
        "registers"
    }
}

/// Temperature / pressure sensor.
#[derive(Debug, Clone)]
pub struct Bmp280 {
    pub temperature: f64,
    pub pressure: f64,
}

impl Bmp280 {
    pub const CHIP_ID_REGISTER: u8 = 0xD0;
    pub const CHIP_ID: u8 = 0x58;
    const RESET_REGISTER: u8 = 0xE0;
    const RESET_WORD: u8 = 0xB6;

    pub fn new() -> Self {
        Self { temperature: 25.0, pressure: 1013.25 }
    }

    pub fn initial_registers() -> Registers {
        Registers::from([(Self::CHIP_ID_REGISTER, Self::CHIP_ID)])
    }

    fn temperature_raw(&self) -> u16 {
        ((self.temperature * 100.0).round() as i32 & 0xFFFF) as u16
    }

    fn pressure_raw(&self) -> u32 {
        ((self.pressure * 100.0).round().max(0.0) as u32) & 0xFF_FFFF
    }
}

impl Default for Bmp280 {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cHandler for Bmp280 {
    fn kind(&self) -> &'static str {
        "bmp280"
    }

    fn on_read(&mut self, register: u8, _registers: &Registers) -> Option<u8> {
        let pressure = self.pressure_raw();
        match register {
            0xF7 => Some((pressure >> 16) as u8),
            0xF8 => Some((pressure >> 8) as u8),
            0xF9 => Some(pressure as u8),
            0xFA => Some((self.temperature_raw() >> 8) as u8),
            0xFB => Some(self.temperature_raw() as u8),
            0xFC => Some(0),
            _ => None,
        }
    }

    fn on_write(&mut self, register: u8, value: u8, registers: &mut Registers) {
        if register == Self::RESET_REGISTER && value == Self::RESET_WORD {
            *registers = Self::initial_registers();
            return;
        }
        registers.insert(register, value);
    }

    fn tick(&mut self, _dt: f64, rng: &mut StdRng) {
        self.temperature += rng.random_range(-0.1..=0.1);
        self.pressure += rng.random_range(-0.1..=0.1);
    }

    fn state(&self) -> Value {
        json!({ "temperature": self.temperature, "pressure": self.pressure })
    }
}

/// Character LCD behind an I2C backpack: 4 lines of 20 columns.
#[derive(Debug, Clone)]
pub struct CharacterLcd {
    lines: [String; Self::ROWS],
    cursor: (usize, usize),
    pub backlight: bool,
}

impl CharacterLcd {
    const ROWS: usize = 4;
    const COLS: usize = 20;
    /// DDRAM start address of each row.
    const ROW_OFFSETS: [u8; Self::ROWS] = [0x00, 0x40, 0x14, 0x54];
    /// Control byte announcing a data (character) write.
    const DATA_REGISTER: u8 = 0x40;

    pub fn new() -> Self {
        Self {
            lines: Default::default(),
            cursor: (0, 0),
            backlight: true,
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn put_char(&mut self, ch: char) {
        let (row, col) = self.cursor;
        if col >= Self::COLS {
            return;
        }
        let line = &mut self.lines[row];
        while line.chars().count() < col {
            line.push(' ');
        }
        let mut chars: Vec<char> = line.chars().collect();
        if col < chars.len() {
            chars[col] = ch;
        } else {
            chars.push(ch);
        }
        *line = chars.into_iter().collect();
        self.cursor.1 += 1;
    }

    fn set_address(&mut self, address: u8) {
        // Rows are interleaved in DDRAM, so pick the closest offset below.
        let row = Self::ROW_OFFSETS
            .iter()
            .enumerate()
            .filter(|(_, offset)| address >= **offset)
            .max_by_key(|(_, offset)| **offset)
            .map(|(row, _)| row)
            .unwrap_or(0);
        let col = usize::from(address - Self::ROW_OFFSETS[row]).min(Self::COLS);
        self.cursor = (row, col);
    }

    fn handle(&mut self, value: u8, is_data: bool) {
        if is_data {
            self.put_char(char::from(value));
            return;
        }
        match value {
            0x01 => {
                self.lines = Default::default();
                self.cursor = (0, 0);
            }
            0x02 => self.cursor = (0, 0),
            v if v & 0x80 != 0 => self.set_address(v & 0x7F),
            0x20..=0x7E => self.put_char(char::from(value)),
            _ => {}
        }
    }
}

impl Default for CharacterLcd {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cHandler for CharacterLcd {
    fn kind(&self) -> &'static str {
        "lcd"
    }

    fn on_write(&mut self, register: u8, value: u8, _registers: &mut Registers) {
        self.handle(value, register == Self::DATA_REGISTER);
    }

    fn on_send_byte(&mut self, value: u8, _registers: &mut Registers) -> u8 {
        self.handle(value, false);
        0
    }

    fn state(&self) -> Value {
        json!({ "text": self.lines, "backlight": self.backlight })
    }
}

#[derive(Debug, Serialize)]
pub struct I2cDevice {
    pub bus: u8,
    pub address: u8,
    pub registers: Registers,
    pub device_type: &'static str,
    #[serde(skip)]
    pointer: u8,
    #[serde(skip)]
    handler: Box<dyn I2cHandler>,
}

impl I2cDevice {
    fn read_register(&mut self, register: u8) -> u8 {
        self.handler
            .on_read(register, &self.registers)
            .or_else(|| self.registers.get(&register).copied())
            .unwrap_or(0)
    }

    pub fn handler_state(&self) -> Value {
        self.handler.state()
    }
}

#[derive(Debug, Default)]
pub struct I2cBus {
    devices: BTreeMap<(u8, u8), I2cDevice>,
}

fn check_address(address: u8) -> EmuResult<()> {
    if ADDRESS_RANGE.contains(&address) {
        Ok(())
    } else {
        Err(EmuError::validation(format!(
            "I2C address 0x{address:02X} outside 0x03..=0x77"
        )))
    }
}

fn check_block(length: usize) -> EmuResult<()> {
    if length > SMBUS_BLOCK_MAX {
        return Err(EmuError::validation(format!(
            "block length {length} exceeds {SMBUS_BLOCK_MAX} bytes"
        )));
    }
    Ok(())
}

impl I2cBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(
        &mut self,
        bus: u8,
        address: u8,
        handler: Box<dyn I2cHandler>,
        registers: Registers,
    ) -> EmuResult<()> {
        check_address(address)?;
        let device_type = handler.kind();
        self.devices.insert(
            (bus, address),
            I2cDevice { bus, address, registers, device_type, pointer: 0, handler },
        );
        Ok(())
    }

    fn device_mut(&mut self, bus: u8, address: u8) -> EmuResult<&mut I2cDevice> {
        check_address(address)?;
        self.devices
            .get_mut(&(bus, address))
            .ok_or_else(|| EmuError::NotConfigured(format!("I2C device 0x{address:02X} on bus {bus}")))
    }

    /// Read at the current register pointer. Returns `(register, value)`.
    pub fn read_byte(&mut self, bus: u8, address: u8) -> EmuResult<(u8, u8)> {
        let dev = self.device_mut(bus, address)?;
        let register = dev.pointer;
        Ok((register, dev.read_register(register)))
    }

    /// Bare byte write. Returns the register pointer after the write.
    pub fn write_byte(&mut self, bus: u8, address: u8, value: u8) -> EmuResult<u8> {
        let dev = self.device_mut(bus, address)?;
        dev.pointer = dev.handler.on_send_byte(value, &mut dev.registers);
        Ok(dev.pointer)
    }

    pub fn read_register(&mut self, bus: u8, address: u8, register: u8) -> EmuResult<u8> {
        let dev = self.device_mut(bus, address)?;
        dev.pointer = register;
        Ok(dev.read_register(register))
    }

    pub fn write_register(&mut self, bus: u8, address: u8, register: u8, value: u8) -> EmuResult<()> {
        let dev = self.device_mut(bus, address)?;
        dev.pointer = register;
        dev.handler.on_write(register, value, &mut dev.registers);
        Ok(())
    }

    /// Sequential read starting at `register`; the register index wraps at 0xFF.
    pub fn read_block(&mut self, bus: u8, address: u8, register: u8, length: usize) -> EmuResult<Vec<u8>> {
        check_block(length)?;
        let dev = self.device_mut(bus, address)?;
        let values = (0..length)
            .map(|offset| dev.read_register(register.wrapping_add(offset as u8)))
            .collect();
        dev.pointer = register;
        Ok(values)
    }

    /// Sequential write starting at `register`. Returns the register each
    /// byte landed in; the LCD takes every byte at its data register.
    pub fn write_block(&mut self, bus: u8, address: u8, register: u8, data: &[u8]) -> EmuResult<Vec<u8>> {
        check_block(data.len())?;
        let dev = self.device_mut(bus, address)?;
        let mut targets = Vec::with_capacity(data.len());
        for (offset, value) in data.iter().enumerate() {
            let target = if dev.device_type == "lcd" {
                register
            } else {
                register.wrapping_add(offset as u8)
            };
            dev.handler.on_write(target, *value, &mut dev.registers);
            targets.push(target);
        }
        dev.pointer = register;
        Ok(targets)
    }

    pub fn tick(&mut self, dt: f64, rng: &mut StdRng) {
        for dev in self.devices.values_mut() {
            dev.handler.tick(dt, rng);
        }
    }

    pub fn device(&self, bus: u8, address: u8) -> Option<&I2cDevice> {
        self.devices.get(&(bus, address))
    }

    pub fn devices(&self) -> impl Iterator<Item = &I2cDevice> {
        self.devices.values()
    }
}

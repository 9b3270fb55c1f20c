// src/shim/i2c.rs - smbus-style calls
use super::HardwareShim;
use crate::error::EmuResult;
use crate::event::{EventKind, I2cAction};

fn component_id(address: u8) -> String {
    format!("I2C0x{address:02X}")
}

impl HardwareShim<'_> {
    fn emit_i2c(&mut self, event: I2cAction, address: u8, register: u8, value: u8) {
        self.model.emit(
            component_id(address),
            EventKind::I2cEvent { event, address, register, value },
        );
    }

    pub fn i2c_read_byte(&mut self, bus: u8, address: u8) -> EmuResult<u8> {
        let (register, value) = self.model.i2c.read_byte(bus, address)?;
        self.emit_i2c(I2cAction::Read, address, register, value);
        Ok(value)
    }

    pub fn i2c_write_byte(&mut self, bus: u8, address: u8, value: u8) -> EmuResult<()> {
        let register = self.model.i2c.write_byte(bus, address, value)?;
        self.emit_i2c(I2cAction::Write, address, register, value);
        Ok(())
    }

    pub fn i2c_read_byte_data(&mut self, bus: u8, address: u8, register: u8) -> EmuResult<u8> {
        let value = self.model.i2c.read_register(bus, address, register)?;
        self.emit_i2c(I2cAction::Read, address, register, value);
        Ok(value)
    }

    pub fn i2c_write_byte_data(&mut self, bus: u8, address: u8, register: u8, value: u8) -> EmuResult<()> {
        self.model.i2c.write_register(bus, address, register, value)?;
        self.emit_i2c(I2cAction::Write, address, register, value);
        Ok(())
    }

    /// Big-endian: the byte at `register` is the high half.
    pub fn i2c_read_word_data(&mut self, bus: u8, address: u8, register: u8) -> EmuResult<u16> {
        let bytes = self.i2c_read_block_data(bus, address, register, 2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn i2c_write_word_data(&mut self, bus: u8, address: u8, register: u8, value: u16) -> EmuResult<()> {
        self.i2c_write_block_data(bus, address, register, &value.to_be_bytes())
    }

    pub fn i2c_read_block_data(&mut self, bus: u8, address: u8, register: u8, length: usize) -> EmuResult<Vec<u8>> {
        let values = self.model.i2c.read_block(bus, address, register, length)?;
        for (offset, value) in values.iter().enumerate() {
            self.emit_i2c(I2cAction::Read, address, register.wrapping_add(offset as u8), *value);
        }
        Ok(values)
    }

    pub fn i2c_write_block_data(&mut self, bus: u8, address: u8, register: u8, data: &[u8]) -> EmuResult<()> {
        let targets = self.model.i2c.write_block(bus, address, register, data)?;
        for (target, value) in targets.into_iter().zip(data) {
            self.emit_i2c(I2cAction::Write, address, target, *value);
        }
        Ok(())
    }
}

// src/device/spi.rs - SPI devices and their per-type handlers
use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EmuError, EmuResult};

pub const ADC_CHANNELS: usize = 8;
const ADC_FULL_SCALE: f64 = 1023.0;

/// Behaviour of whatever chip sits behind a chip-select line.
pub trait SpiHandler: Send + fmt::Debug {
    fn kind(&self) -> &'static str;

    /// Full-duplex exchange: the reply has the same length as `tx`.
    fn transfer(&mut self, tx: &[u8], rng: &mut StdRng) -> Vec<u8>;

    /// Clock in `length` bytes while sending zeros.
    fn read(&mut self, length: usize, rng: &mut StdRng) -> Vec<u8> {
        self.transfer(&vec![0; length], rng)
    }

    fn set_channel(&mut self, channel: usize, _value: f64) -> EmuResult<()> {
        Err(EmuError::validation(format!(
            "{} has no analog channel {channel}",
            self.kind()
        )))
    }

    fn state(&self) -> Value;
}

/// 8-channel 10-bit ADC.
#[derive(Debug, Clone)]
pub struct Mcp3008 {
    channels: [f64; ADC_CHANNELS],
    vref: f64,
}

impl Mcp3008 {
    pub fn new(vref: f64) -> Self {
        Self { channels: [0.0; ADC_CHANNELS], vref }
    }

    pub fn channel(&self, channel: usize) -> Option<f64> {
        self.channels.get(channel).copied()
    }

    /// 10-bit conversion of a voltage, clamped to [0, vref].
    pub fn convert(&self, volts: f64) -> u16 {
        if self.vref <= 0.0 || volts.is_nan() {
            return 0;
        }
        (volts.clamp(0.0, self.vref) / self.vref * ADC_FULL_SCALE).round() as u16
    }

    fn sample(&self, single_ended: bool, channel: usize) -> u16 {
        if single_ended {
            self.convert(self.channels[channel])
        } else {
            // Differential pairs: IN+ is `channel`, IN- its neighbour.
            self.convert(self.channels[channel] - self.channels[channel ^ 1])
        }
    }
}

impl SpiHandler for Mcp3008 {
    fn kind(&self) -> &'static str {
        "mcp3008"
    }

    fn transfer(&mut self, tx: &[u8], _rng: &mut StdRng) -> Vec<u8> {
        let mut rx = vec![0; tx.len()];
        if tx.len() < 3 || tx[0] & 0x01 == 0 {
            return rx;
        }
        let single_ended = tx[1] & 0x80 != 0;
        let channel = usize::from((tx[1] >> 4) & 0x07);
        let value = self.sample(single_ended, channel);
        rx[1] = ((value >> 8) & 0x03) as u8;
        rx[2] = (value & 0xFF) as u8;
        rx
    }

    fn set_channel(&mut self, channel: usize, value: f64) -> EmuResult<()> {
        if !value.is_finite() {
            return Err(EmuError::validation("ADC input must be a finite voltage"));
        }
        let slot = self.channels.get_mut(channel).ok_or_else(|| {
            EmuError::validation(format!("ADC channel {channel} out of range 0..{ADC_CHANNELS}"))
        })?;
        *slot = value;
        Ok(())
    }

    fn state(&self) -> Value {
        json!({ "channels": self.channels, "vref": self.vref })
    }
}

/// Addressable RGB strip, fed three bytes per LED.
#[derive(Debug, Clone)]
pub struct Ws2812 {
    leds: Vec<[u8; 3]>,
}

impl Ws2812 {
    pub fn new(count: usize) -> Self {
        Self { leds: vec![[0; 3]; count] }
    }

    pub fn leds(&self) -> &[[u8; 3]] {
        &self.leds
    }
}

impl SpiHandler for Ws2812 {
    fn kind(&self) -> &'static str {
        "ws2812"
    }

    fn transfer(&mut self, tx: &[u8], _rng: &mut StdRng) -> Vec<u8> {
        for (led, rgb) in self.leds.iter_mut().zip(tx.chunks_exact(3)) {
            led.copy_from_slice(rgb);
        }
        vec![0; tx.len()]
    }

    fn state(&self) -> Value {
        json!({ "leds": self.leds })
    }
}

/// Nothing attached: MISO floats and reads back noise.
#[derive(Debug, Clone, Default)]
pub struct FloatingBus;

impl SpiHandler for FloatingBus {
    fn kind(&self) -> &'static str {
        "floating"
    }

    fn transfer(&mut self, tx: &[u8], rng: &mut StdRng) -> Vec<u8> {
        (0..tx.len()).map(|_| rng.random()).collect()
    }

    fn state(&self) -> Value {
        Value::Null
    }
}

#[derive(Debug, Serialize)]
pub struct SpiDevice {
    pub bus: u8,
    pub device_index: u8,
    pub mode: u8,
    pub max_speed_hz: u32,
    pub bits_per_word: u8,
    pub last_transfer: Vec<u8>,
    pub open: bool,
    #[serde(skip)]
    handler: Box<dyn SpiHandler>,
}

impl SpiDevice {
    fn new(bus: u8, device_index: u8, handler: Box<dyn SpiHandler>) -> Self {
        Self {
            bus,
            device_index,
            mode: 0,
            max_speed_hz: 500_000,
            bits_per_word: 8,
            last_transfer: Vec::new(),
            open: false,
            handler,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.handler.kind()
    }

    pub fn handler_state(&self) -> Value {
        self.handler.state()
    }
}

/// Settings a client may change on an open device.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpiSettings {
    pub mode: Option<u8>,
    pub max_speed_hz: Option<u32>,
    pub bits_per_word: Option<u8>,
}

#[derive(Debug, Default)]
pub struct SpiBus {
    devices: BTreeMap<(u8, u8), SpiDevice>,
}

impl SpiBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire a handler to `bus`/`device`. The device stays closed until opened.
    pub fn attach(&mut self, bus: u8, device: u8, handler: Box<dyn SpiHandler>) {
        self.devices.insert((bus, device), SpiDevice::new(bus, device, handler));
    }

    pub fn open(&mut self, bus: u8, device: u8) -> &SpiDevice {
        let entry = self
            .devices
            .entry((bus, device))
            .or_insert_with(|| SpiDevice::new(bus, device, Box::new(FloatingBus)));
        entry.open = true;
        entry
    }

    pub fn close(&mut self, bus: u8, device: u8) -> EmuResult<()> {
        self.open_device(bus, device)?.open = false;
        Ok(())
    }

    /// Close every device; attached handlers and their inputs are kept.
    pub fn close_all(&mut self) {
        for dev in self.devices.values_mut() {
            dev.open = false;
        }
    }

    fn open_device(&mut self, bus: u8, device: u8) -> EmuResult<&mut SpiDevice> {
        match self.devices.get_mut(&(bus, device)) {
            Some(dev) if dev.open => Ok(dev),
            _ => Err(EmuError::NotConfigured(format!("SPI device {bus}.{device}"))),
        }
    }

    pub fn configure(&mut self, bus: u8, device: u8, settings: SpiSettings) -> EmuResult<&SpiDevice> {
        if let Some(mode) = settings.mode {
            if mode > 3 {
                return Err(EmuError::validation(format!(
                    "SPI mode must be 0, 1, 2, or 3, got {mode}"
                )));
            }
        }
        if settings.max_speed_hz == Some(0) {
            return Err(EmuError::validation("SPI speed must be greater than 0 Hz"));
        }
        if let Some(bits) = settings.bits_per_word {
            if !(1..=32).contains(&bits) {
                return Err(EmuError::validation(format!(
                    "bits per word must be within 1..=32, got {bits}"
                )));
            }
        }
        let dev = self.open_device(bus, device)?;
        dev.mode = settings.mode.unwrap_or(dev.mode);
        dev.max_speed_hz = settings.max_speed_hz.unwrap_or(dev.max_speed_hz);
        dev.bits_per_word = settings.bits_per_word.unwrap_or(dev.bits_per_word);
        Ok(&*dev)
    }

    pub fn transfer(&mut self, bus: u8, device: u8, tx: &[u8], rng: &mut StdRng) -> EmuResult<Vec<u8>> {
        let dev = self.open_device(bus, device)?;
        dev.last_transfer = tx.to_vec();
        Ok(dev.handler.transfer(tx, rng))
    }

    pub fn read(&mut self, bus: u8, device: u8, length: usize, rng: &mut StdRng) -> EmuResult<Vec<u8>> {
        let dev = self.open_device(bus, device)?;
        let rx = dev.handler.read(length, rng);
        dev.last_transfer = vec![0; length];
        Ok(rx)
    }

    /// Set the analog input of an attached device; it does not need to be open.
    pub fn set_channel(&mut self, bus: u8, device: u8, channel: usize, value: f64) -> EmuResult<()> {
        self.devices
            .get_mut(&(bus, device))
            .ok_or_else(|| EmuError::NotConfigured(format!("SPI device {bus}.{device}")))?
            .handler
            .set_channel(channel, value)
    }

    pub fn device(&self, bus: u8, device: u8) -> Option<&SpiDevice> {
        self.devices.get(&(bus, device))
    }

    pub fn devices(&self) -> impl Iterator<Item = &SpiDevice> {
        self.devices.values()
    }
}

// src/device/gpio.rs - Digital pin state and numbering
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{EmuError, EmuResult};

/// Highest BCM channel exposed on the 40-pin header.
pub const MAX_BCM_CHANNEL: u8 = 27;

/// Physical header pin -> BCM channel. Power and ground pins are absent.
const BOARD_TO_BCM: [(u8, u8); 28] = [
    (3, 2), (5, 3), (7, 4), (8, 14), (10, 15), (11, 17), (12, 18), (13, 27),
    (15, 22), (16, 23), (18, 24), (19, 10), (21, 9), (22, 25), (23, 11), (24, 8),
    (26, 7), (27, 0), (28, 1), (29, 5), (31, 6), (32, 12), (33, 13), (35, 19),
    (36, 16), (37, 26), (38, 20), (40, 21),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NumberingMode {
    Bcm,
    Board,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PinMode {
    #[default]
    Unset,
    In,
    Out,
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinMode::Unset => write!(f, "UNSET"),
            PinMode::In => write!(f, "IN"),
            PinMode::Out => write!(f, "OUT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Pull {
    #[default]
    #[serde(alias = "OFF")]
    None,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

impl Edge {
    fn matches(self, previous: bool, current: bool) -> bool {
        match self {
            Edge::Rising => !previous && current,
            Edge::Falling => previous && !current,
            Edge::Both => previous != current,
        }
    }
}

/// A configured digital pin, keyed by BCM channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pin {
    pub id: u8,
    pub mode: PinMode,
    pub value: bool,
    pub pull: Pull,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge: Option<Edge>,
    #[serde(skip)]
    edge_pending: bool,
}

/// All digital pins of one emulated board.
#[derive(Debug, Default)]
pub struct GpioBank {
    numbering: Option<NumberingMode>,
    warnings: bool,
    pins: BTreeMap<u8, Pin>,
    // Levels driven by the client, kept even for pins nobody has set up yet.
    external: HashMap<u8, bool>,
}

impl GpioBank {
    pub fn new() -> Self {
        Self { warnings: true, ..Self::default() }
    }

    pub fn set_numbering(&mut self, mode: NumberingMode) {
        self.numbering = Some(mode);
    }

    pub fn numbering(&self) -> Option<NumberingMode> {
        self.numbering
    }

    pub fn set_warnings(&mut self, enabled: bool) {
        self.warnings = enabled;
    }

    pub fn warnings(&self) -> bool {
        self.warnings
    }

    /// Translate a user-facing channel number to a BCM channel.
    pub fn resolve(&self, channel: i32) -> EmuResult<u8> {
        let mode = self.numbering.ok_or(EmuError::Prerequisite)?;
        let channel = u8::try_from(channel)
            .map_err(|_| EmuError::validation(format!("invalid pin number {channel}")))?;
        match mode {
            NumberingMode::Bcm if channel <= MAX_BCM_CHANNEL => Ok(channel),
            NumberingMode::Bcm => Err(EmuError::validation(format!(
                "BCM channel {channel} does not exist"
            ))),
            NumberingMode::Board => BOARD_TO_BCM
                .iter()
                .find(|(board, _)| *board == channel)
                .map(|(_, bcm)| *bcm)
                .ok_or_else(|| {
                    EmuError::validation(format!("header pin {channel} is not a GPIO channel"))
                }),
        }
    }

    /// Configure a pin. Calling it again on the same pin simply reconfigures it.
    pub fn setup(
        &mut self,
        pin: u8,
        mode: PinMode,
        pull: Pull,
        initial: Option<bool>,
    ) -> EmuResult<&Pin> {
        let value = match mode {
            PinMode::Unset => {
                return Err(EmuError::validation("pin mode must be IN or OUT"));
            }
            PinMode::Out => initial.unwrap_or(false),
            PinMode::In => self
                .external
                .get(&pin)
                .copied()
                .unwrap_or(pull == Pull::Up),
        };
        let entry = self.pins.entry(pin).or_insert(Pin {
            id: pin,
            mode,
            value,
            pull,
            edge: None,
            edge_pending: false,
        });
        entry.mode = mode;
        entry.value = value;
        entry.pull = pull;
        if mode == PinMode::Out {
            entry.edge = None;
            entry.edge_pending = false;
        }
        Ok(&*entry)
    }

    fn configured(&self, pin: u8, expected: PinMode) -> EmuResult<&Pin> {
        let state = self
            .pins
            .get(&pin)
            .ok_or_else(|| EmuError::NotConfigured(format!("Pin {pin}")))?;
        if state.mode != expected {
            return Err(EmuError::Mode { pin, expected });
        }
        Ok(state)
    }

    fn configured_mut(&mut self, pin: u8, expected: PinMode) -> EmuResult<&mut Pin> {
        self.configured(pin, expected)?;
        self.pins
            .get_mut(&pin)
            .ok_or_else(|| EmuError::NotConfigured(format!("Pin {pin}")))
    }

    pub fn output(&mut self, pin: u8, value: bool) -> EmuResult<()> {
        self.configured_mut(pin, PinMode::Out)?.value = value;
        Ok(())
    }

    pub fn input(&self, pin: u8) -> EmuResult<bool> {
        Ok(self.configured(pin, PinMode::In)?.value)
    }

    /// Fails unless `pin` is set up as an output.
    pub fn require_output(&self, pin: u8) -> EmuResult<()> {
        self.configured(pin, PinMode::Out).map(|_| ())
    }

    /// Apply a level driven from outside the board (a button, a client toggle).
    /// Returns true when the pin is a configured input and its level changed.
    pub fn drive(&mut self, pin: u8, level: bool) -> bool {
        self.external.insert(pin, level);
        match self.pins.get_mut(&pin) {
            Some(state) if state.mode == PinMode::In => {
                let previous = state.value;
                state.value = level;
                if let Some(edge) = state.edge {
                    if edge.matches(previous, level) {
                        state.edge_pending = true;
                    }
                }
                previous != level
            }
            _ => false,
        }
    }

    pub fn add_event_detect(&mut self, pin: u8, edge: Edge) -> EmuResult<()> {
        let state = self.configured_mut(pin, PinMode::In)?;
        state.edge = Some(edge);
        state.edge_pending = false;
        Ok(())
    }

    pub fn remove_event_detect(&mut self, pin: u8) -> EmuResult<()> {
        let state = self.configured_mut(pin, PinMode::In)?;
        state.edge = None;
        state.edge_pending = false;
        Ok(())
    }

    /// Returns and clears the latched edge flag.
    pub fn event_detected(&mut self, pin: u8) -> EmuResult<bool> {
        let state = self.configured_mut(pin, PinMode::In)?;
        Ok(std::mem::take(&mut state.edge_pending))
    }

    /// Reset one pin, or every pin when `pin` is `None`. Returns the pins that were cleared.
    pub fn cleanup(&mut self, pin: Option<u8>) -> Vec<u8> {
        match pin {
            Some(pin) => self.pins.remove(&pin).map(|p| vec![p.id]).unwrap_or_default(),
            None => {
                let cleared = self.pins.keys().copied().collect();
                self.pins.clear();
                cleared
            }
        }
    }

    /// Forget everything a script configured: pins, numbering mode and the
    /// warnings flag. Levels driven by the client stay.
    pub fn reset(&mut self) {
        self.pins.clear();
        self.numbering = None;
        self.warnings = true;
    }

    pub fn pin(&self, pin: u8) -> Option<&Pin> {
        self.pins.get(&pin)
    }

    pub fn pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins.values()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> GpioBank {
        let mut bank = GpioBank::new();
        bank.set_numbering(NumberingMode::Bcm);
        bank
    }

    #[test]
    fn test_resolve_requires_numbering_mode() {
        let bank = GpioBank::new();
        assert_eq!(bank.resolve(17), Err(EmuError::Prerequisite));
    }

    #[test]
    fn test_resolve_board_numbers() {
        let mut bank = GpioBank::new();
        bank.set_numbering(NumberingMode::Board);
        assert_eq!(bank.resolve(11), Ok(17));
        assert_eq!(bank.resolve(40), Ok(21));
        assert!(matches!(bank.resolve(1), Err(EmuError::Validation(_))));
        assert!(matches!(bank.resolve(-3), Err(EmuError::Validation(_))));
    }

    #[test]
    fn test_output_then_read_state() {
        let mut bank = bank();
        bank.setup(17, PinMode::Out, Pull::None, None).unwrap();
        assert!(!bank.pin(17).unwrap().value);
        bank.output(17, true).unwrap();
        assert!(bank.pin(17).unwrap().value);
    }

    #[test]
    fn test_output_before_setup_fails() {
        let mut bank = bank();
        assert!(matches!(bank.output(4, true), Err(EmuError::NotConfigured(_))));
    }

    #[test]
    fn test_direction_checks() {
        let mut bank = bank();
        bank.setup(5, PinMode::In, Pull::None, None).unwrap();
        bank.setup(6, PinMode::Out, Pull::None, Some(true)).unwrap();
        assert_eq!(
            bank.output(5, true),
            Err(EmuError::Mode { pin: 5, expected: PinMode::Out })
        );
        assert_eq!(bank.input(6), Err(EmuError::Mode { pin: 6, expected: PinMode::In }));
        assert!(bank.pin(6).unwrap().value);
    }

    #[test]
    fn test_input_follows_pull_and_external_level() {
        let mut bank = bank();
        bank.setup(22, PinMode::In, Pull::Up, None).unwrap();
        assert_eq!(bank.input(22), Ok(true));
        bank.drive(23, true);
        bank.setup(23, PinMode::In, Pull::Down, None).unwrap();
        assert_eq!(bank.input(23), Ok(true));
        assert!(bank.drive(23, false));
        assert_eq!(bank.input(23), Ok(false));
    }

    #[test]
    fn test_edge_detection_latches() {
        let mut bank = bank();
        bank.setup(24, PinMode::In, Pull::None, None).unwrap();
        bank.add_event_detect(24, Edge::Rising).unwrap();
        bank.drive(24, true);
        assert_eq!(bank.event_detected(24), Ok(true));
        assert_eq!(bank.event_detected(24), Ok(false));
        bank.drive(24, false);
        assert_eq!(bank.event_detected(24), Ok(false));
    }

    #[test]
    fn test_cleanup_is_reentrant() {
        let mut bank = bank();
        bank.setup(17, PinMode::Out, Pull::None, None).unwrap();
        assert_eq!(bank.cleanup(None), vec![17]);
        assert!(bank.cleanup(None).is_empty());
        assert!(bank.is_empty());
        assert!(bank.cleanup(Some(17)).is_empty());
    }

    #[test]
    fn test_reset_forgets_numbering_and_warnings() {
        let mut bank = bank();
        bank.set_warnings(false);
        bank.setup(17, PinMode::Out, Pull::None, None).unwrap();
        bank.drive(4, true);
        bank.reset();
        assert!(bank.is_empty());
        assert_eq!(bank.numbering(), None);
        assert!(bank.warnings());
        assert_eq!(bank.resolve(17), Err(EmuError::Prerequisite));
        bank.set_numbering(NumberingMode::Bcm);
        bank.setup(4, PinMode::In, Pull::None, None).unwrap();
        assert_eq!(bank.input(4), Ok(true));
    }
}

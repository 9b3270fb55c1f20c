// src/error.rs - Error taxonomy shared by the device model, shim and sandbox
use std::time::Duration;
use thiserror::Error;

use crate::device::gpio::PinMode;

/// Errors raised while emulating hardware or running user code.
///
/// Every variant maps to a stable wire name (see [`EmuError::kind`]) so the
/// bridge running inside the sandbox can re-raise it with the same class.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmuError {
    #[error("Please set pin numbering mode first using setmode()")]
    Prerequisite,
    #[error("{0} is not set up")]
    NotConfigured(String),
    #[error("Pin {pin} is not set up as {expected}")]
    Mode { pin: u8, expected: PinMode },
    #[error("Unknown component '{0}'")]
    UnknownComponent(String),
    #[error("Invalid value: {0}")]
    Validation(String),
    #[error("Sandbox error: {0}")]
    Sandbox(String),
    #[error("Execution exceeded the {0:?} wall-clock budget")]
    Timeout(Duration),
}

impl EmuError {
    pub fn validation(message: impl Into<String>) -> Self {
        EmuError::Validation(message.into())
    }

    /// Name used on the wire and by the sandbox bridge.
    pub fn kind(&self) -> &'static str {
        match self {
            EmuError::Prerequisite => "PrerequisiteError",
            EmuError::NotConfigured(_) => "NotConfiguredError",
            EmuError::Mode { .. } => "ModeError",
            EmuError::UnknownComponent(_) => "UnknownComponentError",
            EmuError::Validation(_) => "ValidationError",
            EmuError::Sandbox(_) => "SandboxError",
            EmuError::Timeout(_) => "TimeoutError",
        }
    }
}

pub type EmuResult<T> = Result<T, EmuError>;

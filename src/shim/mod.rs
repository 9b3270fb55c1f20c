//! The hardware call surface user code sees.
//!
//! Each call resolves and validates its addresses, mutates the device model,
//! emits an event, and finally mirrors the change into the component graph.
//! A failed precondition returns an error before anything is mutated.

pub mod call;
pub mod components;
pub mod gpio;
pub mod i2c;
pub mod spi;

pub use call::{ShimCall, ShimReply, ShimRequest, handle_request_line};
pub use gpio::Level;

use crate::model::SystemModel;

/// Borrowed view of one session's model, valid for a single call.
pub struct HardwareShim<'a> {
    model: &'a mut SystemModel,
}

impl<'a> HardwareShim<'a> {
    pub fn new(model: &'a mut SystemModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &SystemModel {
        self.model
    }
}

impl SystemModel {
    pub fn shim(&mut self) -> HardwareShim<'_> {
        HardwareShim::new(self)
    }
}

// src/shim/spi.rs - spidev-style calls
use super::HardwareShim;
use crate::device::spi::SpiSettings;
use crate::error::{EmuError, EmuResult};
use crate::event::{EventKind, SpiAction};

/// Largest single transfer accepted from a script (spidev's default buffer).
pub const MAX_TRANSFER: usize = 4096;

fn check_length(length: usize) -> EmuResult<()> {
    if length > MAX_TRANSFER {
        return Err(EmuError::validation(format!(
            "SPI transfer of {length} bytes exceeds {MAX_TRANSFER}"
        )));
    }
    Ok(())
}

fn component_id(bus: u8, device: u8) -> String {
    format!("SPI{bus}.{device}")
}

impl HardwareShim<'_> {
    pub fn spi_open(&mut self, bus: u8, device: u8) -> EmuResult<()> {
        let kind = self.model.spi.open(bus, device).kind();
        tracing::debug!("spi {}.{} opened ({})", bus, device, kind);
        Ok(())
    }

    pub fn spi_close(&mut self, bus: u8, device: u8) -> EmuResult<()> {
        self.model.spi.close(bus, device)
    }

    pub fn spi_configure(&mut self, bus: u8, device: u8, settings: SpiSettings) -> EmuResult<()> {
        self.model.spi.configure(bus, device, settings).map(|_| ())
    }

    /// Full-duplex transfer. `xfer` and `xfer2` only differ in chip-select
    /// behaviour between words, which is not modelled.
    pub fn spi_xfer(&mut self, bus: u8, device: u8, data: &[u8]) -> EmuResult<Vec<u8>> {
        check_length(data.len())?;
        let rx = self.model.spi.transfer(bus, device, data, &mut self.model.rng)?;
        self.emit_transfer(bus, device, data.to_vec());
        Ok(rx)
    }

    pub fn spi_readbytes(&mut self, bus: u8, device: u8, length: usize) -> EmuResult<Vec<u8>> {
        check_length(length)?;
        let rx = self.model.spi.read(bus, device, length, &mut self.model.rng)?;
        self.emit_transfer(bus, device, rx.clone());
        Ok(rx)
    }

    pub fn spi_writebytes(&mut self, bus: u8, device: u8, data: &[u8]) -> EmuResult<()> {
        self.spi_xfer(bus, device, data).map(|_| ())
    }

    fn emit_transfer(&mut self, bus: u8, device: u8, data: Vec<u8>) {
        self.model.emit(
            component_id(bus, device),
            EventKind::SpiEvent { event: SpiAction::Transfer, bus, device, data },
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::error::EmuError;
    use crate::event::EventKind;
    use crate::model::SystemModel;

    #[test]
    fn test_adc_read_through_shim() {
        let mut model = SystemModel::new("spi", &Config::default());
        model.set_adc_channel(0, 0, 1, 1.65).unwrap();
        let mut shim = model.shim();
        shim.spi_open(0, 0).unwrap();
        let rx = shim.spi_xfer(0, 0, &[1, (8 + 1) << 4, 0]).unwrap();
        let value = (u16::from(rx[1] & 3) << 8) | u16::from(rx[2]);
        assert!((511..=513).contains(&value));
        let last = model.events().history().last().unwrap();
        assert!(matches!(&last.kind, EventKind::SpiEvent { bus: 0, device: 0, data, .. } if data == &vec![1, 0x90, 0]));
    }

    #[test]
    fn test_unopened_device() {
        let mut model = SystemModel::new("spi", &Config::default());
        let mut shim = model.shim();
        assert!(matches!(shim.spi_xfer(0, 0, &[0]), Err(EmuError::NotConfigured(_))));
        shim.spi_open(0, 1).unwrap();
        assert_eq!(shim.spi_readbytes(0, 1, 4).unwrap().len(), 4);
        assert!(shim.spi_readbytes(0, 1, 5000).is_err());
    }
}

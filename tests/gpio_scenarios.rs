// Integration tests for the device model as scripts see it through the shim

use rpi_sim::config::Config;
use rpi_sim::device::gpio::{NumberingMode, PinMode, Pull};
use rpi_sim::error::EmuError;
use rpi_sim::event::EventKind;
use rpi_sim::model::SystemModel;
use rpi_sim::shim::{Level, ShimReply, handle_request_line};
use serde_json::json;

fn model() -> SystemModel {
    let mut config = Config::default();
    config.session.rng_seed = Some(7);
    SystemModel::new("scenarios", &config)
}

#[test]
fn test_output_roundtrip_on_every_pin() {
    let mut model = model();
    let mut shim = model.shim();
    shim.setmode(NumberingMode::Bcm);
    for pin in 2..=27 {
        assert!(matches!(shim.output(pin, Level::Int(1)), Err(EmuError::NotConfigured(_))));
        shim.setup(pin, PinMode::Out, Pull::None, None).unwrap();
        for value in [true, false, true] {
            shim.output(pin, value.into()).unwrap();
            assert_eq!(shim.model().gpio().pin(pin as u8).unwrap().value, value);
        }
    }
}

#[test]
fn test_output_on_input_pin_is_mode_error() {
    let mut model = model();
    let mut shim = model.shim();
    shim.setmode(NumberingMode::Bcm);
    shim.setup(22, PinMode::In, Pull::Up, None).unwrap();
    assert_eq!(
        shim.output(22, Level::Bool(false)),
        Err(EmuError::Mode { pin: 22, expected: PinMode::Out })
    );
    // Pull-up reads high until the client drives the pin.
    assert!(shim.input(22).unwrap());
    model.drive_input(22, false).unwrap();
    assert!(!model.shim().input(22).unwrap());
}

#[test]
fn test_wire_calls_follow_event_order() {
    let mut model = model();
    for (id, line) in [
        (1, r#"{"id":1,"call":"setmode","mode":"BCM"}"#),
        (2, r#"{"id":2,"call":"setup","pin":17,"mode":"OUT"}"#),
        (3, r#"{"id":3,"call":"output","pin":17,"value":1}"#),
    ] {
        let reply = handle_request_line(&mut model, line);
        assert_eq!(reply, ShimReply::Ok { id, ok: serde_json::Value::Null });
    }
    let events: Vec<_> = model.events().history().map(|e| e.kind.clone()).collect();
    assert_eq!(
        events,
        vec![
            EventKind::GpioSetmode { mode: NumberingMode::Bcm },
            EventKind::GpioSetup { pin: 17, mode: PinMode::Out, pull: Pull::None },
            EventKind::DigitalOutput { pin: 17, value: true },
        ]
    );
    let seqs: Vec<u64> = model.events().history().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[test]
fn test_wire_errors_carry_kind() {
    let mut model = model();
    let reply = handle_request_line(&mut model, r#"{"id":9,"call":"output","pin":4,"value":true}"#);
    let encoded = serde_json::to_value(&reply).unwrap();
    assert_eq!(encoded["id"], json!(9));
    assert_eq!(encoded["error"]["kind"], json!("PrerequisiteError"));
    assert_eq!(model.events().last_seq(), 0);
}

#[test]
fn test_pwm_duty_clamps_and_survives_stop() {
    let mut model = model();
    let mut shim = model.shim();
    shim.setmode(NumberingMode::Bcm);
    shim.pwm_init(18, 50.0).unwrap();
    assert_eq!(shim.pwm_start(18, 140.0).unwrap().duty_cycle, 100.0);
    assert_eq!(shim.pwm_change_duty_cycle(18, -3.0).unwrap().duty_cycle, 0.0);
    shim.pwm_stop(18).unwrap();
    let channel = shim.pwm_change_duty_cycle(18, 55.0).unwrap();
    assert_eq!((channel.duty_cycle, channel.running), (55.0, false));
}

#[test]
fn test_adc_readback_matches_conversion() {
    let mut model = model();
    for volts in [0.0, 0.5, 1.65, 3.0, 3.3, 5.0, -1.0] {
        model.set_adc_channel(0, 0, 3, volts).unwrap();
        let mut shim = model.shim();
        shim.spi_open(0, 0).unwrap();
        let rx = shim.spi_xfer(0, 0, &[0x01, (0x08 | 3) << 4, 0x00]).unwrap();
        let code = (u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2]);
        let expected = (volts.clamp(0.0, 3.3) / 3.3 * 1023.0_f64).round() as i32;
        assert!((i32::from(code) - expected).abs() <= 1, "{volts} V read as {code}");
    }
}

#[test]
fn test_bmp280_over_smbus() {
    let mut model = model();
    let mut shim = model.shim();
    assert_eq!(shim.i2c_read_byte_data(1, 0x76, 0xD0).unwrap(), 0x58);
    assert!(matches!(shim.i2c_read_byte_data(1, 0x10, 0x00), Err(EmuError::NotConfigured(_))));
    assert!(matches!(shim.i2c_read_byte_data(1, 0x02, 0x00), Err(EmuError::Validation(_))));
}

#[test]
fn test_cleanup_is_idempotent() {
    let mut model = model();
    let mut shim = model.shim();
    shim.setmode(NumberingMode::Board);
    shim.setup(12, PinMode::Out, Pull::None, None).unwrap();
    shim.pwm_init(12, 100.0).unwrap();
    shim.cleanup(None).unwrap();
    shim.cleanup(None).unwrap();
    assert!(model.gpio().is_empty());
    assert_eq!(model.pwm().channels().count(), 0);
}

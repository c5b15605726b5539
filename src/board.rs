//! ESP32-C3 peripherals behind the sensor, tone and stats traits
//!
//! The photoresistor divider sits on an ADC1 pin, the passive buzzer on an
//! LEDC low-speed channel. Nothing here is reachable from host builds.

use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::Blocking;
use esp_hal::ledc::{
    LowSpeed, Ledc,
    channel::{self, ChannelHW, ChannelIFace},
    timer::{self, TimerIFace},
};
use esp_hal::peripherals::{ADC1, GPIO2, GPIO6};
use esp_hal::time::Rate;
use log::{debug, warn};
use thiserror_no_std::Error;

use crate::api::DeviceStats;
use crate::sensor::LightSampler;
use crate::tone::PwmOutput;

/// Raw ADC full scale (12-bit conversions)
const ADC_FULL_SCALE: u32 = 4095;

/// Duty resolution programmed into the LEDC timer
const LEDC_MAX_DUTY: u16 = (1 << 10) - 1;

/// Frequency the timer is parked at while silent
const IDLE_FREQ_HZ: u32 = 440;

/// Light sensor on ADC1 channel 2 (GPIO2), widened to 16 bits
pub struct AdcLightSensor {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    pin: AdcPin<GPIO2<'static>, ADC1<'static>>,
}

impl AdcLightSensor {
    pub fn new(
        adc: Adc<'static, ADC1<'static>, Blocking>,
        pin: AdcPin<GPIO2<'static>, ADC1<'static>>,
    ) -> Self {
        Self { adc, pin }
    }
}

impl LightSampler for AdcLightSensor {
    fn read_raw_sample(&mut self) -> u16 {
        // Oneshot conversions finish in a few microseconds.
        let sample = loop {
            if let Ok(value) = self.adc.read_oneshot(&mut self.pin) {
                break value;
            }
        };
        widen_sample(sample)
    }
}

fn widen_sample(sample: u16) -> u16 {
    (sample.min(ADC_FULL_SCALE as u16) as u32 * u16::MAX as u32 / ADC_FULL_SCALE) as u16
}

/// Passive buzzer on LEDC timer 0 / channel 0.
///
/// The timer and channel are reprogrammed for every tone since the carrier
/// frequency is a timer property.
pub struct LedcBuzzer {
    ledc: Ledc<'static>,
    pin: GPIO6<'static>,
    freq_hz: u32,
}

impl LedcBuzzer {
    pub fn new(ledc: Ledc<'static>, pin: GPIO6<'static>) -> Self {
        Self {
            ledc,
            pin,
            freq_hz: IDLE_FREQ_HZ,
        }
    }

    fn program(&mut self, freq_hz: u32, duty: u16) -> Result<(), LedcError> {
        {
            let mut lstimer = self.ledc.timer::<LowSpeed>(timer::Number::Timer0);
            lstimer.configure(timer::config::Config {
                duty: timer::config::Duty::Duty10Bit,
                clock_source: timer::LSClockSource::APBClk,
                frequency: Rate::from_hz(freq_hz),
            })?;

            let mut channel0 = self
                .ledc
                .channel(channel::Number::Channel0, unsafe { self.pin.clone_unchecked() });
            channel0.configure(channel::config::Config {
                timer: &lstimer,
                duty_pct: 0,
                pin_config: channel::config::PinConfig::PushPull,
            })?;
            channel0.set_duty_hw(duty as u32);
        }

        self.freq_hz = freq_hz;
        Ok(())
    }
}

/// Errors from programming the LEDC peripheral
#[derive(Debug, Error)]
pub enum LedcError {
    /// Timer rejected the frequency/resolution pair
    #[error("LEDC timer: {0:?}")]
    Timer(#[from] timer::Error),
    /// Channel could not be bound to the timer
    #[error("LEDC channel: {0:?}")]
    Channel(#[from] channel::Error),
}

impl PwmOutput for LedcBuzzer {
    type Error = LedcError;

    fn max_duty(&self) -> u16 {
        LEDC_MAX_DUTY
    }

    /// Out-of-range carriers cannot be divided down and are reported; the
    /// caller silences the output.
    fn set_pwm(&mut self, freq_hz: u32, duty: u16) -> Result<(), LedcError> {
        debug!("[BUZZ] {} Hz duty {}/{}", freq_hz, duty, LEDC_MAX_DUTY);
        self.program(freq_hz, duty.min(LEDC_MAX_DUTY))
    }

    fn stop_pwm(&mut self) {
        let freq_hz = self.freq_hz;
        if let Err(err) = self.program(freq_hz, 0) {
            warn!("[BUZZ] failed to silence: {:?}", err);
            if let Err(err) = self.program(IDLE_FREQ_HZ, 0) {
                warn!("[BUZZ] failed to park timer: {:?}", err);
            }
        }
    }
}

/// Uptime from the embassy clock, free heap from the global allocator
pub struct EspStats;

impl DeviceStats for EspStats {
    fn heap_free(&self) -> usize {
        esp_alloc::HEAP.free()
    }
}

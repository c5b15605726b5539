//! Ambient light sensor module
//!
//! Turns raw photoresistor samples into a normalized level and a rough lux
//! estimate. The lux figure is a linear approximation, not a photometric
//! measurement.

use serde::Serialize;

use crate::config;

/// Source of raw 16-bit light samples (the ADC on the board)
pub trait LightSampler {
    fn read_raw_sample(&mut self) -> u16;
}

/// Two-point calibration of the sensor divider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    raw_min: u16,
    raw_max: u16,
}

impl Calibration {
    /// Build-time calibration from `config::RAW_MIN` / `config::RAW_MAX`
    pub const DEFAULT: Calibration = Calibration {
        raw_min: config::RAW_MIN,
        raw_max: config::RAW_MAX,
    };

    /// Returns `None` unless `raw_min < raw_max`
    pub const fn new(raw_min: u16, raw_max: u16) -> Option<Self> {
        if raw_min < raw_max {
            Some(Self { raw_min, raw_max })
        } else {
            None
        }
    }

    /// Map a raw sample onto [0.0, 1.0].
    ///
    /// Samples outside the calibrated window are clamped, never extrapolated.
    pub fn normalize(&self, raw: u16) -> f32 {
        let clamped = raw.clamp(self.raw_min, self.raw_max);
        let span = (self.raw_max - self.raw_min) as f32;
        let level = (clamped - self.raw_min) as f32 / span;
        level.clamp(0.0, 1.0)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Linear lux estimate for a normalized level
pub fn estimate_lux(level: f32) -> f32 {
    level * config::LUX_FULL_SCALE
}

/// One sensor query as reported on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    pub raw: u16,
    pub norm: f32,
    pub lux: f32,
}

/// Reads and converts light samples
pub struct SensorReader<S> {
    sampler: S,
    calibration: Calibration,
}

impl<S: LightSampler> SensorReader<S> {
    pub fn new(sampler: S, calibration: Calibration) -> Self {
        Self {
            sampler,
            calibration,
        }
    }

    /// Take a fresh sample from the hardware
    pub fn read_raw(&mut self) -> u16 {
        self.sampler.read_raw_sample()
    }

    pub fn normalize(&self, raw: u16) -> f32 {
        self.calibration.normalize(raw)
    }

    /// Sample, normalize and estimate in one go
    pub fn read(&mut self) -> SensorReading {
        let raw = self.read_raw();
        let norm = self.normalize(raw);
        SensorReading {
            raw,
            norm,
            lux: estimate_lux(norm),
        }
    }
}

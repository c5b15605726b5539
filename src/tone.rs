//! Square-wave tone generation on a PWM output

use core::fmt::Debug;

use log::warn;

/// PWM peripheral driving the buzzer
pub trait PwmOutput {
    type Error: Debug;

    /// Highest duty value the peripheral accepts (100 %)
    fn max_duty(&self) -> u16;
    /// Run the carrier at `freq_hz` with the given raw duty
    fn set_pwm(&mut self, freq_hz: u32, duty: u16) -> Result<(), Self::Error>;
    /// Drive the output low
    fn stop_pwm(&mut self);
}

/// Scale a duty fraction onto the peripheral's duty range.
///
/// Fractions outside [0, 1] (and NaN) are clamped.
pub fn scale_duty(duty: f32, max_duty: u16) -> u16 {
    let duty = if duty.is_nan() { 0.0 } else { duty.clamp(0.0, 1.0) };
    (duty * max_duty as f32) as u16
}

/// Emits or silences a tone on the buzzer
pub struct ToneGenerator<P> {
    pwm: P,
    sounding: bool,
    /// Carrier programmed since the last stop
    engaged: bool,
}

impl<P: PwmOutput> ToneGenerator<P> {
    /// Wrap the PWM output and make sure it starts silent
    pub fn new(pwm: P) -> Self {
        let mut generator = Self {
            pwm,
            sounding: false,
            engaged: false,
        };
        generator.stop();
        generator
    }

    /// Start a tone. A non-positive frequency is a request for silence.
    pub fn start(&mut self, freq_hz: i32, duty: f32) {
        if freq_hz <= 0 {
            self.stop();
            return;
        }
        let raw_duty = scale_duty(duty, self.pwm.max_duty());
        match self.pwm.set_pwm(freq_hz as u32, raw_duty) {
            Ok(()) => {
                self.engaged = true;
                self.sounding = raw_duty > 0;
            }
            Err(err) => {
                warn!("[TONE] cannot sound {} Hz: {:?}", freq_hz, err);
                self.stop();
            }
        }
    }

    /// Silence the buzzer; safe to call at any time
    pub fn stop(&mut self) {
        self.pwm.stop_pwm();
        self.sounding = false;
        self.engaged = false;
    }

    /// Stop the carrier unless it is already stopped
    pub fn silence(&mut self) {
        if self.engaged {
            self.stop();
        }
    }

    pub fn is_sounding(&self) -> bool {
        self.sounding
    }

    pub fn output(&self) -> &P {
        &self.pwm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::convert::Infallible;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Call {
        Set(u32, u16),
        Stop,
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
    }

    impl PwmOutput for Recorder {
        type Error = Infallible;

        fn max_duty(&self) -> u16 {
            u16::MAX
        }

        fn set_pwm(&mut self, freq_hz: u32, duty: u16) -> Result<(), Infallible> {
            self.calls.push(Call::Set(freq_hz, duty));
            Ok(())
        }

        fn stop_pwm(&mut self) {
            self.calls.push(Call::Stop);
        }
    }

    #[test]
    fn duty_scales_to_hardware_range() {
        assert_eq!(scale_duty(0.5, 65535), 32767);
        assert_eq!(scale_duty(1.0, 1023), 1023);
        assert_eq!(scale_duty(0.0, 1023), 0);
        assert_eq!(scale_duty(2.0, 1023), 1023);
        assert_eq!(scale_duty(-1.0, 1023), 0);
        assert_eq!(scale_duty(f32::NAN, 1023), 0);
    }

    #[test]
    fn new_generator_is_silent() {
        let tone = ToneGenerator::new(Recorder::default());
        assert_eq!(tone.output().calls, [Call::Stop]);
        assert!(!tone.is_sounding());
    }

    #[test]
    fn start_configures_carrier() {
        let mut tone = ToneGenerator::new(Recorder::default());
        tone.start(440, 0.5);
        assert_eq!(tone.output().calls.last(), Some(&Call::Set(440, 32767)));
        assert!(tone.is_sounding());
    }

    #[test]
    fn non_positive_frequency_silences() {
        let mut tone = ToneGenerator::new(Recorder::default());
        tone.start(440, 0.5);
        tone.start(0, 0.5);
        assert_eq!(tone.output().calls.last(), Some(&Call::Stop));
        tone.start(-20, 0.5);
        assert_eq!(tone.output().calls.last(), Some(&Call::Stop));
        assert!(!tone.is_sounding());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut tone = ToneGenerator::new(Recorder::default());
        tone.stop();
        tone.stop();
        assert_eq!(tone.output().calls, [Call::Stop, Call::Stop, Call::Stop]);
        assert!(!tone.is_sounding());
    }

    /// Refuses carriers above `limit_hz`, like a timer that cannot divide down
    struct Limited {
        limit_hz: u32,
        calls: Vec<Call>,
    }

    impl PwmOutput for Limited {
        type Error = u32;

        fn max_duty(&self) -> u16 {
            1023
        }

        fn set_pwm(&mut self, freq_hz: u32, duty: u16) -> Result<(), u32> {
            if freq_hz > self.limit_hz {
                return Err(freq_hz);
            }
            self.calls.push(Call::Set(freq_hz, duty));
            Ok(())
        }

        fn stop_pwm(&mut self) {
            self.calls.push(Call::Stop);
        }
    }

    #[test]
    fn rejected_carrier_is_not_sounding() {
        let mut tone = ToneGenerator::new(Limited {
            limit_hz: 20_000,
            calls: Vec::new(),
        });
        tone.start(440, 0.5);
        assert!(tone.is_sounding());
        tone.start(40_000, 0.5);
        assert!(!tone.is_sounding());
        assert_eq!(tone.output().calls, [Call::Stop, Call::Set(440, 511), Call::Stop]);
    }

    #[test]
    fn silence_only_stops_an_engaged_carrier() {
        let mut tone = ToneGenerator::new(Recorder::default());
        tone.silence();
        assert_eq!(tone.output().calls, [Call::Stop]);
        tone.start(440, 0.0);
        assert!(!tone.is_sounding());
        tone.silence();
        assert_eq!(
            tone.output().calls,
            [Call::Stop, Call::Set(440, 0), Call::Stop]
        );
    }
}

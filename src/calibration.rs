//! Per-unit calibration vector and the conversions that depend on it.
//!
//! The instrument reports 14 trim bytes once per connection:
//!
//! | Index | Meaning |
//! |---|---|
//! | 0, 1 | wave generator channel A offset, amplitude |
//! | 2, 3 | wave generator channel B offset, amplitude |
//! | 4, 5 | supply positive, negative |
//! | 6, 7 | oscilloscope 5 V offset A, B |
//! | 8, 9 | oscilloscope 5 V gain A, B |
//! | 10, 11 | oscilloscope 25 V offset A, B |
//! | 12, 13 | oscilloscope 25 V gain A, B |

use serde::Serialize;

use crate::errors::{DriverError, Result};
use crate::frame::{Channel, Polarity, Range, ADC_MID_SCALE, CALIBRATION_RESPONSE_LEN};

pub const CALIBRATION_LEN: usize = 14;

/// One LSB of a trim byte, in volts.
const TRIM_STEP: f64 = 0.001953125;

/// Fixed offset applied to every oscilloscope offset trim.
const SCOPE_OFFSET_BIAS: i32 = -123;

const SUPPLY_POSITIVE_REF: f64 = 5.4;
const SUPPLY_NEGATIVE_REF: f64 = 5.26;
const SUPPLY_SPAN: f64 = 12.175;
const SUPPLY_DAC_STEPS: f64 = 4096.0;

const WAVE_AMPLITUDE_STEPS: f64 = 16383.0;
const WAVE_FULL_SCALE: f64 = 5.0;
const WAVE_OFFSET_BIAS: f64 = 0.4312;
const WAVE_OFFSET_SPAN: f64 = 22.80208;
const WAVE_OFFSET_STEPS: f64 = 4096.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Calibration([u8; CALIBRATION_LEN]);

/// Offset and gain applied when decoding one oscilloscope channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeTrim {
    pub offset: i32,
    pub gain: f64,
}

impl ScopeTrim {
    /// Convert one raw sample word to volts.
    #[inline]
    pub fn volts(&self, hi: u8, lo: u8) -> f64 {
        let magnitude = hi as i32 * 256 + lo as i32;
        self.gain * ((magnitude - ADC_MID_SCALE + self.offset) as f64 / ADC_MID_SCALE as f64)
    }

    /// Decode a raw channel dump (big-endian 16-bit words) into volts.
    pub fn decode(&self, raw: &[u8]) -> Vec<f64> {
        raw.chunks_exact(2)
            .map(|word| self.volts(word[0], word[1]))
            .collect()
    }
}

impl Calibration {
    pub fn new(bytes: [u8; CALIBRATION_LEN]) -> Self {
        Self(bytes)
    }

    /// Build from the 17-byte calibration response; byte 0 is discarded.
    pub fn from_response(response: &[u8]) -> Result<Self> {
        if response.len() != CALIBRATION_RESPONSE_LEN {
            return Err(DriverError::ShortRead {
                expected: CALIBRATION_RESPONSE_LEN,
                received: response.len(),
            });
        }
        let mut bytes = [0u8; CALIBRATION_LEN];
        bytes.copy_from_slice(&response[1..=CALIBRATION_LEN]);
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> &[u8; CALIBRATION_LEN] {
        &self.0
    }

    fn trim(&self, index: usize) -> f64 {
        self.0[index] as f64
    }

    pub fn scope_trim(&self, channel: Channel, range: Range) -> ScopeTrim {
        let ch = channel.index();
        match range {
            Range::V5 => ScopeTrim {
                offset: SCOPE_OFFSET_BIAS + self.0[6 + ch] as i32,
                gain: 1.0 / (0.00048828125 * self.trim(8 + ch) + 0.19),
            },
            Range::V25 => {
                // Channel B's 25 V front end is inverting.
                let sign = if channel == Channel::B { -1.0 } else { 1.0 };
                ScopeTrim {
                    offset: SCOPE_OFFSET_BIAS + self.0[10 + ch] as i32,
                    gain: sign / (0.0001220703125 * self.trim(12 + ch) + 0.036),
                }
            }
        }
    }

    /// Supply DAC code for a target voltage. The caller checks polarity limits.
    pub fn supply_code(&self, polarity: Polarity, volts: f64) -> i16 {
        let trim = self.trim(4 + polarity.index()) * TRIM_STEP;
        let span = match polarity {
            Polarity::Positive => SUPPLY_POSITIVE_REF - trim - volts,
            Polarity::Negative => SUPPLY_NEGATIVE_REF + trim + volts,
        };
        (span * SUPPLY_DAC_STEPS / SUPPLY_SPAN) as i16
    }

    pub fn wave_amplitude_code(&self, channel: Channel, amplitude: f64) -> u32 {
        let amp_trim = self.trim(2 * channel.index() + 1);
        (amplitude / (amp_trim * TRIM_STEP + WAVE_FULL_SCALE) * WAVE_AMPLITUDE_STEPS) as u32
    }

    /// The offset code depends on the amplitude being programmed alongside it.
    pub fn wave_offset_code(&self, channel: Channel, offset: f64, amplitude: f64) -> u32 {
        let offset_trim = self.trim(2 * channel.index());
        let amp_trim = self.trim(2 * channel.index() + 1);
        let volts = amplitude / (1.0 + amp_trim * TRIM_STEP / WAVE_FULL_SCALE)
            + offset
            + WAVE_OFFSET_BIAS
            + offset_trim * TRIM_STEP;
        (volts * WAVE_OFFSET_STEPS / WAVE_OFFSET_SPAN) as u32
    }
}

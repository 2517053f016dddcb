//! Sweep data model: axes, waveform kinds, configuration, and point
//! enumeration.
//!
//! A sweep is the cross product of three [`SweepAxis`] ranges (amplitude,
//! bias, frequency). Enumeration order is fixed and reproducible: amplitude
//! outermost, then bias, then frequency innermost, so a point's `index` is
//! deterministic across runs and output filenames derived from it are
//! stable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One swept dimension: an inclusive `[min, max]` range walked in `step`
/// increments.
///
/// A zero-span axis (`min == max`) yields exactly one value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepAxis {
    /// First value of the range
    pub min: f64,
    /// Inclusive upper bound
    pub max: f64,
    /// Increment between values; must be > 0
    pub step: f64,
}

impl SweepAxis {
    /// Create an axis from its bounds and step.
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Check the axis invariants (`step > 0`, `min <= max`, all finite).
    pub fn validate(&self, name: &str) -> Result<(), String> {
        if !self.min.is_finite() || !self.max.is_finite() || !self.step.is_finite() {
            return Err(format!("{name} axis contains a non-finite value"));
        }
        if self.step <= 0.0 {
            return Err(format!("{name} axis step must be > 0, got {}", self.step));
        }
        if self.min > self.max {
            return Err(format!(
                "{name} axis min {} exceeds max {}",
                self.min, self.max
            ));
        }
        Ok(())
    }

    /// Number of values this axis produces. At least 1 for a valid axis.
    pub fn len(&self) -> usize {
        ((self.max - self.min) / self.step) as usize + 1
    }

    /// True if the axis produces no values (never the case for a valid axis).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the ordered value sequence `min, min+step, ..., <= max`.
    pub fn values(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.min + i as f64 * self.step).collect()
    }
}

/// Waveform shape commanded to the generator.
///
/// The serial protocol addresses these by single-letter codes; see
/// [`WaveformKind::command_code`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveformKind {
    /// Sine wave (device code `Z`)
    Sine,
    /// Square wave (device code `F`)
    Square,
    /// Triangle wave (device code `S`)
    Triangle,
    /// Sawtooth wave (device code `J`)
    Sawtooth,
}

impl WaveformKind {
    /// The single-byte waveform selector used on the wire.
    pub fn command_code(self) -> u8 {
        match self {
            WaveformKind::Sine => b'Z',
            WaveformKind::Square => b'F',
            WaveformKind::Triangle => b'S',
            WaveformKind::Sawtooth => b'J',
        }
    }
}

impl fmt::Display for WaveformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaveformKind::Sine => "sine",
            WaveformKind::Square => "square",
            WaveformKind::Triangle => "triangle",
            WaveformKind::Sawtooth => "sawtooth",
        };
        write!(f, "{name}")
    }
}

impl FromStr for WaveformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sine" => Ok(WaveformKind::Sine),
            "square" => Ok(WaveformKind::Square),
            "triangle" => Ok(WaveformKind::Triangle),
            "sawtooth" => Ok(WaveformKind::Sawtooth),
            other => Err(format!(
                "unknown waveform '{other}' (expected sine, square, triangle or sawtooth)"
            )),
        }
    }
}

/// Immutable snapshot of the parameters for one sweep run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Drive amplitude range in volts
    pub amplitude: SweepAxis,
    /// DC bias range in volts
    pub bias: SweepAxis,
    /// Drive frequency range in hertz
    pub frequency: SweepAxis,
    /// Waveform shape applied at every point
    pub waveform: WaveformKind,
    /// Prefix for per-point output names (`{prefix}_{index}`)
    pub output_prefix: String,
    /// Files the acquisition program writes per point
    pub files_per_point: u32,
    /// Reflectograms captured per file
    pub reflectograms_per_file: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            amplitude: SweepAxis::new(0.0, 10.0, 1.0),
            bias: SweepAxis::new(-5.0, 5.0, 1.0),
            frequency: SweepAxis::new(1.0, 100.0, 10.0),
            waveform: WaveformKind::Sine,
            output_prefix: "experiment".to_string(),
            files_per_point: 3,
            reflectograms_per_file: 10_000,
        }
    }
}

impl SweepConfig {
    /// Check every invariant required before a run may start.
    pub fn validate(&self) -> Result<(), String> {
        self.amplitude.validate("amplitude")?;
        self.bias.validate("bias")?;
        self.frequency.validate("frequency")?;
        if self.output_prefix.is_empty() {
            return Err("output prefix must not be empty".to_string());
        }
        if !self
            .output_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!(
                "output prefix '{}' contains filesystem-unsafe characters",
                self.output_prefix
            ));
        }
        if self.files_per_point == 0 {
            return Err("files_per_point must be at least 1".to_string());
        }
        if self.reflectograms_per_file == 0 {
            return Err("reflectograms_per_file must be at least 1".to_string());
        }
        Ok(())
    }

    /// Total number of points in the cross product.
    pub fn total_points(&self) -> usize {
        self.amplitude.len() * self.bias.len() * self.frequency.len()
    }

    /// Enumerate every point in execution order.
    ///
    /// Amplitude varies outermost, then bias, then frequency; `index` counts
    /// from 0 in that order.
    pub fn points(&self) -> Vec<SweepPoint> {
        let mut points = Vec::with_capacity(self.total_points());
        let mut index = 0;
        for amplitude in self.amplitude.values() {
            for bias in self.bias.values() {
                for frequency in self.frequency.values() {
                    points.push(SweepPoint {
                        amplitude,
                        bias,
                        frequency,
                        index,
                    });
                    index += 1;
                }
            }
        }
        points
    }
}

/// One concrete (amplitude, bias, frequency) combination within a sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepPoint {
    /// Drive amplitude in volts
    pub amplitude: f64,
    /// DC bias in volts
    pub bias: f64,
    /// Drive frequency in hertz
    pub frequency: f64,
    /// 0-based position in enumeration order
    pub index: usize,
}

impl SweepPoint {
    /// Output name for this point, `{prefix}_{index}`.
    pub fn output_name(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_values_inclusive_of_max() {
        let axis = SweepAxis::new(0.0, 2.0, 1.0);
        assert_eq!(axis.len(), 3);
        assert_eq!(axis.values(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn axis_zero_span_yields_single_value() {
        let axis = SweepAxis::new(10.0, 10.0, 1.0);
        assert_eq!(axis.values(), vec![10.0]);
    }

    #[test]
    fn axis_fractional_step() {
        let axis = SweepAxis::new(0.0, 1.0, 0.25);
        assert_eq!(axis.len(), 5);
        let values = axis.values();
        assert_eq!(values[1], 0.25);
        assert_eq!(values[4], 1.0);
    }

    #[test]
    fn axis_rejects_inverted_range() {
        let axis = SweepAxis::new(5.0, 1.0, 1.0);
        assert!(axis.validate("test").is_err());
    }

    #[test]
    fn axis_rejects_nonpositive_step() {
        assert!(SweepAxis::new(0.0, 1.0, 0.0).validate("test").is_err());
        assert!(SweepAxis::new(0.0, 1.0, -0.5).validate("test").is_err());
    }

    #[test]
    fn total_points_is_axis_product() {
        let config = SweepConfig {
            amplitude: SweepAxis::new(0.0, 4.0, 1.0), // 5
            bias: SweepAxis::new(0.0, 1.0, 1.0),      // 2
            frequency: SweepAxis::new(1.0, 21.0, 10.0), // 3
            ..Default::default()
        };
        assert_eq!(config.total_points(), 30);
        assert_eq!(config.points().len(), 30);
    }

    #[test]
    fn enumeration_order_amplitude_outermost() {
        // amplitude {0,1,2}, bias {0}, frequency {10}
        let config = SweepConfig {
            amplitude: SweepAxis::new(0.0, 2.0, 1.0),
            bias: SweepAxis::new(0.0, 0.0, 1.0),
            frequency: SweepAxis::new(10.0, 10.0, 1.0),
            ..Default::default()
        };
        let points = config.points();
        assert_eq!(config.total_points(), 3);
        assert_eq!(points.len(), 3);
        for (i, point) in points.iter().enumerate() {
            assert_eq!(point.index, i);
            assert_eq!(point.amplitude, i as f64);
            assert_eq!(point.bias, 0.0);
            assert_eq!(point.frequency, 10.0);
        }
    }

    #[test]
    fn enumeration_indices_are_stable_and_distinct() {
        let config = SweepConfig::default();
        let first = config.points();
        let second = config.points();
        assert_eq!(first, second);
        for (i, point) in first.iter().enumerate() {
            assert_eq!(point.index, i);
        }
    }

    #[test]
    fn frequency_varies_innermost() {
        let config = SweepConfig {
            amplitude: SweepAxis::new(0.0, 1.0, 1.0),
            bias: SweepAxis::new(0.0, 0.0, 1.0),
            frequency: SweepAxis::new(10.0, 20.0, 10.0),
            ..Default::default()
        };
        let points = config.points();
        assert_eq!(points[0].frequency, 10.0);
        assert_eq!(points[1].frequency, 20.0);
        assert_eq!(points[1].amplitude, 0.0);
        assert_eq!(points[2].amplitude, 1.0);
    }

    #[test]
    fn validate_rejects_bad_prefix() {
        let mut config = SweepConfig::default();
        config.output_prefix = String::new();
        assert!(config.validate().is_err());
        config.output_prefix = "has space".to_string();
        assert!(config.validate().is_err());
        config.output_prefix = "run_7-b".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_counts() {
        let mut config = SweepConfig::default();
        config.files_per_point = 0;
        assert!(config.validate().is_err());
        config.files_per_point = 1;
        config.reflectograms_per_file = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serde_round_trip() {
        let config = SweepConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: SweepConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, back);
    }

    #[test]
    fn waveform_codes_match_device_protocol() {
        assert_eq!(WaveformKind::Sine.command_code(), b'Z');
        assert_eq!(WaveformKind::Square.command_code(), b'F');
        assert_eq!(WaveformKind::Triangle.command_code(), b'S');
        assert_eq!(WaveformKind::Sawtooth.command_code(), b'J');
    }

    #[test]
    fn waveform_parses_from_name() {
        assert_eq!("sine".parse::<WaveformKind>(), Ok(WaveformKind::Sine));
        assert_eq!("Square".parse::<WaveformKind>(), Ok(WaveformKind::Square));
        assert!("noise".parse::<WaveformKind>().is_err());
    }

    #[test]
    fn output_name_uses_prefix_and_index() {
        let point = SweepPoint {
            amplitude: 1.0,
            bias: 0.0,
            frequency: 10.0,
            index: 4,
        };
        assert_eq!(point.output_name("scan"), "scan_4");
    }
}

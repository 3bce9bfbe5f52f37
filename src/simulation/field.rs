//! Time-dependent electric field driving the rotation
//!
//! A [`Field`] is an envelope `t -> amplitude (V/m)` plus a fixed lab-frame
//! polarization direction. The envelope is one of three shapes:
//! - `Gaussian` analytic pulse (peak amplitude, width, peak time)
//! - `Tabulated` samples, linearly interpolated, undefined outside the samples
//! - `Window` constant value on a closed interval ("dc" field), zero elsewhere
//!
//! The propagator never rotates a body's tensors. It rotates the field
//! direction into the body frame instead, see [`Field::rotate`].

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::params::{SPEED_OF_LIGHT, VACUUM_PERMITTIVITY};
use super::states::NVec3;

#[derive(Debug, Error)]
pub enum FieldError {
    #[error("Invalid field parameter: {0}")]
    InvalidParameter(String),

    #[error("A Gaussian pulse needs exactly one of peak amplitude or peak intensity")]
    AmbiguousStrength,

    #[error("Time {t:e} s is outside the tabulated field range [{min:e}, {max:e}] s")]
    OutOfDomain { t: f64, min: f64, max: f64 },

    #[error("Failed to read field file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in field file at line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Peak strength of an analytic pulse, given either way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeakStrength {
    /// V/m
    Amplitude(f64),
    /// W/m^2
    Intensity(f64),
}

/// Envelope shape. Each variant carries only its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldShape {
    Gaussian {
        peak_amplitude: f64,
        sigma: f64,
        t_peak: f64,
    },
    Tabulated {
        times: Vec<f64>,
        values: Vec<f64>,
    },
    Window {
        start: f64,
        end: f64,
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    shape: FieldShape,
    direction: NVec3, // unit vector, lab frame
}

impl Field {
    /// Gaussian pulse `A exp(-(t - t_peak)^2 / (2 sigma^2))` with
    /// `sigma = fwhm / (2 sqrt(2 ln 2))`.
    pub fn gaussian(strength: PeakStrength, fwhm: f64, t_peak: f64) -> Result<Self, FieldError> {
        let peak_amplitude = match strength {
            PeakStrength::Amplitude(a) => a,
            PeakStrength::Intensity(i) => {
                if !(i >= 0.0) {
                    return Err(FieldError::InvalidParameter(format!(
                        "peak intensity must be non-negative, got {i}"
                    )));
                }
                intensity_to_amplitude(i)
            }
        };
        if !peak_amplitude.is_finite() {
            return Err(FieldError::InvalidParameter(format!(
                "peak amplitude must be finite, got {peak_amplitude}"
            )));
        }
        if !(fwhm > 0.0) || !fwhm.is_finite() {
            return Err(FieldError::InvalidParameter(format!(
                "FWHM must be positive, got {fwhm}"
            )));
        }
        if !t_peak.is_finite() {
            return Err(FieldError::InvalidParameter(format!(
                "peak time must be finite, got {t_peak}"
            )));
        }

        let sigma = fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt());
        Ok(Self::with_shape(FieldShape::Gaussian {
            peak_amplitude,
            sigma,
            t_peak,
        }))
    }

    /// Piecewise-linear field through `(time, value)` samples.
    /// Times must be finite and strictly increasing, at least two samples.
    pub fn tabulated(samples: Vec<(f64, f64)>) -> Result<Self, FieldError> {
        if samples.len() < 2 {
            return Err(FieldError::InvalidParameter(format!(
                "a tabulated field needs at least 2 samples, got {}",
                samples.len()
            )));
        }
        for (i, (t, v)) in samples.iter().enumerate() {
            if !t.is_finite() || !v.is_finite() {
                return Err(FieldError::InvalidParameter(format!(
                    "sample {i} is not finite: ({t}, {v})"
                )));
            }
        }
        if let Some(w) = samples.windows(2).position(|w| w[1].0 <= w[0].0) {
            return Err(FieldError::InvalidParameter(format!(
                "sample times must be strictly increasing (sample {} at {:e} s)",
                w + 1,
                samples[w + 1].0
            )));
        }

        let (times, values) = samples.into_iter().unzip();
        Ok(Self::with_shape(FieldShape::Tabulated { times, values }))
    }

    /// Load a tabulated field from a two-column `time value` text file.
    /// Blank lines and `#` comments are skipped, anything else must parse.
    pub fn from_file(path: &Path) -> Result<Self, FieldError> {
        let io_err = |source| FieldError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);

        let mut samples = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            let content = line.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            samples.push(parse_sample(content, idx + 1)?);
        }

        Self::tabulated(samples)
    }

    /// Constant `value` for `start <= t <= end`, zero outside.
    pub fn window(start: f64, end: f64, value: f64) -> Result<Self, FieldError> {
        if !start.is_finite() || !end.is_finite() || !value.is_finite() || start > end {
            return Err(FieldError::InvalidParameter(format!(
                "window needs finite start <= end and a finite value, got [{start}, {end}] -> {value}"
            )));
        }
        Ok(Self::with_shape(FieldShape::Window { start, end, value }))
    }

    /// Replace the polarization direction. The vector is normalized.
    pub fn with_direction(mut self, direction: NVec3) -> Result<Self, FieldError> {
        let norm = direction.norm();
        if !(norm > 0.0) || !norm.is_finite() {
            return Err(FieldError::InvalidParameter(format!(
                "field direction must be a finite non-zero vector, got {direction:?}"
            )));
        }
        self.direction = direction / norm;
        Ok(self)
    }

    /// Re-run the constructor checks on a field that did not go through a
    /// constructor (e.g. one read back from disk). Values are kept as stored.
    pub(crate) fn validated(self) -> Result<Self, FieldError> {
        match &self.shape {
            FieldShape::Gaussian {
                peak_amplitude,
                sigma,
                t_peak,
            } => {
                if !peak_amplitude.is_finite() || !t_peak.is_finite() || !(*sigma > 0.0) || !sigma.is_finite() {
                    return Err(FieldError::InvalidParameter(format!(
                        "invalid Gaussian parameters: amplitude {peak_amplitude}, sigma {sigma}, peak {t_peak}"
                    )));
                }
            }
            FieldShape::Tabulated { times, values } => {
                if times.len() != values.len() {
                    return Err(FieldError::InvalidParameter(format!(
                        "{} sample times but {} values",
                        times.len(),
                        values.len()
                    )));
                }
                Self::tabulated(times.iter().copied().zip(values.iter().copied()).collect())?;
            }
            FieldShape::Window { start, end, value } => {
                Self::window(*start, *end, *value)?;
            }
        }
        if !((self.direction.norm() - 1.0).abs() < 1e-9) {
            return Err(FieldError::InvalidParameter(format!(
                "field direction {:?} is not a unit vector",
                self.direction
            )));
        }
        Ok(self)
    }

    fn with_shape(shape: FieldShape) -> Self {
        Self {
            shape,
            direction: NVec3::z(),
        }
    }

    pub fn shape(&self) -> &FieldShape {
        &self.shape
    }

    pub fn direction(&self) -> &NVec3 {
        &self.direction
    }

    /// Field amplitude (V/m) at time `t`.
    pub fn evaluate(&self, t: f64) -> Result<f64, FieldError> {
        match &self.shape {
            FieldShape::Gaussian {
                peak_amplitude,
                sigma,
                t_peak,
            } => {
                let x = (t - t_peak) / sigma;
                Ok(peak_amplitude * (-0.5 * x * x).exp())
            }
            FieldShape::Tabulated { times, values } => interpolate(times, values, t),
            FieldShape::Window { start, end, value } => {
                if t >= *start && t <= *end {
                    Ok(*value)
                } else {
                    Ok(0.0)
                }
            }
        }
    }

    /// Reference direction rotated by `orientation`. Passing the inverse of a
    /// body's orientation gives the field direction in that body's frame.
    pub fn rotate(&self, orientation: &UnitQuaternion<f64>) -> NVec3 {
        orientation.transform_vector(&self.direction)
    }

    /// Field vector at `t` expressed in the frame reached by `orientation`.
    pub fn vector_at(&self, t: f64, orientation: &UnitQuaternion<f64>) -> Result<NVec3, FieldError> {
        Ok(self.evaluate(t)? * self.rotate(orientation))
    }
}

/// Peak field amplitude (V/m) of a wave with intensity `intensity` (W/m^2).
pub fn intensity_to_amplitude(intensity: f64) -> f64 {
    (2.0 * intensity / (SPEED_OF_LIGHT * VACUUM_PERMITTIVITY)).sqrt()
}

/// Intensity (W/m^2) of a wave with peak field amplitude `amplitude` (V/m).
pub fn amplitude_to_intensity(amplitude: f64) -> f64 {
    0.5 * SPEED_OF_LIGHT * VACUUM_PERMITTIVITY * amplitude * amplitude
}

fn parse_sample(content: &str, line: usize) -> Result<(f64, f64), FieldError> {
    let mut tokens = content.split_whitespace();
    let mut next_number = |what: &str| -> Result<f64, FieldError> {
        let token = tokens.next().ok_or_else(|| FieldError::Parse {
            line,
            message: format!("missing {what} column"),
        })?;
        token.parse::<f64>().map_err(|e| FieldError::Parse {
            line,
            message: format!("invalid {what} '{token}': {e}"),
        })
    };
    let t = next_number("time")?;
    let v = next_number("value")?;
    if let Some(extra) = tokens.next() {
        return Err(FieldError::Parse {
            line,
            message: format!("unexpected third column '{extra}'"),
        });
    }
    Ok((t, v))
}

fn interpolate(times: &[f64], values: &[f64], t: f64) -> Result<f64, FieldError> {
    let (min, max) = (times[0], times[times.len() - 1]);
    if !(t >= min && t <= max) {
        return Err(FieldError::OutOfDomain { t, min, max });
    }

    // first sample strictly after t, clamped so that [hi - 1, hi] brackets t
    let hi = times.partition_point(|&x| x <= t).clamp(1, times.len() - 1);
    let (t0, t1) = (times[hi - 1], times[hi]);
    let (v0, v1) = (values[hi - 1], values[hi]);
    let s = (t - t0) / (t1 - t0);
    Ok(v0 + s * (v1 - v0))
}

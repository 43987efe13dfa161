use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Full steps per motor revolution before microstepping.
pub const MOTOR_STEPS: f64 = 200.0;

/// Microstep multiplier for each step resolution code.
const STEP_DIVISORS: [f64; 14] = [
    1.0, 2.0, 2.5, 4.0, 5.0, 8.0, 10.0, 16.0, 20.0, 32.0, 64.0, 128.0, 256.0, 512.0,
];

/// Microstep division selector (`P45` register), codes 0..=13.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct StepResolution(u8);

impl StepResolution {
    pub fn code(self) -> u8 {
        self.0
    }

    pub fn divisor(self) -> f64 {
        STEP_DIVISORS[self.0 as usize]
    }
}

impl TryFrom<u8> for StepResolution {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        if (code as usize) < STEP_DIVISORS.len() {
            Ok(Self(code))
        } else {
            Err(Error::Configuration(format!(
                "unknown step resolution code {code}"
            )))
        }
    }
}

impl TryFrom<i64> for StepResolution {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self> {
        u8::try_from(code)
            .map_err(|_| Error::Configuration(format!("unknown step resolution code {code}")))
            .and_then(Self::try_from)
    }
}

impl From<StepResolution> for u8 {
    fn from(value: StepResolution) -> Self {
        value.0
    }
}

/// Cached controller-side configuration of one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisConfig {
    axis: u8,
    pub active: bool,
    /// Last observed motion status. Only a status poll or a stop command
    /// changes it.
    pub moving: bool,
    pub frequency: Option<i64>,
    pub ramp_frequency: Option<i64>,
    pub step_resolution: Option<StepResolution>,
    pub run_current: Option<i64>,
}

impl AxisConfig {
    pub fn new(axis: u8) -> Self {
        Self {
            axis,
            active: false,
            moving: false,
            frequency: None,
            ramp_frequency: None,
            step_resolution: None,
            run_current: None,
        }
    }

    pub fn axis(&self) -> u8 {
        self.axis
    }

    /// Physical distance covered by one microstep.
    pub fn step_length(&self, revolution_distance: f64) -> Result<f64> {
        let resolution = self.step_resolution.ok_or_else(|| {
            Error::Configuration(format!("axis {} has no step resolution set", self.axis))
        })?;

        Ok(step_length(revolution_distance, resolution))
    }

    pub(crate) fn apply(&mut self, settings: &AxisSettings) {
        if let Some(active) = settings.active {
            self.active = active;
        }
        if let Some(frequency) = settings.frequency {
            self.frequency = Some(frequency);
        }
        if let Some(ramp_frequency) = settings.ramp_frequency {
            self.ramp_frequency = Some(ramp_frequency);
        }
        if let Some(step_resolution) = settings.step_resolution {
            self.step_resolution = Some(step_resolution);
        }
        if let Some(run_current) = settings.run_current {
            self.run_current = Some(run_current);
        }
    }
}

pub fn step_length(revolution_distance: f64, resolution: StepResolution) -> f64 {
    revolution_distance / (MOTOR_STEPS * resolution.divisor())
}

/// Requested configuration change for one axis. Absent fields are left
/// untouched on the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisSettings {
    pub axis: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_frequency: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_resolution: Option<StepResolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_current: Option<i64>,
    /// Raw step count written to the absolute position register.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl AxisSettings {
    pub fn new(axis: u8) -> Self {
        Self {
            axis,
            ..Default::default()
        }
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn frequency(mut self, frequency: i64) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn ramp_frequency(mut self, ramp_frequency: i64) -> Self {
        self.ramp_frequency = Some(ramp_frequency);
        self
    }

    pub fn step_resolution(mut self, step_resolution: StepResolution) -> Self {
        self.step_resolution = Some(step_resolution);
        self
    }

    pub fn run_current(mut self, run_current: i64) -> Self {
        self.run_current = Some(run_current);
        self
    }

    pub fn position(mut self, position: i64) -> Self {
        self.position = Some(position);
        self
    }
}

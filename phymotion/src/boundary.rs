use serde::{Deserialize, Serialize};

use crate::{
    axis::AxisConfig,
    error::{Error, Result},
};

/// Travel limit of one axis in micrometers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelLimit {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisGeometry {
    /// Micrometers travelled per motor revolution.
    pub revolution_distance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel: Option<TravelLimit>,
}

/// Mechanical description of the stage. Axes past the end of `axes` use
/// `default_revolution_distance` and are unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineProfile {
    pub default_revolution_distance: f64,
    pub axes: Vec<AxisGeometry>,
}

impl Default for MachineProfile {
    fn default() -> Self {
        Self {
            default_revolution_distance: 500.0,
            axes: vec![
                AxisGeometry {
                    revolution_distance: 1000.0,
                    travel: Some(TravelLimit {
                        min: -20000.0,
                        max: 20000.0,
                    }),
                },
                AxisGeometry {
                    revolution_distance: 1000.0,
                    travel: Some(TravelLimit {
                        min: -30000.0,
                        max: 30000.0,
                    }),
                },
                AxisGeometry {
                    revolution_distance: 500.0,
                    travel: Some(TravelLimit {
                        min: -10000.0,
                        max: 10000.0,
                    }),
                },
            ],
        }
    }
}

impl MachineProfile {
    pub fn revolution_distance(&self, axis: u8) -> f64 {
        self.geometry(axis)
            .map(|g| g.revolution_distance)
            .unwrap_or(self.default_revolution_distance)
    }

    pub fn travel(&self, axis: u8) -> Option<TravelLimit> {
        self.geometry(axis).and_then(|g| g.travel)
    }

    fn geometry(&self, axis: u8) -> Option<&AxisGeometry> {
        (axis as usize)
            .checked_sub(1)
            .and_then(|index| self.axes.get(index))
    }
}

/// Travel window of one axis, in micrometers and in microsteps at the
/// step resolution it was computed for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundary {
    pub min_distance: f64,
    pub max_distance: f64,
    pub min_steps: f64,
    pub max_steps: f64,
}

impl Boundary {
    /// Open interval: a target equal to either limit is rejected.
    pub fn contains(&self, steps: i64) -> bool {
        let steps = steps as f64;
        self.min_steps < steps && steps < self.max_steps
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryTable {
    boundaries: Vec<Option<Boundary>>,
}

impl BoundaryTable {
    /// Recomputes every window from the profile and the current step
    /// resolutions. Axes without a resolution get no window; any move on
    /// them fails on the step conversion first.
    pub fn compute(profile: &MachineProfile, axes: &[AxisConfig]) -> Self {
        let boundaries = axes
            .iter()
            .map(|config| {
                let travel = profile.travel(config.axis())?;
                let step_length = config
                    .step_length(profile.revolution_distance(config.axis()))
                    .ok()?;

                Some(Boundary {
                    min_distance: travel.min,
                    max_distance: travel.max,
                    min_steps: travel.min / step_length,
                    max_steps: travel.max / step_length,
                })
            })
            .collect();

        Self { boundaries }
    }

    pub fn get(&self, axis: u8) -> Option<Boundary> {
        (axis as usize)
            .checked_sub(1)
            .and_then(|index| self.boundaries.get(index).copied().flatten())
    }

    pub fn check(&self, axis: u8, target_steps: i64) -> Result<()> {
        match self.get(axis) {
            Some(boundary) if !boundary.contains(target_steps) => Err(Error::MotorOutOfRange {
                axis,
                target: target_steps,
                min: boundary.min_steps,
                max: boundary.max_steps,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::StepResolution;

    fn axes(codes: &[Option<u8>]) -> Vec<AxisConfig> {
        codes
            .iter()
            .enumerate()
            .map(|(i, code)| {
                let mut config = AxisConfig::new(i as u8 + 1);
                config.step_resolution = code.map(|c| StepResolution::try_from(c).unwrap());
                config
            })
            .collect()
    }

    #[test]
    fn test_default_profile_geometry() {
        let profile = MachineProfile::default();
        assert_eq!(profile.revolution_distance(1), 1000.0);
        assert_eq!(profile.revolution_distance(2), 1000.0);
        assert_eq!(profile.revolution_distance(3), 500.0);
        assert_eq!(profile.revolution_distance(5), 500.0);
        assert!(profile.travel(4).is_none());
        assert!(profile.travel(0).is_none());
    }

    #[test]
    fn test_windows_scale_with_resolution() {
        let profile = MachineProfile::default();
        let table = BoundaryTable::compute(&profile, &axes(&[Some(6), Some(6), Some(9), Some(6)]));

        let first = table.get(1).unwrap();
        assert_eq!(first.min_steps, -40000.0);
        assert_eq!(first.max_steps, 40000.0);

        let third = table.get(3).unwrap();
        assert_eq!(third.max_steps, 10000.0 / (500.0 / 6400.0));

        assert!(table.get(4).is_none());
    }

    #[test]
    fn test_open_interval() {
        let profile = MachineProfile::default();
        let table = BoundaryTable::compute(&profile, &axes(&[Some(6)]));

        assert!(table.check(1, 39999).is_ok());
        assert!(table.check(1, -39999).is_ok());
        assert!(matches!(
            table.check(1, 40000),
            Err(Error::MotorOutOfRange { axis: 1, target: 40000, .. })
        ));
        assert!(table.check(1, -40000).is_err());
    }

    #[test]
    fn test_unbounded_axes_unchecked() {
        let profile = MachineProfile::default();
        let table = BoundaryTable::compute(&profile, &axes(&[None, Some(6), Some(6), Some(6)]));

        assert!(table.check(1, i64::MAX).is_ok());
        assert!(table.check(4, i64::MIN).is_ok());
        assert!(table.check(9, 0).is_ok());
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use phymotion::{AxisSettings, StepResolution};

#[derive(Parser, Debug)]
#[command(name = "phymotion", about = "Drive a phyMOTION stepper controller")]
pub struct Cli {
    /// Configuration file, created with defaults when missing.
    #[arg(long, short, env = "CONFIG_PATH", default_value = "default_config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub operation: Operation,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Operation {
    /// Write controller parameters of one axis.
    Configure {
        axis: u8,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        frequency: Option<i64>,
        #[arg(long)]
        ramp_frequency: Option<i64>,
        /// Step resolution code, 0 to 13.
        #[arg(long, value_parser = parse_step_resolution)]
        step_resolution: Option<StepResolution>,
        #[arg(long)]
        run_current: Option<i64>,
    },
    /// Move axes by a distance in micrometers, e.g. `1=250 2=-100`.
    MoveRel {
        #[arg(required = true, value_parser = parse_axis_move)]
        moves: Vec<(u8, f64)>,
    },
    /// Move axes to absolute positions in micrometers.
    MoveAbs {
        #[arg(required = true, value_parser = parse_axis_move)]
        moves: Vec<(u8, f64)>,
        /// Do not append the baseline read to the position history.
        #[arg(long)]
        no_history: bool,
    },
    /// Read one axis position in micrometers, waiting until it is idle.
    Read { axis: u8 },
    /// Read every axis position in raw steps.
    Positions,
    /// Stop one axis, or every axis when none is given.
    Stop { axis: Option<u8> },
    /// Declare the current position zero, on one axis or all of them.
    Zero { axis: Option<u8> },
    /// Write the default configuration file and exit.
    CreateConfig,
}

impl Operation {
    /// Settings record of a `configure` operation.
    pub fn axis_settings(&self) -> Option<AxisSettings> {
        match *self {
            Operation::Configure {
                axis,
                active,
                frequency,
                ramp_frequency,
                step_resolution,
                run_current,
            } => Some(AxisSettings {
                axis,
                active,
                frequency,
                ramp_frequency,
                step_resolution,
                run_current,
                position: None,
            }),
            _ => None,
        }
    }
}

fn parse_axis_move(value: &str) -> Result<(u8, f64), String> {
    let (axis, distance) = value
        .split_once('=')
        .ok_or_else(|| format!("expected AXIS=DISTANCE, got `{value}`"))?;

    let axis = axis
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("invalid axis `{axis}`: {e}"))?;
    let distance = distance
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid distance `{distance}`: {e}"))?;

    if !distance.is_finite() {
        return Err(format!("distance must be finite, got `{distance}`"));
    }

    Ok((axis, distance))
}

fn parse_step_resolution(value: &str) -> Result<StepResolution, String> {
    let code = value
        .parse::<u8>()
        .map_err(|e| format!("invalid step resolution `{value}`: {e}"))?;
    StepResolution::try_from(code).map_err(|e| e.to_string())
}

use std::{
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    axis::{AxisConfig, AxisSettings, StepResolution},
    boundary::{BoundaryTable, MachineProfile},
    codec::{self, SubCommand},
    error::{Error, ProtocolError, Result},
    store::PositionStore,
    transport::{CancelToken, SerialLink, SessionTiming, TransportSession, millis, optional_millis},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerOptions {
    /// Settling time the device needs between configuration writes.
    #[serde(with = "millis")]
    pub config_delay: Duration,
    #[serde(with = "millis")]
    pub status_poll_delay: Duration,
    /// Upper bound on a single motion-complete wait. `None` waits until
    /// the axis stops or the wait is cancelled.
    #[serde(
        with = "optional_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub motion_timeout: Option<Duration>,
    /// Refresh the position vector (with history) after every status poll.
    pub track_positions: bool,
    /// Read P14/P15/P45/P41 of every axis while connecting.
    pub read_parameters_on_connect: bool,
    pub session: SessionTiming,
    pub machine: MachineProfile,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            config_delay: Duration::from_millis(100),
            status_poll_delay: Duration::from_millis(50),
            motion_timeout: None,
            track_positions: true,
            read_parameters_on_connect: false,
            session: SessionTiming::default(),
            machine: MachineProfile::default(),
        }
    }
}

/// Outcome of a write to the absolute position register.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionWrite {
    Applied { steps: i64 },
    /// Refused because the axis was last seen moving. Nothing was sent.
    AxisBusy,
}

pub struct MotionController<S: SerialLink, P: PositionStore> {
    session: TransportSession<S>,
    store: P,
    options: ControllerOptions,
    cancel: CancelToken,

    axes: Vec<AxisConfig>,
    boundaries: BoundaryTable,
    positions: Vec<i64>,
    history: Vec<Vec<i64>>,
}

impl<S: SerialLink, P: PositionStore> MotionController<S, P> {
    /// Queries the axis count, sizes the per-axis state and takes an
    /// initial position snapshot.
    pub fn connect(link: S, store: P, options: ControllerOptions) -> Result<Self> {
        let cancel = CancelToken::new();
        let session =
            TransportSession::new(link, options.session).with_cancel_token(cancel.clone());

        let mut controller = Self {
            session,
            store,
            options,
            cancel,
            axes: Vec::new(),
            boundaries: BoundaryTable::default(),
            positions: Vec::new(),
            history: Vec::new(),
        };

        let count = controller.configure_controller()?;
        controller.axes = (1..=count).map(AxisConfig::new).collect();
        controller.positions = vec![0; count as usize];
        controller.history = vec![Vec::new(); count as usize];

        controller.read_multiple_position(true)?;

        if controller.options.read_parameters_on_connect {
            for axis in 1..=count {
                controller.read_axis_parameters(axis)?;
            }
        }

        controller.update_boundaries();

        info!(axes = count, "Connected to PhyMotion controller");
        Ok(controller)
    }

    fn configure_controller(&mut self) -> Result<u8> {
        let reply = self.session.transact(&SubCommand::SystemStatus.to_string())?;

        let count = reply
            .chars()
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| {
                ProtocolError::Malformed(format!("cannot read axis count from {reply:?}"))
            })?;

        if count == 0 {
            return Err(ProtocolError::Malformed("controller reports no axes".to_string()).into());
        }

        Ok(count as u8)
    }

    pub fn axis_count(&self) -> u8 {
        self.axes.len() as u8
    }

    pub fn axes(&self) -> &[AxisConfig] {
        &self.axes
    }

    pub fn axis_config(&self, axis: u8) -> Result<&AxisConfig> {
        Ok(&self.axes[self.index(axis)?])
    }

    /// Raw step counts from the last successful read, index = axis - 1.
    pub fn positions(&self) -> &[i64] {
        &self.positions
    }

    pub fn position_history(&self, axis: u8) -> Result<&[i64]> {
        Ok(&self.history[self.index(axis)?])
    }

    pub fn boundaries(&self) -> &BoundaryTable {
        &self.boundaries
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    /// Token that aborts motion waits and pending reads from another
    /// thread. Cleared by the next stop command.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn index(&self, axis: u8) -> Result<usize> {
        if axis >= 1 && (axis as usize) <= self.axes.len() {
            Ok(axis as usize - 1)
        } else {
            Err(Error::InvalidAxis {
                axis,
                count: self.axis_count(),
            })
        }
    }

    pub fn step_length(&self, axis: u8) -> Result<f64> {
        let index = self.index(axis)?;
        self.axes[index].step_length(self.options.machine.revolution_distance(axis))
    }

    fn to_steps(&self, axis: u8, distance: f64) -> Result<i64> {
        let steps = (distance / self.step_length(axis)?).trunc();

        // i64::MAX as f64 rounds up to 2^63, which is already out of range.
        if !steps.is_finite() || steps < i64::MIN as f64 || steps >= i64::MAX as f64 {
            return Err(Error::Configuration(format!(
                "distance {distance} on axis {axis} is not a representable step count"
            )));
        }

        Ok(steps as i64)
    }

    fn overflow(axis: u8, target: i64) -> Error {
        Error::MotorOutOfRange {
            axis,
            target,
            min: i64::MIN as f64,
            max: i64::MAX as f64,
        }
    }

    pub fn update_boundaries(&mut self) {
        self.boundaries = BoundaryTable::compute(&self.options.machine, &self.axes);
    }

    fn read_register(&mut self, axis: u8, command: SubCommand) -> Result<i64> {
        let payload = self.session.transact(&command.to_string())?;
        Ok(codec::parse_int(axis, &payload)?)
    }

    /// Single-axis form of [`Self::apply_axis_settings`].
    pub fn set_config_for_axis(&mut self, settings: &AxisSettings) -> Result<()> {
        self.apply_axis_settings(std::slice::from_ref(settings))
    }

    /// Writes each record as one combined frame, pausing between records,
    /// then recomputes the boundaries once. A failing record still leaves
    /// the boundaries matching the records applied before it.
    pub fn apply_axis_settings(&mut self, settings: &[AxisSettings]) -> Result<()> {
        for entry in settings {
            self.index(entry.axis)?;
        }

        let result = self.write_all_axis_settings(settings);
        self.update_boundaries();
        result
    }

    fn write_all_axis_settings(&mut self, settings: &[AxisSettings]) -> Result<()> {
        let mut sent = false;
        for entry in settings {
            if sent {
                thread::sleep(self.options.config_delay);
            }
            sent = self.write_axis_settings(entry)?;
        }
        Ok(())
    }

    fn write_axis_settings(&mut self, settings: &AxisSettings) -> Result<bool> {
        let index = self.index(settings.axis)?;
        let axis = settings.axis;

        let mut commands = Vec::new();
        if let Some(steps) = settings.position {
            commands.push(SubCommand::WritePosition { axis, steps });
        }
        if let Some(active) = settings.active {
            commands.push(if active {
                SubCommand::Activate(axis)
            } else {
                SubCommand::Deactivate(axis)
            });
        }
        if let Some(value) = settings.frequency {
            commands.push(SubCommand::SetFrequency { axis, value });
        }
        if let Some(value) = settings.ramp_frequency {
            commands.push(SubCommand::SetRampFrequency { axis, value });
        }
        if let Some(resolution) = settings.step_resolution {
            commands.push(SubCommand::SetStepResolution {
                axis,
                code: resolution.code(),
            });
        }
        if let Some(value) = settings.run_current {
            commands.push(SubCommand::SetRunCurrent { axis, value });
        }

        if commands.is_empty() {
            debug!(axis, "No configuration fields set, nothing sent");
            return Ok(false);
        }

        self.session.transact(&codec::join(&commands))?;
        self.axes[index].apply(settings);

        info!(axis, "Axis controller update successful");
        Ok(true)
    }

    pub fn read_frequency(&mut self, axis: u8) -> Result<i64> {
        self.index(axis)?;
        self.read_register(axis, SubCommand::ReadFrequency(axis))
    }

    pub fn read_ramp_frequency(&mut self, axis: u8) -> Result<i64> {
        self.index(axis)?;
        self.read_register(axis, SubCommand::ReadRampFrequency(axis))
    }

    /// Refreshes the cached drive parameters of `axis` from the device.
    pub fn read_axis_parameters(&mut self, axis: u8) -> Result<&AxisConfig> {
        let index = self.index(axis)?;

        let frequency = self.read_register(axis, SubCommand::ReadFrequency(axis))?;
        let ramp_frequency = self.read_register(axis, SubCommand::ReadRampFrequency(axis))?;
        let code = self.read_register(axis, SubCommand::ReadStepResolution(axis))?;
        let step_resolution = StepResolution::try_from(code)?;
        let run_current = self.read_register(axis, SubCommand::ReadRunCurrent(axis))?;

        let config = &mut self.axes[index];
        config.frequency = Some(frequency);
        config.ramp_frequency = Some(ramp_frequency);
        config.step_resolution = Some(step_resolution);
        config.run_current = Some(run_current);

        Ok(&self.axes[index])
    }

    /// Polls `<axis>.1!=H` and caches the answer. A silent controller
    /// leaves the cached flag as it was.
    pub fn is_moving(&mut self, axis: u8) -> Result<bool> {
        let index = self.index(axis)?;

        match self.session.transact(&SubCommand::Status(axis).to_string()) {
            Ok(status) => {
                let moving = status.trim() == "E";
                self.axes[index].moving = moving;
                Ok(moving)
            }
            Err(Error::TransportTimeout(waited)) => {
                warn!(axis, ?waited, "Status poll got no reply, keeping cached motion flag");
                Ok(self.axes[index].moving)
            }
            Err(e) => Err(e),
        }
    }

    /// Blocks until `axis` reports not moving.
    pub fn wait_until_idle(&mut self, axis: u8) -> Result<()> {
        let start = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let moving = self.is_moving(axis)?;

            if self.options.track_positions {
                thread::sleep(self.options.status_poll_delay);
                self.read_multiple_position(true)?;
            }
            thread::sleep(self.options.status_poll_delay);

            if !moving {
                return Ok(());
            }

            if let Some(limit) = self.options.motion_timeout {
                let waited = start.elapsed();
                if waited >= limit {
                    return Err(Error::MotionTimeout { axis, waited });
                }
            }
        }
    }

    /// Waits for `axis` to stop, reads its step counter and returns the
    /// position in micrometers.
    pub fn read_position(&mut self, axis: u8) -> Result<f64> {
        let index = self.index(axis)?;
        let step_length = self.step_length(axis)?;

        self.wait_until_idle(axis)?;

        let steps = self.read_register(axis, SubCommand::ReadPosition(axis))?;
        self.positions[index] = steps;

        Ok(steps as f64 * step_length)
    }

    /// Overwrites the absolute position register without polling first.
    pub fn set_position(&mut self, axis: u8, distance: f64) -> Result<PositionWrite> {
        let index = self.index(axis)?;

        if self.axes[index].moving {
            warn!(axis, "Cannot set position of axis since it is moving");
            return Ok(PositionWrite::AxisBusy);
        }

        let steps = self.to_steps(axis, distance)?;
        self.session
            .transact(&SubCommand::WritePosition { axis, steps }.to_string())?;

        debug!(axis, distance, steps, "Position register written");
        Ok(PositionWrite::Applied { steps })
    }

    pub fn set_as_zero_position(&mut self, axis: u8) -> Result<PositionWrite> {
        let outcome = self.set_position(axis, 0.0)?;

        if let PositionWrite::Applied { .. } = outcome {
            self.store.save_last_position(axis, 0.0)?;
            info!(axis, "Zero position set");
        }

        Ok(outcome)
    }

    pub fn set_all_zero(&mut self) -> Result<Vec<PositionWrite>> {
        let outcomes = (1..=self.axis_count())
            .map(|axis| self.set_as_zero_position(axis))
            .collect::<Result<Vec<_>>>()?;

        info!("Zero position set for all axes");
        Ok(outcomes)
    }

    /// Reads every axis's step counter in one frame.
    pub fn read_multiple_position(&mut self, record_history: bool) -> Result<Vec<i64>> {
        self.session.clear_input()?;

        let commands: Vec<_> = (1..=self.axis_count()).map(SubCommand::ReadPosition).collect();
        let values = self.session.transact_values(&codec::join(&commands))?;

        if values.len() != self.axes.len() {
            return Err(ProtocolError::Malformed(format!(
                "expected {} positions, got {}",
                self.axes.len(),
                values.len()
            ))
            .into());
        }

        let positions = values
            .iter()
            .zip(1u8..)
            .map(|(value, axis)| codec::parse_int(axis, value))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if record_history {
            for (history, &position) in self.history.iter_mut().zip(&positions) {
                history.push(position);
            }
        }

        self.positions.clone_from(&positions);
        Ok(positions)
    }

    fn seed_from_store(&mut self, axis: u8) -> Result<()> {
        if let Some(distance) = self.store.load_last_position(axis)? {
            info!(axis, distance, "Initial position loaded");
            if self.set_position(axis, distance)? == PositionWrite::AxisBusy {
                warn!(axis, "Stored position not applied");
            }
        }

        Ok(())
    }

    fn persist_position(&mut self, axis: u8) -> Result<()> {
        let index = self.index(axis)?;
        if self.axes[index].moving {
            return Ok(());
        }

        let distance = self.read_position(axis)?.trunc();
        self.store.save_last_position(axis, distance)?;

        info!(axis, distance, "New position stored");
        Ok(())
    }

    /// Every axis must be known, have a step length and appear at most once
    /// per frame, so the boundary check covers the whole move.
    fn validate_moves(&self, moves: &[(u8, f64)]) -> Result<()> {
        for (i, &(axis, _)) in moves.iter().enumerate() {
            self.step_length(axis)?;

            if moves[..i].iter().any(|&(other, _)| other == axis) {
                return Err(Error::Configuration(format!(
                    "axis {axis} listed more than once in one move"
                )));
            }
        }
        Ok(())
    }

    fn finish_move(&mut self, moves: &[(u8, f64)], commands: &[SubCommand]) -> Result<()> {
        self.session.transact(&codec::join(commands))?;

        if let Some(&(last_axis, _)) = moves.last() {
            self.wait_until_idle(last_axis)?;
        }

        for &(axis, _) in moves {
            self.persist_position(axis)?;
        }

        Ok(())
    }

    /// Moves every listed axis by `distance` micrometers in one frame. The
    /// whole batch is rejected if any target leaves its travel window.
    pub fn move_relative(&mut self, moves: &[(u8, f64)]) -> Result<()> {
        if moves.is_empty() {
            return Ok(());
        }
        self.validate_moves(moves)?;

        let mut commands = Vec::with_capacity(moves.len());
        for &(axis, distance) in moves {
            self.seed_from_store(axis)?;
            self.read_position(axis)?;

            let current = self.positions[axis as usize - 1];
            let steps = self.to_steps(axis, distance)?;
            let target = current
                .checked_add(steps)
                .ok_or_else(|| Self::overflow(axis, current.saturating_add(steps)))?;
            self.boundaries.check(axis, target)?;

            info!(axis, distance, "Axis moving");
            commands.push(SubCommand::MoveRelative { axis, steps });
        }

        self.finish_move(moves, &commands)
    }

    /// Moves every listed axis to `target` micrometers in one frame. Axes
    /// already at their target are sent a zero delta.
    pub fn move_absolute(&mut self, moves: &[(u8, f64)], record_history: bool) -> Result<()> {
        if moves.is_empty() {
            return Ok(());
        }
        self.validate_moves(moves)?;

        for &(axis, _) in moves {
            self.wait_until_idle(axis)?;
            self.seed_from_store(axis)?;
        }

        let baseline = self.read_multiple_position(record_history)?;

        let mut commands = Vec::with_capacity(moves.len());
        for &(axis, target) in moves {
            let end = self.to_steps(axis, target)?;
            self.boundaries.check(axis, end)?;

            let current = baseline[axis as usize - 1];
            let steps = end
                .checked_sub(current)
                .ok_or_else(|| Self::overflow(axis, end))?;
            if steps == 0 {
                info!(axis, "Axis is already at end position");
            } else {
                info!(axis, target, "Axis moving");
            }
            commands.push(SubCommand::MoveRelative { axis, steps });
        }

        self.finish_move(moves, &commands)
    }

    /// Stops `axis` and marks it idle without polling. The flag is a
    /// commanded assumption until the next status poll.
    pub fn stop(&mut self, axis: u8) -> Result<()> {
        let index = self.index(axis)?;
        self.cancel.reset();

        let result = self.session.transact(&SubCommand::Stop(axis).to_string());
        self.axes[index].moving = false;

        result.map(|_| ())
    }

    pub fn stop_all(&mut self) -> Result<()> {
        self.cancel.reset();

        let commands: Vec<_> = (1..=self.axis_count()).map(SubCommand::Stop).collect();
        for config in &mut self.axes {
            config.moving = false;
        }

        self.session.transact(&codec::join(&commands))?;
        info!("All axes stopped");
        Ok(())
    }

    pub fn disconnect(self) -> S {
        info!("Disconnecting from PhyMotion controller");
        self.session.into_inner()
    }
}

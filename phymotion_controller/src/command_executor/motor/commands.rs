use std::io;

use phymotion::{AxisSettings, PositionWrite};
use utilities::command_executor::Command;

use crate::command_executor::motor::PhyMotionHandler;

#[derive(Debug, Clone)]
pub enum MotionCommand {
    Configure(Vec<AxisSettings>),
    MoveRelative(Vec<(u8, f64)>),
    MoveAbsolute {
        moves: Vec<(u8, f64)>,
        record_history: bool,
    },
    ReadPosition(u8),
    ReadAll,
    Stop(u8),
    StopAll,
    Zero(u8),
    ZeroAll,
}

#[derive(Debug)]
pub enum MotionResponse {
    Ok,
    Position(f64),
    Positions(Vec<i64>),
    Zeroed(Vec<PositionWrite>),
}

impl Command for MotionCommand {
    type Response = MotionResponse;
    type Handler = PhyMotionHandler;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response> {
        match self {
            MotionCommand::Configure(settings) => {
                handler.configure(&settings)?;
                Ok(MotionResponse::Ok)
            }
            MotionCommand::MoveRelative(moves) => {
                handler.move_relative(&moves)?;
                Ok(MotionResponse::Ok)
            }
            MotionCommand::MoveAbsolute {
                moves,
                record_history,
            } => {
                handler.move_absolute(&moves, record_history)?;
                Ok(MotionResponse::Ok)
            }
            MotionCommand::ReadPosition(axis) => {
                let position = handler.read_position(axis)?;
                Ok(MotionResponse::Position(position))
            }
            MotionCommand::ReadAll => {
                let positions = handler.read_all()?;
                Ok(MotionResponse::Positions(positions))
            }
            MotionCommand::Stop(axis) => {
                handler.stop(axis)?;
                Ok(MotionResponse::Ok)
            }
            MotionCommand::StopAll => {
                handler.stop_all()?;
                Ok(MotionResponse::Ok)
            }
            MotionCommand::Zero(axis) => {
                let outcome = handler.zero(axis)?;
                Ok(MotionResponse::Zeroed(vec![outcome]))
            }
            MotionCommand::ZeroAll => {
                let outcomes = handler.zero_all()?;
                Ok(MotionResponse::Zeroed(outcomes))
            }
        }
    }
}

use std::io;

use phymotion::{AxisSettings, PositionWrite};
use utilities::command_executor::CommandSender;

use super::commands::{MotionCommand, MotionResponse};

fn unexpected(response: MotionResponse) -> io::Error {
    io::Error::other(format!("Unexpected response type: {response:?}"))
}

#[derive(Clone)]
pub struct MotionCommandSender {
    sender: CommandSender<MotionCommand>,
}

impl MotionCommandSender {
    pub fn new(sender: CommandSender<MotionCommand>) -> Self {
        Self { sender }
    }

    async fn expect_ok(&self, command: MotionCommand) -> io::Result<()> {
        match self.sender.send_command(command).await? {
            MotionResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn configure(&self, settings: Vec<AxisSettings>) -> io::Result<()> {
        self.expect_ok(MotionCommand::Configure(settings)).await
    }

    pub async fn move_relative(&self, moves: Vec<(u8, f64)>) -> io::Result<()> {
        self.expect_ok(MotionCommand::MoveRelative(moves)).await
    }

    pub async fn move_absolute(&self, moves: Vec<(u8, f64)>, record_history: bool) -> io::Result<()> {
        self.expect_ok(MotionCommand::MoveAbsolute {
            moves,
            record_history,
        })
        .await
    }

    pub async fn read_position(&self, axis: u8) -> io::Result<f64> {
        let response = self
            .sender
            .send_command(MotionCommand::ReadPosition(axis))
            .await?;

        match response {
            MotionResponse::Position(position) => Ok(position),
            other => Err(unexpected(other)),
        }
    }

    pub async fn read_all(&self) -> io::Result<Vec<i64>> {
        match self.sender.send_command(MotionCommand::ReadAll).await? {
            MotionResponse::Positions(positions) => Ok(positions),
            other => Err(unexpected(other)),
        }
    }

    pub async fn stop(&self, axis: u8) -> io::Result<()> {
        self.expect_ok(MotionCommand::Stop(axis)).await
    }

    pub async fn stop_all(&self) -> io::Result<()> {
        self.expect_ok(MotionCommand::StopAll).await
    }

    pub async fn zero(&self, axis: Option<u8>) -> io::Result<Vec<PositionWrite>> {
        let command = axis.map_or(MotionCommand::ZeroAll, MotionCommand::Zero);

        match self.sender.send_command(command).await? {
            MotionResponse::Zeroed(outcomes) => Ok(outcomes),
            other => Err(unexpected(other)),
        }
    }
}

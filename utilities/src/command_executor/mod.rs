use std::{
    io,
    sync::mpsc::{Receiver, Sender},
};

use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Request executed on the thread that owns the device.
pub trait Command: Send {
    type Response: Send;
    type Handler: DeviceHandler<Command = Self>;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response>;
}

pub trait DeviceHandler {
    type Command: Command<Handler = Self>;
}

pub struct GenericCommand<C: Command> {
    command: C,
    response_ch: oneshot::Sender<io::Result<C::Response>>,
}

impl<C: Command> GenericCommand<C> {
    pub fn new(command: C, response_ch: oneshot::Sender<io::Result<C::Response>>) -> Self {
        Self {
            command,
            response_ch,
        }
    }

    /// Executes the command and hands the result back. The error returned
    /// here is the command's own failure; a caller that went away is not
    /// an error.
    pub fn execute(self, handler: &mut C::Handler) -> io::Result<()> {
        let result = self.command.execute(handler);

        let failure = result
            .as_ref()
            .err()
            .map(|e| io::Error::new(e.kind(), e.to_string()));

        if self.response_ch.send(result).is_err() {
            debug!("Command caller dropped before the response was ready");
        }

        failure.map_or(Ok(()), Err)
    }
}

/// Owns a device handler and runs commands one at a time, in arrival
/// order, until every [`CommandSender`] is dropped.
pub struct CommandExecutor<H: DeviceHandler + Send + 'static> {
    handler: H,
    commands_ch: Receiver<GenericCommand<H::Command>>,
    sender: Option<Sender<GenericCommand<H::Command>>>,
}

impl<H: DeviceHandler + Send> CommandExecutor<H> {
    pub fn new(handler: H) -> Self {
        let (sender, commands_ch) = std::sync::mpsc::channel();

        Self {
            handler,
            commands_ch,
            sender: Some(sender),
        }
    }

    /// Senders must be taken before the executor starts running.
    pub fn sender(&self) -> Option<CommandSender<H::Command>> {
        self.sender.clone().map(CommandSender::new)
    }

    pub fn run(&mut self) -> io::Result<()> {
        self.sender.take();

        while let Ok(command) = self.commands_ch.recv() {
            if let Err(e) = command.execute(&mut self.handler) {
                warn!(error = %e, "Device command failed");
            }
        }

        debug!("All command senders dropped, executor stopped");
        Ok(())
    }

    pub fn spawn(mut self) -> tokio::task::JoinHandle<io::Result<()>> {
        tokio::task::spawn_blocking(move || self.run())
    }
}

pub struct CommandSender<C: Command> {
    commands_ch: Sender<GenericCommand<C>>,
}

impl<C: Command> Clone for CommandSender<C> {
    fn clone(&self) -> Self {
        Self {
            commands_ch: self.commands_ch.clone(),
        }
    }
}

impl<C: Command> CommandSender<C> {
    pub fn new(commands_ch: Sender<GenericCommand<C>>) -> Self {
        Self { commands_ch }
    }

    pub async fn send_command(&self, command: C) -> io::Result<C::Response> {
        let (response_ch, response_rx) = oneshot::channel();
        let command = GenericCommand::new(command, response_ch);

        self.commands_ch
            .send(command)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Command executor stopped"))?;

        response_rx.await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Command executor dropped the response",
            )
        })?
    }
}

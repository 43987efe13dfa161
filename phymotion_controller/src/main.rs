use anyhow::Context as _;
use clap::Parser as _;
use phymotion::PositionWrite;
use tracing::{info, warn};
use utilities::command_executor::CommandExecutor;

use crate::{
    cli::{Cli, Operation},
    command_executor::motor::{PhyMotionHandler, command_sender::MotionCommandSender},
    config::{ConfigOptions, create_default_config, init_config_with_options},
};

pub mod cli;
pub mod command_executor;
pub mod config;
pub mod logging;
pub mod store;

async fn run_operation(sender: &MotionCommandSender, operation: &Operation) -> anyhow::Result<()> {
    match operation {
        Operation::Configure { .. } => {
            let settings = operation.axis_settings().into_iter().collect();
            sender.configure(settings).await?;
            info!("Axis configuration written");
        }
        Operation::MoveRel { moves } => {
            sender.move_relative(moves.clone()).await?;
        }
        Operation::MoveAbs { moves, no_history } => {
            sender.move_absolute(moves.clone(), !no_history).await?;
        }
        Operation::Read { axis } => {
            let position = sender.read_position(*axis).await?;
            println!("axis {axis}: {position} um");
        }
        Operation::Positions => {
            let positions = sender.read_all().await?;
            for (axis, steps) in (1..).zip(positions) {
                println!("axis {axis}: {steps} steps");
            }
        }
        Operation::Stop { axis: Some(axis) } => sender.stop(*axis).await?,
        Operation::Stop { axis: None } => sender.stop_all().await?,
        Operation::Zero { axis } => {
            let outcomes = sender.zero(*axis).await?;
            let first = axis.unwrap_or(1);
            for (axis, outcome) in (first..).zip(outcomes) {
                if outcome == PositionWrite::AxisBusy {
                    warn!(axis, "Axis busy, zero position not set");
                }
            }
        }
        Operation::CreateConfig => {}
    }

    Ok(())
}

/// Runs `operation` on the executor thread unless `interrupt` completes
/// first, in which case waits are cancelled and every axis is stopped. The
/// executor is always joined before returning.
async fn drive(
    handler: PhyMotionHandler,
    operation: &Operation,
    interrupt: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let cancel = handler.cancel_token();

    let executor = CommandExecutor::new(handler);
    let sender = MotionCommandSender::new(
        executor
            .sender()
            .context("Command executor has no sender")?,
    );
    let executor_handle = executor.spawn();

    let result = tokio::select! {
        biased;

        () = interrupt => {
            warn!("Interrupted, stopping all axes");
            cancel.cancel();
            match sender.stop_all().await {
                Ok(()) => Err(anyhow::anyhow!("Interrupted by user")),
                Err(e) => Err(anyhow::Error::new(e).context("Interrupted, failed to stop axes")),
            }
        }
        result = run_operation(&sender, operation) => result,
    };

    drop(sender);
    executor_handle.await??;

    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.operation, Operation::CreateConfig) {
        let path = create_default_config(Some(&cli.config))?;
        println!("Default configuration written to {}", path.display());
        return Ok(());
    }

    let (_config_manager, config) =
        init_config_with_options(ConfigOptions::with_path(&cli.config)).map_err(|e| {
            eprintln!("Failed to load configuration: {}", e);
            eprintln!("Run `phymotion create-config` to write a default configuration file.");
            e
        })?;

    let _log_guard = logging::init(&config.logging)?;

    let handler = tokio::task::spawn_blocking(move || PhyMotionHandler::connect(&config))
        .await?
        .context("Failed to connect to the PhyMotion controller")?;

    drive(handler, &cli.operation, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Read, Write},
        path::Path,
        time::Duration,
    };

    use phymotion::{ControllerOptions, MotionController, SerialLink, SessionTiming};

    use super::*;
    use crate::{command_executor::motor::Link, store::FilePositionStore};

    /// One-axis controller at step 42 that refuses every other command,
    /// stop included.
    #[derive(Default)]
    struct StubbornLink {
        rx: Vec<u8>,
    }

    impl Read for StubbornLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.rx.len());
            buf[..n].copy_from_slice(&self.rx[..n]);
            self.rx.drain(..n);
            Ok(n)
        }
    }

    impl Write for StubbornLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let reply: &[u8] = match buf {
                b"\x020S:XX\x03" => b"\x02\x061:XX\x03",
                b"\x0201.1P20R:XX\x03" => b"\x02\x0642:XX\x03",
                _ => b"\x02\x15?:XX\x03",
            };
            self.rx.extend_from_slice(reply);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialLink for StubbornLink {
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            Ok(self.rx.len())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.rx.clear();
            Ok(())
        }
    }

    fn handler(positions_dir: &Path) -> PhyMotionHandler {
        let options = ControllerOptions {
            session: SessionTiming {
                read_timeout: Duration::from_millis(20),
                poll_interval: Duration::from_millis(1),
                settle_delay: Duration::ZERO,
            },
            ..Default::default()
        };
        let link: Link = Box::new(StubbornLink::default());
        let controller =
            MotionController::connect(link, FilePositionStore::new(positions_dir), options)
                .unwrap();
        PhyMotionHandler::new(controller)
    }

    #[tokio::test]
    async fn test_operation_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();

        drive(handler(dir.path()), &Operation::Positions, std::future::pending())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_stop_after_interrupt_still_joins_executor() {
        let dir = tempfile::tempdir().unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            drive(handler(dir.path()), &Operation::Positions, std::future::ready(())),
        )
        .await
        .expect("executor was not joined");

        let err = result.unwrap_err();
        assert!(
            format!("{err:#}").contains("Interrupted, failed to stop axes"),
            "{err:#}"
        );
    }
}

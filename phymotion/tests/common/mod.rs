#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::{self, Read, Write},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use phymotion::{ControllerOptions, SerialLink, SessionTiming};

/// Simulated controller state shared between the test and the link.
#[derive(Debug, Default)]
pub struct DeviceState {
    pub axes: u8,
    pub positions: HashMap<u8, i64>,
    pub registers: HashMap<(u8, &'static str), i64>,
    pub active: HashMap<u8, bool>,
    /// Status polls left that still report "moving" for each axis.
    pub busy_polls: HashMap<u8, u32>,
    /// Polls an axis reports "moving" after a relative move.
    pub polls_per_move: u32,
    pub frames: Vec<String>,
    pub nak_next: bool,
    /// Refuse the frame whose 1-based index in `frames` equals this.
    pub nak_frame: Option<usize>,
    pub silent: bool,
    pub silent_status: bool,
    rx: Vec<u8>,
}

impl DeviceState {
    pub fn position(&self, axis: u8) -> i64 {
        self.positions.get(&axis).copied().unwrap_or_default()
    }

    fn answer(&mut self, command: &str) -> Option<String> {
        if command == "S" {
            return Some(self.axes.to_string());
        }

        let (axis, rest) = command.split_once(".1")?;
        let axis: u8 = axis.parse().ok()?;

        if let Some(value) = rest.strip_prefix("P20S") {
            self.positions.insert(axis, value.parse().ok()?);
            return Some(String::new());
        }
        if rest.starts_with('+') || rest.starts_with('-') {
            let delta: i64 = rest.parse().ok()?;
            *self.positions.entry(axis).or_default() += delta;
            self.busy_polls.insert(axis, self.polls_per_move);
            return Some(String::new());
        }

        match rest {
            "P20R" => Some(self.position(axis).to_string()),
            "!=H" => {
                if self.silent_status {
                    return None;
                }
                let polls = self.busy_polls.entry(axis).or_default();
                if *polls > 0 {
                    *polls -= 1;
                    Some("E".to_string())
                } else {
                    Some("N".to_string())
                }
            }
            "MA" => {
                self.active.insert(axis, true);
                Some(String::new())
            }
            "MD" => {
                self.active.insert(axis, false);
                Some(String::new())
            }
            "S" => {
                self.busy_polls.insert(axis, 0);
                Some(String::new())
            }
            _ => {
                for register in ["P14", "P15", "P45", "P41"] {
                    if rest == format!("{register}R") {
                        let value = self.registers.get(&(axis, register)).copied();
                        return Some(value.unwrap_or_default().to_string());
                    }
                    if let Some(value) = rest.strip_prefix(&format!("{register}S")) {
                        self.registers.insert((axis, register), value.parse().ok()?);
                        return Some(String::new());
                    }
                }
                None
            }
        }
    }

    fn receive(&mut self, frame: &[u8]) {
        let text = String::from_utf8_lossy(frame);
        let body = text
            .strip_prefix("\u{2}0")
            .and_then(|t| t.strip_suffix(":XX\u{3}"))
            .unwrap_or_default()
            .to_string();
        self.frames.push(body.clone());

        if self.silent {
            return;
        }
        if self.nak_next || self.nak_frame == Some(self.frames.len()) {
            self.nak_next = false;
            self.rx.extend_from_slice(b"\x02\x15?:XX\x03");
            return;
        }

        let mut answers = Vec::new();
        for command in body.split_whitespace() {
            match self.answer(command) {
                Some(answer) => answers.push(answer),
                None if command.ends_with("!=H") => return,
                None => {
                    self.rx.extend_from_slice(b"\x02\x15?:XX\x03");
                    return;
                }
            }
        }

        let mut reply = vec![0x02];
        let values: Vec<_> = answers.into_iter().filter(|a| !a.is_empty()).collect();
        if values.is_empty() {
            reply.push(0x06);
        }
        for value in values {
            reply.push(0x06);
            reply.extend_from_slice(value.as_bytes());
        }
        reply.extend_from_slice(b":XX\x03");
        self.rx.extend_from_slice(&reply);
    }
}

#[derive(Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    pub fn new(axes: u8) -> Self {
        let state = DeviceState {
            axes,
            polls_per_move: 2,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    pub fn frames(&self) -> Vec<String> {
        self.state().frames.clone()
    }

    pub fn clear_frames(&self) {
        self.state().frames.clear();
    }

    /// Frames that change controller state, skipping polls and reads.
    pub fn commands(&self) -> Vec<String> {
        self.frames()
            .into_iter()
            .filter(|f| !f.ends_with("!=H") && !f.ends_with("P20R"))
            .collect()
    }
}

impl Read for FakeDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        let n = buf.len().min(state.rx.len());
        buf[..n].copy_from_slice(&state.rx[..n]);
        state.rx.drain(..n);
        Ok(n)
    }
}

impl Write for FakeDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state().receive(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for FakeDevice {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.state().rx.len())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.state().rx.clear();
        Ok(())
    }
}

pub fn fast_options() -> ControllerOptions {
    ControllerOptions {
        session: SessionTiming {
            read_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
            settle_delay: Duration::ZERO,
        },
        config_delay: Duration::ZERO,
        status_poll_delay: Duration::ZERO,
        ..Default::default()
    }
}

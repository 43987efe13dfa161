use std::{collections::HashMap, io};

/// Last known position per axis, in micrometers. Read before every move
/// to seed the controller and written after every completed move.
pub trait PositionStore {
    fn load_last_position(&mut self, axis: u8) -> io::Result<Option<f64>>;
    fn save_last_position(&mut self, axis: u8, distance: f64) -> io::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    positions: HashMap<u8, f64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, axis: u8) -> Option<f64> {
        self.positions.get(&axis).copied()
    }
}

impl PositionStore for MemoryStore {
    fn load_last_position(&mut self, axis: u8) -> io::Result<Option<f64>> {
        Ok(self.get(axis))
    }

    fn save_last_position(&mut self, axis: u8, distance: f64) -> io::Result<()> {
        self.positions.insert(axis, distance);
        Ok(())
    }
}

impl<T: PositionStore + ?Sized> PositionStore for &mut T {
    fn load_last_position(&mut self, axis: u8) -> io::Result<Option<f64>> {
        (**self).load_last_position(axis)
    }

    fn save_last_position(&mut self, axis: u8, distance: f64) -> io::Result<()> {
        (**self).save_last_position(axis, distance)
    }
}

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use phymotion::PositionStore;
use tracing::debug;

/// Keeps the last known position of each axis in
/// `<dir>/previous_position_<axis>.txt`, one decimal number per file.
#[derive(Debug, Clone)]
pub struct FilePositionStore {
    dir: PathBuf,
}

impl FilePositionStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, axis: u8) -> PathBuf {
        self.dir.join(format!("previous_position_{axis}.txt"))
    }
}

impl PositionStore for FilePositionStore {
    fn load_last_position(&mut self, axis: u8) -> io::Result<Option<f64>> {
        let path = self.path_for(axis);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        trimmed.parse::<f64>().map(Some).map_err(|e| {
            io::Error::new(
                ErrorKind::InvalidData,
                format!("{}: {e}", path.display()),
            )
        })
    }

    fn save_last_position(&mut self, axis: u8, distance: f64) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(axis);
        fs::write(&path, distance.to_string())?;
        debug!(axis, distance, path = %path.display(), "Saved last position");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_means_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FilePositionStore::new(dir.path());

        assert_eq!(store.load_last_position(1).unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FilePositionStore::new(dir.path().join("positions"));

        store.save_last_position(2, -1250.0).unwrap();
        store.save_last_position(3, 0.0).unwrap();

        assert_eq!(store.load_last_position(2).unwrap(), Some(-1250.0));
        assert_eq!(store.load_last_position(3).unwrap(), Some(0.0));
        assert_eq!(
            fs::read_to_string(dir.path().join("positions/previous_position_2.txt")).unwrap(),
            "-1250"
        );
    }

    #[test]
    fn test_garbage_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FilePositionStore::new(dir.path());
        fs::write(store.path_for(1), "twelve").unwrap();

        let err = store.load_last_position(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_whitespace_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FilePositionStore::new(dir.path());
        fs::write(store.path_for(1), "510.0\n").unwrap();

        assert_eq!(store.load_last_position(1).unwrap(), Some(510.0));
    }
}

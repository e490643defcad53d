use log::{debug, error, warn};
use serde_yml;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::Measurement;
use crate::today;

/// Persistence boundary for the counter state, a single `measurement.yaml`
/// document in the configuration directory.
pub struct MeasurementStore {
    path: PathBuf,
}

impl MeasurementStore {
    pub fn new(dir: &Path) -> Self {
        return MeasurementStore { path: dir.join("measurement.yaml") };
    }

    /// Read the persisted counters. A missing or unusable document falls
    /// back to an empty one dated today.
    pub fn load(&self) -> Measurement {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("No '{}' found, using defaults", self.path.display());
                return Measurement::new(today());
            }
            Err(e) => {
                error!("Unable to read '{}': '{}', using defaults", self.path.display(), e);
                return Measurement::new(today());
            }
        };

        return match serde_yml::from_str(&contents) {
            Ok(measurement) => {
                debug!("Measurement: {:?}", measurement);
                measurement
            }
            Err(e) => {
                error!("'{}' does not parse: '{}', starting over with defaults", self.path.display(), e);
                Measurement::new(today())
            }
        };
    }

    /// Overwrite the document atomically: write a sibling file first, then
    /// rename it over the old one so a crash never leaves half a document.
    pub fn save(&self, measurement: &Measurement) -> std::io::Result<()> {
        let contents = serde_yml::to_string(measurement)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;

        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, contents.as_bytes())?;
        fs::rename(&tmp, &self.path)?;

        debug!("Updated '{}'", self.path.display());
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ChannelCounter;
    use chrono::NaiveDate;

    #[test]
    fn test_load_missing_file_defaults_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MeasurementStore::new(dir.path());

        let measurement = store.load();
        assert!(measurement.channels.is_empty());
        assert_eq!(measurement.date, today());
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MeasurementStore::new(dir.path());

        let mut measurement = Measurement::new(NaiveDate::from_ymd_opt(2024, 5, 17).unwrap());
        measurement.channels.insert(1, ChannelCounter { pulsecount: 120, total: 770123, today: 42 });
        measurement.channels.insert(2, ChannelCounter { pulsecount: 0, total: 0, today: 0 });
        store.save(&measurement).unwrap();

        assert_eq!(store.load(), measurement);
    }

    #[test]
    fn test_load_unparsable_document_defaults_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("measurement.yaml"), "date: not-a-date\n").unwrap();

        let store = MeasurementStore::new(dir.path());
        let measurement = store.load();
        assert!(measurement.channels.is_empty());
        assert_eq!(measurement.date, today());
    }

    #[test]
    fn test_save_replaces_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = MeasurementStore::new(dir.path());

        let mut measurement = Measurement::new(NaiveDate::from_ymd_opt(2024, 5, 17).unwrap());
        store.save(&measurement).unwrap();

        measurement.channels.insert(1, ChannelCounter { pulsecount: 5, total: 5, today: 5 });
        store.save(&measurement).unwrap();

        assert_eq!(store.load(), measurement);
    }
}
